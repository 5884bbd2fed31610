// UTC timestamp parsing, per §4.1: "Accepted formats on read are either an
// RFC-3339-like ISO string ... or numeric epoch seconds; parse failures on a
// given tenant skip that tenant and log."
//
// Grounded in the Python original's `_parse_ts_utc` (cold_storage_manager.py):
// accept a `Z`-suffixed or offset-bearing ISO string, treat a naive string as
// UTC, or accept a bare epoch-seconds number.

use chrono::{DateTime, NaiveDateTime, Utc};

/// Parse a stored timestamp value into a UTC instant. Returns `None` on any
/// failure — callers log a warning and skip the record, never panic.
pub fn parse_utc(value: &str) -> Option<DateTime<Utc>> {
    let trimmed = value.trim();

    if let Ok(epoch) = trimmed.parse::<f64>() {
        let secs = epoch.trunc() as i64;
        let nanos = ((epoch.fract()) * 1_000_000_000.0) as u32;
        return DateTime::from_timestamp(secs, nanos);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }

    // Naive (no offset, no 'Z') -> assume UTC.
    if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(DateTime::from_naive_utc_and_offset(naive, Utc));
    }

    None
}

/// Format a UTC instant the way snapshot filenames need it: `yyyymmdd_HHMMSS`.
pub fn format_snapshot_suffix(now: DateTime<Utc>) -> String {
    now.format("%Y%m%d_%H%M%S").to_string()
}
