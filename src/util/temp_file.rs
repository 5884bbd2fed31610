// Scoped temporary-file guard, per §7's propagation policy: a scoped
// download "guarantees deletion on all exit paths" (§4.3). Grounded in the
// `finally`-block cleanup in write_handler.py, expressed as RAII rather than
// a try/finally, matching this codebase's connection-pool checkout guards.

use std::path::{Path, PathBuf};

/// Deletes the wrapped path when dropped, including on an early return or a
/// panic unwinding through the holder. Synchronous `remove_file` is used in
/// `Drop` because `Drop` cannot be async; callers that need to observe
/// cleanup completion should call `into_inner` and delete explicitly instead.
pub struct TempFileGuard {
    path: PathBuf,
    armed: bool,
}

impl TempFileGuard {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            armed: true,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Disarm the guard, returning the path without deleting it. Used when
    /// ownership of the file is being handed off (rare in this codebase —
    /// most call sites want the file gone).
    pub fn into_inner(mut self) -> PathBuf {
        self.armed = false;
        std::mem::take(&mut self.path)
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if self.armed && !self.path.as_os_str().is_empty() {
            if let Err(err) = std::fs::remove_file(&self.path) {
                if err.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %self.path.display(), error = %err, "temp file cleanup failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_removes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scratch.db");
        std::fs::write(&path, b"x").unwrap();
        {
            let _guard = TempFileGuard::new(path.clone());
            assert!(path.exists());
        }
        assert!(!path.exists());
    }

    #[test]
    fn into_inner_skips_deletion() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keep.db");
        std::fs::write(&path, b"x").unwrap();
        let guard = TempFileGuard::new(path.clone());
        let returned = guard.into_inner();
        assert_eq!(returned, path);
        assert!(path.exists());
    }

    #[test]
    fn missing_file_on_drop_does_not_panic() {
        let path = PathBuf::from("/tmp/octodb-nonexistent-guard-target");
        let _guard = TempFileGuard::new(path);
    }
}
