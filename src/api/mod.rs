//! External HTTP surface (§6). Tenant/schema CRUD is explicitly out of
//! scope — this only exposes the two data-plane operations (`/v1/query`,
//! `/v1/write`) that the rest of the crate implements.

pub mod rest;

pub use rest::{build_router, AppState};
