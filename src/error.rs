// Error taxonomy for the tenant data plane.
//
// Mirrors the §7 error taxonomy: each variant maps to exactly
// one user-visible status code via `status_code()`. Infrastructure variants
// (Storage, Metadata, Bus, Engine, Serialization, Config) all collapse onto
// `StorageFailed` (500) at the HTTP boundary — they're kept distinct
// internally so logs say which collaborator actually failed.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("authentication failed")]
    AuthFailed,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("query failed: {0}")]
    QueryFailed(String),

    #[error("storage failed: {0}")]
    Storage(String),

    #[error("metadata store failed: {0}")]
    Metadata(String),

    #[error("message bus failed: {0}")]
    Bus(String),

    #[error("embedded engine error: {0}")]
    Engine(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("unsafe identifier: {0}")]
    UnsafeIdentifier(String),

    #[error("rehydration failed: {0}")]
    RehydrationFailed(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(String),
}

impl Clone for DbError {
    fn clone(&self) -> Self {
        match self {
            DbError::BadRequest(s) => DbError::BadRequest(s.clone()),
            DbError::AuthFailed => DbError::AuthFailed,
            DbError::NotFound(s) => DbError::NotFound(s.clone()),
            DbError::QueryFailed(s) => DbError::QueryFailed(s.clone()),
            DbError::Storage(s) => DbError::Storage(s.clone()),
            DbError::Metadata(s) => DbError::Metadata(s.clone()),
            DbError::Bus(s) => DbError::Bus(s.clone()),
            DbError::Engine(s) => DbError::Engine(s.clone()),
            DbError::Serialization(s) => DbError::Serialization(s.clone()),
            DbError::UnsafeIdentifier(s) => DbError::UnsafeIdentifier(s.clone()),
            DbError::RehydrationFailed(s) => DbError::RehydrationFailed(s.clone()),
            DbError::Config(s) => DbError::Config(s.clone()),
            DbError::Io(s) => DbError::Io(s.clone()),
        }
    }
}

impl DbError {
    /// HTTP status code for this error, per §7.
    pub fn status_code(&self) -> u16 {
        match self {
            DbError::BadRequest(_) => 400,
            DbError::AuthFailed => 401,
            DbError::NotFound(_) => 404,
            DbError::QueryFailed(_) => 400,
            DbError::UnsafeIdentifier(_) => 400,
            DbError::Storage(_)
            | DbError::Metadata(_)
            | DbError::Bus(_)
            | DbError::Engine(_)
            | DbError::Serialization(_)
            | DbError::Config(_)
            | DbError::Io(_) => 500,
            DbError::RehydrationFailed(_) => 500,
        }
    }
}

impl From<std::io::Error> for DbError {
    fn from(e: std::io::Error) -> Self {
        DbError::Io(e.to_string())
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(e: rusqlite::Error) -> Self {
        DbError::Engine(e.to_string())
    }
}

impl From<serde_json::Error> for DbError {
    fn from(e: serde_json::Error) -> Self {
        DbError::Serialization(e.to_string())
    }
}

/// Renders as `{"success": false, "error": "<message>"}` at the HTTP
/// boundary — the JSON error shape shared by `/v1/query` and `/v1/write`
/// per §6.
impl IntoResponse for DbError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = serde_json::json!({
            "success": false,
            "error": self.to_string(),
        });
        (status, axum::Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, DbError>;
