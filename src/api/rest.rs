// Thin REST surface (§6), built the way `api::rest::server` builds its
// router elsewhere in this codebase: `Router` + `tower_http`
// `CorsLayer`/`TraceLayer`/`TimeoutLayer`/`RequestBodyLimitLayer`, state
// injected via `State<Arc<AppState>>`. Unlike a sprawling admin/monitoring/
// pool/cluster surface, this exposes only the two data-plane operations
// named below: `/v1/query` and `/v1/write`. Tenant/schema CRUD is
// explicitly out of scope.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, Method};
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::error::{DbError, Result};
use crate::query_executor::QueryExecutor;
use crate::standby::StandbyReadPath;
use crate::write_pipeline::WritePipeline;

pub struct AppState {
    pub query_executor: Arc<QueryExecutor>,
    pub write_pipeline: Arc<WritePipeline>,
    pub standby: Arc<StandbyReadPath>,
}

pub fn build_router(state: Arc<AppState>, request_timeout: Duration, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/v1/query", post(query_handler))
        .route("/v1/write", post(write_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(request_timeout))
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(
            CorsLayer::new()
                .allow_methods([Method::POST, Method::OPTIONS])
                .allow_headers(Any)
                .allow_origin(Any),
        )
}

/// `{ "tenant_name", "api_key", "sql_query" }`, per §6.
#[derive(Debug, Deserialize)]
struct DbRequest {
    tenant_name: String,
    api_key: String,
    sql_query: String,
}

/// A region header selects the standby read path (`standby-read-handler.py`
/// is reached only when the primary region is unreachable); any other
/// value, or its absence, routes through the normal query executor.
fn region_from_headers(headers: &HeaderMap) -> String {
    headers
        .get("x-region")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("primary")
        .to_string()
}

async fn query_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<DbRequest>,
) -> Result<Json<Value>> {
    let region = region_from_headers(&headers);

    let response = if region == "standby" {
        state.standby.execute(&req.tenant_name, &req.api_key, &req.sql_query).await?
    } else {
        state
            .query_executor
            .execute(&req.tenant_name, &req.api_key, &req.sql_query)
            .await?
    };

    Ok(Json(json!({
        "success": response.success,
        "data": response.data,
        "row_count": response.row_count,
        "storage_tier": response.storage_tier,
        "db_source": response.db_source.as_str(),
        "region": region,
        "cache_hit": response.cache_hit,
    })))
}

async fn write_handler(State(state): State<Arc<AppState>>, Json(req): Json<DbRequest>) -> Result<Json<Value>> {
    let response = state
        .write_pipeline
        .commit(&req.tenant_name, &req.api_key, &req.sql_query)
        .await?;

    Ok(Json(json!({
        "success": true,
        "rows_affected": response.rows_affected,
        "snapshot_created": response.snapshot_filename,
        "snapshot_s3_key": response.snapshot_s3_key,
        "last_updated_at": response.timestamp,
        "storage_tier": response.storage_tier,
        "db_source": response.db_source,
    })))
}
