#![forbid(unsafe_code)]

//! HTTP surface of the gateway.
//!
//! - `GET /healthcheck` - liveness probe
//! - `POST /table/create` - create the table and its stats family if absent
//! - `DELETE /table/delete` - delete the table if present
//! - `GET /data/list` - every `data#` row
//! - `POST /data/insert` - write one new row

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use rowgate_contracts::row::{ListedRow, Row};
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::{GatewayError, GatewayRuntime};

pub type SharedRuntime = Arc<GatewayRuntime>;

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        error!(error = %self, "request failed");
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
    }
}

pub fn router(runtime: SharedRuntime) -> Router {
    Router::new()
        .route("/healthcheck", get(healthcheck))
        .route("/table/create", post(create_table))
        .route("/table/delete", delete(delete_table))
        .route("/data/list", get(list_rows))
        .route("/data/insert", post(insert_row))
        .layer(TraceLayer::new_for_http())
        .with_state(runtime)
}

/// Runs a store call on the blocking pool; store clients block on I/O.
async fn run_blocking<T, F>(runtime: SharedRuntime, call: F) -> Result<T, GatewayError>
where
    T: Send + 'static,
    F: FnOnce(&GatewayRuntime) -> Result<T, GatewayError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || call(&runtime))
        .await
        .map_err(|err| GatewayError::Task(err.to_string()))?
}

async fn healthcheck() -> &'static str {
    "ok"
}

async fn create_table(State(runtime): State<SharedRuntime>) -> Result<&'static str, GatewayError> {
    let outcome = run_blocking(runtime, GatewayRuntime::create_table).await?;
    Ok(outcome.as_text())
}

async fn delete_table(State(runtime): State<SharedRuntime>) -> Result<&'static str, GatewayError> {
    let outcome = run_blocking(runtime, GatewayRuntime::delete_table).await?;
    Ok(outcome.as_text())
}

async fn list_rows(
    State(runtime): State<SharedRuntime>,
) -> Result<Json<Vec<ListedRow>>, GatewayError> {
    run_blocking(runtime, GatewayRuntime::list_rows)
        .await
        .map(Json)
}

async fn insert_row(State(runtime): State<SharedRuntime>) -> Result<Json<Row>, GatewayError> {
    run_blocking(runtime, GatewayRuntime::insert_row)
        .await
        .map(Json)
}
