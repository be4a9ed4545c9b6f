use crate::AppState;
use axum::{Json, extract::State, response::IntoResponse};
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub storage: String,
    pub upload_pool_size: usize,
    pub relay_connections: usize,
    pub version: String,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "System health status", body = HealthResponse)
    ),
    tag = "system"
)]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        storage: state.storage.backend().to_string(),
        upload_pool_size: state.uploads.pool_size(),
        relay_connections: state.relay.connection_count(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
