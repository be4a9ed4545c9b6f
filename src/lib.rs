pub mod api;
pub mod config;
pub mod infrastructure;
pub mod models;
pub mod services;
pub mod utils;

use crate::config::AppConfig;
use crate::services::relay::LocationRelay;
use crate::services::storage::ObjectStore;
use crate::services::upload::UploadOrchestrator;
use axum::{
    Router,
    middleware::from_fn,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::upload::upload_images,
        api::handlers::health::health_check,
    ),
    components(
        schemas(
            api::handlers::upload::ImageBatchForm,
            api::handlers::health::HealthResponse,
            models::PositionUpdate,
            models::Coordinate,
        )
    ),
    tags(
        (name = "uploads", description = "Feed image uploads"),
        (name = "system", description = "Service health")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn ObjectStore>,
    pub uploads: Arc<UploadOrchestrator>,
    pub relay: Arc<LocationRelay>,
    pub config: AppConfig,
}

impl AppState {
    pub fn new(storage: Arc<dyn ObjectStore>, config: AppConfig) -> Self {
        let uploads = UploadOrchestrator::new(storage.clone(), config.upload_pool_size)
            .with_orphan_cleanup(config.cleanup_orphans);
        let relay = LocationRelay::new(config.relay_queue_capacity);

        Self {
            storage,
            uploads: Arc::new(uploads),
            relay: Arc::new(relay),
            config,
        }
    }
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(api::handlers::health::health_check))
        .route(
            "/opened/image",
            post(api::handlers::upload::upload_images).layer(
                axum::extract::DefaultBodyLimit::max(state.config.upload_body_limit()),
            ),
        )
        .route("/location", get(api::handlers::location::location_socket))
        .layer(from_fn(api::middleware::request_id::request_id_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
