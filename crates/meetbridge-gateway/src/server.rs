//! HTTP server implementation using Axum.

use std::sync::Arc;

use axum::response::Html;
use axum::{
    Router,
    routing::{get, post},
};
use meetbridge_core::clock::Clock;
use meetbridge_core::config::GatewayConfig;
use meetbridge_pipeline::PipelineHandle;
use meetbridge_scheduler::Notifier;
use meetbridge_store::RecordStore;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared state for the gateway server.
#[derive(Clone)]
pub struct AppState {
    pub gateway_config: GatewayConfig,
    pub start_time: std::time::Instant,
    pub store: Arc<RecordStore>,
    /// Notification history for the dashboard feed.
    pub notifier: Arc<Notifier>,
    /// Uploads and re-drives go through the pipeline queue.
    pub pipeline: PipelineHandle,
    pub clock: Arc<dyn Clock>,
}

/// Serve the dashboard HTML page.
async fn dashboard_page() -> Html<&'static str> {
    Html(super::dashboard::dashboard_html())
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    build_router_from_arc(Arc::new(state))
}

pub fn build_router_from_arc(shared: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/api/v1/stats", get(super::routes::stats))
        .route("/api/v1/meetings", get(super::routes::list_meetings))
        .route("/api/v1/meetings/{id}", get(super::routes::get_meeting))
        .route("/api/v1/retries", get(super::routes::list_retries))
        .route(
            "/api/v1/retries/{id}/retry",
            post(super::routes::retry_entry_now),
        )
        .route(
            "/api/v1/retries/{id}/delete",
            post(super::routes::delete_retry_entry),
        )
        .route("/api/v1/items/{id}/retry", post(super::routes::retry_item))
        .route("/api/v1/upload", post(super::routes::upload_transcript))
        .route(
            "/api/v1/process-unprocessed",
            post(super::routes::process_unprocessed),
        )
        .route(
            "/api/v1/notifications",
            get(super::routes::notifications),
        );

    let public = Router::new()
        .route("/", get(dashboard_page))
        .route("/meetings/{id}", get(dashboard_page))
        .route("/health", get(super::routes::health_check));

    api.merge(public)
        .layer(
            CorsLayer::new()
                .allow_methods([axum::http::Method::GET, axum::http::Method::POST, axum::http::Method::OPTIONS])
                .allow_headers(Any)
                .allow_origin(Any)
                .max_age(std::time::Duration::from_secs(3600)),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(shared)
}

/// Start the HTTP server and serve until `cancel` fires.
pub async fn start(state: Arc<AppState>, cancel: CancellationToken) -> anyhow::Result<()> {
    let addr = format!("{}:{}", state.gateway_config.host, state.gateway_config.port);
    let app = build_router_from_arc(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("🌐 Dashboard listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    tracing::info!("🌐 Dashboard stopped");
    Ok(())
}
