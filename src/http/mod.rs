//! Async HTTP API layer (§4.10, §6). Thin axum routing and
//! request/response plumbing over the synchronous, rayon-driven core —
//! handlers hand CPU-bound work to `tokio::task::spawn_blocking` and
//! never run pipeline code directly on the async runtime.

mod handlers;
mod sse;
pub mod state;

pub use state::AppState;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Build the full router (§6). All routes share one [`AppState`].
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/image-matcher", post(handlers::match_single))
        .route("/image-matcher-multiple", post(handlers::match_multiple))
        .route("/image-matcher/start", post(handlers::match_start))
        .route("/image-matcher/progress", get(handlers::progress_stream))
        .route("/image-matcher/status", get(handlers::session_status))
        .route("/image-matcher/:session_id/data", get(handlers::session_data))
        .route("/stored_images/:session_id/:filename", get(handlers::stored_image))
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config).post(handlers::post_config))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve the router on `host:port`, blocking until the server
/// shuts down.
pub async fn serve(state: AppState, host: &str, port: u16) -> std::io::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind((host, port)).await?;
    tracing::info!(%host, %port, "listening");
    axum::serve(listener, app).await
}
