//! Health-check responder for hosting platforms that poll a port.

use axum::Router;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub fn health_routes() -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
}

async fn index() -> impl IntoResponse {
    "Gen Alpha Slack Bot is running!"
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Serve the health routes on `0.0.0.0:{port}` until `cancel` fires.
pub async fn serve(port: u16, cancel: CancellationToken) -> std::io::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "Health check server listening");
    axum::serve(listener, health_routes())
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
}
