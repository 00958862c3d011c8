//! Scrape endpoint.
//!
//! Serves the OpenMetrics rendering of a registry. The text is produced
//! fresh on every request; the handler never holds a lock while responding.

use std::net::SocketAddr;

use axum::Router;
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use beacon_metrics::Registry;
use beacon_metrics::export::openmetrics;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::{BridgeError, BridgeResult};

/// Health check handler.
pub async fn health_check() -> &'static str {
    "ok"
}

/// Renders every metric in the registry.
pub async fn scrape(State(registry): State<Registry>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, openmetrics::CONTENT_TYPE)],
        openmetrics::render_registry(&registry),
    )
}

/// Create the scrape router.
///
/// The rendering is served at `scrape_path` and at `/metrics`.
pub fn create_router(registry: Registry, scrape_path: &str) -> Router {
    let mut router = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(scrape));

    if scrape_path != "/metrics" {
        router = router.route(scrape_path, get(scrape));
    }

    router.with_state(registry).layer(TraceLayer::new_for_http())
}

/// Serves the scrape endpoint until `shutdown` completes.
///
/// # Errors
///
/// Returns an error if binding to the address fails or the server stops
/// abnormally.
pub async fn serve_with_shutdown<F>(
    registry: Registry,
    addr: SocketAddr,
    scrape_path: &str,
    shutdown: F,
) -> BridgeResult<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| BridgeError::BindFailed(addr, e))?;

    info!(addr = %addr, path = %scrape_path, "scrape server listening");

    axum::serve(listener, create_router(registry, scrape_path))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| BridgeError::Server(e.to_string()))?;

    info!("scrape server shut down");
    Ok(())
}
