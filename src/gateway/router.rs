//! Downstream router: the handler the fault stack wraps

use std::sync::Arc;

use axum::{
    Router,
    extract::{Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::warn;

use super::proxy::Upstream;

/// Shared downstream state
#[derive(Debug, Default)]
pub struct AppState {
    /// Proxy target; `None` answers every request with an echo
    pub upstream: Option<Upstream>,
}

/// Create the downstream router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .fallback(forward_handler)
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health
async fn health_handler() -> &'static str {
    "ok"
}

/// Everything else: proxy upstream, or echo the request line back
async fn forward_handler(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let Some(upstream) = &state.upstream else {
        return format!("{} {}", request.method(), request.uri().path()).into_response();
    };

    match upstream.forward(request).await {
        Ok(response) => response,
        Err(e) => {
            warn!(upstream = %upstream.base_url(), error = %e, "Upstream request failed");
            (StatusCode::BAD_GATEWAY, format!("Upstream request failed: {e}")).into_response()
        }
    }
}
