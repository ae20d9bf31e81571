//! HTTP server implementation using Axum.

use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    routing::{delete, get, post},
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use sendloop_core::error::Result;
use sendloop_core::traits::MessageStore;
use sendloop_scheduler::SchedulerEngine;
use sendloop_session::SessionManager;

/// Shared state for the gateway server.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn MessageStore>,
    pub engine: Arc<SchedulerEngine>,
    pub sessions: Arc<SessionManager>,
    /// When set, API routes require the matching X-Pairing-Code header.
    pub pairing_code: Option<String>,
    pub start_time: std::time::Instant,
}

/// Pairing code auth middleware — validates X-Pairing-Code header or ?code= query.
async fn require_pairing(
    State(state): State<Arc<AppState>>,
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> axum::response::Response {
    // If no pairing code configured, allow all
    let Some(expected) = &state.pairing_code else {
        return next.run(req).await;
    };

    let from_header = req
        .headers()
        .get("X-Pairing-Code")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if from_header == expected {
        return next.run(req).await;
    }

    if let Some(query) = req.uri().query() {
        for pair in query.split('&') {
            if let Some(code) = pair.strip_prefix("code=")
                && code == expected
            {
                return next.run(req).await;
            }
        }
    }

    axum::response::Response::builder()
        .status(axum::http::StatusCode::UNAUTHORIZED)
        .header("Content-Type", "application/json")
        .body(axum::body::Body::from(
            serde_json::json!({"ok": false, "error": "Unauthorized — invalid or missing pairing code"})
                .to_string(),
        ))
        .unwrap()
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    let shared = Arc::new(state);

    // Protected routes — require valid pairing code when one is configured
    let protected = Router::new()
        .route(
            "/api/v1/messages",
            post(super::routes::schedule_message).get(super::routes::list_messages),
        )
        .route("/api/v1/messages/{id}", get(super::routes::get_message))
        .route("/api/v1/messages/{id}/cancel", post(super::routes::cancel_message))
        .route("/api/v1/sessions", get(super::routes::list_sessions))
        .route("/api/v1/sessions/{user_id}", delete(super::routes::revoke_session))
        .route("/api/v1/info", get(super::routes::system_info))
        .layer(axum::middleware::from_fn_with_state(shared.clone(), require_pairing));

    Router::new()
        .route("/health", get(super::routes::health_check))
        .merge(protected)
        .with_state(shared)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Bind and serve until the task is aborted or the listener fails.
pub async fn serve(state: AppState, host: &str, port: u16) -> Result<()> {
    let addr = format!("{host}:{port}");
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("🌐 Gateway listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
