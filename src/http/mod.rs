//! HTTP surface: route table, access-key gate, and the shared forwarding
//! pipeline the dialect handlers sit on top of.
//!
//! Grounded on the teacher's `server.rs::app()` — `Router::new()` wired
//! route-by-route behind a permissive CORS layer, with `serve`/`spawn`
//! wrappers around `axum::serve`.

pub mod forward;
pub mod gemini;
pub mod messages;
pub mod models;
pub mod responses;

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde_json::json;
use tokio::sync::Notify;
use tower_http::cors::CorsLayer;

use crate::ProxyCore;

type AppState = Arc<ProxyCore>;

async fn health(State(core): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "running": true,
        "version": env!("CARGO_PKG_VERSION"),
        "port": core.port(),
        "channelCount": core.channel_count(),
    }))
}

async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": { "type": "not_found", "message": "no route matches this path" } })),
    )
}

/// Constant-time comparison so an access-key check can't be timed byte by
/// byte. Lengths are compared first — this leaks the key's length, which
/// the header scheme already does by construction.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

/// Rejects any request whose bearer token doesn't match the configured
/// access key. The header is consumed here and never forwarded upstream —
/// every dialect handler builds its own outbound auth header from the
/// channel's own key.
async fn require_access_key(
    State(core): State<AppState>,
    headers: HeaderMap,
    request: axum::extract::Request,
    next: Next,
) -> Response {
    let Some(expected) = core.access_key() else {
        return next.run(request).await;
    };

    match bearer_token(&headers) {
        Some(token) if constant_time_eq(&token, &expected) => next.run(request).await,
        _ => (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": { "type": "unauthorized", "message": "missing or invalid access key" } })),
        )
            .into_response(),
    }
}

pub fn app(core: AppState) -> Router {
    let cors = CorsLayer::permissive();

    let protected = Router::new()
        .route("/v1/messages", post(messages::handle_messages))
        .route("/messages", post(messages::handle_messages))
        .route("/v1/messages/count_tokens", post(messages::handle_count_tokens))
        .route("/messages/count_tokens", post(messages::handle_count_tokens))
        .route("/v1/responses", post(responses::handle_responses))
        .route("/responses", post(responses::handle_responses))
        .route("/v1/responses/compact", post(responses::handle_responses_compact))
        .route("/responses/compact", post(responses::handle_responses_compact))
        .route("/v1/models", get(models::list_models))
        .route("/models", get(models::list_models))
        .route("/v1/models/:id", get(models::get_model))
        .route("/models/:id", get(models::get_model))
        .route("/v1beta/models/:model_action", post(gemini::handle_generate))
        .route_layer(middleware::from_fn_with_state(core.clone(), require_access_key));

    Router::new()
        .route("/health", get(health))
        .merge(protected)
        .fallback(not_found)
        .layer(cors)
        .with_state(core)
}

fn spawn_listener(
    core: AppState,
    listener: tokio::net::TcpListener,
    stop: Arc<Notify>,
) -> tokio::task::JoinHandle<()> {
    let app = app(core);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move { stop.notified().await })
            .await
        {
            crate::logging::error("http", &format!("server exited with error: {e}"));
        }
    })
}

/// Runs the listener until `core.stop()` is called. `ProxyCore::signal_restart`
/// fires only after `AdminApi::set_port` has already proven the new port
/// bindable, but this still binds its own listener and spawns it serving
/// *before* telling the previous listener to stop, so a rebind never drops
/// the process below "listening" on some port.
pub async fn serve(core: AppState) {
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], core.port()));
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            crate::logging::error("http", &format!("failed to bind {addr}: {e}"));
            return;
        }
    };

    let mut stop = Arc::new(Notify::new());
    let mut current = spawn_listener(core.clone(), listener, stop.clone());

    loop {
        tokio::select! {
            _ = core.wait_shutdown() => {
                stop.notify_waiters();
                let _ = current.await;
                return;
            }
            _ = core.wait_restart() => {
                if core.is_stopping() {
                    stop.notify_waiters();
                    let _ = current.await;
                    return;
                }

                let addr = std::net::SocketAddr::from(([0, 0, 0, 0], core.port()));
                match tokio::net::TcpListener::bind(addr).await {
                    Ok(new_listener) => {
                        let new_stop = Arc::new(Notify::new());
                        let new_task = spawn_listener(core.clone(), new_listener, new_stop.clone());
                        // New listener is already accepting connections; only now
                        // tell the old one to stop.
                        stop.notify_waiters();
                        let _ = current.await;
                        current = new_task;
                        stop = new_stop;
                        crate::logging::info("http", &format!("rebound on port {addr}"));
                    }
                    Err(e) => {
                        // AdminApi::set_port already proved this port bindable, so this
                        // is a race against something else grabbing it in between; the
                        // previous listener is left untouched either way.
                        crate::logging::error("http", &format!("rebind to {addr} failed: {e}"));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use std::path::PathBuf;

    fn test_core(access_key: Option<&str>) -> AppState {
        let mut settings = Settings::default();
        settings.port = 0;
        settings.access_key = access_key.map(str::to_string);
        ProxyCore::new(settings, PathBuf::from("/tmp/proxycore-test-settings.toml"))
    }

    #[tokio::test]
    async fn health_ok_without_access_key() {
        let core = test_core(None);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = app(core);
        let handle = tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let resp = reqwest::get(format!("http://{addr}/health")).await.unwrap();
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["running"], true);
        handle.abort();
    }

    #[tokio::test]
    async fn protected_route_rejects_missing_access_key() {
        let core = test_core(Some("secret"));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = app(core);
        let handle = tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let client = reqwest::Client::new();
        let resp = client
            .post(format!("http://{addr}/v1/messages"))
            .json(&json!({"model": "claude-3-sonnet-20240229", "messages": []}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 401);
        handle.abort();
    }
}
