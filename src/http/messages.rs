//! Anthropic Messages dialect: `/v1/messages` and `/v1/messages/count_tokens`.

use std::sync::Arc;

use axum::extract::State;
use axum::response::{IntoResponse, Json, Response};
use serde_json::Value;

use crate::channels::ChannelKind;
use crate::convert::{claude_content_to_text, passthrough::PassthroughConverter};
use crate::http::forward::{forward, ForwardOutcome};
use crate::ProxyCore;

pub async fn handle_messages(State(core): State<Arc<ProxyCore>>, Json(body): Json<Value>) -> Response {
    match forward(core, ChannelKind::Messages, "claude", &PassthroughConverter, body, None).await {
        ForwardOutcome::Buffered { body, .. } => Json(body).into_response(),
        ForwardOutcome::Streamed(resp) => resp,
        ForwardOutcome::Failed(resp) => resp,
    }
}

/// A rough, provider-agnostic estimate (roughly 4 bytes per token). Real
/// tokenization is upstream-specific and not worth a dependency just for
/// this diagnostic endpoint.
pub async fn handle_count_tokens(Json(body): Json<Value>) -> Response {
    let mut chars = 0usize;
    if let Some(system) = body.get("system") {
        chars += claude_content_to_text(system).len();
        chars += system.as_str().map(str::len).unwrap_or(0);
    }
    if let Some(messages) = body.get("messages").and_then(Value::as_array) {
        for message in messages {
            if let Some(content) = message.get("content") {
                chars += claude_content_to_text(content).len();
            }
        }
    }
    let input_tokens = (chars / 4).max(1) as i64;
    Json(serde_json::json!({ "input_tokens": input_tokens })).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ApiKey, Channel, ChannelCatalog, Settings};
    use axum::routing::post;
    use axum::Router;
    use std::path::PathBuf;

    async fn fake_claude_upstream() -> String {
        let app = Router::new().route(
            "/v1/messages",
            post(|| async {
                Json(serde_json::json!({
                    "id": "m1",
                    "content": [{ "type": "text", "text": "ok" }],
                    "usage": { "input_tokens": 1, "output_tokens": 1 },
                }))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn s1_messages_forwards_verbatim_and_records_success_history() {
        let base_url = fake_claude_upstream().await;
        let mut settings = Settings::default();
        settings.port = 0;
        settings.channels = ChannelCatalog {
            messages: vec![Channel {
                id: "c1".to_string(),
                name: "test-claude".to_string(),
                service_type: Some(crate::config::ServiceType::Claude),
                base_urls: vec![base_url],
                api_keys: vec![ApiKey { key: "sk-test".to_string(), enabled: true }],
                ..Channel::default()
            }],
            responses: Vec::new(),
            gemini: Vec::new(),
        };
        let core = ProxyCore::new(settings, PathBuf::from("/tmp/proxycore-messages-test.toml"));

        let body = serde_json::json!({
            "model": "claude-3-sonnet",
            "max_tokens": 8,
            "messages": [{ "role": "user", "content": "hi" }],
        });
        let resp = handle_messages(State(core.clone()), Json(body)).await;
        assert_eq!(resp.status(), 200);

        let (records, total) = core.history.get_history("", 10, 0, "");
        assert_eq!(total, 1);
        assert!(records[0].success);
        assert_eq!(records[0].input_tokens, 1);
        assert_eq!(records[0].output_tokens, 1);
    }
}
