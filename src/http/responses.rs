//! OpenAI Responses dialect: `/v1/responses` and the `/v1/responses/compact`
//! alias, including response-id session resumption and per-session channel
//! affinity.

use std::sync::Arc;

use axum::extract::State;
use axum::response::{IntoResponse, Json, Response};
use serde_json::Value;

use crate::channels::ChannelKind;
use crate::convert::openai_responses::OpenAiResponsesConverter;
use crate::http::forward::{forward, ForwardOutcome};
use crate::ProxyCore;

fn extract_input_text(body: &Value) -> String {
    match body.get("input") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| item.get("content").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

fn extract_output_text(body: &Value) -> String {
    body.get("output")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("content").and_then(Value::as_array))
                .flatten()
                .filter_map(|block| block.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
}

async fn handle(core: Arc<ProxyCore>, body: Value) -> Response {
    let previous_response_id = body
        .get("previous_response_id")
        .and_then(Value::as_str)
        .map(str::to_string);

    let (session, created) = core.sessions.get_or_create_session(previous_response_id.as_deref());
    let preferred = core.sessions.get_channel_affinity(&session.id);

    let user_text = extract_input_text(&body);
    if !user_text.is_empty() {
        let _ = core.sessions.add_message(&session.id, "user", &user_text);
    }

    let converter = OpenAiResponsesConverter;
    let outcome = forward(
        core.clone(),
        ChannelKind::Responses,
        "responses",
        &converter,
        body,
        preferred,
    )
    .await;

    match outcome {
        ForwardOutcome::Buffered { channel_id, mut body } => {
            if created || core.sessions.get_channel_affinity(&session.id).is_none() {
                core.sessions.set_channel_affinity(&session.id, &channel_id);
            }

            let output_text = extract_output_text(&body);
            let response_id = core
                .sessions
                .add_message(&session.id, "assistant", &output_text)
                .unwrap_or_default();

            body["id"] = Value::String(response_id);
            body["previous_response_id"] = previous_response_id
                .map(Value::String)
                .unwrap_or(Value::Null);

            Json(body).into_response()
        }
        ForwardOutcome::Streamed(resp) => resp,
        ForwardOutcome::Failed(resp) => resp,
    }
}

pub async fn handle_responses(State(core): State<Arc<ProxyCore>>, Json(body): Json<Value>) -> Response {
    handle(core, body).await
}

/// Same conversation/affinity semantics as `/v1/responses` — the route
/// table lists `compact` as a distinct path but gives it no behavior of
/// its own beyond that, so it is wired to the identical handler.
pub async fn handle_responses_compact(State(core): State<Arc<ProxyCore>>, Json(body): Json<Value>) -> Response {
    handle(core, body).await
}
