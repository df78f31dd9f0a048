//! Gemini dialect: `/v1beta/models/{model}:{action}`, where `action` is
//! `generateContent` or `streamGenerateContent` — Gemini folds the model
//! name and the streaming choice into the path rather than the body, so
//! both are spliced into the body before it enters the shared pipeline.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Json, Response};
use serde_json::Value;

use crate::channels::ChannelKind;
use crate::convert::gemini::GeminiConverter;
use crate::http::forward::{forward, ForwardOutcome};
use crate::ProxyCore;

pub async fn handle_generate(
    State(core): State<Arc<ProxyCore>>,
    Path(model_action): Path<String>,
    Json(mut body): Json<Value>,
) -> Response {
    let (model, action) = match model_action.rsplit_once(':') {
        Some((model, action)) => (model.to_string(), action.to_string()),
        None => (model_action, "generateContent".to_string()),
    };

    body["model"] = Value::String(model);
    body["stream"] = Value::Bool(action == "streamGenerateContent");

    let converter = GeminiConverter;
    match forward(core, ChannelKind::Gemini, "gemini", &converter, body, None).await {
        ForwardOutcome::Buffered { body, .. } => Json(body).into_response(),
        ForwardOutcome::Streamed(resp) => resp,
        ForwardOutcome::Failed(resp) => resp,
    }
}
