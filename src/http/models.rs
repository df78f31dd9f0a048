//! Model catalog aggregation: `/v1/models` and `/v1/models/{id}`.
//!
//! There is no separate model registry — the catalog is derived from the
//! client-facing keys of every configured channel's `modelMapping`, since
//! that is the only place a client-visible model name is recorded.

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;

use crate::channels::ChannelKind;
use crate::ProxyCore;

fn known_model_ids(core: &ProxyCore) -> BTreeSet<String> {
    let mut ids = BTreeSet::new();
    for kind in [ChannelKind::Messages, ChannelKind::Responses, ChannelKind::Gemini] {
        for channel in core.channels.get_channels(kind) {
            ids.extend(channel.model_mapping.keys().cloned());
        }
    }
    ids
}

pub async fn list_models(State(core): State<Arc<ProxyCore>>) -> Response {
    let data: Vec<_> = known_model_ids(&core)
        .into_iter()
        .map(|id| json!({ "id": id, "object": "model" }))
        .collect();
    Json(json!({ "object": "list", "data": data })).into_response()
}

pub async fn get_model(State(core): State<Arc<ProxyCore>>, Path(id): Path<String>) -> Response {
    if known_model_ids(&core).contains(&id) {
        Json(json!({ "id": id, "object": "model" })).into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": { "type": "not_found", "message": format!("unknown model {id}") } })),
        )
            .into_response()
    }
}
