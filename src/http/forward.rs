//! The seven-step per-request algorithm shared by every dialect handler:
//! convert the inbound body to Anthropic shape, let the scheduler pick a
//! channel, convert to the upstream's native shape, call it, convert the
//! response back, and record the outcome — retrying across every other
//! viable channel on a transport failure, a 5xx, or a 429.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use axum::body::Body;
use axum::http::header::CONTENT_TYPE;
use axum::response::Response;
use bytes::Bytes;
use futures_util::StreamExt;
use serde_json::Value;

use crate::channels::{default_service_type_for_kind, ChannelKind};
use crate::convert::{
    gemini::GeminiConverter, openai::OpenAiChatConverter, passthrough::PassthroughConverter,
    stop_reason_to_claude, Converter, Vendor as StopVendor,
};
use crate::error::ProxyError;
use crate::history::RequestRecord;
use crate::providers::{adapter_for, sse, ProviderAdapter, Vendor};
use crate::ProxyCore;

const MAX_ATTEMPTS: usize = 8;

pub enum ForwardOutcome {
    Buffered { channel_id: String, body: Value },
    Streamed(Response),
    Failed(Response),
}

fn upstream_converter(vendor: Vendor) -> Box<dyn Converter + Send + Sync> {
    match vendor {
        Vendor::Claude => Box::new(PassthroughConverter),
        Vendor::OpenAI => Box::new(OpenAiChatConverter),
        Vendor::Gemini => Box::new(GeminiConverter),
    }
}

fn apply_model_mapping(claude_req: &mut Value, mapping: &HashMap<String, String>) {
    if let Some(model) = claude_req.get("model").and_then(Value::as_str).map(str::to_string) {
        if let Some(mapped) = mapping.get(&model) {
            claude_req["model"] = Value::String(mapped.clone());
        }
    }
}

fn is_streaming(body: &Value) -> bool {
    matches!(body.get("stream"), Some(Value::Bool(true)))
}

fn extract_usage(claude_resp: &Value) -> (i64, i64) {
    (
        claude_resp.pointer("/usage/input_tokens").and_then(Value::as_i64).unwrap_or(0),
        claude_resp.pointer("/usage/output_tokens").and_then(Value::as_i64).unwrap_or(0),
    )
}

fn retry_worthy(err: &ProxyError) -> bool {
    match err {
        ProxyError::UpstreamTransport(_) => true,
        ProxyError::UpstreamStatus { status, .. } => *status >= 500 || *status == 429,
        _ => false,
    }
}

fn record_attempt_failure(core: &ProxyCore, channel_id: &str, channel_type: &str, model: &str, err: &ProxyError) {
    core.scheduler.record_result(channel_id, false, 0, 0, 0, 0);
    core.history.record(RequestRecord {
        id: String::new(),
        timestamp: SystemTime::now(),
        channel_id: channel_id.to_string(),
        channel_type: channel_type.to_string(),
        model: model.to_string(),
        success: false,
        latency_ms: 0,
        input_tokens: 0,
        output_tokens: 0,
        error_msg: Some(err.kind().to_string()),
        error_details: Some(err.to_string()),
    });
}

fn record_no_channel_failure(core: &ProxyCore, channel_type: &str, err: &ProxyError) {
    core.history.record(RequestRecord {
        id: String::new(),
        timestamp: SystemTime::now(),
        channel_id: String::new(),
        channel_type: channel_type.to_string(),
        model: String::new(),
        success: false,
        latency_ms: 0,
        input_tokens: 0,
        output_tokens: 0,
        error_msg: Some(err.kind().to_string()),
        error_details: Some(err.to_string()),
    });
}

pub async fn forward(
    core: Arc<ProxyCore>,
    kind: ChannelKind,
    channel_type_label: &str,
    client_converter: &(dyn Converter + Send + Sync),
    body: Value,
    preferred_channel: Option<String>,
) -> ForwardOutcome {
    let stream = is_streaming(&body);
    let claude_req = client_converter.to_claude(&body);
    let dialect = Vendor::from(default_service_type_for_kind(kind));

    let mut excluded: HashSet<String> = HashSet::new();

    for _ in 0..MAX_ATTEMPTS {
        let pick = match core
            .scheduler
            .pick_preferring(kind, preferred_channel.as_deref(), &excluded)
        {
            Ok(pick) => pick,
            Err(err) => {
                record_no_channel_failure(&core, channel_type_label, &err);
                return ForwardOutcome::Failed(err.into_dialect_response(dialect));
            }
        };

        let mut attempt_req = claude_req.clone();
        apply_model_mapping(&mut attempt_req, &pick.channel.model_mapping);
        let model = attempt_req
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let vendor = Vendor::from(
            pick.channel
                .resolved_service_type(default_service_type_for_kind(kind)),
        );
        let upstream_conv = upstream_converter(vendor);
        let upstream_req = upstream_conv.from_claude(&attempt_req);
        let adapter = adapter_for(vendor);

        if stream {
            match adapter.send_stream(&pick.channel, &pick.api_key, &model, &upstream_req).await {
                Ok(stream_resp) => {
                    return ForwardOutcome::Streamed(stream_claude_events(
                        core.clone(),
                        pick.channel.id.clone(),
                        channel_type_label.to_string(),
                        vendor,
                        dialect,
                        adapter,
                        stream_resp.response,
                    ));
                }
                Err(err) => {
                    record_attempt_failure(&core, &pick.channel.id, channel_type_label, &model, &err);
                    if retry_worthy(&err) {
                        core.channels.mark_key_failed(&pick.api_key);
                        excluded.insert(pick.channel.id.clone());
                        continue;
                    }
                    return ForwardOutcome::Failed(err.into_dialect_response(dialect));
                }
            }
        }

        match adapter.send_request(&pick.channel, &pick.api_key, &model, &upstream_req).await {
            Ok(upstream_resp) => {
                let claude_resp = upstream_conv.response_to_claude(&upstream_resp.body);
                let client_resp = client_converter.response_from_claude(&claude_resp);
                let (input_tokens, output_tokens) = extract_usage(&claude_resp);

                core.scheduler.record_result(
                    &pick.channel.id,
                    true,
                    upstream_resp.latency_ms,
                    input_tokens,
                    output_tokens,
                    0,
                );
                core.history.record(RequestRecord {
                    id: String::new(),
                    timestamp: SystemTime::now(),
                    channel_id: pick.channel.id.clone(),
                    channel_type: channel_type_label.to_string(),
                    model,
                    success: true,
                    latency_ms: upstream_resp.latency_ms,
                    input_tokens,
                    output_tokens,
                    error_msg: None,
                    error_details: None,
                });

                return ForwardOutcome::Buffered {
                    channel_id: pick.channel.id,
                    body: client_resp,
                };
            }
            Err(err) => {
                record_attempt_failure(&core, &pick.channel.id, channel_type_label, &model, &err);
                if retry_worthy(&err) {
                    core.channels.mark_key_failed(&pick.api_key);
                    excluded.insert(pick.channel.id.clone());
                    continue;
                }
                return ForwardOutcome::Failed(err.into_dialect_response(dialect));
            }
        }
    }

    record_no_channel_failure(&core, channel_type_label, &ProxyError::AllBroken);
    ForwardOutcome::Failed(ProxyError::AllBroken.into_dialect_response(dialect))
}

/// Copies the upstream SSE/chunked body into Claude-vocabulary
/// `content_block_delta` / `message_delta` / `message_stop` events,
/// recording history and metrics once the upstream stream closes.
fn stream_claude_events(
    core: Arc<ProxyCore>,
    channel_id: String,
    channel_type: String,
    vendor: Vendor,
    dialect: Vendor,
    adapter: ProviderAdapter,
    response: reqwest::Response,
) -> Response {
    let (tx, rx) = tokio::sync::mpsc::channel::<Result<Bytes, std::io::Error>>(16);

    tokio::spawn(async move {
        let mut upstream = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();
        let mut pending_event: Option<String> = None;
        let mut input_tokens = 0i64;
        let mut output_tokens = 0i64;
        let mut stop_reason: Option<String> = None;
        let start = Instant::now();
        let mut transport_ok = true;

        'outer: while let Some(chunk) = upstream.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(_) => {
                    transport_ok = false;
                    break;
                }
            };

            for line in sse::drain_lines(&mut buffer, &chunk) {
                if let Some(name) = sse::parse_sse_event(&line) {
                    pending_event = Some(name.to_string());
                    continue;
                }
                let data = sse::parse_sse_data(&line).unwrap_or(&line);
                if data.trim().is_empty() {
                    continue;
                }
                let event_name = pending_event.take();
                let Some(event) = adapter.parse_stream_event(event_name.as_deref(), data) else {
                    continue;
                };

                if let Some(tokens) = event.input_tokens {
                    input_tokens = tokens;
                }
                if let Some(tokens) = event.output_tokens {
                    output_tokens = tokens;
                }
                if let Some(reason) = event.stop_reason {
                    stop_reason = Some(match vendor {
                        Vendor::Claude => reason,
                        Vendor::OpenAI => stop_reason_to_claude(&reason, StopVendor::OpenAiFinish),
                        Vendor::Gemini => stop_reason_to_claude(&reason, StopVendor::GeminiFinish),
                    });
                }

                if let Some(text) = event.text_delta {
                    let payload = serde_json::json!({
                        "type": "content_block_delta",
                        "delta": {"type": "text_delta", "text": text},
                    });
                    let frame = format!("event: content_block_delta\ndata: {payload}\n\n");
                    if tx.send(Ok(Bytes::from(frame))).await.is_err() {
                        break 'outer;
                    }
                }

                if event.done {
                    let payload = serde_json::json!({
                        "type": "message_delta",
                        "delta": {"stop_reason": stop_reason.clone().unwrap_or_else(|| "end_turn".to_string())},
                        "usage": {"input_tokens": input_tokens, "output_tokens": output_tokens},
                    });
                    let frame = format!("event: message_delta\ndata: {payload}\n\n");
                    if tx.send(Ok(Bytes::from(frame))).await.is_err() {
                        break 'outer;
                    }
                    let stop_frame = "event: message_stop\ndata: {}\n\n".to_string();
                    let _ = tx.send(Ok(Bytes::from(stop_frame))).await;
                }
            }
        }

        let latency_ms = start.elapsed().as_millis() as u64;
        core.scheduler
            .record_result(&channel_id, transport_ok, latency_ms, input_tokens, output_tokens, 0);
        core.history.record(RequestRecord {
            id: String::new(),
            timestamp: SystemTime::now(),
            channel_id,
            channel_type,
            model: String::new(),
            success: transport_ok,
            latency_ms,
            input_tokens,
            output_tokens,
            error_msg: if transport_ok { None } else { Some("stream transport error".to_string()) },
            error_details: None,
        });
    });

    let body_stream = futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    });

    Response::builder()
        .status(200)
        .header(CONTENT_TYPE, "text/event-stream")
        .body(Body::from_stream(body_stream))
        .unwrap_or_else(|_| {
            ProxyError::Internal("failed to build stream response".to_string())
                .into_dialect_response(dialect)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ApiKey, Channel, ChannelCatalog, ServiceType, Settings};
    use crate::convert::passthrough::PassthroughConverter;
    use axum::routing::post;
    use axum::Router;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn claude_channel(id: &str, base_url: String) -> Channel {
        Channel {
            id: id.to_string(),
            name: id.to_string(),
            service_type: Some(ServiceType::Claude),
            base_urls: vec![base_url],
            api_keys: vec![ApiKey { key: format!("sk-{id}"), enabled: true }],
            ..Channel::default()
        }
    }

    /// S3: upstream returns 500 on the first channel, succeeds on the
    /// second — the retry loop must record one failed attempt against the
    /// broken channel and one successful attempt against the other, and
    /// return the successful body to the caller.
    #[tokio::test]
    async fn cross_channel_retry_on_upstream_500_succeeds_on_second_channel() {
        let listener_a = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr_a = listener_a.local_addr().unwrap();
        let app_a = Router::new().route(
            "/v1/messages",
            post(|| async { (axum::http::StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        );
        tokio::spawn(async move { axum::serve(listener_a, app_a).await.unwrap() });

        let hits_b = Arc::new(AtomicUsize::new(0));
        let hits_b_handler = hits_b.clone();
        let listener_b = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr_b = listener_b.local_addr().unwrap();
        let app_b = Router::new().route(
            "/v1/messages",
            post(move || {
                let hits = hits_b_handler.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    axum::Json(serde_json::json!({
                        "id": "m2",
                        "content": [{ "type": "text", "text": "ok" }],
                        "usage": { "input_tokens": 1, "output_tokens": 1 },
                    }))
                }
            }),
        );
        tokio::spawn(async move { axum::serve(listener_b, app_b).await.unwrap() });

        let mut settings = Settings::default();
        settings.port = 0;
        settings.channels = ChannelCatalog {
            messages: vec![
                claude_channel("a", format!("http://{addr_a}")),
                claude_channel("b", format!("http://{addr_b}")),
            ],
            responses: Vec::new(),
            gemini: Vec::new(),
        };
        let core = ProxyCore::new(settings, PathBuf::from("/tmp/proxycore-forward-test.toml"));

        let body = serde_json::json!({
            "model": "claude-3-sonnet",
            "max_tokens": 8,
            "messages": [{ "role": "user", "content": "hi" }],
        });
        let outcome = forward(core.clone(), ChannelKind::Messages, "claude", &PassthroughConverter, body, None).await;

        match outcome {
            ForwardOutcome::Buffered { channel_id, body } => {
                assert_eq!(channel_id, "b");
                assert_eq!(body["content"][0]["text"], "ok");
            }
            _ => panic!("expected a buffered success after failing over to channel b"),
        }
        assert_eq!(hits_b.load(Ordering::SeqCst), 1);

        let (records, total) = core.history.get_history("", 10, 0, "");
        assert_eq!(total, 2);
        assert!(records.iter().any(|r| r.channel_id == "a" && !r.success));
        assert!(records.iter().any(|r| r.channel_id == "b" && r.success));
    }
}
