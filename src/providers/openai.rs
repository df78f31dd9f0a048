//! OpenAI Chat Completions upstream adapter.

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde_json::Value;

use super::sse::is_sse_done;
use super::{
    apply_auth, build_client, primary_base_url, ProviderAdapterImpl, StreamEvent, StreamResponse,
    UpstreamResponse, Vendor,
};
use crate::config::{Channel, ServiceType};
use crate::error::{ProxyError, ProxyResult};

pub struct OpenAiAdapter;

impl ProviderAdapterImpl for OpenAiAdapter {
    fn vendor(&self) -> Vendor {
        Vendor::OpenAI
    }

    fn build_url(&self, channel: &Channel, _model: &str, _stream: bool) -> ProxyResult<String> {
        let base = primary_base_url(channel)?;
        Ok(format!("{}/v1/chat/completions", base.trim_end_matches('/')))
    }

    fn build_headers(&self, channel: &Channel, api_key: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        apply_auth(&mut headers, channel.resolved_auth_type(ServiceType::OpenAI), api_key, "x-api-key");
        headers
    }

    async fn send_request(
        &self,
        channel: &Channel,
        api_key: &str,
        model: &str,
        body: &Value,
    ) -> ProxyResult<UpstreamResponse> {
        let client = build_client(channel, 300)?;
        let url = self.build_url(channel, model, false)?;
        let headers = self.build_headers(channel, api_key);
        let start = std::time::Instant::now();

        let response = client
            .post(url)
            .headers(headers)
            .json(body)
            .send()
            .await
            .map_err(|e| ProxyError::UpstreamTransport(e.to_string()))?;

        let status = response.status().as_u16();
        let latency_ms = start.elapsed().as_millis() as u64;
        let text = response
            .text()
            .await
            .map_err(|e| ProxyError::UpstreamTransport(e.to_string()))?;

        if status >= 300 {
            return Err(ProxyError::UpstreamStatus { status, body: text });
        }

        let value: Value = serde_json::from_str(&text)
            .map_err(|e| ProxyError::Internal(format!("invalid upstream json: {e}")))?;

        Ok(UpstreamResponse {
            status,
            body: value,
            latency_ms,
        })
    }

    async fn send_stream(
        &self,
        channel: &Channel,
        api_key: &str,
        model: &str,
        body: &Value,
    ) -> ProxyResult<StreamResponse> {
        let client = build_client(channel, 300)?;
        let url = self.build_url(channel, model, true)?;
        let headers = self.build_headers(channel, api_key);

        let response = client
            .post(url)
            .headers(headers)
            .json(body)
            .send()
            .await
            .map_err(|e| ProxyError::UpstreamTransport(e.to_string()))?;

        let status = response.status().as_u16();
        if status >= 300 {
            let text = response.text().await.unwrap_or_default();
            return Err(ProxyError::UpstreamStatus { status, body: text });
        }

        Ok(StreamResponse { status, response })
    }

    /// `data: {json}` lines carry deltas in `choices[0].delta.content`;
    /// `finish_reason` is mapped to Claude vocabulary by the converter, not
    /// here. `data: [DONE]` yields a `done` sentinel event.
    fn parse_stream_event(&self, _event_name: Option<&str>, data: &str) -> Option<StreamEvent> {
        if is_sse_done(data) {
            return Some(StreamEvent {
                done: true,
                ..Default::default()
            });
        }
        let value: Value = serde_json::from_str(data).ok()?;
        let text_delta = value
            .pointer("/choices/0/delta/content")
            .and_then(Value::as_str)
            .map(str::to_string);
        let stop_reason = value
            .pointer("/choices/0/finish_reason")
            .and_then(Value::as_str)
            .map(str::to_string);
        let output_tokens = value.pointer("/usage/completion_tokens").and_then(Value::as_i64);
        let input_tokens = value.pointer("/usage/prompt_tokens").and_then(Value::as_i64);

        Some(StreamEvent {
            text_delta,
            stop_reason,
            output_tokens,
            input_tokens,
            done: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn done_sentinel_produces_done_event() {
        let adapter = OpenAiAdapter;
        let event = adapter.parse_stream_event(None, "[DONE]").unwrap();
        assert!(event.done);
    }

    #[test]
    fn parses_delta_content_and_finish_reason() {
        let adapter = OpenAiAdapter;
        let event = adapter
            .parse_stream_event(
                None,
                r#"{"choices":[{"delta":{"content":"hi"},"finish_reason":"stop"}]}"#,
            )
            .unwrap();
        assert_eq!(event.text_delta.as_deref(), Some("hi"));
        assert_eq!(event.stop_reason.as_deref(), Some("stop"));
    }
}
