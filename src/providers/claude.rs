//! Claude (Anthropic Messages API) upstream adapter.

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde_json::Value;

use super::{
    apply_auth, build_client, primary_base_url, ProviderAdapterImpl, StreamEvent, StreamResponse,
    UpstreamResponse, Vendor,
};
use crate::config::{Channel, ServiceType};
use crate::error::{ProxyError, ProxyResult};

pub struct ClaudeAdapter;

const ANTHROPIC_VERSION: &str = "2023-06-01";

impl ProviderAdapterImpl for ClaudeAdapter {
    fn vendor(&self) -> Vendor {
        Vendor::Claude
    }

    fn build_url(&self, channel: &Channel, _model: &str, _stream: bool) -> ProxyResult<String> {
        let base = primary_base_url(channel)?;
        Ok(format!("{}/v1/messages", base.trim_end_matches('/')))
    }

    fn build_headers(&self, channel: &Channel, api_key: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("anthropic-version", HeaderValue::from_static(ANTHROPIC_VERSION));
        apply_auth(&mut headers, channel.resolved_auth_type(ServiceType::Claude), api_key, "x-api-key");
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

    /// `message_start.message.usage.input_tokens`,
    /// `content_block_delta.delta.text`,
    /// `message_delta.usage.output_tokens` / `delta.stop_reason`.
    fn parse_stream_event(&self, event_name: Option<&str>, data: &str) -> Option<StreamEvent> {
        let value: Value = serde_json::from_str(data).ok()?;
        match event_name.unwrap_or_default() {
            "message_start" => Some(StreamEvent {
                input_tokens: value
                    .pointer("/message/usage/input_tokens")
                    .and_then(Value::as_i64),
                ..Default::default()
            }),
            "content_block_delta" => Some(StreamEvent {
                text_delta: value
                    .pointer("/delta/text")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                ..Default::default()
            }),
            "message_delta" => Some(StreamEvent {
                output_tokens: value
                    .pointer("/usage/output_tokens")
                    .and_then(Value::as_i64),
                stop_reason: value
                    .pointer("/delta/stop_reason")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                ..Default::default()
            }),
            "message_stop" => Some(StreamEvent {
                done: true,
                ..Default::default()
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_content_block_delta_text() {
        let adapter = ClaudeAdapter;
        let event = adapter
            .parse_stream_event(Some("content_block_delta"), r#"{"delta":{"text":"he"}}"#)
            .unwrap();
        assert_eq!(event.text_delta.as_deref(), Some("he"));
    }

    #[test]
    fn parses_message_delta_stop_reason_and_usage() {
        let adapter = ClaudeAdapter;
        let event = adapter
            .parse_stream_event(
                Some("message_delta"),
                r#"{"delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":5}}"#,
            )
            .unwrap();
        assert_eq!(event.stop_reason.as_deref(), Some("end_turn"));
        assert_eq!(event.output_tokens, Some(5));
    }
}
