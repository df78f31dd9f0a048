//! Gemini `generateContent` / `streamGenerateContent` upstream adapter.

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde_json::Value;

use super::{
    apply_auth, build_client, primary_base_url, ProviderAdapterImpl, StreamEvent, StreamResponse,
    UpstreamResponse, Vendor,
};
use crate::config::{AuthType, Channel, ServiceType};
use crate::error::{ProxyError, ProxyResult};

pub struct GeminiAdapter;

impl ProviderAdapterImpl for GeminiAdapter {
    fn vendor(&self) -> Vendor {
        Vendor::Gemini
    }

    fn build_url(&self, channel: &Channel, model: &str, stream: bool) -> ProxyResult<String> {
        let base = primary_base_url(channel)?;
        let action = if stream {
            "streamGenerateContent"
        } else {
            "generateContent"
        };
        let mut url = format!(
            "{}/v1beta/models/{}:{}",
            base.trim_end_matches('/'),
            model,
            action
        );
        if !matches!(channel.resolved_auth_type(ServiceType::Gemini), AuthType::XGoogApiKey) {
            // Query-string key form: caller appends `?key=` when building
            // the request if the header form isn't used.
            url.push_str("?alt=sse");
        }
        Ok(url)
    }

    fn build_headers(&self, channel: &Channel, api_key: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        apply_auth(&mut headers, channel.resolved_auth_type(ServiceType::Gemini), api_key, "x-goog-api-key");
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
        let mut url = self.build_url(channel, model, false)?;
        if !matches!(channel.resolved_auth_type(ServiceType::Gemini), AuthType::XGoogApiKey) {
            let sep = if url.contains('?') { '&' } else { '?' };
            url = format!("{url}{sep}key={api_key}");
        }
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
        let mut url = self.build_url(channel, model, true)?;
        if !matches!(channel.resolved_auth_type(ServiceType::Gemini), AuthType::XGoogApiKey) {
            let sep = if url.contains('?') { '&' } else { '?' };
            url = format!("{url}{sep}key={api_key}");
        }
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

    /// Stream chunks are bare JSON objects, optionally `data: `-prefixed;
    /// each candidate's parts text is a delta, and `usageMetadata` arrives
    /// on the final chunk alongside `finishReason`.
    fn parse_stream_event(&self, _event_name: Option<&str>, data: &str) -> Option<StreamEvent> {
        let trimmed = super::sse::parse_sse_data(data).unwrap_or(data).trim();
        if trimmed.is_empty() || trimmed == "[" || trimmed == "]" || trimmed == "," {
            return None;
        }
        let trimmed = trimmed.trim_matches(',').trim_start_matches('[').trim_end_matches(']');
        let value: Value = serde_json::from_str(trimmed).ok()?;

        let parts_text = value
            .pointer("/candidates/0/content/parts")
            .and_then(Value::as_array)
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|p| p.get("text").and_then(Value::as_str))
                    .collect::<String>()
            })
            .filter(|s| !s.is_empty());

        let stop_reason = value
            .pointer("/candidates/0/finishReason")
            .and_then(Value::as_str)
            .map(str::to_string);
        let input_tokens = value
            .pointer("/usageMetadata/promptTokenCount")
            .and_then(Value::as_i64);
        let output_tokens = value
            .pointer("/usageMetadata/candidatesTokenCount")
            .and_then(Value::as_i64);

        Some(StreamEvent {
            text_delta: parts_text,
            stop_reason,
            input_tokens,
            output_tokens,
            done: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_candidate_parts_text() {
        let adapter = GeminiAdapter;
        let event = adapter
            .parse_stream_event(
                None,
                r#"{"candidates":[{"content":{"parts":[{"text":"he"}]}}]}"#,
            )
            .unwrap();
        assert_eq!(event.text_delta.as_deref(), Some("he"));
    }

    #[test]
    fn parses_finish_reason_and_usage_on_final_chunk() {
        let adapter = GeminiAdapter;
        let event = adapter
            .parse_stream_event(
                None,
                r#"{"candidates":[{"content":{"parts":[{"text":"llo"}]},"finishReason":"STOP"}],"usageMetadata":{"promptTokenCount":1,"candidatesTokenCount":2}}"#,
            )
            .unwrap();
        assert_eq!(event.text_delta.as_deref(), Some("llo"));
        assert_eq!(event.stop_reason.as_deref(), Some("STOP"));
        assert_eq!(event.output_tokens, Some(2));
    }
}
