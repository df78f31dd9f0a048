//! Upstream transport adapters.
//!
//! One implementation per vendor, dispatched through a tagged enum rather
//! than `dyn Trait` — there are exactly three known providers and no
//! open-world extension is needed, mirroring the teacher's
//! `ProviderHandler` enum-of-structs dispatch.

pub mod claude;
pub mod gemini;
pub mod openai;
pub mod sse;

use crate::config::{AuthType, Channel};
use crate::error::{ProxyError, ProxyResult};
use reqwest::header::HeaderMap;
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vendor {
    Claude,
    OpenAI,
    Gemini,
}

impl From<crate::config::ServiceType> for Vendor {
    fn from(service_type: crate::config::ServiceType) -> Self {
        match service_type {
            crate::config::ServiceType::Claude => Vendor::Claude,
            crate::config::ServiceType::OpenAI => Vendor::OpenAI,
            crate::config::ServiceType::Gemini => Vendor::Gemini,
        }
    }
}

/// One upstream HTTP response, buffered or left as a stream for the
/// caller to copy through. Usage counters are filled in eagerly for
/// non-streaming calls; stream callers extract usage as they parse
/// events.
pub struct UpstreamResponse {
    pub status: u16,
    pub body: Value,
    pub latency_ms: u64,
}

pub struct StreamResponse {
    pub status: u16,
    pub response: reqwest::Response,
}

/// A single normalised delta extracted from one upstream stream chunk.
#[derive(Debug, Clone, Default)]
pub struct StreamEvent {
    pub text_delta: Option<String>,
    pub input_tokens: Option<i64>,
    pub output_tokens: Option<i64>,
    pub stop_reason: Option<String>,
    pub done: bool,
}

pub trait ProviderAdapterImpl: Send + Sync {
    fn vendor(&self) -> Vendor;

    fn build_url(&self, channel: &Channel, model: &str, stream: bool) -> ProxyResult<String>;

    fn build_headers(&self, channel: &Channel, api_key: &str) -> HeaderMap;

    fn send_request(
        &self,
        channel: &Channel,
        api_key: &str,
        model: &str,
        body: &Value,
    ) -> impl std::future::Future<Output = ProxyResult<UpstreamResponse>> + Send;

    fn send_stream(
        &self,
        channel: &Channel,
        api_key: &str,
        model: &str,
        body: &Value,
    ) -> impl std::future::Future<Output = ProxyResult<StreamResponse>> + Send;

    /// Parse one line/chunk of the upstream's native stream framing into a
    /// normalised event. Implementations keep any cross-chunk state (e.g.
    /// SSE `event:` lines) in the caller's buffer, not here.
    fn parse_stream_event(&self, event_name: Option<&str>, data: &str) -> Option<StreamEvent>;
}

pub enum ProviderAdapter {
    Claude(claude::ClaudeAdapter),
    OpenAI(openai::OpenAiAdapter),
    Gemini(gemini::GeminiAdapter),
}

pub fn adapter_for(vendor: Vendor) -> ProviderAdapter {
    match vendor {
        Vendor::Claude => ProviderAdapter::Claude(claude::ClaudeAdapter),
        Vendor::OpenAI => ProviderAdapter::OpenAI(openai::OpenAiAdapter),
        Vendor::Gemini => ProviderAdapter::Gemini(gemini::GeminiAdapter),
    }
}

impl ProviderAdapter {
    pub fn build_url(&self, channel: &Channel, model: &str, stream: bool) -> ProxyResult<String> {
        match self {
            ProviderAdapter::Claude(a) => a.build_url(channel, model, stream),
            ProviderAdapter::OpenAI(a) => a.build_url(channel, model, stream),
            ProviderAdapter::Gemini(a) => a.build_url(channel, model, stream),
        }
    }

    pub fn build_headers(&self, channel: &Channel, api_key: &str) -> HeaderMap {
        match self {
            ProviderAdapter::Claude(a) => a.build_headers(channel, api_key),
            ProviderAdapter::OpenAI(a) => a.build_headers(channel, api_key),
            ProviderAdapter::Gemini(a) => a.build_headers(channel, api_key),
        }
    }

    pub async fn send_request(
        &self,
        channel: &Channel,
        api_key: &str,
        model: &str,
        body: &Value,
    ) -> ProxyResult<UpstreamResponse> {
        match self {
            ProviderAdapter::Claude(a) => a.send_request(channel, api_key, model, body).await,
            ProviderAdapter::OpenAI(a) => a.send_request(channel, api_key, model, body).await,
            ProviderAdapter::Gemini(a) => a.send_request(channel, api_key, model, body).await,
        }
    }

    pub async fn send_stream(
        &self,
        channel: &Channel,
        api_key: &str,
        model: &str,
        body: &Value,
    ) -> ProxyResult<StreamResponse> {
        match self {
            ProviderAdapter::Claude(a) => a.send_stream(channel, api_key, model, body).await,
            ProviderAdapter::OpenAI(a) => a.send_stream(channel, api_key, model, body).await,
            ProviderAdapter::Gemini(a) => a.send_stream(channel, api_key, model, body).await,
        }
    }

    pub fn parse_stream_event(&self, event_name: Option<&str>, data: &str) -> Option<StreamEvent> {
        match self {
            ProviderAdapter::Claude(a) => a.parse_stream_event(event_name, data),
            ProviderAdapter::OpenAI(a) => a.parse_stream_event(event_name, data),
            ProviderAdapter::Gemini(a) => a.parse_stream_event(event_name, data),
        }
    }
}

/// Shared HTTP client builder: 5-minute default timeout, optional
/// per-channel TLS verification skip.
pub fn build_client(channel: &Channel, timeout_secs: u64) -> ProxyResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .connect_timeout(Duration::from_secs(10))
        .danger_accept_invalid_certs(channel.insecure_skip_verify)
        .build()
        .map_err(|e| ProxyError::Internal(format!("failed to build http client: {e}")))
}

pub fn apply_auth(headers: &mut HeaderMap, auth_type: AuthType, api_key: &str, header_name: &str) {
    use reqwest::header::{HeaderName, HeaderValue};
    match auth_type {
        AuthType::XApiKey => {
            if let Ok(value) = HeaderValue::from_str(api_key) {
                headers.insert("x-api-key", value);
            }
        }
        AuthType::Bearer => {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {api_key}")) {
                headers.insert(reqwest::header::AUTHORIZATION, value);
            }
        }
        AuthType::Both => {
            if let Ok(value) = HeaderValue::from_str(api_key) {
                headers.insert("x-api-key", value.clone());
            }
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {api_key}")) {
                headers.insert(reqwest::header::AUTHORIZATION, value);
            }
        }
        AuthType::XGoogApiKey => {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(header_name.as_bytes()),
                HeaderValue::from_str(api_key),
            ) {
                headers.insert(name, value);
            }
        }
    }
}

pub fn primary_base_url(channel: &Channel) -> ProxyResult<&str> {
    channel
        .base_urls
        .first()
        .map(|s| s.as_str())
        .ok_or_else(|| ProxyError::Validation("channel has no base urls".to_string()))
}
