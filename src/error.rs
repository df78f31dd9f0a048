//! Crate-wide error type.
//!
//! Maps the error taxonomy (validation / no-upstream / all-broken /
//! upstream-transport / upstream-status / conversion / internal) onto HTTP
//! status codes and a JSON envelope shaped like whichever dialect the
//! caller spoke. Claude, OpenAI, and Gemini each have their own error
//! object shape, so a client that called `/v1/responses` gets an
//! OpenAI-shaped error back rather than a Claude one just because the
//! crate's internal taxonomy is shared across all three.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;

use crate::providers::Vendor;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("no upstream available for this request kind")]
    NoUpstream,

    #[error("all candidate channels are broken or exhausted")]
    AllBroken,

    #[error("upstream transport error: {0}")]
    UpstreamTransport(String),

    #[error("upstream returned status {status}: {body}")]
    UpstreamStatus { status: u16, body: String },

    #[error("conversion error: {0}")]
    Conversion(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::Validation(_) => "validation",
            ProxyError::NoUpstream => "no_upstream",
            ProxyError::AllBroken => "all_broken",
            ProxyError::UpstreamTransport(_) => "upstream_transport",
            ProxyError::UpstreamStatus { .. } => "upstream_status",
            ProxyError::Conversion(_) => "conversion_error",
            ProxyError::Internal(_) => "internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ProxyError::Validation(_) => StatusCode::BAD_REQUEST,
            ProxyError::NoUpstream => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::AllBroken => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::UpstreamTransport(_) => StatusCode::BAD_GATEWAY,
            ProxyError::UpstreamStatus { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            ProxyError::Conversion(_) => StatusCode::BAD_REQUEST,
            ProxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Renders this error shaped like `dialect`'s own error object instead
    /// of the crate's internal taxonomy envelope. `UpstreamStatus` carries
    /// the upstream's own error body through verbatim, inside that shape,
    /// per each dialect's error contract; every other variant carries this
    /// crate's own message.
    pub fn into_dialect_response(self, dialect: Vendor) -> Response {
        let status = self.status();
        match &self {
            ProxyError::Internal(msg) => {
                crate::logging::error("proxy", &format!("internal error: {msg}"));
            }
            ProxyError::UpstreamTransport(msg) => {
                crate::logging::warn("proxy", &format!("upstream transport failure: {msg}"));
            }
            _ => {}
        }

        let message = match &self {
            ProxyError::UpstreamStatus { body, .. } if !body.trim().is_empty() => body.clone(),
            _ => self.to_string(),
        };
        let kind = self.kind().to_string();

        let body = match dialect {
            Vendor::Claude => serde_json::json!({
                "type": "error",
                "error": { "type": kind, "message": message },
            }),
            Vendor::OpenAI => serde_json::json!({
                "error": { "message": message, "type": kind, "code": status.as_u16() },
            }),
            Vendor::Gemini => serde_json::json!({
                "error": { "code": status.as_u16(), "message": message, "status": kind },
            }),
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: ErrorInner,
}

#[derive(Debug, Serialize)]
struct ErrorInner {
    #[serde(rename = "type")]
    kind: String,
    message: String,
}

/// Generic fallback shape for call sites with no calling dialect in scope
/// (e.g. admin/RPC surfaces, not the `/v1/*` dialect handlers).
impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            ProxyError::Internal(msg) => {
                crate::logging::error("proxy", &format!("internal error: {msg}"));
            }
            ProxyError::UpstreamTransport(msg) => {
                crate::logging::warn("proxy", &format!("upstream transport failure: {msg}"));
            }
            _ => {}
        }

        let body = ErrorBody {
            error: ErrorInner {
                kind: self.kind().to_string(),
                message: self.to_string(),
            },
        };

        (status, Json(body)).into_response()
    }
}

pub type ProxyResult<T> = Result<T, ProxyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn openai_dialect_shapes_message_type_code() {
        let err = ProxyError::UpstreamStatus { status: 404, body: "model not found".to_string() };
        let resp = err.into_dialect_response(Vendor::OpenAI);
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["error"]["message"], "model not found");
        assert_eq!(json["error"]["code"], 404);
        assert!(json["error"]["type"].is_string());
    }

    #[tokio::test]
    async fn gemini_dialect_shapes_code_message_status() {
        let err = ProxyError::UpstreamStatus { status: 429, body: "rate limited".to_string() };
        let resp = err.into_dialect_response(Vendor::Gemini);
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["error"]["message"], "rate limited");
        assert_eq!(json["error"]["code"], 429);
        assert!(json["error"]["status"].is_string());
    }

    #[tokio::test]
    async fn claude_dialect_keeps_type_error_envelope() {
        let err = ProxyError::UpstreamStatus { status: 503, body: "overloaded".to_string() };
        let resp = err.into_dialect_response(Vendor::Claude);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["error"]["message"], "overloaded");
    }

    #[tokio::test]
    async fn non_upstream_variant_uses_display_message_in_any_dialect() {
        let resp = ProxyError::AllBroken.into_dialect_response(Vendor::OpenAI);
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["error"]["message"], ProxyError::AllBroken.to_string());
    }
}
