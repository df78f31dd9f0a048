//! Dialect ↔ Claude request/response converters.
//!
//! Grounded on the teacher's `convert_anthropic_to_openai` /
//! `convert_openai_response_to_anthropic` family in its handler modules,
//! trimmed to the guaranteed surface: text content, usage counters, and
//! stop-reason mapping. Tool calls, vision parts, and safety metadata are
//! not preserved across conversion, matching policy.

pub mod gemini;
pub mod openai;
pub mod openai_responses;
pub mod passthrough;

use serde_json::Value;

/// One dialect's conversion contract, plus `passthrough` for when the
/// channel already speaks Claude dialect.
pub trait Converter {
    fn to_claude(&self, req: &Value) -> Value;
    fn from_claude(&self, req: &Value) -> Value;
    fn response_to_claude(&self, resp: &Value) -> Value;
    fn response_from_claude(&self, resp: &Value) -> Value;
}

/// Normalises a stop reason to Claude vocabulary. Unknown values pass
/// through unchanged.
pub fn stop_reason_to_claude(vendor_value: &str, vendor: Vendor) -> String {
    match (vendor, vendor_value) {
        (Vendor::OpenAiFinish, "stop") => "end_turn",
        (Vendor::OpenAiFinish, "length") => "max_tokens",
        (Vendor::OpenAiFinish, "content_filter") => "stop_sequence",
        (Vendor::GeminiFinish, "STOP") => "end_turn",
        (Vendor::GeminiFinish, "MAX_TOKENS") => "max_tokens",
        (Vendor::GeminiFinish, "SAFETY") | (Vendor::GeminiFinish, "RECITATION") => "stop_sequence",
        _ => vendor_value,
    }
    .to_string()
}

/// Inverse of `stop_reason_to_claude` for the four named values; unknown
/// values pass through unchanged, so the two compose to identity.
pub fn stop_reason_from_claude(claude_value: &str, vendor: Vendor) -> String {
    match (vendor, claude_value) {
        (Vendor::OpenAiFinish, "end_turn") => "stop",
        (Vendor::OpenAiFinish, "max_tokens") => "length",
        (Vendor::OpenAiFinish, "stop_sequence") => "content_filter",
        (Vendor::GeminiFinish, "end_turn") => "STOP",
        (Vendor::GeminiFinish, "max_tokens") => "MAX_TOKENS",
        (Vendor::GeminiFinish, "stop_sequence") => "SAFETY",
        _ => claude_value,
    }
    .to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vendor {
    OpenAiFinish,
    GeminiFinish,
}

/// Extracts plain text from Claude-shaped content, which may be a scalar
/// string or an array of content blocks; only `type=text` blocks count.
pub fn claude_content_to_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(blocks) => blocks
            .iter()
            .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|b| b.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    }
}

/// Wraps scalar text as a one-element Claude text content block array.
pub fn text_to_claude_content(text: &str) -> Value {
    serde_json::json!([{ "type": "text", "text": text }])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_reason_round_trips_for_named_values() {
        for (claude, vendor) in [
            ("end_turn", Vendor::OpenAiFinish),
            ("max_tokens", Vendor::OpenAiFinish),
            ("stop_sequence", Vendor::OpenAiFinish),
            ("end_turn", Vendor::GeminiFinish),
            ("max_tokens", Vendor::GeminiFinish),
        ] {
            let vendor_value = stop_reason_from_claude(claude, vendor);
            let back = stop_reason_to_claude(&vendor_value, vendor);
            assert_eq!(back, claude);
        }
    }

    #[test]
    fn claude_content_extracts_only_text_blocks() {
        let content = serde_json::json!([
            {"type": "text", "text": "hello "},
            {"type": "tool_use", "id": "x"},
            {"type": "text", "text": "world"},
        ]);
        assert_eq!(claude_content_to_text(&content), "hello world");
    }
}
