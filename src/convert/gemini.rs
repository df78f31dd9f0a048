//! Gemini `generateContent` ↔ Claude Messages conversion.

use serde_json::{json, Value};

use super::{claude_content_to_text, stop_reason_from_claude, stop_reason_to_claude, text_to_claude_content, Converter, Vendor};
use crate::convert::openai_responses::DEFAULT_MODEL;

pub struct GeminiConverter;

impl Converter for GeminiConverter {
    fn to_claude(&self, req: &Value) -> Value {
        let mut system = None;
        let mut messages = Vec::new();

        if let Some(instruction) = req.pointer("/systemInstruction/parts/0/text").and_then(Value::as_str) {
            system = Some(instruction.to_string());
        }

        if let Some(contents) = req.get("contents").and_then(Value::as_array) {
            for c in contents {
                let role = c.get("role").and_then(Value::as_str).unwrap_or("user");
                let role = if role == "model" { "assistant" } else { role };
                let text = c
                    .get("parts")
                    .and_then(Value::as_array)
                    .map(|parts| {
                        parts
                            .iter()
                            .filter_map(|p| p.get("text").and_then(Value::as_str))
                            .collect::<String>()
                    })
                    .unwrap_or_default();
                messages.push(json!({ "role": role, "content": text_to_claude_content(&text) }));
            }
        }

        let max_tokens = req
            .pointer("/generationConfig/maxOutputTokens")
            .cloned()
            .unwrap_or(json!(4096));

        let mut out = json!({
            "model": req.get("model").cloned().unwrap_or(json!(DEFAULT_MODEL)),
            "messages": messages,
            "max_tokens": max_tokens,
            "stream": req.get("stream").cloned().unwrap_or(json!(false)),
        });
        if let Some(system) = system {
            out["system"] = json!(system);
        }
        out
    }

    fn from_claude(&self, req: &Value) -> Value {
        let mut contents = Vec::new();
        if let Some(msgs) = req.get("messages").and_then(Value::as_array) {
            for m in msgs {
                let role = m.get("role").and_then(Value::as_str).unwrap_or("user");
                let role = if role == "assistant" { "model" } else { role };
                let text = claude_content_to_text(m.get("content").unwrap_or(&Value::Null));
                contents.push(json!({ "role": role, "parts": [{ "text": text }] }));
            }
        }

        let mut out = json!({
            "contents": contents,
            "generationConfig": {
                "maxOutputTokens": req.get("max_tokens").cloned().unwrap_or(json!(4096)),
            },
        });
        if let Some(system) = req.get("system").and_then(Value::as_str) {
            out["systemInstruction"] = json!({ "parts": [{ "text": system }] });
        }
        out
    }

    fn response_to_claude(&self, resp: &Value) -> Value {
        let text = resp
            .pointer("/candidates/0/content/parts")
            .and_then(Value::as_array)
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|p| p.get("text").and_then(Value::as_str))
                    .collect::<String>()
            })
            .unwrap_or_default();
        let finish_reason = resp
            .pointer("/candidates/0/finishReason")
            .and_then(Value::as_str)
            .unwrap_or("STOP");
        let stop_reason = stop_reason_to_claude(finish_reason, Vendor::GeminiFinish);

        json!({
            "id": "msg",
            "type": "message",
            "role": "assistant",
            "content": text_to_claude_content(&text),
            "stop_reason": stop_reason,
            "usage": {
                "input_tokens": resp.pointer("/usageMetadata/promptTokenCount").and_then(Value::as_i64).unwrap_or(0),
                "output_tokens": resp.pointer("/usageMetadata/candidatesTokenCount").and_then(Value::as_i64).unwrap_or(0),
            },
        })
    }

    fn response_from_claude(&self, resp: &Value) -> Value {
        let text = claude_content_to_text(resp.get("content").unwrap_or(&Value::Null));
        let stop_reason = resp.get("stop_reason").and_then(Value::as_str).unwrap_or("end_turn");
        let finish_reason = stop_reason_from_claude(stop_reason, Vendor::GeminiFinish);

        json!({
            "candidates": [{
                "content": { "role": "model", "parts": [{ "text": text }] },
                "finishReason": finish_reason,
            }],
            "usageMetadata": {
                "promptTokenCount": resp.pointer("/usage/input_tokens").and_then(Value::as_i64).unwrap_or(0),
                "candidatesTokenCount": resp.pointer("/usage/output_tokens").and_then(Value::as_i64).unwrap_or(0),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_model_used_when_gemini_request_has_none() {
        let converter = GeminiConverter;
        let req = json!({ "contents": [{ "role": "user", "parts": [{ "text": "hi" }] }] });
        let claude_req = converter.to_claude(&req);
        assert_eq!(claude_req["model"], DEFAULT_MODEL);
    }

    #[test]
    fn system_instruction_maps_to_claude_system() {
        let converter = GeminiConverter;
        let req = json!({
            "systemInstruction": { "parts": [{ "text": "be nice" }] },
            "contents": [],
        });
        let claude_req = converter.to_claude(&req);
        assert_eq!(claude_req["system"], "be nice");
    }
}
