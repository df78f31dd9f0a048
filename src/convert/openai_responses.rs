//! OpenAI Responses API ↔ Claude Messages conversion.
//!
//! `input` may be a scalar string (one user turn) or an array of
//! `{role,content}`; `instructions` maps to `system`. Default model when
//! converting from Gemini with none specified is `claude-3-sonnet-20240229`;
//! default max tokens when Responses omits it is 4096.

use serde_json::{json, Value};

use super::{claude_content_to_text, stop_reason_from_claude, stop_reason_to_claude, text_to_claude_content, Converter, Vendor};

pub const DEFAULT_MODEL: &str = "claude-3-sonnet-20240229";
pub const DEFAULT_MAX_TOKENS: i64 = 4096;

pub struct OpenAiResponsesConverter;

impl Converter for OpenAiResponsesConverter {
    fn to_claude(&self, req: &Value) -> Value {
        let mut messages = Vec::new();

        match req.get("input") {
            Some(Value::String(s)) => {
                messages.push(json!({ "role": "user", "content": text_to_claude_content(s) }));
            }
            Some(Value::Array(items)) => {
                for item in items {
                    let role = item.get("role").and_then(Value::as_str).unwrap_or("user");
                    let text = item
                        .get("content")
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    messages.push(json!({ "role": role, "content": text_to_claude_content(text) }));
                }
            }
            _ => {}
        }

        let mut out = json!({
            "model": req.get("model").cloned().unwrap_or(json!(DEFAULT_MODEL)),
            "messages": messages,
            "max_tokens": req.get("max_output_tokens").cloned().unwrap_or(json!(DEFAULT_MAX_TOKENS)),
            "stream": req.get("stream").cloned().unwrap_or(json!(false)),
        });
        if let Some(instructions) = req.get("instructions").and_then(Value::as_str) {
            out["system"] = json!(instructions);
        }
        out
    }

    fn from_claude(&self, req: &Value) -> Value {
        let input: Vec<Value> = req
            .get("messages")
            .and_then(Value::as_array)
            .map(|msgs| {
                msgs.iter()
                    .map(|m| {
                        let role = m.get("role").and_then(Value::as_str).unwrap_or("user");
                        let text = claude_content_to_text(m.get("content").unwrap_or(&Value::Null));
                        json!({ "role": role, "content": text })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let mut out = json!({
            "model": req.get("model").cloned().unwrap_or(Value::Null),
            "input": input,
            "max_output_tokens": req.get("max_tokens").cloned().unwrap_or(json!(DEFAULT_MAX_TOKENS)),
            "stream": req.get("stream").cloned().unwrap_or(json!(false)),
        });
        if let Some(system) = req.get("system").and_then(Value::as_str) {
            out["instructions"] = json!(system);
        }
        out
    }

    /// Responses `output[0].content[0].text` → Claude text content.
    fn response_to_claude(&self, resp: &Value) -> Value {
        let text = resp
            .pointer("/output/0/content/0/text")
            .and_then(Value::as_str)
            .unwrap_or("");
        let finish_reason = resp
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("completed");
        let stop_reason = if finish_reason == "completed" {
            "end_turn".to_string()
        } else {
            stop_reason_to_claude(finish_reason, Vendor::OpenAiFinish)
        };

        json!({
            "id": resp.get("id").cloned().unwrap_or(json!("msg")),
            "type": "message",
            "role": "assistant",
            "content": text_to_claude_content(text),
            "model": resp.get("model").cloned().unwrap_or(Value::Null),
            "stop_reason": stop_reason,
            "usage": {
                "input_tokens": resp.pointer("/usage/input_tokens").and_then(Value::as_i64).unwrap_or(0),
                "output_tokens": resp.pointer("/usage/output_tokens").and_then(Value::as_i64).unwrap_or(0),
            },
        })
    }

    fn response_from_claude(&self, resp: &Value) -> Value {
        let text = claude_content_to_text(resp.get("content").unwrap_or(&Value::Null));
        let stop_reason = resp.get("stop_reason").and_then(Value::as_str).unwrap_or("end_turn");
        let status = if stop_reason == "end_turn" {
            "completed"
        } else {
            "incomplete"
        };

        json!({
            "id": resp.get("id").cloned().unwrap_or(json!("resp")),
            "object": "response",
            "model": resp.get("model").cloned().unwrap_or(Value::Null),
            "status": status,
            "output": [{
                "type": "message",
                "role": "assistant",
                "content": [{ "type": "output_text", "text": text }],
            }],
            "usage": {
                "input_tokens": resp.pointer("/usage/input_tokens").and_then(Value::as_i64).unwrap_or(0),
                "output_tokens": resp.pointer("/usage/output_tokens").and_then(Value::as_i64).unwrap_or(0),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_input_becomes_single_user_turn() {
        let converter = OpenAiResponsesConverter;
        let req = json!({ "model": "gpt-4o", "input": "hi", "stream": false });
        let claude_req = converter.to_claude(&req);
        assert_eq!(claude_req["messages"].as_array().unwrap().len(), 1);
        assert_eq!(
            claude_content_to_text(&claude_req["messages"][0]["content"]),
            "hi"
        );
    }

    #[test]
    fn response_envelope_surfaces_output_text() {
        let converter = OpenAiResponsesConverter;
        let claude_resp = json!({
            "content": [{ "type": "text", "text": "ok" }],
            "stop_reason": "end_turn",
            "usage": { "input_tokens": 1, "output_tokens": 1 },
        });
        let envelope = converter.response_from_claude(&claude_resp);
        assert_eq!(envelope["output"][0]["content"][0]["text"], "ok");
    }
}
