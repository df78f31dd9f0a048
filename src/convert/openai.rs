//! OpenAI Chat Completions ↔ Claude Messages conversion.

use serde_json::{json, Value};

use super::{claude_content_to_text, stop_reason_from_claude, stop_reason_to_claude, text_to_claude_content, Converter, Vendor};

pub struct OpenAiChatConverter;

impl Converter for OpenAiChatConverter {
    /// OpenAI chat request → Claude request: `system` role message becomes
    /// the scalar `system` field; remaining messages keep their role.
    fn to_claude(&self, req: &Value) -> Value {
        let mut system = None;
        let mut messages = Vec::new();

        if let Some(msgs) = req.get("messages").and_then(Value::as_array) {
            for m in msgs {
                let role = m.get("role").and_then(Value::as_str).unwrap_or("user");
                let content = m.get("content").cloned().unwrap_or(Value::Null);
                let text = content.as_str().map(str::to_string).unwrap_or_default();
                if role == "system" {
                    system = Some(text);
                    continue;
                }
                messages.push(json!({
                    "role": role,
                    "content": text_to_claude_content(&text),
                }));
            }
        }

        let mut out = json!({
            "model": req.get("model").cloned().unwrap_or(Value::Null),
            "messages": messages,
            "max_tokens": req.get("max_tokens").cloned().unwrap_or(json!(4096)),
            "stream": req.get("stream").cloned().unwrap_or(json!(false)),
        });
        if let Some(system) = system {
            out["system"] = json!(system);
        }
        copy_generation_params(req, &mut out);
        out
    }

    /// Claude request → OpenAI chat request: `system` scalar becomes a
    /// leading `system` role message.
    fn from_claude(&self, req: &Value) -> Value {
        let mut messages = Vec::new();
        if let Some(system) = req.get("system").and_then(Value::as_str) {
            messages.push(json!({ "role": "system", "content": system }));
        }
        if let Some(msgs) = req.get("messages").and_then(Value::as_array) {
            for m in msgs {
                let role = m.get("role").and_then(Value::as_str).unwrap_or("user");
                let role = if role == "model" { "assistant" } else { role };
                let content = m.get("content").cloned().unwrap_or(Value::Null);
                let text = claude_content_to_text(&content);
                messages.push(json!({ "role": role, "content": text }));
            }
        }

        let mut out = json!({
            "model": req.get("model").cloned().unwrap_or(Value::Null),
            "messages": messages,
            "max_tokens": req.get("max_tokens").cloned().unwrap_or(json!(4096)),
            "stream": req.get("stream").cloned().unwrap_or(json!(false)),
        });
        copy_generation_params(req, &mut out);
        out
    }

    /// OpenAI chat completion response → Claude response envelope.
    fn response_to_claude(&self, resp: &Value) -> Value {
        let text = resp
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .unwrap_or("");
        let finish_reason = resp
            .pointer("/choices/0/finish_reason")
            .and_then(Value::as_str)
            .unwrap_or("stop");
        let stop_reason = stop_reason_to_claude(finish_reason, Vendor::OpenAiFinish);

        json!({
            "id": resp.get("id").cloned().unwrap_or(json!("msg")),
            "type": "message",
            "role": "assistant",
            "content": text_to_claude_content(text),
            "model": resp.get("model").cloned().unwrap_or(Value::Null),
            "stop_reason": stop_reason,
            "usage": {
                "input_tokens": resp.pointer("/usage/prompt_tokens").and_then(Value::as_i64).unwrap_or(0),
                "output_tokens": resp.pointer("/usage/completion_tokens").and_then(Value::as_i64).unwrap_or(0),
            },
        })
    }

    /// Claude response → OpenAI chat completion envelope.
    fn response_from_claude(&self, resp: &Value) -> Value {
        let text = claude_content_to_text(resp.get("content").unwrap_or(&Value::Null));
        let stop_reason = resp.get("stop_reason").and_then(Value::as_str).unwrap_or("end_turn");
        let finish_reason = stop_reason_from_claude(stop_reason, Vendor::OpenAiFinish);

        json!({
            "id": resp.get("id").cloned().unwrap_or(json!("chatcmpl")),
            "object": "chat.completion",
            "model": resp.get("model").cloned().unwrap_or(Value::Null),
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": text },
                "finish_reason": finish_reason,
            }],
            "usage": {
                "prompt_tokens": resp.pointer("/usage/input_tokens").and_then(Value::as_i64).unwrap_or(0),
                "completion_tokens": resp.pointer("/usage/output_tokens").and_then(Value::as_i64).unwrap_or(0),
            },
        })
    }
}

fn copy_generation_params(src: &Value, dst: &mut Value) {
    for key in ["temperature", "top_p", "top_k", "stop"] {
        if let Some(v) = src.get(key) {
            dst[key] = v.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_preserves_text_model_max_tokens_and_system() {
        let converter = OpenAiChatConverter;
        let claude_req = json!({
            "model": "claude-3-sonnet",
            "max_tokens": 100,
            "system": "be nice",
            "messages": [{ "role": "user", "content": "hi" }],
        });

        let openai_req = converter.from_claude(&claude_req);
        let back = converter.to_claude(&openai_req);

        assert_eq!(back["model"], claude_req["model"]);
        assert_eq!(back["max_tokens"], claude_req["max_tokens"]);
        assert_eq!(back["system"], claude_req["system"]);
        assert_eq!(
            claude_content_to_text(&back["messages"][0]["content"]),
            "hi"
        );
        assert_eq!(back["messages"][0]["role"], "user");
    }

    #[test]
    fn response_round_trip_preserves_text_and_stop_reason() {
        let converter = OpenAiChatConverter;
        let openai_resp = json!({
            "id": "chatcmpl-1",
            "model": "gpt-4o",
            "choices": [{ "message": { "content": "ok" }, "finish_reason": "stop" }],
            "usage": { "prompt_tokens": 1, "completion_tokens": 1 },
        });
        let claude_resp = converter.response_to_claude(&openai_resp);
        assert_eq!(claude_resp["stop_reason"], "end_turn");
        assert_eq!(claude_content_to_text(&claude_resp["content"]), "ok");

        let back = converter.response_from_claude(&claude_resp);
        assert_eq!(back["choices"][0]["finish_reason"], "stop");
        assert_eq!(back["choices"][0]["message"]["content"], "ok");
    }
}
