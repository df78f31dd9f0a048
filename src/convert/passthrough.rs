//! Identity converter used when the channel already speaks the caller's
//! dialect — no rewrite needed.

use serde_json::Value;

use super::Converter;

pub struct PassthroughConverter;

impl Converter for PassthroughConverter {
    fn to_claude(&self, req: &Value) -> Value {
        req.clone()
    }

    fn from_claude(&self, req: &Value) -> Value {
        req.clone()
    }

    fn response_to_claude(&self, resp: &Value) -> Value {
        resp.clone()
    }

    fn response_from_claude(&self, resp: &Value) -> Value {
        resp.clone()
    }
}
