//! The uniform response envelope.
//!
//! Every response body is an object with `ok`, `code`, and either `result`
//! (success) or `message` (failure). The dispatcher appends `pref_counter`
//! and `process_time` to every body before it goes on the wire; the `code`
//! field doubles as the HTTP status.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Ok {
    pub ok: bool,
    pub code: u16,
}

impl Default for Ok {
    fn default() -> Self {
        Ok { ok: true, code: 200 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct OkResult {
    pub ok: bool,
    pub code: u16,
    pub result: Value,
}

impl OkResult {
    pub fn new(result: Value) -> Self {
        OkResult { ok: true, code: 200, result }
    }

    pub fn created(result: Value) -> Self {
        OkResult { ok: true, code: 201, result }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct OkListResult {
    pub ok: bool,
    pub code: u16,
    pub result: Vec<Value>,
}

impl OkListResult {
    pub fn new(result: Vec<Value>) -> Self {
        OkListResult { ok: true, code: 200, result }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ErrorMessage {
    pub ok: bool,
    pub code: u16,
    pub message: String,
}

impl ErrorMessage {
    pub fn new(message: impl Into<String>, code: u16) -> Self {
        ErrorMessage { ok: false, code, message: message.into() }
    }
}

/// A finished handler outcome, ready for timing fields and serialization.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Body {
    Ok(Ok),
    Result(OkResult),
    List(OkListResult),
    Error(ErrorMessage),
    /// Pre-shaped payloads such as the auth token `{access_token}` object.
    Raw(Value),
}

impl Body {
    pub fn code(&self) -> u16 {
        match self {
            Body::Ok(body) => body.code,
            Body::Result(body) => body.code,
            Body::List(body) => body.code,
            Body::Error(body) => body.code,
            Body::Raw(_) => 200,
        }
    }

    /// Serialize the body and append the timing fields.
    pub fn finalize(self, pref_counter: f64, process_time: f64) -> (u16, Value) {
        let code = self.code();
        let mut value = match serde_json::to_value(&self) {
            std::result::Result::Ok(value) => value,
            Err(_) => Value::Null,
        };
        if let Value::Object(map) = &mut value {
            map.insert("pref_counter".into(), pref_counter.into());
            map.insert("process_time".into(), process_time.into());
        }
        (code, value)
    }
}

impl From<ErrorMessage> for Body {
    fn from(err: ErrorMessage) -> Self {
        Body::Error(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ok_result_shape() {
        let (code, body) = Body::Result(OkResult::new(json!({"name": "root"})))
            .finalize(0.001, 0.0005);
        assert_eq!(code, 200);
        assert_eq!(body["ok"], json!(true));
        assert_eq!(body["code"], json!(200));
        assert_eq!(body["result"]["name"], json!("root"));
        assert!(body["pref_counter"].is_number());
        assert!(body["process_time"].is_number());
    }

    #[test]
    fn error_shape() {
        let (code, body) = Body::Error(ErrorMessage::new("Unauthorized", 401)).finalize(0.0, 0.0);
        assert_eq!(code, 401);
        assert_eq!(body["ok"], json!(false));
        assert_eq!(body["message"], json!("Unauthorized"));
        assert!(body.get("result").is_none());
    }

    #[test]
    fn raw_body_keeps_its_shape() {
        let (code, body) = Body::Raw(json!({"access_token": "abc"})).finalize(0.0, 0.0);
        assert_eq!(code, 200);
        assert_eq!(body["access_token"], json!("abc"));
        assert!(body.get("ok").is_none());
    }

    #[test]
    fn factory_code_is_201() {
        let (code, _) = Body::Result(OkResult::created(json!({}))).finalize(0.0, 0.0);
        assert_eq!(code, 201);
    }
}
