//! Bridge wire frames
//!
//! Every websocket text message is one JSON [`Frame`]. Requests carry a
//! non-zero `req` when the sender expects a `response` frame back.

use crate::error::{Error, Result};
use crate::pipeline::NormalizedEvent;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const COMMAND_PING: &str = "ping";
pub const COMMAND_EVENT: &str = "event";
pub const COMMAND_RESPONSE: &str = "response";
pub const COMMAND_ERROR: &str = "error";

/// Error code reported for every failed command
pub const PROCESS_FAILED: &str = "PROCESS_FAILED";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Bridge identity the frame concerns
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mxid: String,
    /// Request id; zero for fire-and-forget frames
    #[serde(default, skip_serializing_if = "is_zero")]
    pub req: u64,
    #[serde(default)]
    pub command: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

fn is_zero(v: &u64) -> bool {
    *v == 0
}

impl Frame {
    pub fn ping(timestamp_ms: i64) -> Self {
        Self {
            command: COMMAND_PING.to_string(),
            data: serde_json::json!({ "timestamp": timestamp_ms }),
            ..Default::default()
        }
    }

    pub fn event(mxid: &str, event: &NormalizedEvent) -> Result<Self> {
        Ok(Self {
            mxid: mxid.to_string(),
            command: COMMAND_EVENT.to_string(),
            data: serde_json::to_value(event)?,
            ..Default::default()
        })
    }

    pub fn response(mxid: &str, req: u64, response: CommandResponse) -> Result<Self> {
        Ok(Self {
            mxid: mxid.to_string(),
            req,
            command: COMMAND_RESPONSE.to_string(),
            data: serde_json::to_value(response)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

/// Uniform result envelope of a bridge command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    /// Command this responds to
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorResponse>,
}

impl CommandResponse {
    pub fn ok(kind: &str, data: Option<Value>) -> Self {
        Self {
            kind: kind.to_string(),
            data,
            error: None,
        }
    }

    pub fn err(kind: &str, error: &Error) -> Self {
        Self::failure(kind, error.to_string())
    }

    /// Response for a handler that panicked
    pub fn internal(kind: &str) -> Self {
        Self::failure(kind, "internal server error".to_string())
    }

    fn failure(kind: &str, message: String) -> Self {
        Self {
            kind: kind.to_string(),
            data: None,
            error: Some(ErrorResponse {
                code: PROCESS_FAILED.to_string(),
                message,
            }),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ping_frame() {
        let value = serde_json::to_value(Frame::ping(1234)).unwrap();
        assert_eq!(value, json!({"command": "ping", "data": {"timestamp": 1234}}));
    }

    #[test]
    fn test_response_frame() {
        let frame = Frame::response(
            "@alice:example.org",
            7,
            CommandResponse::ok("is_login", Some(json!({"status": true}))),
        )
        .unwrap();
        assert_eq!(
            serde_json::to_value(frame).unwrap(),
            json!({
                "mxid": "@alice:example.org",
                "req": 7,
                "command": "response",
                "data": {"type": "is_login", "data": {"status": true}}
            })
        );
    }

    #[test]
    fn test_error_response() {
        let response = CommandResponse::err("get_self", &Error::NotLoggedIn);
        assert!(!response.is_ok());
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({"type": "get_self", "error": {"code": "PROCESS_FAILED", "message": "User not logged"}})
        );

        let internal = CommandResponse::internal("connect");
        assert_eq!(internal.error.unwrap().message, "internal server error");
    }

    #[test]
    fn test_inbound_request_parse() {
        let frame: Frame = serde_json::from_str(
            r#"{"mxid":"@a:b","req":3,"command":"get_user_info","data":{"wxId":"wxid_x"}}"#,
        )
        .unwrap();
        assert_eq!(frame.req, 3);
        assert_eq!(frame.command, "get_user_info");
        assert_eq!(frame.data["wxId"], "wxid_x");

        let keepalive: Frame = serde_json::from_str("{}").unwrap();
        assert!(keepalive.command.is_empty());
        assert_eq!(keepalive.req, 0);
    }
}
