//! Raw message records pushed by engine processes

use serde::{Deserialize, Serialize};

/// Type code of revoke notifications
pub const TYPE_REVOKE: i32 = 10000;

/// One message as reported by an engine's message hook
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawMessage {
    /// Engine process id
    #[serde(default)]
    pub pid: u32,
    #[serde(rename = "msgid", default)]
    pub msg_id: u64,
    /// Local time, `%Y-%m-%d %H:%M:%S`
    #[serde(default)]
    pub time: String,
    /// Unix seconds; zero when only `time` is set
    #[serde(default)]
    pub timestamp: i64,
    /// Author of the message
    #[serde(rename = "wxid", default)]
    pub wx_id: String,
    /// Conversation peer: a contact or a `@chatroom` group
    #[serde(default)]
    pub sender: String,
    /// Account the engine is logged in as
    #[serde(rename = "self", default)]
    pub self_id: String,
    #[serde(rename = "isSendMsg", default)]
    pub is_send_msg: i8,
    /// Zero when the message was sent through the engine itself
    #[serde(rename = "isSendByPhone", default = "default_send_by_phone")]
    pub is_send_by_phone: i8,
    #[serde(rename = "type", default)]
    pub msg_type: i32,
    #[serde(default)]
    pub message: String,
    #[serde(rename = "filepath", default)]
    pub file_path: String,
    #[serde(rename = "thumb_path", alias = "thumbnail", default)]
    pub thumb_path: String,
    #[serde(rename = "extrainfo", default)]
    pub extra_info: String,
}

fn default_send_by_phone() -> i8 {
    1
}

impl RawMessage {
    /// Echo of a message this agent sent through the engine
    pub fn is_engine_echo(&self) -> bool {
        self.is_send_by_phone == 0 && self.msg_type != TYPE_REVOKE
    }

    pub fn is_group(&self) -> bool {
        self.sender.ends_with("@chatroom")
    }
}
