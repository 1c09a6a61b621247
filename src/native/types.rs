//! Native control API payloads and their bridge-facing counterparts

use serde::{Deserialize, Serialize};

/// Control API operation codes, sent as the `type` query parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiType {
    IsLogin = 0,
    GetSelfInfo = 1,
    SendText = 2,
    SendAt = 3,
    SendImage = 5,
    SendFile = 6,
    StartHook = 9,
    StartImageHook = 11,
    StartVoiceHook = 13,
    GetGroupMemberList = 25,
    GetGroupMemberNickname = 26,
    GetDbHandles = 32,
    DbQuery = 34,
    SetVersion = 35,
    ForwardMessage = 40,
    GetQrCodeImage = 41,
    Logout = 44,
}

impl ApiType {
    pub fn code(self) -> u32 {
        self as u32
    }
}

pub const DB_MICRO_MSG: &str = "MicroMsg.db";
pub const DB_OPENIM_CONTACT: &str = "OpenIMContact.db";
pub const DB_MEDIA_MSG: &str = "MediaMSG0.db";

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct WxIsLoginResp {
    #[serde(default)]
    pub is_login: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct WxGetSelfResp {
    pub data: WxUserInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct WxGetGroupMembersResp {
    #[serde(default)]
    pub members: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct WxQrCodeResp {
    #[serde(rename = "msg", default)]
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct WxDbHandle {
    pub db_name: String,
    pub handle: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct WxDbHandlesResp {
    #[serde(default)]
    pub data: Vec<WxDbHandle>,
}

/// Account record as reported by the engine
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct WxUserInfo {
    #[serde(rename = "wxId", default)]
    pub id: String,
    #[serde(rename = "wxNickName", default)]
    pub nickname: String,
    #[serde(rename = "wxBigAvatar", default)]
    pub big_avatar: String,
    #[serde(rename = "wxRemark", default)]
    pub remark: String,
}

impl From<WxUserInfo> for UserInfo {
    fn from(w: WxUserInfo) -> Self {
        Self {
            id: w.id,
            name: w.nickname,
            avatar: w.big_avatar,
            remark: w.remark,
        }
    }
}

/// Contact as returned to the bridge
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub avatar: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub remark: String,
}

/// Group chat as returned to the bridge
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupInfo {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub avatar: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub notice: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<String>,
}
