//! HTTP client for one engine process's local control API

use super::types::*;
use crate::error::{Error, Result};
use base64::Engine as _;
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;

/// The first QR code an engine renders right after launch is stale.
const QR_SETTLE_DELAY: Duration = Duration::from_secs(3);

/// Client for a single engine process, reached on `127.0.0.1:<port>`
#[derive(Debug, Clone)]
pub struct ControlClient {
    http: reqwest::Client,
    base_url: String,
    qr_settle_delay: Duration,
}

impl ControlClient {
    /// Create a client for the control API listening on `port`
    pub fn new(http: reqwest::Client, port: u16) -> Self {
        Self::with_base_url(http, format!("http://127.0.0.1:{}", port))
    }

    pub fn with_base_url(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            qr_settle_delay: QR_SETTLE_DELAY,
        }
    }

    #[cfg(test)]
    pub(crate) fn without_qr_delay(mut self) -> Self {
        self.qr_settle_delay = Duration::ZERO;
        self
    }

    // =========================================================================
    // Process setup
    // =========================================================================

    /// Arm message, image and voice hooks.
    ///
    /// Messages are pushed to the inbound listener on `listen_port`; media the
    /// engine decodes is written under `save_path`.
    pub async fn hook_msg(&self, listen_port: u16, save_path: &Path) -> Result<()> {
        let path = json!({ "save_path": save_path.to_string_lossy() });

        self.call_json(ApiType::StartHook, json!({ "port": listen_port }))
            .await?;
        self.call_json(ApiType::StartImageHook, path.clone()).await?;
        self.call_json(ApiType::StartVoiceHook, path).await?;
        Ok(())
    }

    pub async fn set_version(&self, version: &str) -> Result<()> {
        self.call_json(ApiType::SetVersion, json!({ "version": version }))
            .await
            .map(|_| ())
    }

    pub async fn logout(&self) -> Result<()> {
        self.call(ApiType::Logout, json!({})).await.map(|_| ())
    }

    /// Fetch the login QR code image.
    pub async fn login_with_qr(&self) -> Result<Vec<u8>> {
        if !self.qr_settle_delay.is_zero() {
            tokio::time::sleep(self.qr_settle_delay).await;
        }

        let body = self.call(ApiType::GetQrCodeImage, json!({})).await?;

        // Image bytes on success, a JSON error object otherwise
        match serde_json::from_slice::<WxQrCodeResp>(&body) {
            Ok(resp) => Err(Error::Control(resp.message)),
            Err(_) => Ok(body),
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn is_login(&self) -> Result<bool> {
        let value = self.call_json(ApiType::IsLogin, json!({})).await?;
        let resp: WxIsLoginResp = serde_json::from_value(value)?;
        Ok(resp.is_login == 1)
    }

    pub async fn get_self(&self) -> Result<UserInfo> {
        self.ensure_login().await?;
        let value = self.call_json(ApiType::GetSelfInfo, json!({})).await?;
        let resp: WxGetSelfResp = serde_json::from_value(value)?;
        Ok(resp.data.into())
    }

    pub async fn get_user_info(&self, wxid: &str) -> Result<UserInfo> {
        self.ensure_login().await?;

        let (db, sql) = if wxid.ends_with("@openim") {
            (
                DB_OPENIM_CONTACT,
                format!(
                    r#"SELECT UserName, NickName, BigHeadImgUrl, SmallHeadImgUrl, Remark
                       FROM OpenIMContact WHERE UserName="{}""#,
                    escape_sql(wxid)
                ),
            )
        } else {
            (
                DB_MICRO_MSG,
                format!(
                    r#"SELECT c.UserName, c.NickName, i.bigHeadImgUrl, i.smallHeadImgUrl, c.Remark
                       FROM Contact AS c
                       LEFT JOIN ContactHeadImgUrl AS i ON c.UserName = i.usrName
                       WHERE c.UserName="{}""#,
                    escape_sql(wxid)
                ),
            )
        };

        let handle = self.db_handle(db).await?;
        let rows = self.query(handle, &sql).await?;
        let row = rows
            .first()
            .ok_or_else(|| Error::Control(format!("user {} not found", wxid)))?;

        Ok(contact_to_user(row))
    }

    pub async fn get_group_info(&self, wxid: &str) -> Result<GroupInfo> {
        self.ensure_login().await?;

        let handle = self.db_handle(DB_MICRO_MSG).await?;
        let sql = format!(
            r#"SELECT c.UserName, c.NickName, i.bigHeadImgUrl, i.smallHeadImgUrl
               FROM Contact AS c
               LEFT JOIN ContactHeadImgUrl AS i ON c.UserName = i.usrName
               WHERE c.UserName="{}""#,
            escape_sql(wxid)
        );
        let rows = self.query(handle, &sql).await?;
        let row = rows
            .first()
            .ok_or_else(|| Error::Control(format!("group {} not found", wxid)))?;
        let mut info = contact_to_group(row);

        let sql = format!(
            r#"SELECT Announcement FROM ChatRoomInfo WHERE ChatRoomName="{}""#,
            escape_sql(wxid)
        );
        if let Some(row) = self.query(handle, &sql).await?.first() {
            info.notice = cell(row, 0);
        }

        Ok(info)
    }

    pub async fn get_group_members(&self, wxid: &str) -> Result<Vec<String>> {
        self.ensure_login().await?;
        let value = self
            .call_json(ApiType::GetGroupMemberList, json!({ "chatroom_id": wxid }))
            .await?;
        let resp: WxGetGroupMembersResp = serde_json::from_value(value)?;

        Ok(resp
            .members
            .split("^G")
            .filter(|m| !m.is_empty())
            .map(str::to_string)
            .collect())
    }

    pub async fn get_group_member_nickname(&self, group: &str, wxid: &str) -> Result<String> {
        self.ensure_login().await?;
        let value = self
            .call_json(
                ApiType::GetGroupMemberNickname,
                json!({ "chatroom_id": group, "wxid": wxid }),
            )
            .await?;
        Ok(value
            .get("nickname")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }

    /// All non-group contacts, including enterprise (OpenIM) contacts when available
    pub async fn get_friend_list(&self) -> Result<Vec<UserInfo>> {
        self.ensure_login().await?;

        let mut friends: Vec<UserInfo> = self
            .contacts()
            .await?
            .iter()
            .filter(|row| !cell(row, 0).ends_with("@chatroom"))
            .map(|row| contact_to_user(row))
            .collect();

        match self.openim_contacts().await {
            Ok(rows) => friends.extend(
                rows.iter()
                    .filter(|row| !cell(row, 0).ends_with("@chatroom"))
                    .map(|row| contact_to_user(row)),
            ),
            Err(e) => tracing::debug!("OpenIM contacts unavailable: {}", e),
        }

        Ok(friends)
    }

    pub async fn get_group_list(&self) -> Result<Vec<GroupInfo>> {
        self.ensure_login().await?;

        Ok(self
            .contacts()
            .await?
            .iter()
            .filter(|row| cell(row, 0).ends_with("@chatroom"))
            .map(|row| contact_to_group(row))
            .collect())
    }

    /// Voice clip for a message, `None` while the engine has not stored it yet.
    pub async fn get_voice(&self, msg_id: u64) -> Result<Option<Vec<u8>>> {
        self.ensure_login().await?;

        let handle = self.db_handle(DB_MEDIA_MSG).await?;
        let sql = format!("SELECT Buf FROM Media WHERE Reserved0 = {}", msg_id);
        let rows = self.query(handle, &sql).await?;

        match rows.first() {
            Some(row) => {
                let data = base64::engine::general_purpose::STANDARD
                    .decode(cell(row, 0))
                    .map_err(|e| Error::Control(format!("Invalid voice buffer: {}", e)))?;
                Ok(Some(data))
            }
            None => Ok(None),
        }
    }

    // =========================================================================
    // Sending
    // =========================================================================

    pub async fn send_text(&self, target: &str, content: &str) -> Result<()> {
        self.call_json(ApiType::SendText, json!({ "wxid": target, "msg": content }))
            .await
            .map(|_| ())
    }

    pub async fn send_at_text(&self, target: &str, content: &str, mentions: &[String]) -> Result<()> {
        self.call_json(
            ApiType::SendAt,
            json!({
                "chatroom_id": target,
                "msg": content,
                "wxids": mentions.join(","),
                "auto_nickname": 0,
            }),
        )
        .await
        .map(|_| ())
    }

    pub async fn send_image(&self, target: &str, path: &Path) -> Result<()> {
        self.call_json(
            ApiType::SendImage,
            json!({ "receiver": target, "img_path": path.to_string_lossy() }),
        )
        .await
        .map(|_| ())
    }

    pub async fn send_file(&self, target: &str, path: &Path) -> Result<()> {
        self.call_json(
            ApiType::SendFile,
            json!({ "receiver": target, "file_path": path.to_string_lossy() }),
        )
        .await
        .map(|_| ())
    }

    pub async fn forward_message(&self, target: &str, msg_id: u64) -> Result<()> {
        self.call_json(
            ApiType::ForwardMessage,
            json!({ "wxid": target, "msgid": msg_id }),
        )
        .await
        .map(|_| ())
    }

    // =========================================================================
    // Data store access
    // =========================================================================

    async fn ensure_login(&self) -> Result<()> {
        if self.is_login().await? {
            Ok(())
        } else {
            Err(Error::NotLoggedIn)
        }
    }

    async fn db_handle(&self, name: &str) -> Result<i64> {
        let value = self.call_json(ApiType::GetDbHandles, json!({})).await?;
        let resp: WxDbHandlesResp = serde_json::from_value(value)?;
        resp.data
            .into_iter()
            .find(|db| db.db_name == name)
            .map(|db| db.handle)
            .ok_or_else(|| Error::Control(format!("db {} not found", name)))
    }

    /// Run a read-only query; the header row is dropped.
    async fn query(&self, handle: i64, sql: &str) -> Result<Vec<Vec<Value>>> {
        let value = self
            .call_json(ApiType::DbQuery, json!({ "db_handle": handle, "sql": sql }))
            .await?;

        let rows = match value.get("data") {
            Some(Value::Array(rows)) => rows
                .iter()
                .skip(1)
                .map(|row| row.as_array().cloned().unwrap_or_default())
                .collect(),
            _ => Vec::new(),
        };
        Ok(rows)
    }

    async fn contacts(&self) -> Result<Vec<Vec<Value>>> {
        let handle = self.db_handle(DB_MICRO_MSG).await?;
        self.query(
            handle,
            r#"SELECT c.UserName, c.NickName, i.bigHeadImgUrl, i.smallHeadImgUrl, c.Remark
               FROM Contact AS c
               LEFT JOIN ContactHeadImgUrl AS i ON c.UserName = i.usrName"#,
        )
        .await
    }

    async fn openim_contacts(&self) -> Result<Vec<Vec<Value>>> {
        let handle = self.db_handle(DB_OPENIM_CONTACT).await?;
        self.query(
            handle,
            "SELECT UserName, NickName, BigHeadImgUrl, SmallHeadImgUrl, Remark FROM OpenIMContact",
        )
        .await
    }

    // =========================================================================
    // Transport
    // =========================================================================

    async fn call(&self, api: ApiType, body: Value) -> Result<Vec<u8>> {
        let url = format!("{}/api/?type={}", self.base_url, api.code());
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }

    /// Call an operation answering JSON with a `result` discriminator.
    async fn call_json(&self, api: ApiType, body: Value) -> Result<Value> {
        let bytes = self.call(api, body).await?;
        let value: Value = serde_json::from_slice(&bytes).map_err(|e| {
            Error::Control(format!("Non-JSON response to {:?}: {}", api, e))
        })?;

        match value.get("result").and_then(Value::as_str) {
            Some("OK") | None => Ok(value),
            Some(other) => Err(Error::Control(format!("{:?} returned {}", api, other))),
        }
    }
}

fn escape_sql(value: &str) -> String {
    value.replace('"', "\"\"")
}

fn cell(row: &[Value], index: usize) -> String {
    match row.get(index) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

/// Row layout: UserName, NickName, BigHeadImgUrl, SmallHeadImgUrl[, Remark]
fn contact_to_user(row: &[Value]) -> UserInfo {
    let mut avatar = cell(row, 2);
    if avatar.is_empty() {
        avatar = cell(row, 3);
    }
    UserInfo {
        id: cell(row, 0),
        name: cell(row, 1),
        avatar,
        remark: cell(row, 4),
    }
}

fn contact_to_group(row: &[Value]) -> GroupInfo {
    let mut avatar = cell(row, 2);
    if avatar.is_empty() {
        avatar = cell(row, 3);
    }
    GroupInfo {
        id: cell(row, 0),
        name: cell(row, 1),
        avatar,
        ..Default::default()
    }
}
