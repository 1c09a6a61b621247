//! Bridge command dispatch
//!
//! Maps each command name onto a [`SessionManager`] or [`Session`] operation
//! and wraps the outcome in a [`CommandResponse`].
//!
//! [`Session`]: crate::session::Session

use crate::error::{Error, Result};
use crate::pipeline::event::{BlobData, Chat};
use crate::pipeline::{EventData, EventType};
use crate::session::SessionManager;
use crate::transport::{CommandHandler, CommandResponse};
use async_trait::async_trait;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const CONNECT: &str = "connect";
pub const DISCONNECT: &str = "disconnect";
pub const LOGIN_QR: &str = "login_qr";
pub const IS_LOGIN: &str = "is_login";
pub const GET_SELF: &str = "get_self";
pub const GET_USER_INFO: &str = "get_user_info";
pub const GET_GROUP_INFO: &str = "get_group_info";
pub const GET_GROUP_MEMBERS: &str = "get_group_members";
pub const GET_GROUP_MEMBER_NICKNAME: &str = "get_group_member_nickname";
pub const GET_FRIEND_LIST: &str = "get_friend_list";
pub const GET_GROUP_LIST: &str = "get_group_list";
pub const SEND_MESSAGE: &str = "send_message";
pub const FORWARD_MESSAGE: &str = "forward_message";
pub const LOGOUT: &str = "logout";

/// Older bridges send outgoing messages as `event` requests
const SEND_MESSAGE_ALIAS: &str = "event";

/// Target of a lookup command.
///
/// Accepts `{"wxId": .., "groupId": ..}` or a positional `[id, group]` array.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(from = "QueryArgs")]
pub struct Query {
    pub id: String,
    pub group: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum QueryArgs {
    Named {
        #[serde(rename = "wxId", default)]
        id: String,
        #[serde(rename = "groupId", default)]
        group: String,
    },
    Positional(Vec<String>),
}

impl From<QueryArgs> for Query {
    fn from(args: QueryArgs) -> Self {
        match args {
            QueryArgs::Named { id, group } => Self { id, group },
            QueryArgs::Positional(mut ids) => {
                ids.resize(2, String::new());
                let group = ids.pop().unwrap_or_default();
                let id = ids.pop().unwrap_or_default();
                Self { id, group }
            }
        }
    }
}

/// Message the bridge asks us to send
#[derive(Debug, Clone, Deserialize)]
pub struct OutgoingMessage {
    pub chat: Chat,
    #[serde(rename = "type")]
    pub event_type: EventType,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub mentions: Vec<String>,
    #[serde(default)]
    pub data: Option<EventData>,
}

impl OutgoingMessage {
    fn blob(&self) -> Option<&BlobData> {
        match &self.data {
            Some(EventData::Blob(blob)) => Some(blob),
            Some(EventData::Blobs(blobs)) => blobs.first(),
            _ => None,
        }
    }
}

/// Request to forward a received message to another chat
#[derive(Debug, Clone, Deserialize)]
pub struct ForwardRequest {
    pub target: String,
    #[serde(rename = "msgId")]
    pub msg_id: MessageId,
}

/// Engine message id; events carry it as a string
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MessageId {
    Number(u64),
    Text(String),
}

impl MessageId {
    fn value(&self) -> Result<u64> {
        match self {
            Self::Number(id) => Ok(*id),
            Self::Text(id) => id
                .parse()
                .map_err(|_| Error::Unsupported(format!("invalid message id {:?}", id))),
        }
    }
}

/// Receipt for a sent message
#[derive(Debug, Clone, Serialize)]
pub struct SentReceipt {
    pub id: String,
    pub ts: i64,
}

pub struct CommandExecutor {
    manager: Arc<SessionManager>,
    workdir: PathBuf,
}

impl CommandExecutor {
    pub fn new(manager: Arc<SessionManager>, workdir: PathBuf) -> Self {
        Self { manager, workdir }
    }

    async fn execute(&self, mxid: &str, command: &str, data: Value) -> Result<Option<Value>> {
        match command {
            CONNECT => {
                self.manager.connect(mxid, &self.workdir).await?;
                Ok(None)
            }
            DISCONNECT => {
                self.manager.disconnect(mxid).await?;
                Ok(None)
            }
            LOGIN_QR => {
                let session = self.manager.get_session(mxid).await?;
                let image = session.client().login_with_qr().await?;
                to_value(base64::engine::general_purpose::STANDARD.encode(image))
            }
            IS_LOGIN => {
                let session = self.manager.get_session(mxid).await?;
                to_value(session.client().is_login().await?)
            }
            GET_SELF => {
                let session = self.manager.get_session(mxid).await?;
                to_value(session.client().get_self().await?)
            }
            GET_USER_INFO => {
                let query = parse_query(data)?;
                let session = self.manager.get_session(mxid).await?;
                to_value(session.client().get_user_info(&query.id).await?)
            }
            GET_GROUP_INFO => {
                let query = parse_query(data)?;
                let session = self.manager.get_session(mxid).await?;
                to_value(session.client().get_group_info(&query.id).await?)
            }
            GET_GROUP_MEMBERS => {
                let query = parse_query(data)?;
                let session = self.manager.get_session(mxid).await?;
                to_value(session.client().get_group_members(&query.id).await?)
            }
            GET_GROUP_MEMBER_NICKNAME => {
                let query = parse_query(data)?;
                let session = self.manager.get_session(mxid).await?;
                let nickname = session
                    .client()
                    .get_group_member_nickname(&query.group, &query.id)
                    .await?;
                to_value(nickname)
            }
            GET_FRIEND_LIST => {
                let session = self.manager.get_session(mxid).await?;
                to_value(session.client().get_friend_list().await?)
            }
            GET_GROUP_LIST => {
                let session = self.manager.get_session(mxid).await?;
                to_value(session.client().get_group_list().await?)
            }
            SEND_MESSAGE | SEND_MESSAGE_ALIAS => {
                let message: OutgoingMessage = serde_json::from_value(data)?;
                to_value(self.send_message(mxid, &message).await?)
            }
            FORWARD_MESSAGE => {
                let request: ForwardRequest = serde_json::from_value(data)?;
                let msg_id = request.msg_id.value()?;
                if request.target.is_empty() {
                    return Err(Error::Unsupported("missing forward target".to_string()));
                }
                let session = self.manager.get_session(mxid).await?;
                session.client().forward_message(&request.target, msg_id).await?;
                Ok(None)
            }
            LOGOUT => {
                let session = self.manager.get_session(mxid).await?;
                session.client().logout().await?;
                Ok(None)
            }
            other => Err(Error::Unsupported(format!("unknown command {}", other))),
        }
    }

    async fn send_message(&self, mxid: &str, message: &OutgoingMessage) -> Result<SentReceipt> {
        let session = self.manager.get_session(mxid).await?;
        let client = session.client();
        let target = message.chat.id.as_str();

        match message.event_type {
            EventType::Text if message.mentions.is_empty() => {
                client.send_text(target, &message.content).await?
            }
            EventType::Text => {
                client
                    .send_at_text(target, &message.content, &message.mentions)
                    .await?
            }
            EventType::Image | EventType::Video => {
                let path = self.save_blob(message).await?;
                client.send_image(target, &path).await?
            }
            EventType::File => {
                let path = self.save_blob(message).await?;
                client.send_file(target, &path).await?
            }
            other => {
                return Err(Error::Unsupported(format!(
                    "event type not support: {:?}",
                    other
                )))
            }
        }

        let now = chrono::Utc::now().timestamp_millis();
        Ok(SentReceipt {
            id: now.to_string(),
            ts: now,
        })
    }

    /// Write the message's blob into the workdir so the engine can pick it up
    async fn save_blob(&self, message: &OutgoingMessage) -> Result<PathBuf> {
        let blob = message
            .blob()
            .ok_or_else(|| Error::Media("message carries no blob".to_string()))?;
        let path = self.workdir.join(blob_file_name(blob));
        tokio::fs::create_dir_all(&self.workdir).await?;
        tokio::fs::write(&path, &blob.binary).await?;
        Ok(path)
    }
}

/// Blob's own base name, or the hex digest of its bytes when unnamed
fn blob_file_name(blob: &BlobData) -> String {
    Path::new(&blob.name)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| hex(&Sha256::digest(&blob.binary)))
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn parse_query(data: Value) -> Result<Query> {
    let query: Query = serde_json::from_value(data)?;
    if query.id.is_empty() {
        return Err(Error::Unsupported("missing wxId".to_string()));
    }
    Ok(query)
}

fn to_value<T: Serialize>(value: T) -> Result<Option<Value>> {
    Ok(Some(serde_json::to_value(value)?))
}

#[async_trait]
impl CommandHandler for CommandExecutor {
    async fn handle(&self, mxid: &str, command: &str, data: Value) -> CommandResponse {
        match self.execute(mxid, command, data).await {
            Ok(data) => CommandResponse::ok(command, data),
            Err(e) => {
                tracing::warn!(mxid, command, "Command failed: {}", e);
                CommandResponse::err(command, &e)
            }
        }
    }
}
