//! Raw message → normalized event translation
//!
//! Per message:
//! 1. Echoes of messages the agent itself sent are recorded and dropped
//! 2. Already processed ids are dropped
//! 3. The timestamp is resolved; unparseable times drop the message
//! 4. The record is classified and cheap admission checks run
//! 5. The id is claimed in the dedup cache, before any media is resolved
//! 6. The payload is resolved into an event and pushed

use super::classify::{app_type, classify, AppKind, MessageKind};
use super::dedup::DedupCache;
use super::event::{Chat, EventData, EventType, NormalizedEvent, ReplyInfo, User};
use super::media::{MediaResolver, VoiceSource};
use super::payload;
use super::raw::RawMessage;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{Local, NaiveDateTime, TimeZone};
use std::sync::Arc;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const IMAGE_FAILED: &str = "[图片下载失败]";
const VOICE_FAILED: &str = "[语音下载失败]";
const CARD_FAILED: &str = "[名片解析失败]";
const VIDEO_FAILED: &str = "[视频下载失败]";
const STICKER_FAILED: &str = "[表情下载失败]";
const LOCATION_FAILED: &str = "[位置解析失败]";
const FILE_FAILED: &str = "[文件下载失败]";
const APP_FAILED: &str = "[应用解析失败]";

/// Destination of normalized events
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn push(&self, identity: &str, event: NormalizedEvent) -> Result<()>;
}

pub struct Translator {
    cache: DedupCache,
    media: MediaResolver,
    voices: Arc<dyn VoiceSource>,
    sink: Arc<dyn EventSink>,
}

impl Translator {
    pub fn new(
        cache: DedupCache,
        media: MediaResolver,
        voices: Arc<dyn VoiceSource>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            cache,
            media,
            voices,
            sink,
        }
    }

    /// Translate one raw message and push the resulting event, if any
    pub async fn process(&self, identity: &str, raw: RawMessage) {
        let Some(event) = self.translate(identity, &raw).await else {
            return;
        };

        tracing::debug!(identity, id = %event.id, event_type = ?event.event_type, "Pushing event");

        if let Err(e) = self.sink.push(identity, event).await {
            tracing::warn!(identity, msg_id = raw.msg_id, "Failed to push event: {}", e);
        }
    }

    /// Zero or one event for `raw`
    pub async fn translate(&self, identity: &str, raw: &RawMessage) -> Option<NormalizedEvent> {
        if raw.is_engine_echo() {
            self.cache.insert(raw.msg_id);
            tracing::debug!(identity, msg_id = raw.msg_id, "Skipping engine echo");
            return None;
        }

        if self.cache.contains(raw.msg_id) {
            return None;
        }

        let Some(timestamp) = timestamp_ms(raw) else {
            tracing::warn!(identity, msg_id = raw.msg_id, time = %raw.time, "Unparseable message time");
            return None;
        };

        let sub_type = if raw.msg_type == 49 {
            app_type(&raw.message)
        } else {
            0
        };
        let kind = classify(raw.msg_type, sub_type);

        if !admissible(kind, raw) {
            return None;
        }

        // Claimed before media resolution so a burst of copies yields one event
        if self.cache.insert(raw.msg_id) {
            return None;
        }

        let mut event = base_event(raw, timestamp);
        self.resolve(identity, kind, raw, &mut event).await?;
        Some(event)
    }

    /// Fill in the typed part of `event`; `None` drops the message.
    async fn resolve(
        &self,
        identity: &str,
        kind: MessageKind,
        raw: &RawMessage,
        event: &mut NormalizedEvent,
    ) -> Option<()> {
        match kind {
            MessageKind::NoEvent => return None,
            MessageKind::Text => {
                event.mentions = payload::mentions(&raw.extra_info);
            }
            MessageKind::Image => match self.media.image(raw).await {
                Some(blob) => set_data(event, EventType::Image, EventData::Blobs(vec![blob])),
                None => event.content = IMAGE_FAILED.to_string(),
            },
            MessageKind::Voice => {
                match self.media.voice(identity, raw, self.voices.as_ref()).await {
                    Some(blob) => set_data(event, EventType::Audio, EventData::Blob(blob)),
                    None => event.content = VOICE_FAILED.to_string(),
                }
            }
            MessageKind::Card => match payload::card(&raw.message) {
                Some(card) => set_data(event, EventType::App, EventData::App(card)),
                None => event.content = CARD_FAILED.to_string(),
            },
            MessageKind::Video => match self.media.video(raw).await {
                Some(blob) => set_data(event, EventType::Video, EventData::Blob(blob)),
                None => event.content = VIDEO_FAILED.to_string(),
            },
            MessageKind::Sticker | MessageKind::App(AppKind::Sticker) => {
                match self.media.sticker(raw).await {
                    Some(blob) => set_data(event, EventType::Image, EventData::Blobs(vec![blob])),
                    None => event.content = STICKER_FAILED.to_string(),
                }
            }
            MessageKind::Location => match payload::location(&raw.message) {
                Some(location) => {
                    set_data(event, EventType::Location, EventData::Location(location))
                }
                None => event.content = LOCATION_FAILED.to_string(),
            },
            MessageKind::App(AppKind::File) => match self.media.file(raw).await {
                Some(blob) => set_data(event, EventType::File, EventData::Blob(blob)),
                None => event.content = FILE_FAILED.to_string(),
            },
            MessageKind::App(AppKind::Reply) => match payload::reply(&raw.message) {
                Some((content, reply)) => {
                    event.content = content;
                    event.reply = Some(reply);
                }
                None => event.content = APP_FAILED.to_string(),
            },
            MessageKind::App(AppKind::Notice) => match payload::notice(&raw.message) {
                Some(notice) => {
                    event.event_type = EventType::Notice;
                    event.content = notice;
                }
                None => event.content = APP_FAILED.to_string(),
            },
            MessageKind::App(AppKind::Link(sub_type)) => {
                match payload::app(&raw.message, sub_type) {
                    Some(app) => set_data(event, EventType::App, EventData::App(app)),
                    None => event.content = APP_FAILED.to_string(),
                }
            }
            MessageKind::Voip => {
                event.event_type = EventType::Voip;
                event.content = payload::private_voip(&raw.message)?;
            }
            MessageKind::Revoke => match payload::revoke(&raw.message) {
                Some(content) => {
                    event.reply = Some(ReplyInfo {
                        id: std::mem::take(&mut event.id),
                        sender: String::new(),
                    });
                    event.id = chrono::Utc::now().timestamp_millis().to_string();
                    event.event_type = EventType::Revoke;
                    event.content = content;
                }
                None => event.event_type = EventType::System,
            },
            MessageKind::System => {
                event.event_type = EventType::System;
                event.content = payload::system(&raw.message)?;

                if payload::SELF_RECALL.contains(&event.content.as_str()) {
                    event.from = User {
                        id: raw.self_id.clone(),
                    };
                    if !raw.is_group() {
                        event.chat = Chat {
                            id: raw.wx_id.clone(),
                        };
                    }
                }
            }
        }
        Some(())
    }
}

/// Checks that run before the id is claimed
fn admissible(kind: MessageKind, raw: &RawMessage) -> bool {
    match kind {
        MessageKind::NoEvent => false,
        MessageKind::Image => !raw.file_path.is_empty(),
        MessageKind::Video => !raw.file_path.is_empty() || !raw.thumb_path.is_empty(),
        // the engine reports a transfer several times; only the XML record is complete
        MessageKind::App(AppKind::File) => {
            !raw.file_path.is_empty() && raw.message.starts_with("<?xml")
        }
        MessageKind::App(AppKind::Sticker) => {
            !raw.file_path.is_empty() && !raw.message.starts_with("<?xml")
        }
        MessageKind::System => raw.sender != "weixin" && raw.is_send_msg != 1,
        _ => true,
    }
}

/// Message time in unix milliseconds
fn timestamp_ms(raw: &RawMessage) -> Option<i64> {
    if raw.timestamp > 0 {
        return Some(raw.timestamp * 1000);
    }
    let naive = NaiveDateTime::parse_from_str(raw.time.trim(), TIME_FORMAT).ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|t| t.timestamp_millis())
}

/// Text event with author and conversation resolved
fn base_event(raw: &RawMessage, timestamp: i64) -> NormalizedEvent {
    let (from, chat) = if raw.is_send_msg == 0 {
        let chat = if raw.is_group() {
            raw.sender.clone()
        } else {
            raw.self_id.clone()
        };
        (raw.wx_id.clone(), chat)
    } else {
        (raw.self_id.clone(), raw.sender.clone())
    };

    NormalizedEvent {
        id: raw.msg_id.to_string(),
        timestamp,
        from: User { id: from },
        chat: Chat { id: chat },
        event_type: EventType::Text,
        content: raw.message.clone(),
        mentions: Vec::new(),
        reply: None,
        data: None,
    }
}

fn set_data(event: &mut NormalizedEvent, event_type: EventType, data: EventData) {
    event.event_type = event_type;
    event.data = Some(data);
}
