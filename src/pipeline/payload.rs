//! Field extraction from XML message payloads
//!
//! Every extractor returns `None` when a required field is missing or the
//! payload does not parse.

use super::event::{AppData, LocationData, ReplyInfo};
use super::xml::Document;

fn parse(payload: &str) -> Option<Document> {
    Document::parse(payload).ok()
}

/// `@`-mentioned account ids listed in a message's source metadata
pub fn mentions(extra_info: &str) -> Vec<String> {
    if extra_info.is_empty() {
        return Vec::new();
    }
    parse(extra_info)
        .and_then(|doc| doc.text("/msgsource/atuserlist"))
        .map(|list| {
            list.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Client message id naming a voice clip
pub fn voice_client_id(payload: &str) -> Option<String> {
    parse(payload)?.attr("/msg/voicemsg", "clientmsgid")
}

/// Sticker CDN url and AES key
pub fn sticker_source(payload: &str) -> Option<(String, String)> {
    let doc = parse(payload)?;
    let url = doc.any_attr("cdnurl")?;
    let key = doc.any_attr("aeskey")?;
    Some((url, key))
}

pub fn location(payload: &str) -> Option<LocationData> {
    let doc = parse(payload)?;
    let latitude = doc.attr("/msg/location", "x")?.parse().ok()?;
    let longitude = doc.attr("/msg/location", "y")?.parse().ok()?;

    Some(LocationData {
        name: doc.attr("/msg/location", "poiname").unwrap_or_default(),
        address: doc.attr("/msg/location", "label").unwrap_or_default(),
        longitude,
        latitude,
    })
}

/// Contact card shared into a chat
pub fn card(payload: &str) -> Option<AppData> {
    let doc = parse(payload)?;
    let msg = doc.find("/msg")?;
    let nickname = msg.attr("nickname").unwrap_or_default().to_string();

    Some(AppData {
        title: String::new(),
        description: nickname.clone(),
        source: nickname,
        url: msg.attr("bigheadimgurl").unwrap_or_default().to_string(),
    })
}

/// Quoted reply: the reply text and the referenced message
pub fn reply(payload: &str) -> Option<(String, ReplyInfo)> {
    let doc = parse(payload)?;
    let title = doc.text("/msg/appmsg/title")?;
    let svrid: u64 = doc.text("/msg/appmsg/refermsg/svrid")?.parse().ok()?;
    let sender = doc
        .text("/msg/appmsg/refermsg/chatusr")
        .or_else(|| doc.text("/msg/appmsg/refermsg/fromusr"))?;

    Some((
        title,
        ReplyInfo {
            id: svrid.to_string(),
            sender,
        },
    ))
}

/// Group announcement text
pub fn notice(payload: &str) -> Option<String> {
    parse(payload)?.text("/msg/appmsg/textannouncement")
}

/// Generic app message, shaped by its sub-type
pub fn app(payload: &str, app_type: i64) -> Option<AppData> {
    let doc = parse(payload)?;

    match app_type {
        // plain text shared from an app
        1 => Some(AppData {
            description: doc.text("/msg/appmsg/title")?,
            ..Default::default()
        }),
        // forwarded chat history
        19 => Some(AppData {
            title: doc.text("/msg/appmsg/title")?,
            description: doc.text("/msg/appmsg/des").unwrap_or_default(),
            ..Default::default()
        }),
        // channel video
        51 => {
            let nickname = doc.text("/msg/appmsg/finderFeed/nickname")?;
            Some(AppData {
                title: nickname.clone(),
                description: doc.text("/msg/appmsg/finderFeed/desc").unwrap_or_default(),
                source: nickname,
                url: doc
                    .text("/msg/appmsg/finderFeed//fullCoverUrl")
                    .unwrap_or_default(),
            })
        }
        // channel live stream
        63 => {
            let nickname = doc.text("/msg/appmsg/finderLive/nickname")?;
            Some(AppData {
                title: nickname.clone(),
                description: doc.text("/msg/appmsg/finderLive/desc").unwrap_or_default(),
                source: nickname,
                url: doc
                    .text("/msg/appmsg/finderLive//coverUrl")
                    .unwrap_or_default(),
            })
        }
        _ => Some(AppData {
            title: doc.text("/msg/appmsg/title")?,
            description: doc.text("/msg/appmsg/des").unwrap_or_default(),
            source: doc
                .text("/msg/appmsg/sourcedisplayname")
                .or_else(|| doc.text("/msg/appinfo/appname"))
                .unwrap_or_default(),
            url: doc.text("/msg/appmsg/url").unwrap_or_default(),
        }),
    }
}

/// User-visible recall text
pub fn revoke(payload: &str) -> Option<String> {
    parse(payload)?.text("/revokemsg")
}

/// Status line of a one-to-one call
pub fn private_voip(payload: &str) -> Option<String> {
    let doc = parse(payload)?;

    if doc.find("/voipinvitemsg").is_some() {
        if let Some(status) = doc.find("/voipinvitemsg/status") {
            return Some(match status.text().as_str() {
                "1" => "VoIP: Started a call".to_string(),
                "2" => "VoIP: Call ended".to_string(),
                other => format!("VoIP: Unknown status {}", other),
            });
        }
    }

    if doc.find("/voipmsg").is_some() {
        if let Some(msg) = doc.find("//msg") {
            return Some(format!("VoIP: {}", msg.text()));
        }
    }

    None
}

/// Notices the engine shows when the logged-in account recalls a message
pub const SELF_RECALL: [&str; 2] = ["You recalled a message", "你撤回了一条消息"];

/// Text of a system notice the bridge cares about.
///
/// Recalls by other users arrive separately as revoke notices, so only the
/// account's own recall is kept here.
pub fn system(payload: &str) -> Option<String> {
    let doc = parse(payload)?;

    if let Some(invite) = doc.find("/sysmsg/voipmt/invite") {
        return Some(format!("VoIP: {}", invite.text()));
    }
    if let Some(banner) = doc.find("/sysmsg/voipmt/banner") {
        return Some(format!("VoIP: {}", banner.text()));
    }
    doc.text("/sysmsg/revokemsg/replacemsg")
        .filter(|text| SELF_RECALL.contains(&text.as_str()))
}
