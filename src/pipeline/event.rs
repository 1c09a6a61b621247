//! Normalized events forwarded to the bridge

use base64::Engine as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Text,
    Image,
    Audio,
    Video,
    File,
    Location,
    Notice,
    App,
    Revoke,
    Voip,
    System,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    pub id: String,
}

/// Reference to the message an event replies to or revokes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplyInfo {
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sender: String,
}

/// Named binary payload, base64 on the wire
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlobData {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(
        serialize_with = "serialize_base64",
        deserialize_with = "deserialize_base64"
    )]
    pub binary: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationData {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub address: String,
    pub longitude: f64,
    pub latitude: f64,
}

/// Link, card or mini-program summary
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppData {
    pub title: String,
    #[serde(rename = "desc", default)]
    pub description: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub url: String,
}

/// Typed event payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventData {
    Blobs(Vec<BlobData>),
    Blob(BlobData),
    Location(LocationData),
    App(AppData),
}

/// Bridge-facing representation of one chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    pub id: String,
    /// Unix milliseconds
    #[serde(rename = "ts")]
    pub timestamp: i64,
    pub from: User,
    pub chat: Chat,
    #[serde(rename = "type")]
    pub event_type: EventType,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mentions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<ReplyInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<EventData>,
}

impl NormalizedEvent {
    /// First blob of an image, audio, video or file event
    pub fn blob(&self) -> Option<&BlobData> {
        match &self.data {
            Some(EventData::Blob(blob)) => Some(blob),
            Some(EventData::Blobs(blobs)) => blobs.first(),
            _ => None,
        }
    }
}

fn serialize_base64<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(data))
}

fn deserialize_base64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let encoded = String::deserialize(deserializer)?;
    base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn text_event() -> NormalizedEvent {
        NormalizedEvent {
            id: "1001".to_string(),
            timestamp: 1_700_000_000_000,
            from: User {
                id: "wxid_a".to_string(),
            },
            chat: Chat {
                id: "wxid_me".to_string(),
            },
            event_type: EventType::Text,
            content: "hi".to_string(),
            mentions: vec![],
            reply: None,
            data: None,
        }
    }

    #[test]
    fn test_text_event_wire_shape() {
        let value = serde_json::to_value(text_event()).unwrap();
        assert_eq!(
            value,
            json!({
                "id": "1001",
                "ts": 1_700_000_000_000i64,
                "from": {"id": "wxid_a"},
                "chat": {"id": "wxid_me"},
                "type": "text",
                "content": "hi"
            })
        );
    }

    #[test]
    fn test_blob_is_base64() {
        let mut event = text_event();
        event.event_type = EventType::Image;
        event.data = Some(EventData::Blobs(vec![BlobData {
            name: "a.png".to_string(),
            binary: b"hello".to_vec(),
        }]));

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["data"], json!([{"name": "a.png", "binary": "aGVsbG8="}]));
        assert_eq!(event.blob().map(|b| b.name.as_str()), Some("a.png"));
    }

    #[test]
    fn test_untagged_payloads_parse() {
        let blob: EventData =
            serde_json::from_value(json!({"name": "f.txt", "binary": "aGVsbG8="})).unwrap();
        assert_eq!(
            blob,
            EventData::Blob(BlobData {
                name: "f.txt".to_string(),
                binary: b"hello".to_vec()
            })
        );

        let location: EventData =
            serde_json::from_value(json!({"longitude": 1.5, "latitude": 2.5})).unwrap();
        assert!(matches!(location, EventData::Location(_)));

        let app: EventData = serde_json::from_value(json!({"title": "t", "url": "u"})).unwrap();
        assert!(matches!(app, EventData::App(_)));
    }

    #[test]
    fn test_reply_sender_optional() {
        let reply = ReplyInfo {
            id: "9".to_string(),
            sender: String::new(),
        };
        assert_eq!(serde_json::to_value(reply).unwrap(), json!({"id": "9"}));
    }
}
