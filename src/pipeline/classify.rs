//! Raw type codes mapped to message families

use super::xml::Document;

/// Message family of a raw record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Unknown, heartbeat and last-message markers
    NoEvent,
    Text,
    Image,
    Voice,
    Card,
    Video,
    Sticker,
    Location,
    App(AppKind),
    Voip,
    Revoke,
    System,
}

/// Sub-type of an app (type 49) message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppKind {
    File,
    Sticker,
    Reply,
    Notice,
    /// Link, card, forward or channel post; carries the raw sub-type
    Link(i64),
}

impl AppKind {
    pub fn from_code(code: i64) -> Self {
        match code {
            6 => AppKind::File,
            8 => AppKind::Sticker,
            57 => AppKind::Reply,
            87 => AppKind::Notice,
            other => AppKind::Link(other),
        }
    }
}

/// Classify a raw type code. `app_type` is the `/msg/appmsg/type` value of
/// the payload and only matters for app messages.
pub fn classify(msg_type: i32, app_type: i64) -> MessageKind {
    match msg_type {
        0 | 51 => MessageKind::NoEvent,
        1 => MessageKind::Text,
        3 => MessageKind::Image,
        34 => MessageKind::Voice,
        42 => MessageKind::Card,
        43 => MessageKind::Video,
        47 => MessageKind::Sticker,
        48 => MessageKind::Location,
        49 => MessageKind::App(AppKind::from_code(app_type)),
        50 => MessageKind::Voip,
        10000 => MessageKind::Revoke,
        10002 => MessageKind::System,
        // Unrecognized codes are forwarded as their raw text
        _ => MessageKind::Text,
    }
}

/// App sub-type embedded in an app message payload; zero when absent.
pub fn app_type(message: &str) -> i64 {
    Document::parse(message)
        .ok()
        .and_then(|doc| doc.text("/msg/appmsg/type"))
        .and_then(|t| t.parse().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_codes() {
        assert_eq!(classify(0, 0), MessageKind::NoEvent);
        assert_eq!(classify(51, 0), MessageKind::NoEvent);
        assert_eq!(classify(1, 0), MessageKind::Text);
        assert_eq!(classify(3, 0), MessageKind::Image);
        assert_eq!(classify(34, 0), MessageKind::Voice);
        assert_eq!(classify(43, 0), MessageKind::Video);
        assert_eq!(classify(10000, 0), MessageKind::Revoke);
        assert_eq!(classify(10002, 0), MessageKind::System);
        assert_eq!(classify(9999, 0), MessageKind::Text);
    }

    #[test]
    fn test_classify_app() {
        assert_eq!(classify(49, 6), MessageKind::App(AppKind::File));
        assert_eq!(classify(49, 8), MessageKind::App(AppKind::Sticker));
        assert_eq!(classify(49, 57), MessageKind::App(AppKind::Reply));
        assert_eq!(classify(49, 87), MessageKind::App(AppKind::Notice));
        assert_eq!(classify(49, 5), MessageKind::App(AppKind::Link(5)));
        // app type only matters for app messages
        assert_eq!(classify(1, 6), MessageKind::Text);
    }

    #[test]
    fn test_app_type() {
        assert_eq!(app_type("<msg><appmsg><type>57</type></appmsg></msg>"), 57);
        assert_eq!(app_type("<msg><appmsg><type>x</type></appmsg></msg>"), 0);
        assert_eq!(app_type("not xml"), 0);
    }
}
