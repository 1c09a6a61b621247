//! Inbound message pipeline
//!
//! Raw hook records are deduplicated, classified and translated into
//! [`NormalizedEvent`]s, resolving referenced media along the way.

pub mod classify;
pub mod dedup;
pub mod event;
pub mod media;
pub mod payload;
pub mod raw;
pub mod translate;
pub mod xml;

pub use dedup::DedupCache;
pub use event::{BlobData, EventData, EventType, NormalizedEvent};
pub use media::{MediaResolver, VoiceSource};
pub use raw::RawMessage;
pub use translate::{EventSink, Translator};
