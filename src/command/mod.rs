//! Bridge command execution

pub mod executor;

pub use executor::{CommandExecutor, ForwardRequest, OutgoingMessage, Query};
