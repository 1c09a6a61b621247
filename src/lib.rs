//! WeChat agent
//!
//! Runs next to the native WeChat engine and connects it to a central bridge
//! service. One engine process is supervised per bridge identity.
//!
//! ## Architecture
//!
//! ```text
//!   engine hooks ──TCP lines──▶ inbound ──▶ pipeline ──event──▶ transport ──ws──▶ bridge
//!        ▲                                                          │
//!        │                                                       command
//!   native control API ◀── session ◀────────── command ◀────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`native`]: engine control API client, launcher driver, process table
//! - [`session`]: per-identity engine sessions and their registry
//! - [`inbound`]: local listener for hook messages, per-sender ordering
//! - [`pipeline`]: dedup, classification and translation into bridge events
//! - [`transport`]: reconnecting websocket to the bridge
//! - [`command`]: bridge command execution
//! - [`config`]: configuration management

pub mod command;
pub mod config;
pub mod error;
pub mod inbound;
pub mod native;
pub mod panic;
pub mod pipeline;
pub mod session;
pub mod transport;

#[cfg(test)]
mod testing;

pub use config::AgentConfig;
pub use error::{Error, Result};
