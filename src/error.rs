//! WeChat agent error types

use thiserror::Error;

/// WeChat agent error type
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The native engine failed to spawn a new process
    #[error("Spawn error: {0}")]
    Spawn(String),

    /// The pid reported by the engine does not resolve to an OS process
    #[error("WeChat process not exists: {0}")]
    ProcessNotFound(u32),

    /// Process enumeration or kill failure
    #[error("Process error: {0}")]
    Process(String),

    /// No session is registered for the identity
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// The engine reports no logged-in account
    #[error("User not logged")]
    NotLoggedIn,

    /// The native control API rejected a call or answered with an unexpected body
    #[error("Control API error: {0}")]
    Control(String),

    /// Bridge transport error
    #[error("Transport error: {0}")]
    Transport(String),

    /// No bridge connection is currently open
    #[error("Websocket not connected")]
    NotConnected,

    /// Media could not be materialized
    #[error("Media error: {0}")]
    Media(String),

    /// Embedded XML payload could not be parsed
    #[error("XML error: {0}")]
    Xml(String),

    /// Request is well-formed but not supported
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, Error>;
