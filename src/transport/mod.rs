//! Bridge transport
//!
//! A single outbound websocket to the bridge service. Events flow out as
//! `event` frames; commands flow in and are answered with `response` frames.

pub mod backoff;
pub mod frame;
pub mod gateway;
pub mod supervisor;

pub use backoff::ReconnectBackoff;
pub use frame::{CommandResponse, ErrorResponse, Frame};
pub use gateway::{CloseReason, CommandHandler, GatewayConfig, TransportGateway};
pub use supervisor::{run_pinger, run_reconnect_loop};
