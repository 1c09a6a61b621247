//! Inbound message intake from engine processes

pub mod lanes;
pub mod listener;

pub use lanes::SenderLanes;
pub use listener::InboundListener;
