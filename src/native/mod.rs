//! Native engine access
//!
//! Everything the agent knows about the WeChat engine processes: how they are
//! created, how their local control API is called, and how the OS process
//! table is inspected.

pub mod client;
pub mod dirs;
pub mod driver;
pub mod process;
pub mod types;

pub use client::ControlClient;
pub use driver::{EngineDriver, LauncherDriver};
pub use process::{ProcessTable, SystemProcesses};
pub use types::{ApiType, GroupInfo, UserInfo};
