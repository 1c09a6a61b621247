//! Agent configuration management

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main agent configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Native engine configuration
    pub wechat: WechatConfig,

    /// Bridge service configuration
    pub service: ServiceConfig,

    /// Logging configuration
    pub log: LogConfig,
}

impl AgentConfig {
    /// Load configuration from a TOML or YAML file, chosen by extension.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );

        if is_yaml {
            serde_yaml::from_str(&content)
                .map_err(|e| Error::Config(format!("Invalid YAML in {}: {}", path.display(), e)))
        } else {
            toml::from_str(&content)
                .map_err(|e| Error::Config(format!("Invalid TOML in {}: {}", path.display(), e)))
        }
    }

    /// Reject configurations the agent cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.service.addr.trim().is_empty() {
            return Err(Error::Config("service.addr is required".to_string()));
        }
        if self.service.secret.is_empty() {
            return Err(Error::Config("service.secret is required".to_string()));
        }
        if self.wechat.dedup_capacity == 0 {
            return Err(Error::Config(
                "wechat.dedup_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Native engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WechatConfig {
    /// Client version the engine should disguise itself as (empty = leave alone)
    pub version: String,

    /// Port of the inbound message listener; control ports are allocated above it
    pub listen_port: u16,

    /// Upper bound for arming the message hook on a fresh process, in seconds
    pub init_timeout_secs: u64,

    /// Upper bound for materializing one message's media, in seconds
    pub request_timeout_secs: u64,

    /// Delay between hook arming attempts, in milliseconds
    pub hook_retry_interval_ms: u64,

    /// Delay between filesystem probes while resolving media, in milliseconds
    pub poll_interval_ms: u64,

    /// Number of message ids remembered for duplicate suppression
    pub dedup_capacity: usize,

    /// Engine launcher
    pub launcher: LauncherConfig,

    /// Agent working directory override
    pub workdir: Option<PathBuf>,

    /// Engine document directory ("WeChat Files") override
    pub docdir: Option<PathBuf>,
}

impl WechatConfig {
    pub fn init_timeout(&self) -> Duration {
        Duration::from_secs(self.init_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn hook_retry_interval(&self) -> Duration {
        Duration::from_millis(self.hook_retry_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for WechatConfig {
    fn default() -> Self {
        Self {
            version: String::new(),
            listen_port: 22222,
            init_timeout_secs: 10,
            request_timeout_secs: 60,
            hook_retry_interval_ms: 1000,
            poll_interval_ms: 1000,
            dedup_capacity: 256,
            launcher: LauncherConfig::default(),
            workdir: None,
            docdir: None,
        }
    }
}

/// External launcher used to create engine processes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    /// Launcher executable
    pub program: PathBuf,

    /// Arguments placed before the launcher sub-command
    pub args: Vec<String>,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("wxlauncher"),
            args: Vec::new(),
        }
    }
}

/// Bridge service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Bridge websocket URL
    pub addr: String,

    /// Static credential sent on connect
    pub secret: String,

    /// Heartbeat interval in seconds
    pub ping_interval_secs: u64,

    /// First reconnect delay in seconds
    pub backoff_floor_secs: u64,

    /// Largest reconnect delay in seconds
    pub backoff_ceiling_secs: u64,

    /// Connection lifetime after which the reconnect delay starts over, in seconds
    pub backoff_reset_secs: u64,
}

impl ServiceConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            addr: String::new(),
            secret: String::new(),
            ping_interval_secs: 30,
            backoff_floor_secs: 2,
            backoff_ceiling_secs: 120,
            backoff_reset_secs: 300,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter level
    pub level: String,

    /// "text" or "json"
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}
