//! Engine process creation
//!
//! New engine processes are created by an external launcher executable that
//! injects the control library:
//!
//! - `<program> <args..> new` prints the pid of the new engine process
//! - `<program> <args..> listen <pid> <port>` starts its control API on `port`

use crate::config::LauncherConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

/// Creates engine processes and starts their control API
#[async_trait]
pub trait EngineDriver: Send + Sync {
    /// Start a new engine process and return its pid
    async fn spawn(&self) -> Result<u32>;

    /// Make the engine process `pid` serve its control API on `port`
    async fn start_listen(&self, pid: u32, port: u16) -> Result<()>;
}

/// Driver backed by the launcher executable
#[derive(Debug, Clone)]
pub struct LauncherDriver {
    program: PathBuf,
    args: Vec<String>,
}

impl LauncherDriver {
    pub fn new(config: &LauncherConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
        }
    }

    async fn run(&self, extra: &[String]) -> Result<String> {
        tracing::debug!(
            program = %self.program.display(),
            args = ?extra,
            "Running engine launcher"
        );

        let output = Command::new(&self.program)
            .args(&self.args)
            .args(extra)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                Error::Spawn(format!(
                    "Failed to run launcher {}: {}",
                    self.program.display(),
                    e
                ))
            })?;

        if !output.status.success() {
            return Err(Error::Spawn(format!(
                "Launcher exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl EngineDriver for LauncherDriver {
    async fn spawn(&self) -> Result<u32> {
        let stdout = self.run(&["new".to_string()]).await?;
        parse_pid(&stdout)
    }

    async fn start_listen(&self, pid: u32, port: u16) -> Result<()> {
        self.run(&["listen".to_string(), pid.to_string(), port.to_string()])
            .await
            .map(|_| ())
    }
}

/// The launcher may print banners; the pid is the last non-empty line.
fn parse_pid(stdout: &str) -> Result<u32> {
    let line = stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .last()
        .ok_or_else(|| Error::Spawn("Launcher printed no pid".to_string()))?;

    match line.parse::<u32>() {
        Ok(0) | Err(_) => Err(Error::Spawn(format!("Invalid pid from launcher: {}", line))),
        Ok(pid) => Ok(pid),
    }
}
