//! OS process table access

use crate::error::{Error, Result};
use parking_lot::Mutex;
use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, System};

/// Process table operations used to supervise engine processes
pub trait ProcessTable: Send + Sync {
    /// Whether `pid` names any process, including zombies
    fn exists(&self, pid: u32) -> bool;

    /// Whether `pid` names a process that is still running
    fn is_running(&self, pid: u32) -> bool;

    /// Direct children of `pid`
    fn children(&self, pid: u32) -> Result<Vec<u32>>;

    /// Kill `pid`. A process that is already gone is not an error.
    fn kill(&self, pid: u32) -> Result<()>;
}

/// Process table of the local machine
pub struct SystemProcesses {
    system: Mutex<System>,
}

impl SystemProcesses {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SystemProcesses {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable for SystemProcesses {
    fn exists(&self, pid: u32) -> bool {
        let pid = Pid::from_u32(pid);
        let mut system = self.system.lock();
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        system.process(pid).is_some()
    }

    fn is_running(&self, pid: u32) -> bool {
        let pid = Pid::from_u32(pid);
        let mut system = self.system.lock();
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        system
            .process(pid)
            .map(|p| !matches!(p.status(), ProcessStatus::Zombie | ProcessStatus::Dead))
            .unwrap_or(false)
    }

    fn children(&self, pid: u32) -> Result<Vec<u32>> {
        let parent = Pid::from_u32(pid);
        let mut system = self.system.lock();
        system.refresh_processes(ProcessesToUpdate::All, true);

        Ok(system
            .processes()
            .iter()
            .filter(|(_, p)| p.parent() == Some(parent))
            .map(|(child, _)| child.as_u32())
            .collect())
    }

    fn kill(&self, pid: u32) -> Result<()> {
        let target = Pid::from_u32(pid);
        let mut system = self.system.lock();
        system.refresh_processes(ProcessesToUpdate::Some(&[target]), true);

        match system.process(target) {
            None => Ok(()),
            Some(process) => {
                if process.kill() {
                    tracing::debug!(pid, "Killed process");
                    Ok(())
                } else {
                    Err(Error::Process(format!("Failed to kill process {}", pid)))
                }
            }
        }
    }
}
