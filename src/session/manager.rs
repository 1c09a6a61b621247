//! Session registry
//!
//! Owns every supervised engine process, keyed by bridge identity, plus the
//! pid → identity index the inbound listener uses to correlate pushed messages.

use crate::config::WechatConfig;
use crate::error::{Error, Result};
use crate::native::{ControlClient, EngineDriver, ProcessTable};
use crate::pipeline::VoiceSource;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// One supervised engine process bound to one bridge identity
pub struct Session {
    /// Bridge identity
    identity: String,
    /// Engine process id
    pid: u32,
    /// Control API port
    port: u16,
    /// Control API client
    client: ControlClient,
    /// Process table used for liveness and disposal
    processes: Arc<dyn ProcessTable>,
}

impl Session {
    fn new(
        identity: String,
        pid: u32,
        port: u16,
        client: ControlClient,
        processes: Arc<dyn ProcessTable>,
    ) -> Self {
        Self {
            identity,
            pid,
            port,
            client,
            processes,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn client(&self) -> &ControlClient {
        &self.client
    }

    /// Check whether the engine process is still running
    pub async fn is_alive(&self) -> bool {
        let pid = self.pid;
        off_runtime(&self.processes, move |p| Ok(p.is_running(pid)))
            .await
            .unwrap_or(false)
    }

    /// Log out and kill the engine process, children first.
    ///
    /// Safe to call after the process has exited; orphaned children are still
    /// reaped. The first kill failure is returned after every kill was tried.
    pub async fn dispose(&self) -> Result<()> {
        if self.is_alive().await {
            if let Err(e) = self.client.logout().await {
                tracing::debug!(identity = %self.identity, "Logout before dispose failed: {}", e);
            }
        }

        let mut first_error = None;

        let parent = self.pid;
        let children = off_runtime(&self.processes, move |p| p.children(parent)).await?;
        for child in children {
            if let Err(e) = off_runtime(&self.processes, move |p| p.kill(child)).await {
                tracing::warn!(identity = %self.identity, pid = child, "Failed to kill child process: {}", e);
                first_error.get_or_insert(e);
            }
        }

        if let Err(e) = off_runtime(&self.processes, move |p| p.kill(parent)).await {
            tracing::warn!(identity = %self.identity, pid = self.pid, "Failed to kill engine process: {}", e);
            first_error.get_or_insert(e);
        }

        tracing::info!(identity = %self.identity, pid = self.pid, "Session disposed");

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Run a process table call on the blocking pool
async fn off_runtime<T, F>(processes: &Arc<dyn ProcessTable>, f: F) -> Result<T>
where
    F: FnOnce(&dyn ProcessTable) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let processes = processes.clone();
    tokio::task::spawn_blocking(move || f(processes.as_ref()))
        .await
        .map_err(|e| Error::Process(format!("Process table task failed: {}", e)))?
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("identity", &self.identity)
            .field("pid", &self.pid)
            .field("port", &self.port)
            .finish()
    }
}

#[derive(Default)]
struct Registry {
    sessions: HashMap<String, Arc<Session>>,
    pids: HashMap<u32, String>,
}

impl Registry {
    fn remove(&mut self, identity: &str) -> Option<Arc<Session>> {
        let session = self.sessions.remove(identity)?;
        self.pids.remove(&session.pid);
        Some(session)
    }
}

/// Creates, looks up and disposes sessions
pub struct SessionManager {
    config: WechatConfig,
    driver: Arc<dyn EngineDriver>,
    processes: Arc<dyn ProcessTable>,
    http: reqwest::Client,
    /// Last allocated control port
    next_port: AtomicU16,
    /// Serializes connect, disconnect and dispose
    lifecycle: Mutex<()>,
    registry: RwLock<Registry>,
}

impl SessionManager {
    pub fn new(
        config: WechatConfig,
        driver: Arc<dyn EngineDriver>,
        processes: Arc<dyn ProcessTable>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            next_port: AtomicU16::new(config.listen_port),
            config,
            driver,
            processes,
            http,
            lifecycle: Mutex::new(()),
            registry: RwLock::new(Registry::default()),
        })
    }

    /// Ensure a live session exists for `identity`.
    ///
    /// Engine hooks store decoded media under `init_path`.
    pub async fn connect(&self, identity: &str, init_path: &Path) -> Result<()> {
        let _guard = self.lifecycle.lock().await;

        let existing = self.registry.read().await.sessions.get(identity).cloned();
        if let Some(session) = existing {
            if session.is_alive().await {
                tracing::debug!(identity, pid = session.pid, "Session already connected");
                return Ok(());
            }
            self.registry.write().await.remove(identity);
            if let Err(e) = session.dispose().await {
                tracing::warn!(identity, "Failed to dispose stale session: {}", e);
            }
        }

        let port = self.allocate_port();
        let pid = self.driver.spawn().await?;

        if !off_runtime(&self.processes, move |p| Ok(p.exists(pid))).await? {
            return Err(Error::ProcessNotFound(pid));
        }

        tracing::info!(identity, pid, port, "Engine process spawned");

        let session = Arc::new(Session::new(
            identity.to_string(),
            pid,
            port,
            ControlClient::new(self.http.clone(), port),
            self.processes.clone(),
        ));

        if let Err(e) = self.driver.start_listen(pid, port).await {
            self.unwind(&session).await;
            return Err(e);
        }

        self.registry
            .write()
            .await
            .pids
            .insert(pid, identity.to_string());

        if let Err(e) = self.arm_hooks(&session, init_path).await {
            tracing::warn!(identity, pid, "Failed to arm message hook: {}", e);
            self.registry.write().await.pids.remove(&pid);
            self.unwind(&session).await;
            return Err(e);
        }

        self.registry
            .write()
            .await
            .sessions
            .insert(identity.to_string(), session.clone());

        tracing::info!(identity, pid, port, "Session connected");

        if !self.config.version.is_empty() {
            if let Err(e) = session.client.set_version(&self.config.version).await {
                tracing::warn!(identity, version = %self.config.version, "Failed to set version: {}", e);
            }
        }

        Ok(())
    }

    /// Dispose the session of `identity`, if any
    pub async fn disconnect(&self, identity: &str) -> Result<()> {
        let _guard = self.lifecycle.lock().await;

        let session = self.registry.write().await.remove(identity);
        match session {
            Some(session) => session.dispose().await,
            None => Ok(()),
        }
    }

    /// Dispose every session; used at shutdown
    pub async fn dispose(&self) -> Result<()> {
        let _guard = self.lifecycle.lock().await;

        let sessions: Vec<Arc<Session>> = {
            let mut registry = self.registry.write().await;
            registry.pids.clear();
            registry.sessions.drain().map(|(_, s)| s).collect()
        };

        let mut first_error = None;
        for session in sessions {
            if let Err(e) = session.dispose().await {
                tracing::warn!(identity = %session.identity, "Failed to dispose session: {}", e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Look up the live session of `identity`.
    ///
    /// A session whose process has died is removed and disposed here.
    pub async fn get_session(&self, identity: &str) -> Result<Arc<Session>> {
        let session = self
            .registry
            .read()
            .await
            .sessions
            .get(identity)
            .cloned()
            .ok_or_else(|| Error::SessionNotFound(identity.to_string()))?;

        if session.is_alive().await {
            return Ok(session);
        }

        tracing::warn!(identity, pid = session.pid, "Engine process exited");

        let removed = {
            let mut registry = self.registry.write().await;
            let current = registry
                .sessions
                .get(identity)
                .map(|s| Arc::ptr_eq(s, &session))
                .unwrap_or(false);
            current && registry.remove(identity).is_some()
        };

        if removed {
            if let Err(e) = session.dispose().await {
                tracing::warn!(identity, "Failed to dispose dead session: {}", e);
            }
        }

        Err(Error::SessionNotFound(identity.to_string()))
    }

    /// Identity owning the engine process `pid`
    pub async fn identity_for_pid(&self, pid: u32) -> Option<String> {
        self.registry.read().await.pids.get(&pid).cloned()
    }

    /// Number of registered sessions
    pub async fn session_count(&self) -> usize {
        self.registry.read().await.sessions.len()
    }

    fn allocate_port(&self) -> u16 {
        self.next_port.fetch_add(1, Ordering::SeqCst).wrapping_add(1)
    }

    /// Retry hook arming until the fresh engine's control API answers.
    async fn arm_hooks(&self, session: &Session, init_path: &Path) -> Result<()> {
        let retry = self.config.hook_retry_interval();
        let mut last_error = None;

        let armed = tokio::time::timeout(self.config.init_timeout(), async {
            loop {
                match session
                    .client
                    .hook_msg(self.config.listen_port, init_path)
                    .await
                {
                    Ok(()) => return,
                    Err(e) => {
                        tracing::debug!(identity = %session.identity, "Hook not ready: {}", e);
                        last_error = Some(e);
                    }
                }
                tokio::time::sleep(retry).await;
            }
        })
        .await;

        match armed {
            Ok(()) => Ok(()),
            Err(_) => Err(last_error
                .unwrap_or_else(|| Error::Control("Timed out arming message hook".to_string()))),
        }
    }

    async fn unwind(&self, session: &Session) {
        if let Err(e) = session.dispose().await {
            tracing::warn!(identity = %session.identity, "Failed to unwind session: {}", e);
        }
    }
}

#[async_trait]
impl VoiceSource for SessionManager {
    async fn voice(&self, identity: &str, msg_id: u64) -> Result<Option<Vec<u8>>> {
        match self.get_session(identity).await {
            Ok(session) => session.client.get_voice(msg_id).await,
            Err(Error::SessionNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
