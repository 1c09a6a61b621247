//! Test doubles shared by unit tests

use crate::error::{Error, Result};
use crate::native::{ApiType, EngineDriver, ProcessTable};
use crate::pipeline::{EventSink, NormalizedEvent, VoiceSource};
use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;
use tokio::task::JoinHandle;

/// Canned answer of the fake control API
#[derive(Debug, Clone)]
pub enum FakeReply {
    Json(Value),
    Raw(Vec<u8>),
}

#[derive(Default)]
struct EngineState {
    replies: HashMap<u32, FakeReply>,
    calls: Vec<(u32, Value)>,
    failures_left: usize,
}

type SharedState = Arc<Mutex<EngineState>>;

/// Control API served over HTTP on an ephemeral local port.
///
/// Unconfigured operations answer `{"result": "OK"}`.
pub struct FakeEngine {
    port: u16,
    state: SharedState,
    server: JoinHandle<()>,
}

impl FakeEngine {
    pub async fn start() -> Self {
        let state = SharedState::default();
        let app = Router::new()
            .route("/api/", post(handle_call))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            port,
            state,
            server,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn reply(&self, api: ApiType, body: Value) {
        self.reply_raw(api, FakeReply::Json(body));
    }

    pub fn reply_raw(&self, api: ApiType, reply: FakeReply) {
        self.state.lock().replies.insert(api.code(), reply);
    }

    /// Answer the next `n` calls with 503
    pub fn fail_first(&self, n: usize) {
        self.state.lock().failures_left = n;
    }

    pub fn calls(&self) -> Vec<(u32, Value)> {
        self.state.lock().calls.clone()
    }

    /// Request bodies received for `api`, oldest first
    pub fn calls_for(&self, api: ApiType) -> Vec<Value> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|(code, _)| *code == api.code())
            .map(|(_, body)| body.clone())
            .collect()
    }
}

impl Drop for FakeEngine {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn handle_call(
    State(state): State<SharedState>,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response {
    let code = query
        .get("type")
        .and_then(|t| t.parse::<u32>().ok())
        .unwrap_or(u32::MAX);
    let body = serde_json::from_slice(&body).unwrap_or(Value::Null);

    let mut state = state.lock();
    state.calls.push((code, body));
    if state.failures_left > 0 {
        state.failures_left -= 1;
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    match state.replies.get(&code) {
        Some(FakeReply::Json(value)) => Json(value.clone()).into_response(),
        Some(FakeReply::Raw(bytes)) => bytes.clone().into_response(),
        None => Json(json!({"result": "OK"})).into_response(),
    }
}

/// Engine driver that hands out a fixed pid
pub struct FakeDriver {
    pid: u32,
    fail_listen: bool,
    spawns: AtomicUsize,
    listens: Mutex<Vec<(u32, u16)>>,
}

impl FakeDriver {
    pub fn new(pid: u32) -> Self {
        Self {
            pid,
            fail_listen: false,
            spawns: AtomicUsize::new(0),
            listens: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_listen(mut self) -> Self {
        self.fail_listen = true;
        self
    }

    pub fn spawn_count(&self) -> usize {
        self.spawns.load(Ordering::SeqCst)
    }

    pub fn listens(&self) -> Vec<(u32, u16)> {
        self.listens.lock().clone()
    }
}

#[async_trait]
impl EngineDriver for FakeDriver {
    async fn spawn(&self) -> Result<u32> {
        self.spawns.fetch_add(1, Ordering::SeqCst);
        Ok(self.pid)
    }

    async fn start_listen(&self, pid: u32, port: u16) -> Result<()> {
        if self.fail_listen {
            return Err(Error::Spawn("listen refused".to_string()));
        }
        self.listens.lock().push((pid, port));
        Ok(())
    }
}

#[derive(Default)]
struct ProcessState {
    running: HashSet<u32>,
    exited: HashSet<u32>,
    children: HashMap<u32, Vec<u32>>,
    unkillable: HashSet<u32>,
    kills: Vec<u32>,
    threads: Vec<ThreadId>,
}

/// In-memory process table recording kill order
#[derive(Default)]
pub struct FakeProcesses {
    state: Mutex<ProcessState>,
}

impl FakeProcesses {
    pub fn with_running(pids: &[u32]) -> Self {
        let table = Self::default();
        table.state.lock().running.extend(pids.iter().copied());
        table
    }

    pub fn set_children(&self, pid: u32, children: &[u32]) {
        self.state.lock().children.insert(pid, children.to_vec());
    }

    pub fn fail_kill(&self, pid: u32) {
        self.state.lock().unkillable.insert(pid);
    }

    /// Turn `pid` into a zombie: still listed, no longer running
    pub fn exit(&self, pid: u32) {
        let mut state = self.state.lock();
        if state.running.remove(&pid) {
            state.exited.insert(pid);
        }
    }

    pub fn kills(&self) -> Vec<u32> {
        self.state.lock().kills.clone()
    }

    /// Threads every table call ran on
    pub fn threads(&self) -> Vec<ThreadId> {
        self.state.lock().threads.clone()
    }

    fn lock(&self) -> parking_lot::MutexGuard<'_, ProcessState> {
        let mut state = self.state.lock();
        state.threads.push(std::thread::current().id());
        state
    }
}

impl ProcessTable for FakeProcesses {
    fn exists(&self, pid: u32) -> bool {
        let state = self.lock();
        state.running.contains(&pid) || state.exited.contains(&pid)
    }

    fn is_running(&self, pid: u32) -> bool {
        self.lock().running.contains(&pid)
    }

    fn children(&self, pid: u32) -> Result<Vec<u32>> {
        let state = self.lock();
        Ok(state
            .children
            .get(&pid)
            .map(|c| {
                c.iter()
                    .copied()
                    .filter(|c| state.running.contains(c) || state.exited.contains(c))
                    .collect()
            })
            .unwrap_or_default())
    }

    fn kill(&self, pid: u32) -> Result<()> {
        let mut state = self.lock();
        state.kills.push(pid);
        if state.unkillable.contains(&pid) {
            return Err(Error::Process(format!("cannot kill {}", pid)));
        }
        state.running.remove(&pid);
        state.exited.remove(&pid);
        Ok(())
    }
}

/// Event sink that keeps everything it is given
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<(String, NormalizedEvent)>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<(String, NormalizedEvent)> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn push(&self, identity: &str, event: NormalizedEvent) -> Result<()> {
        self.events.lock().push((identity.to_string(), event));
        Ok(())
    }
}

/// Voice store that never has the clip
pub struct NoVoices;

#[async_trait]
impl VoiceSource for NoVoices {
    async fn voice(&self, _identity: &str, _msg_id: u64) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }
}
