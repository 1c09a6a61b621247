//! Per-sender ordered execution lanes
//!
//! Jobs submitted under the same key run one at a time in submission order;
//! jobs under different keys run in parallel. A lane's worker task exists only
//! while it has queued work.

use crate::panic::panic_message;
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

type LaneMap = Arc<Mutex<HashMap<String, mpsc::UnboundedSender<Job>>>>;

#[derive(Clone, Default)]
pub struct SenderLanes {
    lanes: LaneMap,
}

impl SenderLanes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `job` behind every earlier job submitted under `key`.
    pub fn submit<F>(&self, key: &str, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut job: Job = Box::pin(job);
        let mut lanes = self.lanes.lock();

        if let Some(tx) = lanes.get(key) {
            match tx.send(job) {
                Ok(()) => return,
                Err(mpsc::error::SendError(returned)) => job = returned,
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();
        if tx.send(job).is_err() {
            return;
        }
        lanes.insert(key.to_string(), tx);
        drop(lanes);

        tokio::spawn(run_lane(self.lanes.clone(), key.to_string(), rx));
    }

    /// Number of lanes with queued or running work
    pub fn active(&self) -> usize {
        self.lanes.lock().len()
    }
}

async fn run_lane(lanes: LaneMap, key: String, mut rx: mpsc::UnboundedReceiver<Job>) {
    loop {
        while let Ok(job) = rx.try_recv() {
            run_job(&key, job).await;
        }

        // Retire under the map lock unless a job raced in
        let next = {
            let mut lanes = lanes.lock();
            match rx.try_recv() {
                Ok(job) => Some(job),
                Err(_) => {
                    lanes.remove(&key);
                    None
                }
            }
        };

        match next {
            Some(job) => run_job(&key, job).await,
            None => return,
        }
    }
}

async fn run_job(key: &str, job: Job) {
    if let Err(panic) = AssertUnwindSafe(job).catch_unwind().await {
        tracing::error!(
            sender = key,
            "Message task panicked: {}",
            panic_message(panic.as_ref())
        );
    }
}
