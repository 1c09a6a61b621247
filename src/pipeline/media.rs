//! Media resolution
//!
//! Engines write decoded media to disk some time after pushing the message
//! that references it, without any notification. Resolution therefore polls
//! the filesystem on a fixed interval until the file shows up or the
//! per-message deadline passes.

use super::event::BlobData;
use super::payload;
use super::raw::RawMessage;
use crate::error::Result;
use async_trait::async_trait;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
    (KHTML, like Gecko) Chrome/87.0.4280.88 Safari/537.36 Edg/87.0.664.66";

/// Voice clips stored in an engine's data store
#[async_trait]
pub trait VoiceSource: Send + Sync {
    /// `Ok(None)` while the clip is not stored yet
    async fn voice(&self, identity: &str, msg_id: u64) -> Result<Option<Vec<u8>>>;
}

/// Outcome of one probe
enum Probe<T> {
    Found(T),
    Pending,
    /// Stop polling without a result
    Abort,
}

pub struct MediaResolver {
    /// Agent working directory; engines store decoded media under `<workdir>/<self id>`
    workdir: PathBuf,
    /// Engine document directory
    docdir: PathBuf,
    poll_interval: Duration,
    timeout: Duration,
    http: reqwest::Client,
    shutdown: CancellationToken,
}

impl MediaResolver {
    pub fn new(
        workdir: PathBuf,
        docdir: PathBuf,
        poll_interval: Duration,
        timeout: Duration,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            workdir,
            docdir,
            poll_interval,
            timeout,
            http,
            shutdown,
        })
    }

    /// Decoded image: `<workdir>/<self>/<name>` without extension, or with a
    /// png, gif or jpg extension
    pub async fn image(&self, raw: &RawMessage) -> Option<BlobData> {
        let file_name = Path::new(&raw.file_path).file_name()?.to_string_lossy().into_owned();
        let base = self.workdir.join(&raw.self_id).join(&file_name).with_extension("");

        let candidates: Vec<(PathBuf, String)> = ["", ".png", ".gif", ".jpg"]
            .iter()
            .map(|suffix| {
                let mut path = base.clone().into_os_string();
                path.push(suffix);
                (PathBuf::from(path), format!("{}{}", file_name, suffix))
            })
            .collect();
        let candidates = &candidates;

        self.poll(move || async move {
            for (path, name) in candidates {
                if let Some(binary) = read_file(path).await {
                    return Probe::Found(BlobData {
                        name: name.clone(),
                        binary,
                    });
                }
            }
            Probe::Pending
        })
        .await
    }

    /// Voice clip: the engine's on-disk cache first, then its data store.
    ///
    /// A data store failure ends the lookup.
    pub async fn voice(
        &self,
        identity: &str,
        raw: &RawMessage,
        source: &dyn VoiceSource,
    ) -> Option<BlobData> {
        let client_id = payload::voice_client_id(&raw.message)?;
        let name = format!("{}.amr", client_id);
        let path = self.workdir.join(&raw.self_id).join(&name);
        let (path, name) = (&path, &name);

        self.poll(move || async move {
            if let Some(binary) = read_file(path).await {
                return Probe::Found(BlobData {
                    name: name.clone(),
                    binary,
                });
            }

            match source.voice(identity, raw.msg_id).await {
                Ok(Some(binary)) => Probe::Found(BlobData {
                    name: name.clone(),
                    binary,
                }),
                Ok(None) => Probe::Pending,
                Err(e) => {
                    tracing::debug!(identity, msg_id = raw.msg_id, "Voice lookup failed: {}", e);
                    Probe::Abort
                }
            }
        })
        .await
    }

    /// Video under the document directory, derived from the thumbnail when
    /// the message carries no path of its own
    pub async fn video(&self, raw: &RawMessage) -> Option<BlobData> {
        let path = if !raw.file_path.is_empty() {
            self.docdir.join(&raw.file_path)
        } else {
            self.docdir.join(&raw.thumb_path).with_extension("mp4")
        };
        self.document(path).await
    }

    /// Transferred file under the document directory
    pub async fn file(&self, raw: &RawMessage) -> Option<BlobData> {
        self.document(self.docdir.join(&raw.file_path)).await
    }

    /// Sticker fetched from the CDN named in the payload
    pub async fn sticker(&self, raw: &RawMessage) -> Option<BlobData> {
        let (url, key) = payload::sticker_source(&raw.message)?;

        let result = async {
            let response = self.http.get(&url).send().await?.error_for_status()?;
            response.bytes().await
        }
        .await;

        match result {
            Ok(bytes) => Some(BlobData {
                name: key,
                binary: bytes.to_vec(),
            }),
            Err(e) => {
                tracing::warn!(msg_id = raw.msg_id, url = %url, "Failed to download sticker: {}", e);
                None
            }
        }
    }

    async fn document(&self, path: PathBuf) -> Option<BlobData> {
        let name = path.file_name()?.to_string_lossy().into_owned();
        let (path, name) = (&path, &name);

        self.poll(move || async move {
            match read_file(path).await {
                Some(binary) => Probe::Found(BlobData {
                    name: name.clone(),
                    binary,
                }),
                None => Probe::Pending,
            }
        })
        .await
    }

    /// Run `probe` every poll interval until it resolves, the deadline passes
    /// or the agent shuts down.
    async fn poll<T, F, Fut>(&self, mut probe: F) -> Option<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Probe<T>>,
    {
        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return None,
                _ = &mut deadline => return None,
                _ = ticker.tick() => {}
            }

            match probe().await {
                Probe::Found(value) => return Some(value),
                Probe::Abort => return None,
                Probe::Pending => {}
            }
        }
    }
}

/// File contents, `None` while missing or still empty
async fn read_file(path: &Path) -> Option<Vec<u8>> {
    match tokio::fs::read(path).await {
        Ok(data) if !data.is_empty() => Some(data),
        _ => None,
    }
}
