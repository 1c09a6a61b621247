//! Local listener for messages pushed by engine hooks
//!
//! Engines connect to `127.0.0.1:<listen_port>` and write one JSON record per
//! line. Every line is answered with `200 OK` once parsed or `500 ERROR` when
//! malformed; the connection stays open either way.

use super::lanes::SenderLanes;
use crate::error::Result;
use crate::pipeline::{RawMessage, Translator};
use crate::session::SessionManager;
use futures::StreamExt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, FramedRead};
use tokio_util::sync::CancellationToken;

pub const ACK_OK: &[u8] = b"200 OK";
pub const ACK_ERROR: &[u8] = b"500 ERROR";

/// Upper bound for one record; larger lines are rejected
const MAX_LINE_LENGTH: usize = 16 * 1024 * 1024;

pub struct InboundListener {
    manager: Arc<SessionManager>,
    translator: Arc<Translator>,
    lanes: SenderLanes,
    max_line_length: usize,
}

impl InboundListener {
    pub fn new(manager: Arc<SessionManager>, translator: Arc<Translator>) -> Self {
        Self {
            manager,
            translator,
            lanes: SenderLanes::new(),
            max_line_length: MAX_LINE_LENGTH,
        }
    }

    pub fn with_max_line_length(mut self, max: usize) -> Self {
        self.max_line_length = max;
        self
    }

    pub async fn bind(port: u16) -> Result<TcpListener> {
        let listener = TcpListener::bind(("127.0.0.1", port)).await?;
        tracing::info!("Inbound listener on {}", listener.local_addr()?);
        Ok(listener)
    }

    /// Accept engine connections until `shutdown` fires
    pub async fn serve(self: Arc<Self>, listener: TcpListener, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Inbound listener stopped");
                    return;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let this = self.clone();
                        tokio::spawn(async move { this.handle_connection(stream, peer).await });
                    }
                    Err(e) => tracing::warn!("Failed to accept engine connection: {}", e),
                }
            }
        }
    }

    async fn handle_connection(&self, stream: TcpStream, peer: SocketAddr) {
        tracing::debug!(%peer, "Engine connected");

        let (read, mut write) = stream.into_split();
        // Lines are split as raw bytes; a record that is not UTF-8 is still answered.
        let codec = AnyDelimiterCodec::new_with_max_length(
            b"\n".to_vec(),
            b"\n".to_vec(),
            self.max_line_length,
        );
        let mut lines = FramedRead::new(read, codec);

        let mut resume = false;
        loop {
            let line = match lines.next().await {
                Some(line) => line,
                // A decode error ends the stream once before reading resumes.
                None if std::mem::take(&mut resume) => continue,
                None => break,
            };
            let ack = match line {
                Ok(line) if line.iter().all(u8::is_ascii_whitespace) => continue,
                Ok(line) => match serde_json::from_slice::<RawMessage>(&line) {
                    Ok(raw) => {
                        self.dispatch(raw).await;
                        ACK_OK
                    }
                    Err(e) => {
                        tracing::warn!(%peer, "Failed to parse engine message: {}", e);
                        ACK_ERROR
                    }
                },
                Err(AnyDelimiterCodecError::MaxChunkLengthExceeded) => {
                    tracing::warn!(%peer, "Engine message exceeds {} bytes", self.max_line_length);
                    resume = true;
                    ACK_ERROR
                }
                Err(AnyDelimiterCodecError::Io(e)) => {
                    tracing::debug!(%peer, "Engine connection error: {}", e);
                    break;
                }
            };

            if let Err(e) = write.write_all(ack).await {
                tracing::debug!(%peer, "Failed to acknowledge: {}", e);
                break;
            }
        }

        tracing::debug!(%peer, "Engine disconnected");
    }

    /// Hand a parsed record to its sender's lane
    async fn dispatch(&self, raw: RawMessage) {
        let Some(identity) = self.manager.identity_for_pid(raw.pid).await else {
            tracing::warn!(pid = raw.pid, msg_id = raw.msg_id, "No session for engine process");
            return;
        };

        let translator = self.translator.clone();
        let sender = raw.sender.clone();
        self.lanes.submit(&sender, async move {
            translator.process(&identity, raw).await;
        });
    }
}
