//! Bridge websocket gateway
//!
//! Holds at most one live connection. Each connection owns a single-shot close
//! signal: whichever of remote close, read error, write failure, pre-emption
//! or [`TransportGateway::stop`] happens first decides the [`CloseReason`].

use super::frame::{CommandResponse, Frame, COMMAND_ERROR, COMMAND_RESPONSE};
use crate::error::{Error, Result};
use crate::panic::panic_message;
use crate::pipeline::{EventSink, NormalizedEvent};
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{FutureExt, SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use std::borrow::Cow;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex, Notify};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);
const PING_WRITE_TIMEOUT: Duration = Duration::from_secs(30);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(3);

/// Close code the bridge uses when another agent took over the connection
pub const CLOSE_CONN_REPLACED: u16 = 4001;
/// Close code the bridge uses while restarting
pub const CLOSE_SERVER_SHUTTING_DOWN: u16 = 1012;

/// Why a bridge connection ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// [`TransportGateway::stop`] was called
    ManualStop,
    /// A newer connection of this gateway replaced it
    Overridden,
    ServerShuttingDown,
    /// Another agent connected with the same credential
    ConnectionReplaced,
    /// Remote close without a recognised reason
    Remote { code: u16, reason: String },
    /// Read, write or decode failure
    Error(String),
}

#[derive(Debug, Deserialize)]
struct CloseStatus {
    #[serde(default)]
    status: String,
}

/// Map a received close frame onto a [`CloseReason`]
pub fn classify_close(frame: Option<&CloseFrame<'_>>) -> CloseReason {
    let Some(frame) = frame else {
        return CloseReason::Remote {
            code: u16::from(CloseCode::Status),
            reason: String::new(),
        };
    };

    let code = u16::from(frame.code);
    match code {
        CLOSE_CONN_REPLACED => return CloseReason::ConnectionReplaced,
        CLOSE_SERVER_SHUTTING_DOWN => return CloseReason::ServerShuttingDown,
        _ => {}
    }

    match serde_json::from_str::<CloseStatus>(&frame.reason) {
        Ok(s) if s.status == "conn_replaced" => CloseReason::ConnectionReplaced,
        Ok(s) if s.status == "server_shutting_down" => CloseReason::ServerShuttingDown,
        _ => CloseReason::Remote {
            code,
            reason: frame.reason.to_string(),
        },
    }
}

/// Executes commands received from the bridge
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, mxid: &str, command: &str, data: Value) -> CommandResponse;
}

/// Connection parameters
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub addr: String,
    pub secret: String,
}

struct Connection {
    writer: Mutex<SplitSink<WsStream, Message>>,
    close: parking_lot::Mutex<Option<oneshot::Sender<CloseReason>>>,
}

impl Connection {
    /// Fire the close signal; only the first call has any effect
    fn fire(&self, reason: CloseReason) -> bool {
        match self.close.lock().take() {
            Some(tx) => {
                let _ = tx.send(reason);
                true
            }
            None => false,
        }
    }

    async fn send(&self, frame: &Frame, deadline: Duration) -> Result<()> {
        let text = serde_json::to_string(frame)?;
        let mut writer = self.writer.lock().await;
        let result = match tokio::time::timeout(deadline, writer.send(Message::Text(text))).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(Error::WebSocket(e)),
            Err(_) => Err(Error::Transport("write timed out".to_string())),
        };
        drop(writer);

        if let Err(e) = &result {
            self.fire(CloseReason::Error(e.to_string()));
        }
        result
    }

    /// Say goodbye to the peer within `limit`, including the wait for a
    /// writer that is stuck mid-send
    async fn shutdown(&self, reason: &CloseReason, limit: Duration) {
        let goodbye = async {
            let mut writer = self.writer.lock().await;
            if !matches!(reason, CloseReason::Error(_) | CloseReason::Remote { .. }) {
                let frame = CloseFrame {
                    code: CloseCode::Away,
                    reason: Cow::Borrowed(""),
                };
                writer.send(Message::Close(Some(frame))).await?;
            }
            writer.close().await
        };
        match tokio::time::timeout(limit, goodbye).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!("Error closing bridge connection: {}", e),
            Err(_) => tracing::debug!("Bridge connection close timed out"),
        }
    }
}

pub struct TransportGateway {
    config: GatewayConfig,
    handler: Arc<dyn CommandHandler>,
    current: Mutex<Option<Arc<Connection>>>,
    connected: Notify,
    stopped: AtomicBool,
    /// Last request id issued by [`TransportGateway::request`]
    next_req: AtomicU64,
    /// Outbound requests awaiting their reply, by request id
    pending: parking_lot::Mutex<HashMap<u64, oneshot::Sender<Frame>>>,
}

impl TransportGateway {
    pub fn new(config: GatewayConfig, handler: Arc<dyn CommandHandler>) -> Self {
        Self {
            config,
            handler,
            current: Mutex::new(None),
            connected: Notify::new(),
            stopped: AtomicBool::new(false),
            next_req: AtomicU64::new(0),
            pending: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Open a connection and serve it until it closes.
    ///
    /// Returns `Err` when the connection could not be established, otherwise
    /// the reason it ended. A previous connection is closed as
    /// [`CloseReason::Overridden`].
    pub async fn connect_and_serve(self: &Arc<Self>) -> Result<CloseReason> {
        let ws = self.open().await?;
        let (writer, reader) = ws.split();
        let (close_tx, close_rx) = oneshot::channel();
        let conn = Arc::new(Connection {
            writer: Mutex::new(writer),
            close: parking_lot::Mutex::new(Some(close_tx)),
        });

        {
            let mut current = self.current.lock().await;
            if let Some(previous) = current.replace(conn.clone()) {
                previous.fire(CloseReason::Overridden);
            }
        }
        tracing::info!(addr = %self.config.addr, "Connected to bridge");
        self.connected.notify_waiters();

        if self.stopped.load(Ordering::SeqCst) {
            conn.fire(CloseReason::ManualStop);
        }

        let read_task = tokio::spawn(self.clone().read_loop(conn.clone(), reader));
        let reason = close_rx
            .await
            .unwrap_or_else(|_| CloseReason::Error("close signal dropped".to_string()));
        read_task.abort();

        {
            let mut current = self.current.lock().await;
            if current.as_ref().is_some_and(|c| Arc::ptr_eq(c, &conn)) {
                *current = None;
            }
        }
        conn.shutdown(&reason, CLOSE_TIMEOUT).await;
        // replies can no longer arrive
        self.pending.lock().clear();

        tracing::info!(?reason, "Bridge connection closed");
        Ok(reason)
    }

    async fn open(&self) -> Result<WsStream> {
        let mut request = self.config.addr.as_str().into_client_request()?;
        let auth = HeaderValue::from_str(&format!("Basic {}", self.config.secret))
            .map_err(|e| Error::Config(format!("Invalid secret: {}", e)))?;
        request.headers_mut().insert(header::AUTHORIZATION, auth);

        match tokio::time::timeout(CONNECT_TIMEOUT, tokio_tungstenite::connect_async(request)).await
        {
            Ok(Ok((ws, _))) => Ok(ws),
            Ok(Err(e)) => Err(handshake_error(e)),
            Err(_) => Err(Error::Transport("connect timed out".to_string())),
        }
    }

    async fn read_loop(self: Arc<Self>, conn: Arc<Connection>, mut reader: SplitStream<WsStream>) {
        loop {
            let text = match reader.next().await {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => text,
                    Err(_) => {
                        conn.fire(CloseReason::Error("binary frame is not UTF-8".to_string()));
                        return;
                    }
                },
                Some(Ok(Message::Close(frame))) => {
                    conn.fire(classify_close(frame.as_ref()));
                    return;
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    conn.fire(CloseReason::Error(e.to_string()));
                    return;
                }
                None => {
                    conn.fire(CloseReason::Error("connection reset".to_string()));
                    return;
                }
            };

            match serde_json::from_str::<Frame>(&text) {
                Ok(frame) => self.dispatch(&conn, frame),
                Err(e) => {
                    tracing::warn!("Failed to decode bridge frame: {}", e);
                    conn.fire(CloseReason::Error(format!("decode failure: {}", e)));
                    return;
                }
            }
        }
    }

    fn dispatch(&self, conn: &Arc<Connection>, frame: Frame) {
        match frame.command.as_str() {
            "" => {}
            COMMAND_RESPONSE | COMMAND_ERROR => {
                let waiter = self.pending.lock().remove(&frame.req);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(frame);
                    }
                    None => tracing::debug!(
                        req = frame.req,
                        command = %frame.command,
                        data = %frame.data,
                        "Bridge reply"
                    ),
                }
            }
            _ => {
                let handler = self.handler.clone();
                let conn = conn.clone();
                tokio::spawn(async move {
                    let Frame {
                        mxid,
                        req,
                        command,
                        data,
                    } = frame;
                    tracing::debug!(%mxid, req, %command, "Bridge command");

                    let response = match AssertUnwindSafe(handler.handle(&mxid, &command, data))
                        .catch_unwind()
                        .await
                    {
                        Ok(response) => response,
                        Err(panic) => {
                            tracing::error!(
                                %mxid,
                                %command,
                                "Command handler panicked: {}",
                                panic_message(panic.as_ref())
                            );
                            CommandResponse::internal(&command)
                        }
                    };

                    if req == 0 {
                        return;
                    }
                    let sent = match Frame::response(&mxid, req, response) {
                        Ok(reply) => conn.send(&reply, WRITE_TIMEOUT).await,
                        Err(e) => Err(e),
                    };
                    if let Err(e) = sent {
                        tracing::warn!(%mxid, req, "Failed to send response: {}", e);
                    }
                });
            }
        }
    }

    async fn connection(&self) -> Result<Arc<Connection>> {
        self.current.lock().await.clone().ok_or(Error::NotConnected)
    }

    /// Push one event for `mxid`
    pub async fn push(&self, mxid: &str, event: &NormalizedEvent) -> Result<()> {
        let frame = Frame::event(mxid, event)?;
        self.connection().await?.send(&frame, WRITE_TIMEOUT).await
    }

    /// Send `command` and wait up to `deadline` for the bridge's reply frame
    pub async fn request(
        &self,
        mxid: &str,
        command: &str,
        data: Value,
        deadline: Duration,
    ) -> Result<Frame> {
        let req = self.next_req.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(req, tx);

        let frame = Frame {
            mxid: mxid.to_string(),
            req,
            command: command.to_string(),
            data,
        };
        let result = async {
            self.connection().await?.send(&frame, WRITE_TIMEOUT).await?;
            match tokio::time::timeout(deadline, rx).await {
                Ok(Ok(reply)) => Ok(reply),
                Ok(Err(_)) => Err(Error::Transport("connection closed".to_string())),
                Err(_) => Err(Error::Transport(format!("request #{} timed out", req))),
            }
        }
        .await;

        self.pending.lock().remove(&req);
        result
    }

    pub async fn ping(&self) -> Result<()> {
        let frame = Frame::ping(chrono::Utc::now().timestamp_millis());
        self.connection().await?.send(&frame, PING_WRITE_TIMEOUT).await
    }

    pub async fn has_connection(&self) -> bool {
        self.current.lock().await.is_some()
    }

    /// Wait up to `limit` for a connection to be open
    pub async fn wait_connected(&self, limit: Duration) -> bool {
        let notified = self.connected.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if self.has_connection().await {
            return true;
        }
        tokio::time::timeout(limit, notified).await.is_ok()
    }

    /// Close the current connection as [`CloseReason::ManualStop`] and refuse
    /// to serve new ones
    pub async fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        if let Some(conn) = self.current.lock().await.as_ref() {
            conn.fire(CloseReason::ManualStop);
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventSink for TransportGateway {
    async fn push(&self, identity: &str, event: NormalizedEvent) -> Result<()> {
        TransportGateway::push(self, identity, &event).await
    }
}

#[derive(Debug, Deserialize)]
struct HandshakeRejection {
    #[serde(default)]
    errcode: String,
    #[serde(default)]
    error: String,
}

fn handshake_error(error: tokio_tungstenite::tungstenite::Error) -> Error {
    use tokio_tungstenite::tungstenite::Error as WsError;

    match error {
        WsError::Http(response) => {
            let status = response.status();
            let detail = response
                .body()
                .as_deref()
                .and_then(|body| serde_json::from_slice::<HandshakeRejection>(body).ok());
            match detail {
                Some(d) => Error::Transport(format!("HTTP {}: {} {}", status, d.errcode, d.error)),
                None => Error::Transport(format!("HTTP {}", status)),
            }
        }
        other => Error::WebSocket(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::event::{Chat, User};
    use crate::pipeline::EventType;
    use serde_json::json;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};

    type ServerWs = WebSocketStream<TcpStream>;

    struct Echo {
        calls: parking_lot::Mutex<Vec<(String, String, Value)>>,
    }

    #[async_trait]
    impl CommandHandler for Echo {
        async fn handle(&self, mxid: &str, command: &str, data: Value) -> CommandResponse {
            self.calls
                .lock()
                .push((mxid.to_string(), command.to_string(), data.clone()));
            if command == "explode" {
                panic!("boom");
            }
            CommandResponse::ok(command, Some(data))
        }
    }

    fn echo() -> Arc<Echo> {
        Arc::new(Echo {
            calls: parking_lot::Mutex::new(Vec::new()),
        })
    }

    /// Accept one websocket client, reporting its Authorization header
    async fn server() -> (String, oneshot::Receiver<(ServerWs, Option<String>)>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut auth = None;
            let ws = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
                auth = req
                    .headers()
                    .get(header::AUTHORIZATION)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                Ok(resp)
            })
            .await
            .unwrap();
            let _ = tx.send((ws, auth));
        });
        (url, rx)
    }

    fn gateway(url: String, handler: Arc<dyn CommandHandler>) -> Arc<TransportGateway> {
        Arc::new(TransportGateway::new(
            GatewayConfig {
                addr: url,
                secret: "s3cret".to_string(),
            },
            handler,
        ))
    }

    async fn next_frame(ws: &mut ServerWs) -> Frame {
        loop {
            match ws.next().await.unwrap().unwrap() {
                Message::Text(text) => return serde_json::from_str(&text).unwrap(),
                _ => continue,
            }
        }
    }

    async fn send_json(ws: &mut ServerWs, value: Value) {
        ws.send(Message::Text(value.to_string())).await.unwrap();
    }

    fn sample_event() -> NormalizedEvent {
        NormalizedEvent {
            id: "1001".to_string(),
            timestamp: 1_700_000_000_000,
            from: User {
                id: "wxid_bob".to_string(),
            },
            chat: Chat {
                id: "wxid_bob".to_string(),
            },
            event_type: EventType::Text,
            content: "hi".to_string(),
            mentions: Vec::new(),
            reply: None,
            data: None,
        }
    }

    #[tokio::test]
    async fn test_auth_header_and_push() {
        let (url, accepted) = server().await;
        let gw = gateway(url, echo());
        let serve = tokio::spawn({
            let gw = gw.clone();
            async move { gw.connect_and_serve().await }
        });

        let (mut ws, auth) = accepted.await.unwrap();
        assert_eq!(auth.as_deref(), Some("Basic s3cret"));
        assert!(gw.wait_connected(Duration::from_secs(2)).await);

        gw.push("@alice:example.org", &sample_event()).await.unwrap();
        let frame = next_frame(&mut ws).await;
        assert_eq!(frame.command, "event");
        assert_eq!(frame.mxid, "@alice:example.org");
        assert_eq!(frame.data["content"], "hi");

        gw.ping().await.unwrap();
        let ping = next_frame(&mut ws).await;
        assert_eq!(ping.command, "ping");
        assert!(ping.data["timestamp"].is_i64());

        gw.stop().await;
        assert_eq!(serve.await.unwrap().unwrap(), CloseReason::ManualStop);
        assert!(!gw.has_connection().await);

        match ws.next().await {
            Some(Ok(Message::Close(Some(frame)))) => assert_eq!(frame.code, CloseCode::Away),
            other => panic!("expected close frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_command_gets_response() {
        let (url, accepted) = server().await;
        let handler = echo();
        let gw = gateway(url, handler.clone());
        tokio::spawn({
            let gw = gw.clone();
            async move { gw.connect_and_serve().await }
        });
        let (mut ws, _) = accepted.await.unwrap();

        send_json(&mut ws, json!({})).await;
        send_json(&mut ws, json!({"mxid": "@a:b", "command": "is_login", "data": {"n": 0}})).await;
        send_json(&mut ws, json!({"mxid": "@a:b", "req": 5, "command": "is_login", "data": {"n": 5}})).await;

        let frame = next_frame(&mut ws).await;
        assert_eq!(frame.command, "response");
        assert_eq!(frame.req, 5);
        assert_eq!(frame.data["type"], "is_login");
        assert_eq!(frame.data["data"]["n"], 5);

        // fire-and-forget request still ran, empty keepalive did not
        let calls = handler.calls.lock().clone();
        assert_eq!(calls.len(), 2);
        gw.stop().await;
    }

    #[tokio::test]
    async fn test_handler_panic_reports_internal_error() {
        let (url, accepted) = server().await;
        let gw = gateway(url, echo());
        tokio::spawn({
            let gw = gw.clone();
            async move { gw.connect_and_serve().await }
        });
        let (mut ws, _) = accepted.await.unwrap();

        send_json(&mut ws, json!({"mxid": "@a:b", "req": 9, "command": "explode"})).await;
        let frame = next_frame(&mut ws).await;
        assert_eq!(frame.req, 9);
        assert_eq!(frame.data["error"]["code"], "PROCESS_FAILED");
        assert_eq!(frame.data["error"]["message"], "internal server error");

        // connection still serves
        send_json(&mut ws, json!({"mxid": "@a:b", "req": 10, "command": "get_self"})).await;
        assert_eq!(next_frame(&mut ws).await.req, 10);
        gw.stop().await;
    }

    #[tokio::test]
    async fn test_request_correlates_reply() {
        let (url, accepted) = server().await;
        let gw = gateway(url, echo());
        tokio::spawn({
            let gw = gw.clone();
            async move { gw.connect_and_serve().await }
        });
        let (mut ws, _) = accepted.await.unwrap();
        assert!(gw.wait_connected(Duration::from_secs(2)).await);

        let first = tokio::spawn({
            let gw = gw.clone();
            async move {
                gw.request("@a:b", "sync", json!({"n": 1}), Duration::from_secs(2))
                    .await
            }
        });
        let second = tokio::spawn({
            let gw = gw.clone();
            async move {
                gw.request("@a:b", "sync", json!({"n": 2}), Duration::from_secs(2))
                    .await
            }
        });

        let a = next_frame(&mut ws).await;
        let b = next_frame(&mut ws).await;
        assert_ne!(a.req, 0);
        assert_ne!(a.req, b.req);

        // answer out of order
        for request in [&b, &a] {
            send_json(
                &mut ws,
                json!({"req": request.req, "command": "response", "data": request.data}),
            )
            .await;
        }

        assert_eq!(first.await.unwrap().unwrap().data, json!({"n": 1}));
        assert_eq!(second.await.unwrap().unwrap().data, json!({"n": 2}));
        gw.stop().await;
    }

    #[tokio::test]
    async fn test_request_times_out() {
        let (url, accepted) = server().await;
        let gw = gateway(url, echo());
        tokio::spawn({
            let gw = gw.clone();
            async move { gw.connect_and_serve().await }
        });
        let (_ws, _) = accepted.await.unwrap();
        assert!(gw.wait_connected(Duration::from_secs(2)).await);

        let result = gw
            .request("@a:b", "sync", Value::Null, Duration::from_millis(50))
            .await;
        assert!(matches!(result, Err(Error::Transport(_))));
        assert!(gw.pending.lock().is_empty());
        gw.stop().await;
    }

    #[tokio::test]
    async fn test_remote_close_codes() {
        for (code, expected) in [
            (CLOSE_CONN_REPLACED, CloseReason::ConnectionReplaced),
            (CLOSE_SERVER_SHUTTING_DOWN, CloseReason::ServerShuttingDown),
        ] {
            let (url, accepted) = server().await;
            let gw = gateway(url, echo());
            let serve = tokio::spawn({
                let gw = gw.clone();
                async move { gw.connect_and_serve().await }
            });
            let (mut ws, _) = accepted.await.unwrap();
            ws.close(Some(CloseFrame {
                code: CloseCode::from(code),
                reason: Cow::Borrowed(""),
            }))
            .await
            .unwrap();

            assert_eq!(serve.await.unwrap().unwrap(), expected);
        }
    }

    #[tokio::test]
    async fn test_decode_failure_closes() {
        let (url, accepted) = server().await;
        let gw = gateway(url, echo());
        let serve = tokio::spawn({
            let gw = gw.clone();
            async move { gw.connect_and_serve().await }
        });
        let (mut ws, _) = accepted.await.unwrap();
        ws.send(Message::Text("not json".to_string())).await.unwrap();

        assert!(matches!(
            serve.await.unwrap().unwrap(),
            CloseReason::Error(_)
        ));
    }

    #[tokio::test]
    async fn test_push_without_connection() {
        let gw = gateway("ws://127.0.0.1:1".to_string(), echo());
        assert!(matches!(
            gw.push("@a:b", &sample_event()).await,
            Err(Error::NotConnected)
        ));
        assert!(!gw.wait_connected(Duration::from_millis(20)).await);
    }

    #[tokio::test]
    async fn test_http_rejection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let body = r#"{"errcode":"M_UNKNOWN_TOKEN","error":"bad secret"}"#;
            let response = format!(
                "HTTP/1.1 401 Unauthorized\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
                body.len(),
                body
            );
            // the client writes its handshake first
            let mut buf = [0u8; 1024];
            let _ = tokio::io::AsyncReadExt::read(&mut stream, &mut buf).await;
            stream.write_all(response.as_bytes()).await.unwrap();
        });

        let gw = gateway(url, echo());
        match gw.connect_and_serve().await {
            Err(Error::Transport(message)) => assert!(message.contains("401"), "{}", message),
            other => panic!("expected transport error, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_json_reason() {
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: Cow::Borrowed(r#"{"command":"close","status":"conn_replaced"}"#),
        };
        assert_eq!(classify_close(Some(&frame)), CloseReason::ConnectionReplaced);

        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: Cow::Borrowed("bye"),
        };
        assert_eq!(
            classify_close(Some(&frame)),
            CloseReason::Remote {
                code: 1000,
                reason: "bye".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_shutdown_bounded_while_writer_busy() {
        let (url, accepted) = server().await;
        let (ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
        let (_server_ws, _) = accepted.await.unwrap();
        let (writer, _reader) = ws.split();
        let conn = Connection {
            writer: Mutex::new(writer),
            close: parking_lot::Mutex::new(None),
        };

        let _busy = conn.writer.lock().await;
        let closed = tokio::time::timeout(
            Duration::from_secs(2),
            conn.shutdown(&CloseReason::ManualStop, Duration::from_millis(50)),
        )
        .await;
        assert!(closed.is_ok());
    }
}
