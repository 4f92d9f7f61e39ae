//! One authenticated obs-websocket session.
//!
//! [`ObsSocket::connect`] dials the server, performs the Hello/Identify
//! handshake (answering the auth challenge when a password is set), and
//! spawns a reader task. Requests are correlated to responses by id
//! through a pending map; server events are forwarded into the event
//! queue. The socket never reconnects itself; the connection manager
//! watches [`ObsSocket::closed`] and owns that policy.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{ObsError, ObsResult};
use crate::obs::protocol::{
    build_auth_response, decode_server_message, encode_identify, encode_request, Identify,
    RequestResponse, ServerMessage, CLOSE_AUTH_FAILED, RPC_VERSION,
};
use crate::obs::types::{parse_event, ObsEvent};
use crate::runtime::{TaskSpawner, TokioSpawner};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

type PendingMap = DashMap<String, oneshot::Sender<RequestResponse>>;

/// Parameters for one connection attempt.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub host: String,
    pub port: u16,
    /// Password for the auth challenge. Empty skips the auth response.
    pub password: String,
    /// EventSubscription bitmask for Identify.
    pub event_subscriptions: u32,
    /// Timeout for handshake steps and request round trips.
    pub request_timeout: Duration,
}

/// A live, identified session.
pub struct ObsSocket {
    writer: Mutex<WsSink>,
    pending: PendingMap,
    closed: CancellationToken,
    close_reason: RwLock<Option<String>>,
    request_timeout: Duration,
}

impl ObsSocket {
    /// Connects and identifies against an obs-websocket server.
    ///
    /// Server events are forwarded into `event_tx` for the lifetime of the
    /// session. Returns `AuthFailed` when the server rejects the handshake
    /// with its authentication close code.
    pub async fn connect(
        options: &ConnectOptions,
        event_tx: mpsc::Sender<ObsEvent>,
        spawner: &TokioSpawner,
    ) -> ObsResult<Arc<Self>> {
        let url = format!("ws://{}:{}", options.host, options.port);
        log::info!("[ObsSocket] Connecting to {}", url);

        let (stream, _) = tokio::time::timeout(options.request_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| ObsError::Timeout("connect".to_string()))?
            .map_err(|e| ObsError::Transport(e.to_string()))?;
        let (mut sink, mut stream) = stream.split();

        let hello = match read_handshake_message(&mut stream, options.request_timeout).await? {
            ServerMessage::Hello(hello) => hello,
            other => {
                return Err(ObsError::Protocol(format!(
                    "expected Hello, got {:?}",
                    other
                )))
            }
        };

        let authentication = match (&hello.authentication, options.password.is_empty()) {
            (Some(challenge), false) => Some(build_auth_response(
                &options.password,
                &challenge.salt,
                &challenge.challenge,
            )),
            (Some(_), true) => {
                log::warn!("[ObsSocket] Server requires authentication but no password is set");
                None
            }
            (None, _) => None,
        };

        let identify = Identify {
            rpc_version: RPC_VERSION,
            authentication,
            event_subscriptions: options.event_subscriptions,
        };
        sink.send(Message::text(encode_identify(&identify)))
            .await
            .map_err(|e| ObsError::Transport(e.to_string()))?;

        match read_handshake_message(&mut stream, options.request_timeout).await? {
            ServerMessage::Identified(identified) => {
                log::info!(
                    "[ObsSocket] Identified against {} (rpc version {})",
                    url,
                    identified.negotiated_rpc_version
                );
            }
            other => {
                return Err(ObsError::Protocol(format!(
                    "expected Identified, got {:?}",
                    other
                )))
            }
        }

        let socket = Arc::new(Self {
            writer: Mutex::new(sink),
            pending: DashMap::new(),
            closed: CancellationToken::new(),
            close_reason: RwLock::new(None),
            request_timeout: options.request_timeout,
        });

        let reader = Arc::clone(&socket);
        spawner.spawn(async move { reader.read_loop(stream, event_tx).await });

        Ok(socket)
    }

    /// Issues a request and awaits its correlated response.
    ///
    /// Returns the `responseData` on success, `RequestFailed` when OBS
    /// rejects the request, and `Timeout`/`Closed` on session problems.
    pub async fn request(&self, request_type: &str, data: Option<Value>) -> ObsResult<Value> {
        if self.closed.is_cancelled() {
            return Err(ObsError::Closed(self.reason_or_default()));
        }

        let request_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(request_id.clone(), tx);

        let frame = encode_request(request_type, &request_id, data);
        {
            let mut writer = self.writer.lock().await;
            if let Err(e) = writer.send(Message::text(frame)).await {
                self.pending.remove(&request_id);
                return Err(ObsError::Transport(e.to_string()));
            }
        }

        let response = match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(response)) => response,
            // Sender dropped: the session ended with the request in flight
            Ok(Err(_)) => return Err(ObsError::Closed(self.reason_or_default())),
            Err(_) => {
                self.pending.remove(&request_id);
                return Err(ObsError::Timeout(request_type.to_string()));
            }
        };

        if response.request_status.result {
            Ok(response.response_data)
        } else {
            Err(ObsError::RequestFailed {
                request_type: response.request_type,
                code: response.request_status.code,
                comment: response.request_status.comment,
            })
        }
    }

    /// Closes the session gracefully. Idempotent.
    pub async fn close(&self) {
        if self.closed.is_cancelled() {
            return;
        }
        log::info!("[ObsSocket] Closing session");
        *self.close_reason.write() = Some("closed by client".to_string());
        let mut writer = self.writer.lock().await;
        let _ = writer.send(Message::Close(None)).await;
        drop(writer);
        self.closed.cancel();
    }

    /// Token cancelled when the session ends, from either side.
    #[must_use]
    pub fn closed(&self) -> &CancellationToken {
        &self.closed
    }

    /// Why the session ended, once it has.
    #[must_use]
    pub fn close_reason(&self) -> Option<String> {
        self.close_reason.read().clone()
    }

    fn reason_or_default(&self) -> String {
        self.close_reason
            .read()
            .clone()
            .unwrap_or_else(|| "session closed".to_string())
    }

    async fn read_loop(self: Arc<Self>, mut stream: WsStream, event_tx: mpsc::Sender<ObsEvent>) {
        loop {
            tokio::select! {
                _ = self.closed.cancelled() => break,
                incoming = stream.next() => {
                    match incoming {
                        Some(Ok(Message::Text(text))) => {
                            route_text(&self.pending, &event_tx, &text);
                        }
                        Some(Ok(Message::Ping(data))) => {
                            let mut writer = self.writer.lock().await;
                            if let Err(e) = writer.send(Message::Pong(data)).await {
                                log::warn!("[ObsSocket] Failed to answer ping: {}", e);
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let reason = close_reason_text(frame.as_ref());
                            log::info!("[ObsSocket] Server closed connection: {}", reason);
                            *self.close_reason.write() = Some(reason);
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            log::warn!("[ObsSocket] Read error: {}", e);
                            *self.close_reason.write() = Some(e.to_string());
                            break;
                        }
                        None => {
                            *self.close_reason.write() = Some("stream ended".to_string());
                            break;
                        }
                    }
                }
            }
        }

        self.closed.cancel();
        let outstanding = self.pending.len();
        if outstanding > 0 {
            log::warn!(
                "[ObsSocket] Session ended with {} request(s) in flight",
                outstanding
            );
        }
        // Dropping the senders wakes every waiter with a Closed error
        self.pending.clear();
    }
}

/// Routes one text frame: responses resolve their pending request, events
/// go to the event queue.
fn route_text(pending: &PendingMap, event_tx: &mpsc::Sender<ObsEvent>, text: &str) {
    match decode_server_message(text) {
        Ok(ServerMessage::Event(payload)) => {
            let event = parse_event(payload);
            let meters = matches!(event, ObsEvent::VolumeMeters { .. });
            if let Err(e) = event_tx.try_send(event) {
                // Meter batches are disposable; anything else getting
                // dropped is worth surfacing
                if meters {
                    log::trace!("[ObsSocket] Dropping meter batch: {}", e);
                } else {
                    log::warn!("[ObsSocket] Dropping event, queue busy: {}", e);
                }
            }
        }
        Ok(ServerMessage::RequestResponse(response)) => {
            match pending.remove(&response.request_id) {
                Some((_, tx)) => {
                    let _ = tx.send(response);
                }
                None => log::warn!(
                    "[ObsSocket] Response for unknown request {}",
                    response.request_id
                ),
            }
        }
        Ok(other) => log::debug!("[ObsSocket] Ignoring unexpected message: {:?}", other),
        Err(e) => log::warn!("[ObsSocket] {}", e),
    }
}

fn close_reason_text(frame: Option<&CloseFrame>) -> String {
    match frame {
        Some(frame) => format!("{} {}", u16::from(frame.code), frame.reason),
        None => "no close frame".to_string(),
    }
}

/// Reads handshake messages, surfacing auth rejection as `AuthFailed`.
async fn read_handshake_message(
    stream: &mut WsStream,
    timeout: Duration,
) -> ObsResult<ServerMessage> {
    loop {
        let msg = tokio::time::timeout(timeout, stream.next())
            .await
            .map_err(|_| ObsError::Timeout("handshake".to_string()))?
            .ok_or_else(|| ObsError::Closed("connection closed during handshake".to_string()))?
            .map_err(|e| ObsError::Transport(e.to_string()))?;

        match msg {
            Message::Text(text) => return decode_server_message(&text),
            Message::Close(frame) => return Err(handshake_close_error(frame)),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => {
                log::debug!("[ObsSocket] Ignoring {:?} during handshake", other);
                continue;
            }
        }
    }
}

fn handshake_close_error(frame: Option<CloseFrame>) -> ObsError {
    match frame {
        Some(frame) if u16::from(frame.code) == CLOSE_AUTH_FAILED => ObsError::AuthFailed,
        frame => ObsError::Closed(format!(
            "server closed connection during handshake: {}",
            close_reason_text(frame.as_ref())
        )),
    }
}
