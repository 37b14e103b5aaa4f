//! Socket.IO v4 transport over a WebSocket.
//!
//! Speaks the WebSocket-only flavour of Engine.IO v4: the client opens
//! `/socket.io/?EIO=4&transport=websocket`, waits for the server's `open`
//! packet, connects to the default namespace and then exchanges event
//! packets. The server drives the heartbeat; a ping that does not arrive
//! within `pingInterval + pingTimeout` counts as a lost connection.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::COOKIE;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use mentorlink_proto::event::{InboundEvent, OutboundEvent};
use mentorlink_proto::packet::{self, OpenInfo, Packet, SocketPacket};

use super::{Connection, Connector, TransportError};

/// Type alias for the write half of a WebSocket connection.
type WsSender = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

/// Type alias for the read half of a WebSocket connection.
type WsReader =
    futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// Default timeout for the WebSocket upgrade.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for each step of the Engine.IO / Socket.IO handshake.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Capacity of the inbound event queue.
const INBOUND_CAPACITY: usize = 256;

/// Build the Socket.IO WebSocket endpoint from the server's base URL.
///
/// `http`/`https` map to `ws`/`wss`; the path is replaced by `/socket.io/`.
///
/// # Errors
///
/// Returns [`TransportError::Unreachable`] if the scheme is not one of
/// `http`, `https`, `ws` or `wss`.
pub fn endpoint_url(base: &Url) -> Result<Url, TransportError> {
    let scheme = match base.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(TransportError::Unreachable(format!(
                "unsupported scheme {other:?} in {base}"
            )));
        }
    };
    let mut url = base.clone();
    url.set_scheme(scheme)
        .map_err(|()| TransportError::Unreachable(base.to_string()))?;
    url.set_path("/socket.io/");
    url.set_query(Some(&format!(
        "EIO={}&transport=websocket",
        packet::ENGINE_IO_VERSION
    )));
    url.set_fragment(None);
    Ok(url)
}

/// [`Connector`] for a Socket.IO v4 server.
#[derive(Debug, Clone)]
pub struct SocketIoConnector {
    endpoint: Url,
    token: Option<String>,
}

impl SocketIoConnector {
    /// Create a connector for the server at `base` (e.g. `http://localhost:7777`).
    ///
    /// # Errors
    ///
    /// See [`endpoint_url`].
    pub fn new(base: &Url) -> Result<Self, TransportError> {
        Ok(Self {
            endpoint: endpoint_url(base)?,
            token: None,
        })
    }

    /// Send `token` as the identity cookie on the upgrade request.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// The WebSocket endpoint this connector dials.
    #[must_use]
    pub const fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

impl Connector for SocketIoConnector {
    type Conn = SocketIoConnection;

    fn connect(
        &self,
    ) -> impl Future<Output = Result<SocketIoConnection, TransportError>> + Send + 'static {
        let endpoint = self.endpoint.clone();
        let token = self.token.clone();
        async move { SocketIoConnection::connect(&endpoint, token.as_deref()).await }
    }
}

/// One established Socket.IO connection.
///
/// Created via [`SocketIoConnector`]. A background reader task answers
/// heartbeats and pushes decoded chat events into a queue; the task is
/// aborted when the connection is closed or dropped.
pub struct SocketIoConnection {
    /// Engine session id assigned by the server.
    sid: String,
    /// Write half, shared with the reader for pong replies.
    ws_sender: Arc<Mutex<WsSender>>,
    /// Events decoded by the reader task.
    incoming: mpsc::Receiver<InboundEvent>,
    /// Handle to the background reader task.
    reader_handle: tokio::task::JoinHandle<()>,
}

impl SocketIoConnection {
    async fn connect(endpoint: &Url, token: Option<&str>) -> Result<Self, TransportError> {
        let mut request = endpoint
            .as_str()
            .into_client_request()
            .map_err(map_ws_connect_error)?;
        if let Some(token) = token {
            let cookie = HeaderValue::from_str(&format!("token={token}"))
                .map_err(|e| TransportError::Handshake(format!("invalid token: {e}")))?;
            request.headers_mut().insert(COOKIE, cookie);
        }

        let (ws_stream, _response) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(request))
            .await
            .map_err(|_| {
                tracing::warn!(url = %endpoint, "WebSocket connect timed out");
                TransportError::Timeout
            })?
            .map_err(|e| {
                tracing::warn!(url = %endpoint, err = %e, "WebSocket connect failed");
                map_ws_connect_error(e)
            })?;

        let (mut ws_sender, mut ws_reader) = ws_stream.split();

        // Engine.IO open.
        let info = match next_packet(&mut ws_reader).await? {
            Packet::Open(info) => info,
            other => {
                return Err(TransportError::Handshake(format!(
                    "expected open packet, got {other:?}"
                )));
            }
        };

        // Socket.IO namespace connect.
        send_packet(&mut ws_sender, &Packet::connect()).await?;
        loop {
            match next_packet(&mut ws_reader).await? {
                Packet::Message(SocketPacket::Connect { .. }) => break,
                Packet::Message(SocketPacket::ConnectError { data, .. }) => {
                    let reason = data
                        .get("message")
                        .and_then(serde_json::Value::as_str)
                        .map_or_else(|| data.to_string(), str::to_string);
                    tracing::warn!(%reason, "namespace connect refused");
                    return Err(TransportError::Handshake(format!("connect refused: {reason}")));
                }
                Packet::Ping => send_packet(&mut ws_sender, &Packet::Pong).await?,
                Packet::Close => return Err(TransportError::ConnectionClosed),
                other => tracing::debug!(?other, "ignoring packet during handshake"),
            }
        }
        tracing::info!(sid = %info.sid, url = %endpoint, "socket.io connected");

        let ws_sender = Arc::new(Mutex::new(ws_sender));
        let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);
        let reader_handle = tokio::spawn(reader_loop(
            ws_reader,
            Arc::clone(&ws_sender),
            tx,
            ping_window(&info),
        ));

        Ok(Self {
            sid: info.sid,
            ws_sender,
            incoming: rx,
            reader_handle,
        })
    }

    /// Engine session id assigned by the server.
    #[must_use]
    pub fn sid(&self) -> &str {
        &self.sid
    }
}

impl Connection for SocketIoConnection {
    async fn emit(&mut self, event: &OutboundEvent) -> Result<(), TransportError> {
        if self.reader_handle.is_finished() {
            return Err(TransportError::ConnectionClosed);
        }
        let packet = event.to_packet()?;
        let mut sender = self.ws_sender.lock().await;
        send_packet(&mut sender, &packet).await.inspect_err(|e| {
            tracing::warn!(event = event.name(), err = %e, "socket.io emit failed");
        })
    }

    async fn next_event(&mut self) -> Option<InboundEvent> {
        self.incoming.recv().await
    }

    async fn close(mut self) {
        self.incoming.close();
        self.reader_handle.abort();
        let goodbye = async {
            let mut sender = self.ws_sender.lock().await;
            let _ = send_packet(
                &mut sender,
                &Packet::Message(SocketPacket::Disconnect {
                    namespace: packet::DEFAULT_NAMESPACE.to_string(),
                }),
            )
            .await;
            let _ = sender.close().await;
        };
        // A peer that stopped reading must not stall teardown.
        if tokio::time::timeout(HANDSHAKE_TIMEOUT, goodbye).await.is_err() {
            tracing::warn!(sid = %self.sid, "socket.io close timed out, dropping socket");
        } else {
            tracing::debug!(sid = %self.sid, "socket.io connection closed");
        }
    }
}

impl Drop for SocketIoConnection {
    fn drop(&mut self) {
        self.reader_handle.abort();
    }
}

/// How long the reader waits for any frame before declaring the link dead.
fn ping_window(info: &OpenInfo) -> Duration {
    Duration::from_millis(info.ping_interval.saturating_add(info.ping_timeout))
}

async fn send_packet(sender: &mut WsSender, packet: &Packet) -> Result<(), TransportError> {
    let text = packet::encode(packet)?;
    sender
        .send(Message::text(text))
        .await
        .map_err(|_| TransportError::ConnectionClosed)
}

/// Read the next Engine.IO packet during the handshake.
async fn next_packet(reader: &mut WsReader) -> Result<Packet, TransportError> {
    loop {
        let frame = tokio::time::timeout(HANDSHAKE_TIMEOUT, reader.next())
            .await
            .map_err(|_| TransportError::Timeout)?;
        match frame {
            Some(Ok(Message::Text(text))) => return Ok(packet::decode(text.as_str())?),
            Some(Ok(Message::Close(_))) | None => return Err(TransportError::ConnectionClosed),
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                return Err(TransportError::Io(std::io::Error::other(format!(
                    "WebSocket error during handshake: {e}"
                ))));
            }
        }
    }
}

/// Background task that reads frames, answers heartbeats and queues events.
///
/// Malformed frames are logged and skipped. The task exits, dropping `tx`
/// so the connection reports closed, when the socket closes, errors, the
/// server disconnects the namespace, or no frame arrives within
/// `ping_window`.
async fn reader_loop(
    mut ws_reader: WsReader,
    ws_sender: Arc<Mutex<WsSender>>,
    tx: mpsc::Sender<InboundEvent>,
    ping_window: Duration,
) {
    loop {
        let Ok(frame) = tokio::time::timeout(ping_window, ws_reader.next()).await else {
            tracing::warn!(?ping_window, "no heartbeat from server, dropping connection");
            break;
        };
        match frame {
            Some(Ok(Message::Text(text))) => match packet::decode(text.as_str()) {
                Ok(Packet::Ping) => {
                    let mut sender = ws_sender.lock().await;
                    if send_packet(&mut sender, &Packet::Pong).await.is_err() {
                        break;
                    }
                }
                Ok(Packet::Message(SocketPacket::Event { name, args, .. })) => {
                    match InboundEvent::from_event(&name, args) {
                        Ok(Some(event)) => {
                            if tx.send(event).await.is_err() {
                                // Receiver closed: connection is being torn down.
                                break;
                            }
                        }
                        Ok(None) => tracing::debug!(event = %name, "ignoring unknown event"),
                        Err(e) => tracing::warn!(event = %name, err = %e, "malformed event, skipping"),
                    }
                }
                Ok(Packet::Message(SocketPacket::Disconnect { .. }) | Packet::Close) => {
                    tracing::info!("server closed the socket.io session");
                    break;
                }
                Ok(other) => tracing::trace!(?other, "ignoring packet"),
                Err(e) => tracing::warn!(err = %e, "malformed frame, skipping"),
            },
            Some(Ok(Message::Close(_))) | None => {
                tracing::info!("WebSocket closed by server");
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                tracing::warn!(err = %e, "WebSocket read error");
                break;
            }
        }
    }
    tracing::debug!("socket.io reader task exiting");
}

/// Map a `tokio_tungstenite` connection error to a [`TransportError`].
fn map_ws_connect_error(err: tokio_tungstenite::tungstenite::Error) -> TransportError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match err {
        WsError::Io(io_err) => {
            if io_err.kind() == std::io::ErrorKind::ConnectionRefused
                || io_err.kind() == std::io::ErrorKind::AddrNotAvailable
            {
                TransportError::Unreachable(io_err.to_string())
            } else {
                TransportError::Io(io_err)
            }
        }
        WsError::Http(response) => TransportError::Handshake(format!(
            "HTTP error: status {}",
            response.status()
        )),
        other => TransportError::Io(std::io::Error::other(format!(
            "WebSocket connection error: {other}"
        ))),
    }
}
