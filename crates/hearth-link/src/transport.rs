// ── WebSocket transport ──
//
// One socket, message-framed: every frame carries exactly one
// serialized protocol message. Send and receive sides are locked
// independently so the sender and receiver tasks never contend.

use std::path::PathBuf;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{
    connect_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, trace};

use crate::error::LinkError;
use crate::message::{GatewayMessage, ServerMessage};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// TLS policy for the upstream link.
#[derive(Debug, Clone, Default)]
pub enum TlsMode {
    /// Plain `ws://`, for local development servers.
    Disabled,
    /// `wss://` against the system certificate store.
    #[default]
    System,
    /// `wss://` with an additional CA certificate from a PEM file.
    CustomCa(PathBuf),
    /// `wss://` accepting any certificate.
    DangerAcceptInvalid,
}

impl TlsMode {
    fn scheme(&self) -> &'static str {
        match self {
            Self::Disabled => "ws",
            _ => "wss",
        }
    }

    fn connector(&self) -> Result<Option<Connector>, LinkError> {
        let tls_err = |err: native_tls::Error| LinkError::Connect(format!("tls setup: {err}"));

        match self {
            Self::Disabled => Ok(Some(Connector::Plain)),
            Self::System => Ok(None),
            Self::CustomCa(path) => {
                let pem = std::fs::read(path).map_err(|err| {
                    LinkError::Connect(format!("reading CA file {}: {err}", path.display()))
                })?;
                let cert = native_tls::Certificate::from_pem(&pem)
                    .map_err(|err| LinkError::Connect(format!("invalid CA cert: {err}")))?;
                let connector = native_tls::TlsConnector::builder()
                    .add_root_certificate(cert)
                    .build()
                    .map_err(tls_err)?;
                Ok(Some(Connector::NativeTls(connector)))
            }
            Self::DangerAcceptInvalid => {
                let connector = native_tls::TlsConnector::builder()
                    .danger_accept_invalid_certs(true)
                    .build()
                    .map_err(tls_err)?;
                Ok(Some(Connector::NativeTls(connector)))
            }
        }
    }
}

/// An established, framed connection to the server.
pub(crate) struct WsTransport {
    sink: Mutex<SplitSink<WsStream, Message>>,
    stream: Mutex<SplitStream<WsStream>>,
    send_timeout: Duration,
    max_message_size: usize,
    /// When any frame (data or control) last arrived. Control frames
    /// count: our idle pings elicit pongs, so a healthy link is never
    /// silent for long.
    last_activity: std::sync::Mutex<std::time::Instant>,
}

impl WsTransport {
    /// TCP + TLS + WebSocket handshake at `/`.
    pub(crate) async fn connect(
        host: &str,
        port: u16,
        tls: &TlsMode,
        send_timeout: Duration,
        max_message_size: usize,
    ) -> Result<Self, LinkError> {
        let url = format!("{}://{host}:{port}/", tls.scheme());
        debug!(%url, "connecting to server");

        let (ws, _response) =
            connect_async_tls_with_config(url.as_str(), None, false, tls.connector()?)
                .await
                .map_err(|err| LinkError::Connect(err.to_string()))?;

        let (sink, stream) = ws.split();
        Ok(Self {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            send_timeout,
            max_message_size,
            last_activity: std::sync::Mutex::new(std::time::Instant::now()),
        })
    }

    /// How long the socket has been silent in the receive direction.
    pub(crate) fn idle_for(&self) -> Duration {
        self.last_activity
            .lock()
            .expect("activity lock poisoned")
            .elapsed()
    }

    /// Serialize and write one message under the send lock.
    pub(crate) async fn send(&self, message: &GatewayMessage) -> Result<(), LinkError> {
        let text = serde_json::to_string(message)
            .map_err(|err| LinkError::Protocol(format!("serializing {}: {err}", message.kind())))?;

        trace!(kind = message.kind(), id = %message.id(), "sending frame");

        let mut sink = self.sink.lock().await;
        tokio::time::timeout(self.send_timeout, sink.send(Message::Text(text)))
            .await
            .map_err(|_| LinkError::Io("send timed out".into()))?
            .map_err(|err| LinkError::Io(err.to_string()))
    }

    /// Wait up to `timeout` for one protocol message.
    ///
    /// `Ok(None)` means no data arrived (or only control frames did);
    /// errors mean the link is unusable and must be re-established.
    pub(crate) async fn receive(
        &self,
        timeout: Duration,
    ) -> Result<Option<ServerMessage>, LinkError> {
        let mut stream = self.stream.lock().await;

        let frame = match tokio::time::timeout(timeout, stream.next()).await {
            Err(_) => return Ok(None),
            Ok(None) => return Err(LinkError::Io("connection closed".into())),
            Ok(Some(Err(err))) => return Err(LinkError::Io(err.to_string())),
            Ok(Some(Ok(frame))) => frame,
        };

        *self
            .last_activity
            .lock()
            .expect("activity lock poisoned") = std::time::Instant::now();

        match frame {
            Message::Text(text) => {
                if text.len() > self.max_message_size {
                    return Err(LinkError::Protocol(format!(
                        "frame of {} bytes exceeds limit of {}",
                        text.len(),
                        self.max_message_size
                    )));
                }
                let message = serde_json::from_str(&text)
                    .map_err(|err| LinkError::Protocol(format!("malformed message: {err}")))?;
                Ok(Some(message))
            }
            Message::Close(frame) => {
                debug!(?frame, "server closed the connection");
                Err(LinkError::Io("closed by server".into()))
            }
            // Pongs answer our pings; pings are answered by tungstenite.
            Message::Ping(_) | Message::Pong(_) => Ok(None),
            other => {
                trace!(?other, "ignoring non-text frame");
                Ok(None)
            }
        }
    }

    /// Emit a WebSocket ping frame (liveness during idle periods).
    pub(crate) async fn ping(&self) -> Result<(), LinkError> {
        let mut sink = self.sink.lock().await;
        sink.send(Message::Ping(Vec::new()))
            .await
            .map_err(|err| LinkError::Io(err.to_string()))
    }

    /// Best-effort close.
    pub(crate) async fn close(&self) {
        let mut sink = self.sink.lock().await;
        let _ = sink.close().await;
    }
}
