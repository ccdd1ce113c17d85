// ── Server connector ──
//
// Two long-lived tasks over one shared connection state. The sender
// owns the state machine: connect → register → drain the output queue,
// pinging when idle. The receiver dispatches server answers into the
// context poll and may only demote the state to disconnected. A third
// task sweeps the poll for unanswered requests and re-enqueues them
// until the resend budget runs out.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use hearth_core::{Command, CommandOutcome, SensorData};

use crate::error::LinkError;
use crate::message::{GatewayInfo, GatewayMessage, ServerMessage};
use crate::poll::ContextPoll;
use crate::queue::{OutboundContext, OutputQueue};
use crate::transport::{TlsMode, WsTransport};

/// Total sends (first try + resends) before a request fails.
const MAX_SEND_ATTEMPTS: u32 = 3;

/// Pings are emitted when the sender has been idle for
/// `resend_timeout / PING_IDLE_DIVISOR`.
const PING_IDLE_DIVISOR: u32 = 2;

// ── Configuration ───────────────────────────────────────────────────

/// Connector tuning. All durations must be strictly positive; the
/// receive timeout should exceed the ping interval
/// (`resend_timeout / 2`) or a healthy idle link will flap.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub host: String,
    pub port: u16,
    pub tls: TlsMode,
    /// How long one receiver iteration waits for a frame.
    pub poll_timeout: Duration,
    /// Silence window after which the link is considered lost.
    pub receive_timeout: Duration,
    pub send_timeout: Duration,
    /// Delay between reconnection attempts.
    pub retry_connect_timeout: Duration,
    /// Backoff after the server rejects registration.
    pub busy_sleep: Duration,
    /// Deadline for a server answer before the request is re-sent.
    pub resend_timeout: Duration,
    /// Frames larger than this are a protocol error.
    pub max_message_size: usize,
    pub gateway: GatewayInfo,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 8443,
            tls: TlsMode::default(),
            poll_timeout: Duration::from_millis(250),
            receive_timeout: Duration::from_secs(30),
            send_timeout: Duration::from_secs(5),
            retry_connect_timeout: Duration::from_secs(10),
            busy_sleep: Duration::from_secs(30),
            resend_timeout: Duration::from_secs(20),
            max_message_size: 4096,
            gateway: GatewayInfo {
                gateway_id: String::new(),
                version: env!("CARGO_PKG_VERSION").into(),
                ip_address: None,
            },
        }
    }
}

impl LinkConfig {
    pub fn validate(&self) -> Result<(), LinkError> {
        let durations = [
            ("pollTimeout", self.poll_timeout),
            ("receiveTimeout", self.receive_timeout),
            ("sendTimeout", self.send_timeout),
            ("retryConnectTimeout", self.retry_connect_timeout),
            ("busySleep", self.busy_sleep),
            ("resendTimeout", self.resend_timeout),
        ];
        for (field, value) in durations {
            if value.is_zero() {
                return Err(LinkError::InvalidArgument {
                    field: "timing",
                    reason: format!("{field} must be strictly positive"),
                });
            }
        }

        if self.max_message_size == 0 {
            return Err(LinkError::InvalidArgument {
                field: "maxMessageSize",
                reason: "must be strictly positive".into(),
            });
        }
        if self.host.is_empty() {
            return Err(LinkError::InvalidArgument {
                field: "host",
                reason: "must not be empty".into(),
            });
        }
        if self.gateway.gateway_id.is_empty() {
            return Err(LinkError::InvalidArgument {
                field: "gatewayInfo",
                reason: "gateway id must not be empty".into(),
            });
        }
        Ok(())
    }
}

// ── Connection state ────────────────────────────────────────────────

/// Observable link state. Only the sender advances it; the receiver
/// can only demote it to `Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Registering,
    Ready,
}

// ── Connector ───────────────────────────────────────────────────────

/// Persistent, auto-reconnecting link to the upstream server.
///
/// Cheaply cloneable. Call [`start`](Self::start) once to spawn the
/// background tasks, [`stop`](Self::stop) to tear them down; commands
/// and telemetry can be submitted at any time in between and complete
/// when the server answers.
#[derive(Clone)]
pub struct Connector {
    inner: Arc<ConnectorInner>,
}

struct ConnectorInner {
    config: LinkConfig,
    state: watch::Sender<LinkState>,
    transport: tokio::sync::Mutex<Option<Arc<WsTransport>>>,
    queue: OutputQueue,
    poll: ContextPoll,
    cancel: CancellationToken,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl ConnectorInner {
    /// Demote to disconnected. The sender observes the state change and
    /// leaves its drain phase; demotion of anything but `Ready` is a
    /// no-op, so the receiver can never advance the state machine.
    fn mark_disconnected(&self) {
        let demoted = self.state.send_if_modified(|state| {
            if *state == LinkState::Ready {
                *state = LinkState::Disconnected;
                true
            } else {
                false
            }
        });
        if demoted {
            debug!("link demoted to disconnected");
        }
    }
}

impl Connector {
    pub fn new(config: LinkConfig) -> Result<Self, LinkError> {
        config.validate()?;

        let (state, _) = watch::channel(LinkState::Disconnected);
        Ok(Self {
            inner: Arc::new(ConnectorInner {
                config,
                state,
                transport: tokio::sync::Mutex::new(None),
                queue: OutputQueue::new(),
                poll: ContextPoll::new(),
                cancel: CancellationToken::new(),
                tasks: std::sync::Mutex::new(Vec::new()),
            }),
        })
    }

    /// Spawn the sender, receiver and resend-sweep tasks.
    pub fn start(&self) {
        let mut tasks = self.inner.tasks.lock().expect("task list poisoned");
        if !tasks.is_empty() {
            return;
        }

        tasks.push(tokio::spawn(sender_loop(Arc::clone(&self.inner))));
        tasks.push(tokio::spawn(receiver_loop(Arc::clone(&self.inner))));
        tasks.push(tokio::spawn(sweep_loop(Arc::clone(&self.inner))));
        info!(host = %self.inner.config.host, port = self.inner.config.port, "connector started");
    }

    /// Stop both loops, close the socket, and fail every pending
    /// request with [`LinkError::Stopped`]. Closing the queue also
    /// fails any request racing this teardown: a context enqueued after
    /// the terminal drain is refused at the queue instead of waiting on
    /// a sender that will never run again.
    pub async fn stop(&self) {
        info!("stopping connector");
        self.inner.cancel.cancel();

        if let Some(transport) = self.inner.transport.lock().await.take() {
            transport.close().await;
        }

        let tasks = std::mem::take(&mut *self.inner.tasks.lock().expect("task list poisoned"));
        for task in tasks {
            let _ = task.await;
        }

        self.inner.poll.fail_all(|| LinkError::Stopped);
        for mut context in self.inner.queue.close() {
            context.finish(Err(LinkError::Stopped));
        }

        self.inner.state.send_replace(LinkState::Disconnected);
    }

    /// Subscribe to link-state changes.
    pub fn state(&self) -> watch::Receiver<LinkState> {
        self.inner.state.subscribe()
    }

    // ── Command routing ──────────────────────────────────────────

    /// Translate a gateway command into one outbound message and await
    /// the correlated answer.
    pub async fn execute(&self, command: Command) -> Result<CommandOutcome, LinkError> {
        let message = match command {
            Command::NewDevice(device) => GatewayMessage::NewDeviceRequest {
                id: Uuid::new_v4(),
                device,
            },
            Command::DeviceList { prefix } => GatewayMessage::DeviceListRequest {
                id: Uuid::new_v4(),
                device_prefix: prefix,
            },
            Command::LastValue { device, module } => GatewayMessage::LastValueRequest {
                id: Uuid::new_v4(),
                device_id: device,
                module_id: module,
            },
        };

        match self.request(message).await? {
            ServerMessage::GenericAck { .. } => Ok(CommandOutcome::Accepted),
            ServerMessage::DeviceListResponse { devices, .. } => {
                Ok(CommandOutcome::DeviceList(devices))
            }
            ServerMessage::LastValueResponse { value, .. } => Ok(CommandOutcome::LastValue(value)),
            ServerMessage::ServerError { code, message, .. } => {
                Err(LinkError::Server { code, message })
            }
            other => Err(LinkError::Protocol(format!(
                "unexpected answer to command: {other:?}"
            ))),
        }
    }

    /// Relay telemetry. Completes once the server confirms durable
    /// receipt; the stable request id makes resends idempotent.
    pub async fn export(&self, data: Vec<SensorData>) -> Result<(), LinkError> {
        let message = GatewayMessage::SensorDataExport {
            id: Uuid::new_v4(),
            data,
        };

        match self.request(message).await? {
            ServerMessage::SensorDataConfirm { .. } | ServerMessage::GenericAck { .. } => Ok(()),
            ServerMessage::ServerError { code, message, .. } => {
                Err(LinkError::Server { code, message })
            }
            other => Err(LinkError::Protocol(format!(
                "unexpected answer to export: {other:?}"
            ))),
        }
    }

    async fn request(&self, message: GatewayMessage) -> Result<ServerMessage, LinkError> {
        // Fast path only: a request racing `stop()` past this check is
        // still completed, because the queue refuses contexts once its
        // terminal drain has run.
        if self.inner.cancel.is_cancelled() {
            return Err(LinkError::Stopped);
        }

        let (context, response) = OutboundContext::new(message);
        self.inner.queue.enqueue(context);

        response.await.map_err(|_| LinkError::Stopped)?
    }
}

// ── Sender ──────────────────────────────────────────────────────────

async fn sender_loop(inner: Arc<ConnectorInner>) {
    loop {
        if inner.cancel.is_cancelled() {
            break;
        }

        inner.state.send_replace(LinkState::Connecting);

        let established = tokio::select! {
            biased;
            _ = inner.cancel.cancelled() => break,
            result = establish(&inner) => result,
        };

        let transport = match established {
            Ok(transport) => Arc::new(transport),
            Err(err) => {
                inner.state.send_replace(LinkState::Disconnected);
                // A rejected registration is not a network hiccup; back
                // off for longer before presenting ourselves again.
                let delay = if matches!(err, LinkError::Rejected(_)) {
                    inner.config.busy_sleep
                } else {
                    inner.config.retry_connect_timeout
                };
                warn!(error = %err, delay_secs = delay.as_secs(), "connection attempt failed");

                tokio::select! {
                    biased;
                    _ = inner.cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => continue,
                }
            }
        };

        *inner.transport.lock().await = Some(Arc::clone(&transport));
        inner.state.send_replace(LinkState::Ready);
        info!("gateway registered, link ready");

        drain(&inner, &transport).await;

        inner.state.send_replace(LinkState::Disconnected);
        transport.close().await;
        *inner.transport.lock().await = None;
    }

    debug!("sender loop exiting");
}

/// Open the socket and run the register handshake.
async fn establish(inner: &ConnectorInner) -> Result<WsTransport, LinkError> {
    let config = &inner.config;

    let transport = WsTransport::connect(
        &config.host,
        config.port,
        &config.tls,
        config.send_timeout,
        config.max_message_size,
    )
    .await?;

    inner.state.send_replace(LinkState::Registering);

    let register = GatewayMessage::GatewayRegister {
        id: Uuid::new_v4(),
        info: config.gateway.clone(),
    };
    transport.send(&register).await?;

    let deadline = Instant::now() + config.receive_timeout;
    loop {
        let remaining = deadline
            .checked_duration_since(Instant::now())
            .ok_or_else(|| LinkError::Connect("no answer to registration".into()))?;

        match transport.receive(remaining).await? {
            None => continue,
            Some(ServerMessage::GatewayAccepted { .. }) => return Ok(transport),
            Some(ServerMessage::GatewayRejected { reason, .. }) => {
                return Err(LinkError::Rejected(reason))
            }
            Some(other) => {
                return Err(LinkError::Protocol(format!(
                    "unexpected answer to registration: {other:?}"
                )))
            }
        }
    }
}

/// Ready phase: forward queued contexts, ping when idle. Returns when
/// the receiver demotes the state, the link errors, or the connector
/// stops.
async fn drain(inner: &ConnectorInner, transport: &Arc<WsTransport>) {
    let ping_idle = inner.config.resend_timeout / PING_IDLE_DIVISOR;
    let mut state_rx = inner.state.subscribe();

    loop {
        if *state_rx.borrow_and_update() != LinkState::Ready {
            return;
        }

        tokio::select! {
            biased;
            _ = inner.cancel.cancelled() => return,
            changed = state_rx.changed() => {
                if changed.is_err() {
                    return;
                }
            }
            dequeued = inner.queue.dequeue(ping_idle) => match dequeued {
                Some(mut context) => {
                    context.attempts += 1;
                    match transport.send(&context.message).await {
                        Ok(()) => {
                            inner.poll.insert(context, inner.config.resend_timeout);
                        }
                        Err(err) => {
                            warn!(error = %err, id = %context.id(), "send failed, reconnecting");
                            requeue_or_fail(inner, context);
                            return;
                        }
                    }
                }
                None => {
                    if let Err(err) = transport.ping().await {
                        warn!(error = %err, "ping failed, reconnecting");
                        return;
                    }
                    trace!("idle ping sent");
                }
            }
        }
    }
}

/// Put a context back on the queue, unless its send budget ran out.
fn requeue_or_fail(inner: &ConnectorInner, mut context: OutboundContext) {
    if context.attempts >= MAX_SEND_ATTEMPTS {
        let id = context.id();
        let attempts = context.attempts;
        warn!(%id, attempts, "request exhausted its send budget");
        context.finish(Err(LinkError::Timeout { id, attempts }));
    } else {
        inner.queue.enqueue(context);
    }
}

// ── Receiver ────────────────────────────────────────────────────────

async fn receiver_loop(inner: Arc<ConnectorInner>) {
    let mut state_rx = inner.state.subscribe();

    'outer: loop {
        // Block until the sender reports an established link.
        while *state_rx.borrow_and_update() != LinkState::Ready {
            tokio::select! {
                biased;
                _ = inner.cancel.cancelled() => break 'outer,
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        break 'outer;
                    }
                }
            }
        }

        let Some(transport) = inner.transport.lock().await.clone() else {
            continue;
        };

        loop {
            if inner.cancel.is_cancelled() {
                break 'outer;
            }
            if *state_rx.borrow_and_update() != LinkState::Ready {
                break;
            }

            match transport.receive(inner.config.poll_timeout).await {
                Ok(Some(message)) => dispatch(&inner, message),
                Ok(None) => {
                    if transport.idle_for() > inner.config.receive_timeout {
                        warn!(
                            idle_secs = transport.idle_for().as_secs(),
                            "server silent past the receive timeout"
                        );
                        inner.mark_disconnected();
                        break;
                    }
                }
                Err(err) => {
                    warn!(error = %err, "receive failed");
                    inner.mark_disconnected();
                    break;
                }
            }
        }
    }

    debug!("receiver loop exiting");
}

fn dispatch(inner: &ConnectorInner, message: ServerMessage) {
    match message {
        // Registration verdicts are consumed during the handshake; one
        // arriving here is a stray duplicate.
        ServerMessage::GatewayAccepted { .. } | ServerMessage::GatewayRejected { .. } => {
            debug!("registration verdict outside handshake, ignoring");
        }
        answer => {
            let id = answer.id();
            if !inner.poll.complete(answer) {
                debug!(%id, "answer without a pending context, dropping");
            }
        }
    }
}

// ── Resend sweep ────────────────────────────────────────────────────

async fn sweep_loop(inner: Arc<ConnectorInner>) {
    let interval = (inner.config.resend_timeout / 4).max(Duration::from_millis(10));

    loop {
        tokio::select! {
            biased;
            _ = inner.cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        for context in inner.poll.take_expired() {
            debug!(
                id = %context.id(),
                attempts = context.attempts,
                elapsed_ms = context.created_at.elapsed().as_millis() as u64,
                "request unanswered past the resend deadline"
            );
            requeue_or_fail(&inner, context);
        }
    }

    debug!("sweep loop exiting");
}
