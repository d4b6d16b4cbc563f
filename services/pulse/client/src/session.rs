//! Connection session state machine and driver task.
//!
//! The driver owns the transport, serializes every state transition, and
//! holds the single pending reconnect timer. Commands arrive over an
//! unbounded channel from the public handle; inbound frames are dispatched
//! to subscribers synchronously with arrival, so a slow subscriber delays
//! the next frame rather than racing it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};

use bytes::BytesMut;
use serde_json::{json, Map, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use pulse_wire::{encode_frame, Frame, FrameDecoder, RawFrame, DEFAULT_MAX_FRAME_SIZE};

use crate::backoff::BackoffPolicy;
use crate::config::ClientConfig;
use crate::endpoint::{Endpoint, EndpointSelector};
use crate::error::ClientError;
use crate::handshake::HandshakeNegotiator;
use crate::registry::{EventKind, EventRegistry, Message};
use crate::router;
use crate::transport::{BoxedStream, Connector};

/// Lifecycle states of a connection session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionState {
    /// No transport, no pending attempt.
    Disconnected,
    /// A transport open is in flight.
    Connecting,
    /// Transport established; frames flow.
    Connected,
    /// Waiting out the backoff delay before the next attempt.
    Reconnecting,
}

/// Transfer statistics for a client.
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    /// Total bytes received
    pub bytes_in: u64,
    /// Total bytes sent
    pub bytes_out: u64,
    /// Number of frames received
    pub frames_received: u64,
    /// Number of frames sent
    pub frames_sent: u64,
    /// Timestamp of last received frame
    pub last_frame_in: Option<Instant>,
    /// Timestamp of last sent frame
    pub last_frame_out: Option<Instant>,
}

/// Commands sent from the public handle to the driver task.
pub(crate) enum Command {
    /// Begin a connect cycle (no-op outside Disconnected).
    Connect,
    /// Tear everything down and acknowledge once no further events can fire.
    Disconnect(oneshot::Sender<()>),
    /// Send a frame; permitted only while Connected.
    Send(Frame, oneshot::Sender<Result<(), ClientError>>),
    /// Change a session parameter.
    SetParameter {
        name: String,
        value: Value,
        reply: oneshot::Sender<Result<(), ClientError>>,
    },
}

/// State shared between the driver task and the public handle.
pub(crate) struct Shared {
    pub(crate) registry: EventRegistry,
    connected: AtomicBool,
    params: RwLock<Map<String, Value>>,
    stats: Mutex<SessionStats>,
}

impl Shared {
    pub(crate) fn new() -> Self {
        Self {
            registry: EventRegistry::new(),
            connected: AtomicBool::new(false),
            params: RwLock::new(Map::new()),
            stats: Mutex::new(SessionStats::default()),
        }
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub(crate) fn params(&self) -> Map<String, Value> {
        self.params
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn set_params(&self, params: Map<String, Value>) {
        *self.params.write().unwrap_or_else(|e| e.into_inner()) = params;
    }

    pub(crate) fn stats(&self) -> SessionStats {
        self.stats_mut().clone()
    }

    fn stats_mut(&self) -> MutexGuard<'_, SessionStats> {
        self.stats.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Owns the state machine and drives it to completion.
pub(crate) struct SessionDriver {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    shared: Arc<Shared>,
    commands: mpsc::UnboundedReceiver<Command>,
    negotiator: HandshakeNegotiator,
    selector: EndpointSelector,
    backoff: BackoffPolicy,
    state: SessionState,
    attempts: u32,
    pending_delay: Duration,
    shutdown: bool,
}

impl SessionDriver {
    pub(crate) fn new(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
        shared: Arc<Shared>,
        commands: mpsc::UnboundedReceiver<Command>,
    ) -> Self {
        let negotiator = HandshakeNegotiator::new(config.initial_session_parameters.clone());
        let selector = EndpointSelector::new(
            config.primary_endpoint.clone(),
            config.fallback_endpoint.clone(),
        );
        let backoff = config.backoff();

        shared.set_params(negotiator.params().to_map());

        Self {
            config,
            connector,
            shared,
            commands,
            negotiator,
            selector,
            backoff,
            state: SessionState::Disconnected,
            attempts: 0,
            pending_delay: Duration::ZERO,
            shutdown: false,
        }
    }

    /// Run the driver until every handle is dropped.
    pub(crate) async fn run(mut self) {
        debug!("session driver started for {}", self.config.primary_endpoint);

        loop {
            if self.shutdown {
                break;
            }
            match self.state {
                SessionState::Disconnected => match self.commands.recv().await {
                    Some(command) => {
                        self.handle_offline_command(command);
                    }
                    None => break,
                },
                SessionState::Connecting => self.drive_attempt().await,
                SessionState::Reconnecting => self.wait_backoff().await,
                // Connected only exists inside drive_attempt; reaching it
                // here means the transport is already gone.
                SessionState::Connected => self.transition(SessionState::Disconnected),
            }
        }

        debug!("session driver stopped");
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            debug!("session state {:?} -> {:?}", self.state, next);
            self.state = next;
            self.shared.set_connected(next == SessionState::Connected);
        }
    }

    fn to_disconnected(&mut self) {
        self.attempts = 0;
        self.transition(SessionState::Disconnected);
    }

    fn begin_cycle(&mut self) {
        self.attempts = 0;
        self.selector.reset();
        self.transition(SessionState::Connecting);
    }

    /// Handle a command while no transport is established. Returns true
    /// if the command tore down the current cycle.
    fn handle_offline_command(&mut self, command: Command) -> bool {
        match command {
            Command::Connect => {
                if self.state == SessionState::Disconnected {
                    info!("connect requested; targeting {}", self.config.primary_endpoint);
                    self.begin_cycle();
                } else {
                    debug!("connect requested while {:?}; ignoring", self.state);
                }
                false
            }
            Command::Disconnect(ack) => {
                if self.state != SessionState::Disconnected {
                    info!("disconnect requested; cancelling {:?}", self.state);
                }
                self.to_disconnected();
                let _ = ack.send(());
                true
            }
            Command::Send(_, reply) => {
                let _ = reply.send(Err(ClientError::NotConnected));
                false
            }
            Command::SetParameter { name, value, reply } => {
                // Validated and applied locally; the new set is announced
                // to the peer on the next transition into Connected.
                let result = self.negotiator.set_parameter(&name, value);
                if result.is_ok() {
                    self.publish_params();
                }
                let _ = reply.send(result);
                false
            }
        }
    }

    /// Drive a single open attempt against the currently selected endpoint.
    async fn drive_attempt(&mut self) {
        let endpoint = self.selector.current().clone();
        info!(
            "connecting to {} ({} endpoint, attempt {})",
            endpoint,
            self.selector.active().as_str(),
            self.attempts + 1
        );

        let open = {
            let connector = Arc::clone(&self.connector);
            let endpoint = endpoint.clone();
            async move { connector.connect(&endpoint).await }
        };
        tokio::pin!(open);

        let deadline = tokio::time::sleep(self.config.open_timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                result = &mut open => {
                    match result {
                        Ok(stream) => self.on_open(endpoint, stream).await,
                        Err(e) => {
                            warn!("failed to connect to {}: {}", endpoint, e);
                            self.on_attempt_failure(format!("connect to {endpoint} failed: {e}"));
                        }
                    }
                    return;
                }

                _ = &mut deadline => {
                    warn!(
                        "open attempt to {} timed out after {:?}",
                        endpoint, self.config.open_timeout
                    );
                    // Dropping the open future abandons the in-flight socket.
                    self.on_attempt_failure(format!("open attempt to {endpoint} timed out"));
                    return;
                }

                command = self.commands.recv() => match command {
                    Some(command) => {
                        if self.handle_offline_command(command) {
                            return;
                        }
                    }
                    None => {
                        self.shutdown = true;
                        self.to_disconnected();
                        return;
                    }
                }
            }
        }
    }

    /// Wait out the backoff delay, keeping the timer cancellable.
    async fn wait_backoff(&mut self) {
        let sleep = tokio::time::sleep(self.pending_delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => {
                    self.transition(SessionState::Connecting);
                    return;
                }

                command = self.commands.recv() => match command {
                    Some(command) => {
                        if self.handle_offline_command(command) {
                            return;
                        }
                    }
                    None => {
                        self.shutdown = true;
                        self.to_disconnected();
                        return;
                    }
                }
            }
        }
    }

    /// An open attempt failed before a transport was established.
    fn on_attempt_failure(&mut self, reason: String) {
        self.attempts += 1;
        self.dispatch(
            EventKind::Error,
            json!({
                "message": reason,
                "attempt": self.attempts,
                "terminal": false,
            }),
        );
        self.schedule_retry();
    }

    /// An established connection was lost.
    fn on_connection_lost(&mut self, reason: String) {
        self.dispatch(EventKind::Disconnect, json!({ "reason": reason }));
        self.attempts += 1;
        self.schedule_retry();
    }

    /// Pick the next state after a failure: retry with backoff, give up,
    /// or stay down when auto-reconnect is off.
    fn schedule_retry(&mut self) {
        if !self.config.auto_reconnect {
            info!("auto-reconnect disabled; staying disconnected");
            self.to_disconnected();
            return;
        }

        if self.attempts >= self.config.max_reconnect_attempts {
            error!("giving up after {} reconnect attempts", self.attempts);
            self.dispatch(
                EventKind::Error,
                json!({
                    "message": "max reconnect attempts exhausted",
                    "attempts": self.attempts,
                    "terminal": true,
                }),
            );
            self.to_disconnected();
            return;
        }

        self.selector.on_failure();
        self.pending_delay = self.backoff.delay(self.attempts);
        debug!(
            "retrying via {} in {:?} (attempt {})",
            self.selector.current(),
            self.pending_delay,
            self.attempts + 1
        );
        self.transition(SessionState::Reconnecting);
    }

    /// A transport is open: negotiate the session and enter the connected
    /// loop.
    async fn on_open(&mut self, endpoint: Endpoint, mut stream: BoxedStream) {
        info!("transport open to {}", endpoint);
        self.attempts = 0;
        self.transition(SessionState::Connected);

        // Session parameters are announced on every transition into
        // Connected, never only at cold start.
        let frames = self.negotiator.connect_frames();
        for frame in &frames {
            if let Err(e) = self.write_frame(&mut stream, frame).await {
                warn!("handshake write to {} failed: {:#}", endpoint, e);
                self.on_connection_lost(format!("handshake write failed: {e}"));
                return;
            }
        }

        self.dispatch(
            EventKind::Connect,
            json!({
                "endpoint": endpoint.as_str(),
                "role": self.selector.active().as_str(),
            }),
        );

        self.run_connected(endpoint, stream).await;
    }

    /// Connected-state event loop: inbound frames, commands, idle timeout.
    async fn run_connected(&mut self, endpoint: Endpoint, mut stream: BoxedStream) {
        let shared = Arc::clone(&self.shared);
        let mut decoder = FrameDecoder::new();
        let mut read_buf = BytesMut::with_capacity(16 * 1024);
        let mut last_activity = Instant::now();

        loop {
            let idle_deadline = self.config.idle_timeout.map(|window| last_activity + window);

            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(Command::Disconnect(ack)) => {
                        info!("disconnect requested; closing transport to {}", endpoint);
                        let _ = stream.shutdown().await;
                        self.dispatch(
                            EventKind::Disconnect,
                            json!({ "reason": "client disconnect" }),
                        );
                        self.to_disconnected();
                        let _ = ack.send(());
                        return;
                    }
                    Some(Command::Connect) => {
                        debug!("connect requested while connected; ignoring");
                    }
                    Some(Command::Send(frame, reply)) => {
                        match self.write_frame(&mut stream, &frame).await {
                            Ok(()) => {
                                let _ = reply.send(Ok(()));
                            }
                            Err(e) => {
                                warn!("send to {} failed: {:#}", endpoint, e);
                                let _ = reply.send(Err(ClientError::Transport(e.to_string())));
                                self.on_connection_lost(format!("write failed: {e}"));
                                return;
                            }
                        }
                    }
                    Some(Command::SetParameter { name, value, reply }) => {
                        match self.negotiator.set_parameter(&name, value) {
                            Ok(()) => {
                                self.publish_params();
                                // Valid changes are announced to the peer
                                // while connected.
                                let frame = self.negotiator.params_frame();
                                if let Err(e) = self.write_frame(&mut stream, &frame).await {
                                    warn!("parameter announce to {} failed: {:#}", endpoint, e);
                                    let _ = reply.send(Ok(()));
                                    self.on_connection_lost(format!("write failed: {e}"));
                                    return;
                                }
                                let _ = reply.send(Ok(()));
                            }
                            Err(e) => {
                                let _ = reply.send(Err(e));
                            }
                        }
                    }
                    None => {
                        debug!("all client handles dropped; closing session");
                        let _ = stream.shutdown().await;
                        self.shutdown = true;
                        self.to_disconnected();
                        return;
                    }
                },

                frame = Self::read_frame(&mut stream, &mut decoder, &mut read_buf, &shared) => {
                    match frame {
                        Ok(Some(raw)) => {
                            last_activity = Instant::now();
                            self.handle_inbound(raw);
                        }
                        Ok(None) => {
                            info!("{} closed the connection", endpoint);
                            self.on_connection_lost("peer closed connection".to_string());
                            return;
                        }
                        Err(e) => {
                            error!("transport error from {}: {:#}", endpoint, e);
                            self.on_connection_lost(format!("{e}"));
                            return;
                        }
                    }
                }

                _ = async {
                    match idle_deadline {
                        Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
                        None => std::future::pending().await,
                    }
                } => {
                    warn!("idle timeout reached for {}; treating connection as dead", endpoint);
                    let _ = stream.shutdown().await;
                    self.on_connection_lost("idle timeout".to_string());
                    return;
                }
            }
        }
    }

    /// Read the next routable frame. `Ok(None)` means clean EOF.
    /// Malformed frame bodies are logged and dropped without leaving the
    /// connected state.
    async fn read_frame(
        stream: &mut BoxedStream,
        decoder: &mut FrameDecoder,
        buf: &mut BytesMut,
        shared: &Shared,
    ) -> anyhow::Result<Option<RawFrame>> {
        loop {
            loop {
                match decoder.decode(buf) {
                    Ok(Some(raw)) => {
                        let mut stats = shared.stats_mut();
                        stats.frames_received += 1;
                        stats.last_frame_in = Some(Instant::now());
                        return Ok(Some(raw));
                    }
                    Ok(None) => break,
                    Err(e) if e.is_recoverable() => {
                        warn!("dropping malformed inbound frame: {}", e);
                    }
                    Err(e) => {
                        // The next frame boundary cannot be found.
                        anyhow::bail!("unresyncable frame stream: {e}");
                    }
                }
            }

            let n = stream.read_buf(buf).await?;
            if n == 0 {
                if buf.is_empty() {
                    return Ok(None);
                }
                anyhow::bail!("connection closed mid-frame");
            }
            shared.stats_mut().bytes_in += n as u64;
        }
    }

    /// Apply and dispatch one inbound frame.
    fn handle_inbound(&mut self, raw: RawFrame) {
        if let Some(frame) = raw.to_frame() {
            match &frame {
                Frame::SessionUpdate { new_level } => {
                    // Applied locally and re-emitted below; never echoed
                    // back to the peer.
                    self.negotiator.apply_remote_level(*new_level);
                    self.publish_params();
                }
                Frame::Error { message } => {
                    warn!("server error frame: {}", message);
                }
                Frame::DisconnectNotice { reason } => {
                    info!("server disconnect notice: {:?}", reason);
                }
                _ => {}
            }
        }

        let message = router::route(raw);
        self.shared.registry.dispatch(&message);
    }

    async fn write_frame(&mut self, stream: &mut BoxedStream, frame: &Frame) -> anyhow::Result<()> {
        let bytes = encode_frame(frame, DEFAULT_MAX_FRAME_SIZE)?;
        stream.write_all(&bytes).await?;

        let mut stats = self.shared.stats_mut();
        stats.bytes_out += bytes.len() as u64;
        stats.frames_sent += 1;
        stats.last_frame_out = Some(Instant::now());
        Ok(())
    }

    fn publish_params(&self) {
        self.shared.set_params(self.negotiator.params().to_map());
    }

    fn dispatch(&self, kind: EventKind, payload: Value) {
        self.shared.registry.dispatch(&Message::new(kind, payload));
    }
}
