//! Public client surface.

use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot};

use pulse_wire::Frame;

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::registry::{EventKind, Message, SubscriptionId};
use crate::session::{Command, SessionDriver, SessionStats, Shared};
use crate::transport::{Connector, TcpConnector};

/// Handle to a resilient streaming client.
///
/// Cheap to clone; all clones talk to the same driver task. The driver
/// shuts down once every handle is dropped.
#[derive(Clone)]
pub struct StreamClient {
    commands: mpsc::UnboundedSender<Command>,
    shared: Arc<Shared>,
}

impl StreamClient {
    /// Build a client for the given configuration using plain TCP and
    /// spawn its driver task. Must be called within a tokio runtime.
    pub fn new(config: ClientConfig) -> Self {
        Self::with_connector(config, TcpConnector)
    }

    /// Build a client with a custom transport connector.
    pub fn with_connector<C: Connector>(config: ClientConfig, connector: C) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::new());
        let driver = SessionDriver::new(
            config,
            Arc::new(connector),
            Arc::clone(&shared),
            command_rx,
        );
        tokio::spawn(driver.run());

        Self {
            commands: command_tx,
            shared,
        }
    }

    /// Begin connecting to the primary endpoint.
    ///
    /// The call does not block; progress is reported through `connect`
    /// and `error` events. A no-op while a session is already live.
    pub fn connect(&self) -> Result<(), ClientError> {
        self.commands
            .send(Command::Connect)
            .map_err(|_| ClientError::Closed)
    }

    /// Tear down the connection and cancel any pending reconnect.
    ///
    /// After this returns, no further subscriber notifications occur
    /// until [`connect`](Self::connect) is called again.
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.commands
            .send(Command::Disconnect(ack_tx))
            .map_err(|_| ClientError::Closed)?;
        ack_rx.await.map_err(|_| ClientError::Closed)
    }

    /// Send a frame to the peer. Permitted only while connected; callers
    /// are responsible for queueing or dropping on
    /// [`ClientError::NotConnected`].
    pub async fn send(&self, frame: Frame) -> Result<(), ClientError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::Send(frame, reply_tx))
            .map_err(|_| ClientError::Closed)?;
        reply_rx.await.map_err(|_| ClientError::Closed)?
    }

    /// Change a session parameter.
    ///
    /// `level` is validated locally against the allowed range and rejected
    /// without any network traffic when invalid. Valid changes apply
    /// immediately and are announced to the peer only while connected.
    pub async fn set_session_parameter(
        &self,
        name: impl Into<String>,
        value: Value,
    ) -> Result<(), ClientError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::SetParameter {
                name: name.into(),
                value,
                reply: reply_tx,
            })
            .map_err(|_| ClientError::Closed)?;
        reply_rx.await.map_err(|_| ClientError::Closed)?
    }

    /// Register a subscriber for an event kind. Registering the same
    /// callback twice results in two invocations.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.shared.registry.register(kind, Arc::new(handler))
    }

    /// Remove one subscription. Unknown ids are a no-op.
    pub fn off(&self, kind: EventKind, id: SubscriptionId) {
        self.shared.registry.unregister(kind, id);
    }

    /// Remove every subscriber for an event kind.
    pub fn off_all(&self, kind: EventKind) {
        self.shared.registry.unregister_all(kind);
    }

    /// Whether the session is currently connected.
    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    /// Snapshot of the current session parameters.
    pub fn session_parameters(&self) -> Map<String, Value> {
        self.shared.params()
    }

    /// Snapshot of transfer statistics.
    pub fn stats(&self) -> SessionStats {
        self.shared.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use bytes::BytesMut;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::time::timeout;

    use crate::endpoint::Endpoint;
    use pulse_wire::{encode_frame, FrameDecoder, RawFrame, DEFAULT_MAX_FRAME_SIZE};

    const WAIT: Duration = Duration::from_secs(2);

    fn test_config(addr: &str) -> ClientConfig {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let mut config = ClientConfig::new(addr);
        config.base_delay = Duration::from_millis(20);
        config.backoff_multiplier = 1.0;
        config.backoff_cap = Duration::from_millis(20);
        config.open_timeout = Duration::from_millis(500);
        config
    }

    /// Counts open attempts on the way through to TCP.
    struct CountingConnector {
        attempts: Arc<AtomicU32>,
        inner: TcpConnector,
    }

    #[async_trait]
    impl Connector for CountingConnector {
        async fn connect(
            &self,
            endpoint: &Endpoint,
        ) -> std::io::Result<crate::transport::BoxedStream> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            self.inner.connect(endpoint).await
        }
    }

    /// Bind then drop to obtain a port that refuses connections.
    async fn dead_endpoint() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        addr
    }

    async fn read_raw(
        stream: &mut TcpStream,
        decoder: &mut FrameDecoder,
        buf: &mut BytesMut,
    ) -> Option<RawFrame> {
        loop {
            if let Ok(Some(raw)) = decoder.decode(buf) {
                return Some(raw);
            }
            let n = stream.read_buf(buf).await.ok()?;
            if n == 0 {
                return None;
            }
        }
    }

    async fn write_frame(stream: &mut TcpStream, frame: &Frame) -> std::io::Result<()> {
        let bytes = encode_frame(frame, DEFAULT_MAX_FRAME_SIZE).unwrap();
        stream.write_all(&bytes).await
    }

    fn record_events(
        client: &StreamClient,
        kind: EventKind,
    ) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        client.on(kind, move |message| {
            let _ = tx.send(message.clone());
        });
        rx
    }

    #[tokio::test]
    async fn connect_negotiates_session_and_reports_status() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let mut config = test_config(&addr);
        config
            .initial_session_parameters
            .insert("level".to_string(), json!(3));
        let client = StreamClient::new(config);
        let mut connect_events = record_events(&client, EventKind::Connect);

        client.connect().unwrap();

        let (mut server, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
        let mut decoder = FrameDecoder::new();
        let mut buf = BytesMut::new();

        let params = timeout(WAIT, read_raw(&mut server, &mut decoder, &mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(params.kind, "set-session-params");
        assert_eq!(params.body["params"]["level"], 3);
        assert!(params.body["params"]["entropy"].is_string());

        let request = timeout(WAIT, read_raw(&mut server, &mut decoder, &mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(request.kind, "request-data");

        let event = timeout(WAIT, connect_events.recv()).await.unwrap().unwrap();
        assert_eq!(event.payload["role"], "primary");
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn parameters_are_reannounced_on_every_reconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let client = StreamClient::new(test_config(&addr));
        client.connect().unwrap();

        let mut entropies = Vec::new();
        for round in 0..3 {
            let (mut server, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
            let mut decoder = FrameDecoder::new();
            let mut buf = BytesMut::new();

            let params = timeout(WAIT, read_raw(&mut server, &mut decoder, &mut buf))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(params.kind, "set-session-params", "round {round}");
            entropies.push(params.body["params"]["entropy"].as_str().unwrap().to_string());

            let request = timeout(WAIT, read_raw(&mut server, &mut decoder, &mut buf))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(request.kind, "request-data", "round {round}");

            if round < 2 {
                // Drop the connection to force a reconnect.
                drop(server);
            } else {
                // Exactly one parameter frame per transition into
                // Connected; nothing further follows the handshake.
                let extra =
                    timeout(Duration::from_millis(200), read_raw(&mut server, &mut decoder, &mut buf))
                        .await;
                assert!(extra.is_err(), "unexpected frame after handshake");
            }
        }

        // Parameters, entropy token included, are not lost across reconnects.
        assert!(entropies.iter().all(|entropy| *entropy == entropies[0]));
    }

    #[tokio::test]
    async fn exhaustion_emits_one_terminal_error_and_stops() {
        let addr = dead_endpoint().await;
        let mut config = test_config(&addr);
        config.max_reconnect_attempts = 3;

        let attempts = Arc::new(AtomicU32::new(0));
        let client = StreamClient::with_connector(
            config,
            CountingConnector {
                attempts: Arc::clone(&attempts),
                inner: TcpConnector,
            },
        );
        let mut errors = record_events(&client, EventKind::Error);
        client.connect().unwrap();

        let mut terminal_seen = false;
        while !terminal_seen {
            let event = timeout(WAIT, errors.recv()).await.unwrap().unwrap();
            terminal_seen = event.payload["terminal"] == true;
        }

        // No timer is scheduled after giving up: the attempt count stays
        // put and no further error events arrive.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert!(errors.try_recv().is_err());
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn disconnect_cancels_pending_reconnect() {
        let addr = dead_endpoint().await;
        let mut config = test_config(&addr);
        config.base_delay = Duration::from_millis(200);
        config.backoff_cap = Duration::from_millis(200);

        let attempts = Arc::new(AtomicU32::new(0));
        let client = StreamClient::with_connector(
            config,
            CountingConnector {
                attempts: Arc::clone(&attempts),
                inner: TcpConnector,
            },
        );
        let mut errors = record_events(&client, EventKind::Error);
        client.connect().unwrap();

        // First attempt fails; the session is now waiting out the backoff.
        timeout(WAIT, errors.recv()).await.unwrap().unwrap();
        client.disconnect().await.unwrap();

        // Well past the pending delay: no new attempt without an explicit
        // connect().
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn primary_failure_fails_over_to_fallback() {
        let fallback_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let fallback_addr = fallback_listener.local_addr().unwrap().to_string();
        let primary_addr = dead_endpoint().await;

        let mut config = test_config(&primary_addr);
        config.fallback_endpoint = Some(fallback_addr.as_str().into());
        let client = StreamClient::new(config);
        let mut connect_events = record_events(&client, EventKind::Connect);

        client.connect().unwrap();

        let (mut server, _) = timeout(WAIT, fallback_listener.accept())
            .await
            .unwrap()
            .unwrap();
        let mut decoder = FrameDecoder::new();
        let mut buf = BytesMut::new();
        let params = timeout(WAIT, read_raw(&mut server, &mut decoder, &mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(params.kind, "set-session-params");

        let event = timeout(WAIT, connect_events.recv()).await.unwrap().unwrap();
        assert_eq!(event.payload["role"], "fallback");
        assert_eq!(event.payload["endpoint"], fallback_addr.as_str());
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn session_update_applies_locally_without_echo() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let client = StreamClient::new(test_config(&addr));
        let mut updates = record_events(&client, EventKind::SessionUpdate);
        client.connect().unwrap();

        let (mut server, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
        let mut decoder = FrameDecoder::new();
        let mut buf = BytesMut::new();
        for _ in 0..2 {
            timeout(WAIT, read_raw(&mut server, &mut decoder, &mut buf))
                .await
                .unwrap()
                .unwrap();
        }

        write_frame(&mut server, &Frame::SessionUpdate { new_level: 7 })
            .await
            .unwrap();

        let event = timeout(WAIT, updates.recv()).await.unwrap().unwrap();
        assert_eq!(event.payload["new_level"], 7);
        assert_eq!(client.session_parameters()["level"], 7);

        // The update is applied silently; nothing goes back to the peer.
        let echoed =
            timeout(Duration::from_millis(200), read_raw(&mut server, &mut decoder, &mut buf)).await;
        assert!(echoed.is_err(), "session update was echoed");
    }

    #[tokio::test]
    async fn send_requires_a_connection() {
        let addr = dead_endpoint().await;
        let client = StreamClient::new(test_config(&addr));

        let err = client.send(Frame::RequestData).await.unwrap_err();
        assert!(matches!(err, ClientError::NotConnected));
    }

    #[tokio::test]
    async fn send_reaches_the_peer_while_connected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let client = StreamClient::new(test_config(&addr));
        let mut connect_events = record_events(&client, EventKind::Connect);
        client.connect().unwrap();

        let (mut server, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
        let mut decoder = FrameDecoder::new();
        let mut buf = BytesMut::new();
        for _ in 0..2 {
            timeout(WAIT, read_raw(&mut server, &mut decoder, &mut buf))
                .await
                .unwrap()
                .unwrap();
        }
        timeout(WAIT, connect_events.recv()).await.unwrap().unwrap();

        client.send(Frame::RequestData).await.unwrap();

        let frame = timeout(WAIT, read_raw(&mut server, &mut decoder, &mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame.kind, "request-data");
        assert!(client.stats().frames_sent >= 3);
    }

    #[tokio::test]
    async fn invalid_level_change_is_rejected_without_traffic() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let client = StreamClient::new(test_config(&addr));
        client.connect().unwrap();

        let (mut server, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
        let mut decoder = FrameDecoder::new();
        let mut buf = BytesMut::new();
        for _ in 0..2 {
            timeout(WAIT, read_raw(&mut server, &mut decoder, &mut buf))
                .await
                .unwrap()
                .unwrap();
        }

        let before = client.session_parameters();
        let err = client
            .set_session_parameter("level", json!(15))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::InvalidParameter { .. }));
        assert_eq!(client.session_parameters(), before);

        let sent =
            timeout(Duration::from_millis(200), read_raw(&mut server, &mut decoder, &mut buf)).await;
        assert!(sent.is_err(), "rejected parameter reached the network");
    }

    #[tokio::test]
    async fn valid_level_change_is_announced_to_the_peer() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let client = StreamClient::new(test_config(&addr));
        client.connect().unwrap();

        let (mut server, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
        let mut decoder = FrameDecoder::new();
        let mut buf = BytesMut::new();
        for _ in 0..2 {
            timeout(WAIT, read_raw(&mut server, &mut decoder, &mut buf))
                .await
                .unwrap()
                .unwrap();
        }

        client.set_session_parameter("level", json!(8)).await.unwrap();
        assert_eq!(client.session_parameters()["level"], 8);

        let announce = timeout(WAIT, read_raw(&mut server, &mut decoder, &mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(announce.kind, "set-session-params");
        assert_eq!(announce.body["params"]["level"], 8);
    }

    #[tokio::test]
    async fn disconnect_is_synchronous_observable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let client = StreamClient::new(test_config(&addr));
        let mut data_events = record_events(&client, EventKind::DataUpdate);
        let mut disconnect_events = record_events(&client, EventKind::Disconnect);
        client.connect().unwrap();

        let (mut server, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
        let mut decoder = FrameDecoder::new();
        let mut buf = BytesMut::new();
        for _ in 0..2 {
            timeout(WAIT, read_raw(&mut server, &mut decoder, &mut buf))
                .await
                .unwrap()
                .unwrap();
        }

        client.disconnect().await.unwrap();
        assert!(!client.is_connected());
        let event = timeout(WAIT, disconnect_events.recv()).await.unwrap().unwrap();
        assert_eq!(event.payload["reason"], "client disconnect");

        // Frames arriving after disconnect never reach subscribers.
        let _ = write_frame(&mut server, &Frame::DataUpdate { payload: json!({"x": 1}) }).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(data_events.try_recv().is_err());
    }
}
