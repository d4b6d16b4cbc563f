//! Resilient duplex streaming client for live telemetry feeds.
//!
//! This crate implements the connection core used by dashboard front-ends
//! that consume live telemetry (price feeds, probability scores, health
//! metrics) over long-lived duplex connections: an explicit lifecycle
//! state machine, bounded backed-off reconnection with endpoint failover,
//! session-parameter negotiation, and typed subscriber dispatch.
//!
//! ## Features
//!
//! - **Connection lifecycle**: Disconnected/Connecting/Connected/
//!   Reconnecting state machine owned by a single driver task
//! - **Auto-reconnect**: bounded, monotonic exponential backoff with
//!   optional failover to a secondary endpoint
//! - **Session negotiation**: parameters re-announced on every reconnect,
//!   server-pushed updates applied without an echo loop
//! - **Typed dispatch**: ordered, fault-isolated subscriber registry
//! - **Transport seam**: any `AsyncRead + AsyncWrite` duplex behind
//!   [`Connector`]; plain TCP shipped
//!
//! ## Example
//!
//! ```rust,no_run
//! use pulse_client::{ClientConfig, EventKind, StreamClient};
//!
//! # async fn example() -> Result<(), pulse_client::ClientError> {
//! let mut config = ClientConfig::new("feed.example.net:9600");
//! config.fallback_endpoint = Some("feed-backup.example.net:9600".into());
//!
//! let client = StreamClient::new(config);
//! client.on(EventKind::DataUpdate, |message| {
//!     println!("update: {}", message.payload);
//! });
//! client.on(EventKind::Error, |message| {
//!     eprintln!("stream error: {}", message.payload);
//! });
//! client.connect()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backoff;
pub mod client;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod handshake;
pub mod registry;
pub mod router;
pub mod session;
pub mod transport;

// Re-export main types
pub use backoff::BackoffPolicy;
pub use client::StreamClient;
pub use config::{ClientConfig, DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_OPEN_TIMEOUT};
pub use endpoint::{ActiveEndpoint, Endpoint, EndpointSelector};
pub use error::ClientError;
pub use handshake::{HandshakeNegotiator, SessionParams, DEFAULT_LEVEL, MAX_LEVEL, MIN_LEVEL};
pub use registry::{EventKind, EventRegistry, Message, SubscriptionId};
pub use session::SessionStats;
pub use transport::{BoxedStream, Connector, DuplexStream, TcpConnector};

// Wire types used at the public surface
pub use pulse_wire as wire;
pub use pulse_wire::Frame;
