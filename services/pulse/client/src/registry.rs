//! Typed event dispatch for stream subscribers.

use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use serde_json::Value;
use tracing::{debug, error};

/// Event kinds a subscriber can register for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Transport established and session negotiation sent.
    Connect,
    /// Transport lost, or the session was torn down explicitly.
    Disconnect,
    /// Server acknowledged the session.
    ConnectAck,
    /// Telemetry data update.
    DataUpdate,
    /// Session parameters changed (server push).
    SessionUpdate,
    /// Transient or terminal error condition.
    Error,
    /// Server announced an impending disconnect.
    DisconnectNotice,
    /// Inbound frame with an unrecognized discriminator.
    Unhandled,
}

impl EventKind {
    /// Stable string form, matching the wire discriminator where one exists.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Connect => "connect",
            EventKind::Disconnect => "disconnect",
            EventKind::ConnectAck => "connect-ack",
            EventKind::DataUpdate => "data-update",
            EventKind::SessionUpdate => "session-update",
            EventKind::Error => "error",
            EventKind::DisconnectNotice => "disconnect-notice",
            EventKind::Unhandled => "unhandled",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message delivered to subscribers.
///
/// Immutable; consumed once by dispatch and then discarded. No message
/// history is retained.
#[derive(Debug, Clone)]
pub struct Message {
    /// Event kind tag.
    pub kind: EventKind,
    /// Opaque structured payload.
    pub payload: Value,
    /// Receipt timestamp.
    pub received_at: Instant,
}

impl Message {
    /// Create a message stamped with the current instant.
    pub fn new(kind: EventKind, payload: Value) -> Self {
        Self {
            kind,
            payload,
            received_at: Instant::now(),
        }
    }
}

/// Subscriber callback type. The registry holds only a shared reference;
/// the subscriber retains true ownership.
pub type Subscriber = Arc<dyn Fn(&Message) + Send + Sync>;

/// Token identifying one registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Ordered, fault-isolated subscriber registry.
///
/// Registering the same callback twice is permitted and results in two
/// invocations; unregistering an unknown id is a no-op. A panicking
/// subscriber is caught and logged, and dispatch continues with the
/// remaining subscribers in registration order.
#[derive(Default)]
pub struct EventRegistry {
    subscribers: Mutex<HashMap<EventKind, Vec<(SubscriptionId, Subscriber)>>>,
    next_id: AtomicU64,
}

impl EventRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<EventKind, Vec<(SubscriptionId, Subscriber)>>> {
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a subscriber for an event kind.
    pub fn register(&self, kind: EventKind, callback: Subscriber) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().entry(kind).or_default().push((id, callback));
        debug!("registered subscriber {:?} for {} events", id, kind);
        id
    }

    /// Remove one registration. Unknown ids are a no-op.
    pub fn unregister(&self, kind: EventKind, id: SubscriptionId) {
        if let Some(subscribers) = self.lock().get_mut(&kind) {
            subscribers.retain(|(existing, _)| *existing != id);
        }
    }

    /// Remove every subscriber for an event kind.
    pub fn unregister_all(&self, kind: EventKind) {
        self.lock().remove(&kind);
    }

    /// Number of subscribers registered for a kind.
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.lock().get(&kind).map(Vec::len).unwrap_or(0)
    }

    /// Dispatch a message to all subscribers of its kind, in registration
    /// order. Never panics out of the call; a faulting subscriber is
    /// logged and skipped.
    pub fn dispatch(&self, message: &Message) {
        // Snapshot under the lock, invoke outside it, so subscribers may
        // re-enter register/unregister.
        let targets: Vec<(SubscriptionId, Subscriber)> = self
            .lock()
            .get(&message.kind)
            .cloned()
            .unwrap_or_default();

        for (id, callback) in targets {
            if catch_unwind(AssertUnwindSafe(|| callback(message))).is_err() {
                error!(
                    "subscriber {:?} for {} events panicked; continuing dispatch",
                    id, message.kind
                );
            }
        }
    }
}

impl fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: HashMap<EventKind, usize> = self
            .lock()
            .iter()
            .map(|(kind, subs)| (*kind, subs.len()))
            .collect();
        f.debug_struct("EventRegistry")
            .field("subscribers", &counts)
            .finish()
    }
}
