//! Inbound frame classification.
//!
//! Maps decoded frames onto subscriber event kinds. Frames with an
//! unrecognized discriminator are routed to [`EventKind::Unhandled`]
//! rather than dropped, so misbehaving feeds stay observable.

use pulse_wire::{kind, RawFrame};
use tracing::debug;

use crate::registry::{EventKind, Message};

/// Classify a raw inbound frame into a dispatchable message.
pub fn route(raw: RawFrame) -> Message {
    let event_kind = match raw.kind.as_str() {
        kind::CONNECT_ACK => EventKind::ConnectAck,
        kind::DATA_UPDATE => EventKind::DataUpdate,
        kind::SESSION_UPDATE => EventKind::SessionUpdate,
        kind::ERROR => EventKind::Error,
        kind::DISCONNECT_NOTICE => EventKind::DisconnectNotice,
        other => {
            debug!("routing frame with unrecognized kind {:?} as unhandled", other);
            EventKind::Unhandled
        }
    };

    Message::new(event_kind, raw.body)
}
