//! Relayed message types.

use crate::presence::{ConnectionId, UserId};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// A unique message identifier.
pub type MessageId = u64;

/// Atomic counter for ensuring unique IDs even within the same nanosecond.
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Milliseconds since the Unix epoch, or zero if the clock is before it.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Generate a unique message ID.
#[must_use]
pub fn generate_message_id() -> MessageId {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    timestamp.wrapping_add(counter)
}

/// Whether a payload counts as absent.
///
/// Clients treat `null`, `false`, `0` and the empty string as "no message",
/// so the relay does too.
#[must_use]
pub fn is_blank_payload(data: &Value) -> bool {
    match data {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(_) | Value::Object(_) => false,
    }
}

/// A payload on its way to exactly one connection.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Unique message identifier.
    pub id: MessageId,
    /// Connection that sent the message.
    pub source: ConnectionId,
    /// User the message is addressed to.
    pub receiver: UserId,
    /// Connection the message is delivered on.
    pub target: ConnectionId,
    /// Application payload, relayed untouched.
    pub data: Value,
    /// Timestamp when the message was accepted.
    pub timestamp: u64,
}

impl Delivery {
    /// Create a new delivery.
    #[must_use]
    pub fn new(
        source: impl Into<ConnectionId>,
        receiver: impl Into<UserId>,
        target: impl Into<ConnectionId>,
        data: Value,
    ) -> Self {
        Self {
            id: generate_message_id(),
            source: source.into(),
            receiver: receiver.into(),
            target: target.into(),
            data,
            timestamp: now_millis(),
        }
    }

    /// The event name the delivery is emitted under.
    #[must_use]
    pub fn event(&self) -> &'static str {
        "getMessage"
    }
}
