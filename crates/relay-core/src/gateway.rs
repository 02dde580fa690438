//! The realtime gateway.
//!
//! Every transport connection opens a [`Session`] on the shared [`Gateway`].
//! The session walks the connection through its lifecycle
//! (`Connected` -> `Identified` -> `Closed`) and turns inbound events into
//! registry operations and deliveries.
//!
//! Nothing here fails loudly. Incomplete events and offline receivers are
//! logged, reported as [`Outcome::Dropped`] and otherwise ignored; the
//! sender never hears about them.

use crate::message::{is_blank_payload, Delivery};
use crate::presence::{ConnectionId, PresenceEntry, PresenceRegistry, Registration, UserId};
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Sending half of a connection's outbound mailbox.
pub type Outbox = mpsc::UnboundedSender<Delivery>;

/// Receiving half of a connection's outbound mailbox.
pub type Inbox = mpsc::UnboundedReceiver<Delivery>;

/// Create a new outbound mailbox.
#[must_use]
pub fn mailbox() -> (Outbox, Inbox) {
    mpsc::unbounded_channel()
}

static CONNECTION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a process-unique connection ID.
#[must_use]
pub fn generate_connection_id() -> ConnectionId {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let counter = CONNECTION_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("conn_{:x}_{:x}", timestamp, counter)
}

/// Reasons an event was dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// A required field was missing or empty.
    #[error("Malformed {event} event: {reason}")]
    MalformedEvent {
        event: &'static str,
        reason: &'static str,
    },

    /// The receiver has no presence entry.
    #[error("User {0} is not online")]
    UnknownReceiver(UserId),

    /// The receiver's entry points at a connection that is gone.
    #[error("Connection {0} is no longer reachable")]
    ReceiverUnreachable(ConnectionId),

    /// The session was already closed.
    #[error("Session {0} is closed")]
    SessionClosed(ConnectionId),
}

impl GatewayError {
    /// Short label for metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::MalformedEvent { .. } => "malformed_event",
            GatewayError::UnknownReceiver(_) => "unknown_receiver",
            GatewayError::ReceiverUnreachable(_) => "receiver_unreachable",
            GatewayError::SessionClosed(_) => "session_closed",
        }
    }
}

/// An inbound event from a connection.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// The connection announces the user it belongs to.
    Identify { user_id: Option<UserId> },
    /// Relay `data` to the connection of `receiver_id`.
    SendMessage {
        receiver_id: Option<UserId>,
        data: Option<Value>,
    },
    /// The transport closed.
    Disconnect,
}

/// Result of handling an event.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// `register` was called; the registry's answer is attached.
    Identified(Registration),
    /// The payload was handed to the receiver's mailbox.
    Delivered {
        receiver: UserId,
        connection_id: ConnectionId,
    },
    /// The event was dropped.
    Dropped(GatewayError),
    /// The session closed; the entry it had registered, if any, is attached.
    Closed { removed: Option<PresenceEntry> },
}

/// Lifecycle state of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Open, not bound to a user yet.
    Connected,
    /// Announced a user.
    Identified { user_id: UserId },
    /// Terminal.
    Closed,
}

/// Gateway statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewayStats {
    /// Number of open connections.
    pub connections: usize,
    /// Number of users in the presence registry.
    pub online_users: usize,
}

/// Routes messages between connections by way of the presence registry.
#[derive(Debug)]
pub struct Gateway {
    registry: Arc<PresenceRegistry>,
    /// Outbound mailboxes of open connections.
    outboxes: DashMap<ConnectionId, Outbox>,
}

impl Gateway {
    /// Create a gateway over a registry.
    #[must_use]
    pub fn new(registry: Arc<PresenceRegistry>) -> Self {
        Self {
            registry,
            outboxes: DashMap::new(),
        }
    }

    /// The presence registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<PresenceRegistry> {
        &self.registry
    }

    /// Open a session for a new connection.
    ///
    /// Deliveries addressed to the connection are pushed into `outbox`.
    pub fn connect(self: &Arc<Self>, connection_id: impl Into<ConnectionId>, outbox: Outbox) -> Session {
        let id = connection_id.into();
        if self.outboxes.insert(id.clone(), outbox).is_some() {
            warn!(connection = %id, "Connection id reused, replacing previous mailbox");
        }
        debug!(connection = %id, "Client connected");

        Session {
            id,
            state: ConnectionState::Connected,
            gateway: Arc::clone(self),
        }
    }

    /// Check if a connection is open.
    #[must_use]
    pub fn is_connected(&self, connection_id: &str) -> bool {
        self.outboxes.contains_key(connection_id)
    }

    /// Get gateway statistics.
    #[must_use]
    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            connections: self.outboxes.len(),
            online_users: self.registry.len(),
        }
    }

    fn relay(&self, source: &str, receiver_id: Option<UserId>, data: Option<Value>) -> Outcome {
        let Some(receiver) = receiver_id.filter(|r| !r.is_empty()) else {
            warn!(connection = %source, "Message without a receiverId dropped");
            return Outcome::Dropped(GatewayError::MalformedEvent {
                event: "sendMessage",
                reason: "missing receiverId",
            });
        };

        let Some(data) = data.filter(|d| !is_blank_payload(d)) else {
            warn!(connection = %source, receiver = %receiver, "Empty message dropped");
            return Outcome::Dropped(GatewayError::MalformedEvent {
                event: "sendMessage",
                reason: "missing data",
            });
        };

        let Some(entry) = self.registry.lookup(&receiver) else {
            info!(connection = %source, receiver = %receiver, "Receiver is not online");
            return Outcome::Dropped(GatewayError::UnknownReceiver(receiver));
        };

        let delivery = Delivery::new(source, receiver.as_str(), entry.connection_id.as_str(), data);
        let sent = self
            .outboxes
            .get(&entry.connection_id)
            .map(|outbox| outbox.send(delivery).is_ok())
            .unwrap_or(false);

        if sent {
            debug!(
                connection = %source,
                receiver = %receiver,
                target = %entry.connection_id,
                "Message relayed"
            );
            Outcome::Delivered {
                receiver,
                connection_id: entry.connection_id,
            }
        } else {
            warn!(
                connection = %source,
                receiver = %receiver,
                target = %entry.connection_id,
                "Receiver connection is gone, message dropped"
            );
            Outcome::Dropped(GatewayError::ReceiverUnreachable(entry.connection_id))
        }
    }

    fn disconnect(&self, connection_id: &str) -> Option<PresenceEntry> {
        self.outboxes.remove(connection_id);
        let removed = self.registry.unregister(connection_id);
        debug!(
            connection = %connection_id,
            was_online = removed.is_some(),
            "Client disconnected"
        );
        removed
    }
}

/// One connection's view of the gateway.
///
/// Dropping a session that was not closed closes it, so its presence entry
/// never outlives the task that owned it.
#[derive(Debug)]
pub struct Session {
    id: ConnectionId,
    state: ConnectionState,
    gateway: Arc<Gateway>,
}

impl Session {
    /// The connection ID.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The current lifecycle state.
    #[must_use]
    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Handle an inbound event.
    pub fn handle(&mut self, event: Event) -> Outcome {
        if self.state == ConnectionState::Closed {
            debug!(connection = %self.id, event = ?event, "Event after close ignored");
            return Outcome::Dropped(GatewayError::SessionClosed(self.id.clone()));
        }

        match event {
            Event::Identify { user_id } => self.identify(user_id),
            Event::SendMessage { receiver_id, data } => {
                self.gateway.relay(&self.id, receiver_id, data)
            }
            Event::Disconnect => self.close(),
        }
    }

    fn identify(&mut self, user_id: Option<UserId>) -> Outcome {
        let Some(user_id) = user_id.filter(|u| !u.is_empty()) else {
            warn!(connection = %self.id, "Client tried to register without a userId");
            return Outcome::Dropped(GatewayError::MalformedEvent {
                event: "newUser",
                reason: "missing userId",
            });
        };

        let registration = self.gateway.registry.register(&user_id, &self.id);
        let user_id = match &registration {
            Registration::ConnectionBound { user_id: bound } => bound.clone(),
            _ => user_id,
        };
        self.state = ConnectionState::Identified { user_id };
        Outcome::Identified(registration)
    }

    /// Close the session, clearing whatever presence entry it registered.
    pub fn close(&mut self) -> Outcome {
        if self.state == ConnectionState::Closed {
            return Outcome::Dropped(GatewayError::SessionClosed(self.id.clone()));
        }

        let removed = self.gateway.disconnect(&self.id);
        self.state = ConnectionState::Closed;
        Outcome::Closed { removed }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.state != ConnectionState::Closed {
            self.close();
        }
    }
}
