//! Presence tracking for Relay.
//!
//! The registry records which logical user is online and which connection
//! should receive messages addressed to them. Entries are keyed by user,
//! with a reverse index by connection so a closing connection can clear its
//! own entry without scanning.

use crate::message::now_millis;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// A logical user identifier.
pub type UserId = String;

/// A live transport connection identifier.
pub type ConnectionId = String;

/// A user bound to the connection that represents them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceEntry {
    /// Logical user.
    pub user_id: UserId,
    /// Connection that registered the user.
    pub connection_id: ConnectionId,
    /// When the entry was created, in milliseconds since the Unix epoch.
    pub joined_at: u64,
}

impl PresenceEntry {
    /// Create a new entry stamped with the current time.
    #[must_use]
    pub fn new(user_id: impl Into<UserId>, connection_id: impl Into<ConnectionId>) -> Self {
        Self {
            user_id: user_id.into(),
            connection_id: connection_id.into(),
            joined_at: now_millis(),
        }
    }
}

/// What a call to [`PresenceRegistry::register`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    /// A new entry was inserted.
    Inserted,
    /// The user already had an entry; it was left untouched.
    AlreadyPresent {
        /// Connection held by the existing entry.
        connection_id: ConnectionId,
    },
    /// The connection already represents a different user.
    ConnectionBound {
        /// User the connection is bound to.
        user_id: UserId,
    },
    /// An argument was empty; nothing changed.
    Invalid,
}

impl Registration {
    /// Whether the registry gained an entry.
    #[must_use]
    pub fn is_inserted(&self) -> bool {
        matches!(self, Registration::Inserted)
    }
}

/// Process-wide registry of online users.
///
/// All operations take `&self` and are safe to call from many tasks at
/// once. `register` is an atomic check-then-insert, so two connections
/// racing to announce the same user produce exactly one entry.
///
/// Operations on the same connection id are expected to come from a
/// single task, which is how the gateway drives them.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    /// Entries indexed by user.
    by_user: DashMap<UserId, PresenceEntry>,
    /// Reverse index (connection_id -> user_id).
    by_connection: DashMap<ConnectionId, UserId>,
}

impl PresenceRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `user_id` to `connection_id` unless the user is already online.
    ///
    /// Empty arguments and duplicates are no-ops, reported through the
    /// returned [`Registration`] and the log rather than as errors.
    pub fn register(&self, user_id: &str, connection_id: &str) -> Registration {
        if user_id.is_empty() || connection_id.is_empty() {
            warn!(
                user = %user_id,
                connection = %connection_id,
                "register called with invalid parameters"
            );
            return Registration::Invalid;
        }

        let bound_to = self
            .by_connection
            .get(connection_id)
            .map(|owner| owner.value().clone());
        if let Some(owner) = bound_to {
            if owner != user_id {
                warn!(
                    connection = %connection_id,
                    bound_user = %owner,
                    user = %user_id,
                    "Connection already represents another user"
                );
                return Registration::ConnectionBound { user_id: owner };
            }
        }

        let registration = match self.by_user.entry(user_id.to_string()) {
            Entry::Occupied(existing) => Registration::AlreadyPresent {
                connection_id: existing.get().connection_id.clone(),
            },
            Entry::Vacant(vacant) => {
                vacant.insert(PresenceEntry::new(user_id, connection_id));
                self.by_connection
                    .insert(connection_id.to_string(), user_id.to_string());
                Registration::Inserted
            }
        };

        match &registration {
            Registration::Inserted => info!(
                user = %user_id,
                connection = %connection_id,
                online = self.by_user.len(),
                "User online"
            ),
            Registration::AlreadyPresent {
                connection_id: existing,
            } => debug!(
                user = %user_id,
                connection = %connection_id,
                existing = %existing,
                "User already online, keeping existing entry"
            ),
            _ => {}
        }

        registration
    }

    /// Remove the entry registered by `connection_id`, if any.
    ///
    /// Returns the removed entry.
    pub fn unregister(&self, connection_id: &str) -> Option<PresenceEntry> {
        if connection_id.is_empty() {
            return None;
        }

        let (_, user_id) = self.by_connection.remove(connection_id)?;
        let removed = self
            .by_user
            .remove_if(&user_id, |_, entry| entry.connection_id == connection_id)
            .map(|(_, entry)| entry);

        if removed.is_some() {
            info!(
                user = %user_id,
                connection = %connection_id,
                online = self.by_user.len(),
                "User offline"
            );
        }

        removed
    }

    /// Find the entry for `user_id`.
    #[must_use]
    pub fn lookup(&self, user_id: &str) -> Option<PresenceEntry> {
        if user_id.is_empty() {
            return None;
        }
        self.by_user.get(user_id).map(|entry| entry.value().clone())
    }

    /// Get the user a connection registered, if any.
    #[must_use]
    pub fn user_for_connection(&self, connection_id: &str) -> Option<UserId> {
        self.by_connection
            .get(connection_id)
            .map(|user| user.value().clone())
    }

    /// Check if a user is online.
    #[must_use]
    pub fn contains(&self, user_id: &str) -> bool {
        self.by_user.contains_key(user_id)
    }

    /// Number of online users.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_user.len()
    }

    /// Check if nobody is online.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_user.is_empty()
    }

    /// Copy of every entry, in no particular order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<PresenceEntry> {
        self.by_user.iter().map(|e| e.value().clone()).collect()
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.by_user.clear();
        self.by_connection.clear();
    }
}
