//! # relay-core
//!
//! Presence tracking and point-to-point message relay for Relay.
//!
//! This crate provides the building blocks of the realtime gateway:
//!
//! - **Presence** - Registry of which user is online on which connection
//! - **Gateway** - Per-connection state machine and message relay
//! - **Message** - Deliveries handed to a connection's outbound mailbox
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  Event   ┌─────────────┐ lookup  ┌──────────────────┐
//! │  Session    │─────────▶│   Gateway   │────────▶│ PresenceRegistry │
//! └─────────────┘          └─────────────┘         └──────────────────┘
//!                                 │
//!                                 ▼ Delivery
//!                          ┌─────────────┐
//!                          │   Outbox    │ (receiver's connection)
//!                          └─────────────┘
//! ```
//!
//! The registry is an ordinary value: build one at startup, wrap it in an
//! `Arc` and hand it to the [`Gateway`]. Tests build their own.

pub mod gateway;
pub mod message;
pub mod presence;

pub use gateway::{
    generate_connection_id, mailbox, ConnectionState, Event, Gateway, GatewayError, GatewayStats,
    Inbox, Outbox, Outcome, Session,
};
pub use message::{Delivery, MessageId};
pub use presence::{ConnectionId, PresenceEntry, PresenceRegistry, Registration, UserId};
