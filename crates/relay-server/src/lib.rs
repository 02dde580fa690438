//! # Relay Server
//!
//! HTTP and WebSocket front end for the relay gateway.
//!
//! - `GET /` and `GET /health` report liveness
//! - `/api/auth/{register,login,logout}` manage credentials and the session cookie
//! - the realtime endpoint (`/socket` by default) carries `newUser`,
//!   `sendMessage` and `getMessage` frames as JSON text or MessagePack
//!
//! The binary in `main.rs` wires these together; tests drive the router
//! directly through [`server::build_router`].

pub mod auth;
pub mod config;
pub mod metrics;
pub mod server;
pub mod socket;

pub use config::Config;
pub use server::{build_router, run_server, AppState};
