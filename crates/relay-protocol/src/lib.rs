//! # relay-protocol
//!
//! Wire protocol definitions for the Relay presence and messaging gateway.
//!
//! Clients talk to the gateway with named events. The same frame schema
//! travels in two encodings:
//!
//! - **Text** - one JSON object per WebSocket text message
//! - **Binary** - length-prefixed MessagePack, several frames per message allowed
//!
//! ## Events
//!
//! - `newUser` - bind the connection to a logical user
//! - `sendMessage` - relay `data` to the connection of `receiverId`
//! - `getMessage` - a relayed payload, delivered to exactly one connection
//! - `connected` - handshake sent by the server on open
//! - `ping` / `pong` - keepalive
//!
//! ## Example
//!
//! ```rust
//! use relay_protocol::{codec, Frame};
//!
//! let frame = Frame::send_message("user-42", serde_json::json!({"text": "hi"}));
//!
//! let text = codec::encode_text(&frame).unwrap();
//! assert_eq!(codec::decode_text(&text).unwrap(), frame);
//! ```

pub mod codec;
pub mod frames;

pub use codec::{decode, encode, EncodedFrame, ProtocolError, WireFormat};
pub use frames::{Frame, FrameType, PROTOCOL_VERSION};
