//! Frame types for the Relay protocol.
//!
//! Every frame is an object tagged by its `event` name. Field names are
//! camelCase on the wire so browser clients can speak the protocol directly.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Current protocol version, announced in the `connected` frame.
pub const PROTOCOL_VERSION: u8 = 1;

/// Frame kinds, mostly used for logging and metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    NewUser,
    SendMessage,
    GetMessage,
    Connected,
    Ping,
    Pong,
}

impl FrameType {
    /// The event name as it appears on the wire.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameType::NewUser => "newUser",
            FrameType::SendMessage => "sendMessage",
            FrameType::GetMessage => "getMessage",
            FrameType::Connected => "connected",
            FrameType::Ping => "ping",
            FrameType::Pong => "pong",
        }
    }
}

impl std::fmt::Display for FrameType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A protocol frame.
///
/// Inbound fields that a client may legitimately omit are `Option`s: the
/// codec accepts the frame and leaves validation to the gateway, which logs
/// and drops incomplete events instead of rejecting the connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum Frame {
    /// Announce the logical user that owns this connection.
    #[serde(rename = "newUser")]
    NewUser {
        #[serde(
            rename = "userId",
            default,
            deserialize_with = "deserialize_identifier",
            skip_serializing_if = "Option::is_none"
        )]
        user_id: Option<String>,
    },

    /// Relay a payload to another user.
    #[serde(rename = "sendMessage")]
    SendMessage {
        #[serde(
            rename = "receiverId",
            default,
            deserialize_with = "deserialize_identifier",
            skip_serializing_if = "Option::is_none"
        )]
        receiver_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },

    /// A relayed payload.
    #[serde(rename = "getMessage")]
    GetMessage { data: Value },

    /// Connection established response.
    #[serde(rename = "connected")]
    Connected {
        #[serde(rename = "connectionId")]
        connection_id: String,
        /// Protocol version spoken by the server.
        version: u8,
        /// Recommended heartbeat interval in milliseconds.
        heartbeat: u32,
    },

    /// Keepalive ping.
    #[serde(rename = "ping")]
    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Keepalive pong, echoing the ping timestamp.
    #[serde(rename = "pong")]
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
}

impl Frame {
    /// Get the frame type.
    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::NewUser { .. } => FrameType::NewUser,
            Frame::SendMessage { .. } => FrameType::SendMessage,
            Frame::GetMessage { .. } => FrameType::GetMessage,
            Frame::Connected { .. } => FrameType::Connected,
            Frame::Ping { .. } => FrameType::Ping,
            Frame::Pong { .. } => FrameType::Pong,
        }
    }

    /// Create a `newUser` frame.
    #[must_use]
    pub fn new_user(user_id: impl Into<String>) -> Self {
        Frame::NewUser {
            user_id: Some(user_id.into()),
        }
    }

    /// Create a `sendMessage` frame.
    #[must_use]
    pub fn send_message(receiver_id: impl Into<String>, data: Value) -> Self {
        Frame::SendMessage {
            receiver_id: Some(receiver_id.into()),
            data: Some(data),
        }
    }

    /// Create a `getMessage` frame.
    #[must_use]
    pub fn get_message(data: Value) -> Self {
        Frame::GetMessage { data }
    }

    /// Create a `connected` frame.
    #[must_use]
    pub fn connected(connection_id: impl Into<String>, heartbeat: u32) -> Self {
        Frame::Connected {
            connection_id: connection_id.into(),
            version: PROTOCOL_VERSION,
            heartbeat,
        }
    }

    /// Create a `pong` frame.
    #[must_use]
    pub fn pong(timestamp: Option<u64>) -> Self {
        Frame::Pong { timestamp }
    }
}

/// Convert a JSON value used as a user identifier into its canonical string.
///
/// Strings pass through and integers become their decimal form. Values a
/// client could not mean as an identifier (`null`, booleans, the number
/// zero, arrays, objects) yield `None`.
#[must_use]
pub fn identifier_from_value(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) if n.as_f64() == Some(0.0) => None,
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn deserialize_identifier<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(identifier_from_value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_frame_type() {
        assert_eq!(Frame::new_user("u1").frame_type(), FrameType::NewUser);
        assert_eq!(
            Frame::send_message("u2", json!("hi")).frame_type(),
            FrameType::SendMessage
        );
        assert_eq!(FrameType::GetMessage.to_string(), "getMessage");
    }

    #[test]
    fn test_wire_field_names() {
        let value = serde_json::to_value(Frame::send_message("u2", json!({"text": "hi"}))).unwrap();
        assert_eq!(
            value,
            json!({"event": "sendMessage", "receiverId": "u2", "data": {"text": "hi"}})
        );

        let value = serde_json::to_value(Frame::connected("conn_1", 25_000)).unwrap();
        assert_eq!(
            value,
            json!({"event": "connected", "connectionId": "conn_1", "version": 1, "heartbeat": 25000})
        );
    }

    #[test]
    fn test_numeric_identifiers_are_canonicalized() {
        let frame: Frame = serde_json::from_value(json!({"event": "newUser", "userId": 42})).unwrap();
        assert_eq!(frame, Frame::new_user("42"));
    }

    #[test]
    fn test_missing_fields_decode_as_none() {
        let frame: Frame = serde_json::from_value(json!({"event": "sendMessage"})).unwrap();
        assert_eq!(
            frame,
            Frame::SendMessage {
                receiver_id: None,
                data: None
            }
        );

        let frame: Frame =
            serde_json::from_value(json!({"event": "newUser", "userId": null})).unwrap();
        assert_eq!(frame, Frame::NewUser { user_id: None });
    }

    #[test]
    fn test_identifier_from_value() {
        assert_eq!(identifier_from_value(json!("abc")), Some("abc".to_string()));
        assert_eq!(identifier_from_value(json!(7)), Some("7".to_string()));
        assert_eq!(identifier_from_value(json!(0)), None);
        assert_eq!(identifier_from_value(json!(true)), None);
        assert_eq!(identifier_from_value(json!({"id": 1})), None);
    }
}
