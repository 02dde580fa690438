//! Realtime connection handling.
//!
//! Each WebSocket gets a gateway [`Session`]. Inbound frames become gateway
//! events; deliveries pushed into the connection's mailbox go out as
//! `getMessage` frames. Bad frames are logged and skipped, never answered.

use crate::metrics::{self, ConnectionMetricsGuard};
use crate::server::AppState;
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
};
use bytes::BytesMut;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use relay_core::{generate_connection_id, mailbox, Event, Outcome, Session};
use relay_protocol::{codec, EncodedFrame, Frame, ProtocolError, WireFormat};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

type Sender = SplitSink<WebSocket, Message>;

/// Query parameters accepted on the upgrade request.
#[derive(Debug, Default, Deserialize)]
pub struct SocketParams {
    /// Start in binary (MessagePack) mode instead of JSON text.
    #[serde(default)]
    pub binary: bool,
}

/// WebSocket upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<SocketParams>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let format = if params.binary {
        WireFormat::Binary
    } else {
        WireFormat::Text
    };

    ws.max_message_size(state.config.limits.max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, state, format))
}

/// Drive one connection until it closes.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, mut format: WireFormat) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let connection_id = generate_connection_id();
    let (outbox, mut inbox) = mailbox();
    let mut session = state.gateway.connect(connection_id.clone(), outbox);

    let (mut sender, mut receiver) = socket.split();

    let heartbeat = u32::try_from(state.config.heartbeat.interval_ms).unwrap_or(u32::MAX);
    if let Err(e) = send_frame(&mut sender, format, &Frame::connected(&connection_id, heartbeat)).await {
        warn!(connection = %connection_id, error = %e, "Failed to send connected frame");
        close(&mut session, &state);
        return;
    }

    loop {
        tokio::select! {
            biased;

            Some(delivery) = inbox.recv() => {
                let frame = Frame::get_message(delivery.data);
                if let Err(e) = send_frame(&mut sender, format, &frame).await {
                    debug!(connection = %connection_id, error = %e, "Failed to deliver message");
                    break;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let start = Instant::now();
                        format = WireFormat::Text;

                        match codec::decode_text(&text) {
                            Ok(frame) => {
                                if handle_frame(frame, text.len(), &mut session, &state, &mut sender, format)
                                    .await
                                    .is_err()
                                {
                                    break;
                                }
                            }
                            Err(e) => {
                                warn!(connection = %connection_id, error = %e, "Undecodable text frame skipped");
                                metrics::record_error("decode");
                            }
                        }

                        metrics::record_latency(start.elapsed().as_secs_f64());
                    }
                    Some(Ok(Message::Binary(data))) => {
                        let start = Instant::now();
                        format = WireFormat::Binary;

                        let mut open = true;
                        for frame in decode_binary_message(&data, &connection_id) {
                            if handle_frame(frame, data.len(), &mut session, &state, &mut sender, format)
                                .await
                                .is_err()
                            {
                                open = false;
                                break;
                            }
                        }

                        metrics::record_latency(start.elapsed().as_secs_f64());
                        if !open {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection_id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(connection = %connection_id, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    close(&mut session, &state);
}

/// Decode the frames carried by one binary WebSocket message.
///
/// Frames never span messages. Frames whose body fails to decode are
/// skipped; an oversized length prefix or a truncated trailing frame drops
/// the rest of the message. Nothing carries over to the next message.
fn decode_binary_message(data: &[u8], connection_id: &str) -> Vec<Frame> {
    let mut buf = BytesMut::from(data);
    let mut frames = Vec::new();

    loop {
        match codec::decode_from(&mut buf) {
            Ok(Some(frame)) => frames.push(frame),
            Ok(None) => break,
            Err(ProtocolError::FrameTooLarge(size)) => {
                warn!(connection = %connection_id, size, "Oversized binary frame, rest of message dropped");
                metrics::record_error("frame_too_large");
                return frames;
            }
            Err(e) => {
                warn!(connection = %connection_id, error = %e, "Undecodable binary frame skipped");
                metrics::record_error("decode");
            }
        }
    }

    if !buf.is_empty() {
        warn!(connection = %connection_id, remaining = buf.len(), "Truncated binary frame dropped");
        metrics::record_error("truncated");
    }
    frames
}

/// Handle a decoded frame.
///
/// Only a failed write back to the client is an error.
async fn handle_frame(
    frame: Frame,
    size: usize,
    session: &mut Session,
    state: &AppState,
    sender: &mut Sender,
    format: WireFormat,
) -> Result<()> {
    let frame_type = frame.frame_type();
    metrics::record_frame(size, "inbound", frame_type.as_str());

    let event = match frame {
        Frame::NewUser { user_id } => Event::Identify { user_id },
        Frame::SendMessage { receiver_id, data } => Event::SendMessage { receiver_id, data },
        Frame::Ping { timestamp } => return send_frame(sender, format, &Frame::pong(timestamp)).await,
        Frame::Pong { .. } => return Ok(()),
        Frame::GetMessage { .. } | Frame::Connected { .. } => {
            warn!(connection = %session.id(), frame_type = %frame_type, "Unexpected frame type");
            return Ok(());
        }
    };

    let outcome = session.handle(event);
    metrics::record_outcome(&outcome);
    if matches!(outcome, Outcome::Identified(_)) {
        metrics::set_online_users(state.gateway.stats());
    }

    Ok(())
}

/// Encode and send a frame to the WebSocket.
async fn send_frame(sender: &mut Sender, format: WireFormat, frame: &Frame) -> Result<()> {
    let encoded = format.encode(frame)?;
    metrics::record_frame(encoded.len(), "outbound", frame.frame_type().as_str());

    let message = match encoded {
        EncodedFrame::Text(text) => Message::Text(text),
        EncodedFrame::Binary(data) => Message::Binary(data.to_vec()),
    };
    sender.send(message).await?;
    Ok(())
}

fn close(session: &mut Session, state: &AppState) {
    let outcome = session.handle(Event::Disconnect);
    if let Outcome::Closed { removed } = &outcome {
        debug!(
            connection = %session.id(),
            user = ?removed.as_ref().map(|entry| entry.user_id.as_str()),
            "Session closed"
        );
    }
    metrics::set_online_users(state.gateway.stats());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(frame: &Frame) -> Vec<u8> {
        codec::encode(frame).unwrap().to_vec()
    }

    #[test]
    fn test_decode_several_frames_in_one_message() {
        let mut data = encoded(&Frame::new_user("a"));
        data.extend(encoded(&Frame::send_message("b", serde_json::json!("hi"))));

        let frames = decode_binary_message(&data, "c1");
        assert_eq!(
            frames,
            vec![
                Frame::new_user("a"),
                Frame::send_message("b", serde_json::json!("hi"))
            ]
        );
    }

    #[test]
    fn test_truncated_frame_is_dropped() {
        // Declares 20 bytes, carries 2.
        assert!(decode_binary_message(&[0, 0, 0, 20, 1, 2], "c1").is_empty());

        let mut data = encoded(&Frame::new_user("a"));
        data.extend([0, 0, 0, 20, 1, 2]);
        assert_eq!(decode_binary_message(&data, "c1"), vec![Frame::new_user("a")]);
    }

    #[test]
    fn test_undecodable_body_is_skipped() {
        // 0xc1 is never valid MessagePack.
        let mut data = vec![0, 0, 0, 2, 0xc1, 0xc1];
        data.extend(encoded(&Frame::new_user("a")));

        assert_eq!(decode_binary_message(&data, "c1"), vec![Frame::new_user("a")]);
    }

    #[test]
    fn test_oversized_prefix_drops_rest_of_message() {
        let mut data = vec![0xff, 0xff, 0xff, 0xff];
        data.extend(encoded(&Frame::new_user("a")));

        assert!(decode_binary_message(&data, "c1").is_empty());
    }
}
