//! The read and write halves of an admitted connection.
//!
//! The write pump drains the session outlet onto the socket and keeps the
//! client alive with pings. The read loop decodes client frames and applies
//! them to the session, its world or the node. Either side returning ends
//! the connection.

use super::WsSender;
use crate::error::ServerError;
use bytes::Bytes;
use futures_util::{stream::SplitStream, SinkExt, StreamExt};
use posbus::{decode_incoming, IncomingMessage, SignalType};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration, Instant};
use tokio_tungstenite::{tungstenite::Message, WebSocketStream};
use tracing::{debug, trace, warn};
use universe::{Node, ObjectId, Session, SessionOutlet};

/// Interval between pings sent to the client
pub const PING_PERIOD: Duration = Duration::from_secs(54);
/// Time allowed to write one frame
pub const WRITE_WAIT: Duration = Duration::from_secs(10);
/// Time allowed between two frames (pongs included) from the client
pub const PONG_WAIT: Duration = Duration::from_secs(60);

/// Read half of a client websocket.
pub type WsReceiver = SplitStream<WebSocketStream<TcpStream>>;

/// Writes `message` within [`WRITE_WAIT`].
pub async fn send_message(sender: &WsSender, message: Message) -> Result<(), ServerError> {
    match timeout(WRITE_WAIT, async { sender.lock().await.send(message).await }).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ServerError::Network(e.to_string())),
        Err(_) => Err(ServerError::Network("write timed out".to_string())),
    }
}

/// Copies outgoing frames to the socket until the session is stopped.
///
/// A stopped session gets a close frame.
pub async fn write_pump(outlet: &mut SessionOutlet, sender: &WsSender) -> Result<(), ServerError> {
    let mut ping = tokio::time::interval_at(Instant::now() + PING_PERIOD, PING_PERIOD);
    loop {
        tokio::select! {
            frames = outlet.recv() => match frames {
                Some(frames) => {
                    for frame in frames {
                        send_message(sender, Message::Binary(frame)).await?;
                    }
                }
                None => {
                    debug!("Session {} stopped, closing socket", outlet.session_id());
                    let _ = send_message(sender, Message::Close(None)).await;
                    return Ok(());
                }
            },
            _ = ping.tick() => send_message(sender, Message::Ping(Bytes::new())).await?,
        }
    }
}

/// Reads client frames until the client closes, errs or goes quiet.
pub async fn read_loop(
    receiver: &mut WsReceiver,
    sender: &WsSender,
    session: &Arc<Session>,
    node: &Node,
    max_message_size: usize,
) -> Result<(), ServerError> {
    loop {
        let next = timeout(PONG_WAIT, receiver.next()).await.map_err(|_| {
            ServerError::Network(format!("no frame from user {} within {:?}", session.user_id(), PONG_WAIT))
        })?;
        match next {
            Some(Ok(Message::Binary(data))) => {
                if data.len() > max_message_size {
                    return Err(ServerError::Network(format!(
                        "frame of {} bytes exceeds the {} byte limit",
                        data.len(),
                        max_message_size
                    )));
                }
                dispatch(&data, session, node).await;
            }
            Some(Ok(Message::Ping(payload))) => send_message(sender, Message::Pong(payload)).await?,
            Some(Ok(Message::Pong(_))) => trace!("Pong from user {}", session.user_id()),
            Some(Ok(Message::Text(_))) => debug!("Ignoring text frame from user {}", session.user_id()),
            Some(Ok(Message::Frame(_))) => {}
            Some(Ok(Message::Close(_))) | None => return Ok(()),
            Some(Err(e)) => return Err(ServerError::Network(e.to_string())),
        }
    }
}

/// Applies one client frame.
///
/// Undecodable frames and failed requests are logged; they never end the
/// connection.
pub async fn dispatch(frame: &[u8], session: &Arc<Session>, node: &Node) {
    let message = match decode_incoming(frame) {
        Ok(message) => message,
        Err(e) => {
            debug!("Dropping frame from user {}: {}", session.user_id(), e);
            return;
        }
    };

    match message {
        IncomingMessage::MyTransform(transform) => session.set_transform(transform.0).await,
        IncomingMessage::ObjectTransform(msg) => {
            let id = ObjectId(msg.id);
            match node.get_object_from_all_objects(&id) {
                Some(object) => {
                    if let Err(e) = object.set_transform(msg.transform, true, true).await {
                        warn!("Transform of object {} from user {} failed: {}", id, session.user_id(), e);
                    }
                }
                None => debug!("User {} moved unknown object {}", session.user_id(), id),
            }
        }
        IncomingMessage::Signal(signal) => match signal.value {
            SignalType::LeaveWorld => {
                if let Err(e) = node.leave_world(session).await {
                    warn!("User {} could not leave its world: {}", session.user_id(), e);
                }
            }
            other => debug!("Ignoring signal {:?} from user {}", other, session.user_id()),
        },
        IncomingMessage::TeleportRequest(request) => {
            let target = ObjectId(request.target);
            if let Err(e) = node.teleport(session, &target).await {
                warn!("Teleport of user {} to {} failed: {}", session.user_id(), target, e);
            }
        }
    }
}
