//! Connection handling logic for WebSocket clients.
//!
//! This module contains the lifecycle of one client connection: the
//! websocket upgrade, admission through the handshake, the spawn into a
//! world and the cleanup once either pump stops.

use crate::{
    config::ServerConfig,
    connection::{
        pump::{read_loop, send_message, write_pump, WsReceiver},
        ConnectionId, ConnectionManager, WsSender,
    },
    error::ServerError,
    security::{authorize, TokenVerifier},
};
use futures::StreamExt;
use posbus::{HandShake, Message as _, Signal, SignalType};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex};
use tokio::time::{timeout, Duration};
use tokio_tungstenite::{
    accept_async,
    tungstenite::{
        protocol::{frame::coding::CloseCode, CloseFrame},
        Message,
    },
};
use tracing::{debug, info, warn};
use universe::{AdmissionRequest, Node, Session, SessionId, UserId};

/// Everything a connection handler needs from its server.
#[derive(Clone)]
pub struct ConnectionContext {
    pub node: Arc<Node>,
    pub connections: Arc<ConnectionManager>,
    pub verifier: Arc<dyn TokenVerifier>,
    pub config: Arc<ServerConfig>,
}

/// Handles a single client connection from establishment to cleanup.
///
/// # Connection Flow
///
/// 1. Perform the WebSocket upgrade and register the connection
/// 2. Read the handshake, which must be the first frame and binary
/// 3. Verify the token and match its subject against the user id
/// 4. Load the user's profile and create its session
/// 5. Resolve the world and spawn the session into it, with the write pump
///    already draining the session
/// 6. Read client frames until either side stops
/// 7. Take the session out of its world and drop the connection
///
/// A rejected token is answered with an `InvalidToken` signal before the
/// socket is closed. Nothing is registered for a connection that fails
/// admission.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    ctx: ConnectionContext,
) -> Result<(), ServerError> {
    let ws_stream = accept_async(stream)
        .await
        .map_err(|e| ServerError::Network(format!("WebSocket handshake failed: {e}")))?;
    let (ws_sender, mut ws_receiver) = ws_stream.split();
    let ws_sender: WsSender = Arc::new(Mutex::new(ws_sender));

    let connection_id = ctx.connections.add_connection(addr).await;
    ctx.connections
        .register_ws_sender(connection_id, ws_sender.clone())
        .await;

    let result = serve(connection_id, &mut ws_receiver, &ws_sender, &ctx).await;
    ctx.connections.remove_connection(connection_id).await;
    result
}

async fn serve(
    connection_id: ConnectionId,
    ws_receiver: &mut WsReceiver,
    ws_sender: &WsSender,
    ctx: &ConnectionContext,
) -> Result<(), ServerError> {
    let timeout_secs = ctx.config.handshake_timeout_secs;
    let handshake = match read_handshake(ws_receiver, Duration::from_secs(timeout_secs)).await {
        Ok(handshake) => handshake,
        Err(e) => {
            close(ws_sender, CloseCode::Protocol, "handshake expected").await;
            return Err(e);
        }
    };

    let user_id = UserId(handshake.user_id);
    let session_id = SessionId(handshake.session_id);
    if let Err(e) = admit(&handshake, &user_id, ctx) {
        warn!("🔒 Rejected user {} on connection {}: {}", user_id, connection_id, e);
        let signal = Signal {
            value: SignalType::InvalidToken,
        }
        .to_frame();
        let _ = send_message(ws_sender, Message::Binary(signal)).await;
        close(ws_sender, CloseCode::Policy, "invalid token").await;
        return Err(e);
    }

    let node = &ctx.node;
    let profile = node.ctx().profiles().load_profile(&user_id).await?;
    let capacity = node.ctx().config().session_queue_capacity;
    let (session, mut outlet) = Session::new(user_id, session_id, profile, capacity);
    ctx.connections
        .set_identity(connection_id, user_id, session_id)
        .await;

    // the spawn sequence can outgrow the queue, so the writer runs first
    let (stop_writer, stop_rx) = oneshot::channel::<()>();
    let mut writer = tokio::spawn({
        let ws_sender = ws_sender.clone();
        async move {
            let result = tokio::select! {
                result = write_pump(&mut outlet, &ws_sender) => result,
                _ = stop_rx => Ok(()),
            };
            outlet.close().await;
            result
        }
    });

    let request = AdmissionRequest {
        user_id,
        session_id,
        url: handshake.url.clone(),
    };
    let mut writer_joined = false;
    let outcome = match spawn_session(node, &session, &request).await {
        Err(e) => Err(e),
        Ok(()) => {
            info!("🎮 User {} admitted on connection {}", user_id, connection_id);
            let max_message_size = ctx.config.security.max_message_size;
            tokio::select! {
                result = read_loop(ws_receiver, ws_sender, &session, node, max_message_size) => result,
                joined = &mut writer => {
                    writer_joined = true;
                    flatten(joined)
                }
            }
        }
    };

    let _ = stop_writer.send(());
    if !writer_joined {
        if let Err(e) = flatten(writer.await) {
            debug!("Write pump of connection {} ended: {}", connection_id, e);
        }
    }

    match session.world().await {
        Some(world) => {
            if let Err(e) = world.remove_user(&session, true).await {
                warn!("Removing user {} from world {} failed: {}", user_id, world.id(), e);
            }
        }
        None => {
            session.stop().await;
            node.ctx().unregister_session(&session);
        }
    }
    outcome
}

/// Waits for the first frame and decodes it as a handshake.
async fn read_handshake(receiver: &mut WsReceiver, wait: Duration) -> Result<HandShake, ServerError> {
    let first = timeout(wait, receiver.next())
        .await
        .map_err(|_| ServerError::Handshake(format!("no handshake within {wait:?}")))?;
    match first {
        Some(Ok(Message::Binary(data))) => {
            HandShake::from_frame(&data).map_err(|e| ServerError::Handshake(e.to_string()))
        }
        Some(Ok(other)) => Err(ServerError::Handshake(format!(
            "first frame must be a binary handshake, got {other:?}"
        ))),
        Some(Err(e)) => Err(ServerError::Network(e.to_string())),
        None => Err(ServerError::Handshake("closed before handshake".to_string())),
    }
}

fn admit(handshake: &HandShake, user_id: &UserId, ctx: &ConnectionContext) -> Result<(), ServerError> {
    let claims = ctx.verifier.verify(&handshake.token)?;
    authorize(&claims, user_id, &ctx.config.security.legacy_subject_bypass)
}

async fn spawn_session(
    node: &Node,
    session: &Arc<Session>,
    request: &AdmissionRequest,
) -> Result<(), ServerError> {
    let world = node.resolve_world(request).await?;
    world.add_user(session).await?;
    Ok(())
}

fn flatten(joined: Result<Result<(), ServerError>, tokio::task::JoinError>) -> Result<(), ServerError> {
    joined.map_err(|e| ServerError::Internal(format!("write pump failed: {e}")))?
}

async fn close(sender: &WsSender, code: CloseCode, reason: &str) {
    let frame = CloseFrame {
        code,
        reason: reason.to_string().into(),
    };
    let _ = send_message(sender, Message::Close(Some(frame))).await;
}
