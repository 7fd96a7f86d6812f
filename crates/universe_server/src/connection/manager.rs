//! Connection manager for tracking client connections.
//!
//! This module provides the bookkeeping of every open websocket: unique
//! connection ids, the identity admitted on each connection and the write
//! half used to close it from outside its handler.

use super::{client::ClientConnection, ConnectionId, WsSender};
use futures_util::sink::SinkExt;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_tungstenite::tungstenite::protocol::{frame::coding::CloseCode, CloseFrame};
use tokio_tungstenite::tungstenite::Message;
use tracing::info;
use universe::{SessionId, UserId};

/// Central registry of all client connections.
///
/// Uses async-safe maps so connection handlers on any acceptor can register
/// and remove themselves concurrently.
#[derive(Debug)]
pub struct ConnectionManager {
    /// Map of connection ID to client connection information
    connections: Arc<RwLock<HashMap<ConnectionId, ClientConnection>>>,

    /// Write halves of the open websockets
    ws_senders: Arc<RwLock<HashMap<ConnectionId, WsSender>>>,

    /// Atomic counter for generating unique connection IDs
    next_id: Arc<AtomicUsize>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
            ws_senders: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(AtomicUsize::new(1)),
        }
    }

    /// Adds a new connection and returns its unique ID.
    pub async fn add_connection(&self, remote_addr: SocketAddr) -> ConnectionId {
        let connection_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let connection = ClientConnection::new(remote_addr);
        self.connections.write().await.insert(connection_id, connection);
        info!("🔗 Connection {} from {}", connection_id, remote_addr);
        connection_id
    }

    /// Register the WebSocket sender for a connection
    pub async fn register_ws_sender(&self, connection_id: ConnectionId, ws_sender: WsSender) {
        self.ws_senders.write().await.insert(connection_id, ws_sender);
    }

    /// Removes a connection and its sender.
    pub async fn remove_connection(&self, connection_id: ConnectionId) {
        self.ws_senders.write().await.remove(&connection_id);
        if let Some(connection) = self.connections.write().await.remove(&connection_id) {
            info!(
                "❌ Connection {} from {} disconnected",
                connection_id, connection.remote_addr
            );
        }
    }

    /// Records the identity admitted on a connection.
    pub async fn set_identity(&self, connection_id: ConnectionId, user_id: UserId, session_id: SessionId) {
        if let Some(connection) = self.connections.write().await.get_mut(&connection_id) {
            connection.user_id = Some(user_id);
            connection.session_id = Some(session_id);
        }
    }

    pub async fn get_connection(&self, connection_id: ConnectionId) -> Option<ClientConnection> {
        self.connections.read().await.get(&connection_id).cloned()
    }

    /// Finds the connection a user was admitted on.
    pub async fn get_connection_id_by_user(&self, user_id: &UserId) -> Option<ConnectionId> {
        self.connections
            .read()
            .await
            .iter()
            .find(|(_, c)| c.user_id.as_ref() == Some(user_id))
            .map(|(id, _)| *id)
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Kick (disconnect) a connection by ID, sending a close frame
    pub async fn kick_connection(&self, connection_id: ConnectionId, reason: Option<String>) {
        let sender = self.ws_senders.read().await.get(&connection_id).cloned();
        if let Some(ws_sender) = sender {
            let close_msg = Message::Close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: reason.unwrap_or_else(|| "Kicked by server".into()).into(),
            }));
            let _ = ws_sender.lock().await.send(close_msg).await;
        }
        self.remove_connection(connection_id).await;
    }

    /// Sends a close frame to every open connection.
    pub async fn close_all(&self, reason: &str) {
        let ids: Vec<ConnectionId> = self.ws_senders.read().await.keys().copied().collect();
        for id in ids {
            self.kick_connection(id, Some(reason.to_string())).await;
        }
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}
