//! Client connection representation.

use std::net::SocketAddr;
use std::time::SystemTime;
use universe::{SessionId, UserId};

/// Represents an individual client connection to the server.
///
/// The user and session ids are only known once the handshake has been
/// accepted.
#[derive(Debug, Clone)]
pub struct ClientConnection {
    /// The remote network address of the client
    pub remote_addr: SocketAddr,

    /// When this connection was established
    pub connected_at: SystemTime,

    /// User admitted on this connection (None until admitted)
    pub user_id: Option<UserId>,

    /// Session id announced in the handshake
    pub session_id: Option<SessionId>,
}

impl ClientConnection {
    pub fn new(remote_addr: SocketAddr) -> Self {
        Self {
            remote_addr,
            connected_at: SystemTime::now(),
            user_id: None,
            session_id: None,
        }
    }

    pub fn is_admitted(&self) -> bool {
        self.user_id.is_some()
    }
}
