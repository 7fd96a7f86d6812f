//! Connection management for client connections.
//!
//! This module tracks the lifecycle of websocket connections and runs the
//! two pumps that move frames between a socket and its session.

pub mod client;
pub mod manager;
pub mod pump;

pub use client::ClientConnection;
pub use manager::ConnectionManager;

/// Type alias for connection identifiers.
///
/// Connection IDs are used to uniquely identify client connections
/// throughout their lifecycle on the server.
pub type ConnectionId = usize;

/// Write half of a client websocket, shared between the pumps.
pub type WsSender = std::sync::Arc<
    tokio::sync::Mutex<
        futures_util::stream::SplitSink<
            tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
            tokio_tungstenite::tungstenite::Message,
        >,
    >,
>;
