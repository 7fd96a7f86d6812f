//! Utility functions and helper methods for the universe server.
//!
//! This module provides convenient factory functions for creating server
//! instances with different configurations.

use crate::{config::ServerConfig, server::UniverseServer};

/// Creates a new universe server with default configuration.
///
/// The default configuration has an empty token secret, so every handshake
/// is rejected until one is set.
///
/// # Example
///
/// ```rust
/// # #[tokio::main]
/// # async fn main() {
/// use universe_server::create_server;
///
/// let server = create_server();
/// assert_eq!(server.config().max_connections, 1000);
/// # }
/// ```
pub fn create_server() -> UniverseServer {
    UniverseServer::new(ServerConfig::default())
}

/// Creates a new universe server with custom configuration.
///
/// # Example
///
/// ```rust
/// # #[tokio::main]
/// # async fn main() {
/// use universe_server::{create_server_with_config, ServerConfig};
///
/// let mut config = ServerConfig {
///     bind_address: "0.0.0.0:4000".parse().unwrap(),
///     max_connections: 5000,
///     ..Default::default()
/// };
/// config.security.jwt_secret = "change-me".to_string();
///
/// let server = create_server_with_config(config);
/// # }
/// ```
pub fn create_server_with_config(config: ServerConfig) -> UniverseServer {
    UniverseServer::new(config)
}
