//! # Universe Server
//!
//! The websocket front of the universe: accepts 3D clients, admits them
//! through a token-checked handshake and moves binary posbus frames between
//! their sockets and the sessions of the [`universe`] core.
//!
//! ## Connection Lifecycle
//!
//! 1. A client opens a websocket and sends a `HandShake` as its first,
//!    binary frame
//! 2. The token is verified (HS256) and its subject must match the user id
//!    of the handshake
//! 3. The session is spawned into the world picked by the node's resolver
//!    and receives `SetWorld`, its own transform and the world snapshot
//! 4. Two pumps serve the connection until either side stops: the write
//!    pump drains the session onto the socket and pings the client, the
//!    read loop applies client transforms, teleports and signals
//!
//! A rejected token is answered with an `InvalidToken` signal and a close.
//!
//! ## Configuration
//!
//! The server is configured through [`ServerConfig`]:
//!
//! * **Network settings** - Bind address, connection limit, acceptor count
//! * **Security** - Token secret, legacy subjects, message size limit
//! * **Universe** - Spawn world, queue capacities
//!
//! ## Error Handling
//!
//! [`ServerError`] separates network, handshake, authentication and
//! internal failures. Errors of one connection end that connection only.
//!
//! ## Example
//!
//! ```rust,no_run
//! use universe_server::{create_server_with_config, ServerConfig};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), universe_server::ServerError> {
//! let mut config = ServerConfig::default();
//! config.security.jwt_secret = "change-me".to_string();
//! let server = create_server_with_config(config);
//! server.start().await
//! # }
//! ```

// Re-export core types and functions for easy access
pub use config::{SecurityConfig, ServerConfig};
pub use error::ServerError;
pub use security::{Claims, Hs256Verifier, TokenVerifier};
pub use server::UniverseServer;
pub use utils::{create_server, create_server_with_config};

// Public module declarations
pub mod config;
pub mod connection;
pub mod error;
pub mod security;
pub mod server;
pub mod utils;

mod tests;
