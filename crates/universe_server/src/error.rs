//! Error types and handling for the universe server.
//!
//! This module defines the error types that can occur while accepting and
//! serving client connections, keeping transport, admission and core
//! failures apart.

use universe::UniverseError;

/// Enumeration of possible server errors.
///
/// Categorizes errors by the stage of a connection's life they stop, which
/// decides how the connection is closed.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Network-related errors such as binding failures or broken sockets
    #[error("Network error: {0}")]
    Network(String),

    /// The first frame was missing, late, not binary or not a handshake
    #[error("Handshake error: {0}")]
    Handshake(String),

    /// The handshake token was rejected or does not match the user
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Internal server errors, including failures of the universe core
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<UniverseError> for ServerError {
    fn from(error: UniverseError) -> Self {
        ServerError::Internal(error.to_string())
    }
}
