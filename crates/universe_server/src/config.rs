//! Server configuration types and defaults.
//!
//! This module contains the server configuration structure and default values
//! used to initialize and customize the universe server behavior.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use universe::UniverseConfig;
use uuid::Uuid;

/// Configuration structure for the universe server.
///
/// Contains the network settings of the websocket listener, the admission
/// rules for incoming handshakes and the tunables of the universe core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The socket address to bind the server to
    pub bind_address: SocketAddr,

    /// Maximum number of concurrent connections allowed
    pub max_connections: usize,

    /// Seconds a new connection has to deliver its handshake
    pub handshake_timeout_secs: u64,

    /// Number of accept loops sharing the listener (0 uses one per CPU core)
    pub acceptors: usize,

    /// Security configuration settings
    pub security: SecurityConfig,

    /// Configuration of the object tree and session queues
    pub universe: UniverseConfig,
}

/// Admission and message limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Shared secret handshake tokens are signed with (HS256)
    pub jwt_secret: String,

    /// Token subjects allowed to connect under any user id
    pub legacy_subject_bypass: Vec<Uuid>,

    /// Maximum size of a client frame in bytes
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:4000".parse().expect("Invalid default bind address"),
            max_connections: 1000,
            handshake_timeout_secs: 10,
            acceptors: 0,
            security: SecurityConfig::default(),
            universe: UniverseConfig::default(),
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            legacy_subject_bypass: vec![
                Uuid::from_u128(0x69e1d7f6_3130_4005_9969_31edf9af9445),
                Uuid::from_u128(0xeb50bbc8_ba4e_46a3_a480_a9b30141ce91),
            ],
            max_message_size: 64 * 1024, // 64KB
        }
    }
}

impl ServerConfig {
    /// Accept loops to run, resolving `0` to the CPU core count.
    pub fn acceptor_count(&self) -> usize {
        if self.acceptors == 0 {
            num_cpus::get().max(1)
        } else {
            self.acceptors
        }
    }
}
