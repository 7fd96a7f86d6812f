//! Configuration management for the universe node.
//!
//! This module handles loading, validation, and conversion of the node
//! configuration from TOML files and command-line arguments.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;
use universe::{ObjectId, UniverseConfig};
use universe_server::{SecurityConfig, ServerConfig};
use uuid::Uuid;

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration settings
    pub server: ServerSettings,
    /// Handshake token settings
    pub auth: AuthSettings,
    /// Object tree and queue settings
    #[serde(default)]
    pub universe: UniverseSettings,
    /// Logging configuration settings
    pub logging: LoggingSettings,
}

/// Server-specific configuration settings.
///
/// Controls network binding, connection limits and the accept loops.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Network address to bind the server to (e.g., "0.0.0.0:4000")
    pub bind_address: String,
    /// Maximum number of concurrent client connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Seconds a client has to send its handshake
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,
    /// Accept loops sharing the listener (0 for one per CPU core)
    #[serde(default)]
    pub acceptors: usize,
    /// Maximum size of a client frame in bytes
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

/// Handshake token settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSettings {
    /// HS256 secret tokens are signed with
    #[serde(default)]
    pub jwt_secret: String,
    /// Token subjects accepted for any user id
    #[serde(default = "default_legacy_subjects")]
    pub legacy_subject_bypass: Vec<Uuid>,
}

/// Object tree and queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniverseSettings {
    /// World new connections are spawned into
    #[serde(default = "default_spawn_world_id")]
    pub spawn_world_id: String,
    /// Name used when the spawn world has to be created
    #[serde(default = "default_spawn_world_name")]
    pub spawn_world_name: String,
    #[serde(default = "default_pipeline_capacity")]
    pub pipeline_capacity: usize,
    #[serde(default = "default_session_queue_capacity")]
    pub session_queue_capacity: usize,
    #[serde(default = "default_notifier_capacity")]
    pub notifier_capacity: usize,
}

/// Logging system configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    #[serde(default)]
    pub json_format: bool,
}

fn default_max_connections() -> usize {
    1000
}

fn default_handshake_timeout() -> u64 {
    10
}

fn default_max_message_size() -> usize {
    SecurityConfig::default().max_message_size
}

fn default_legacy_subjects() -> Vec<Uuid> {
    SecurityConfig::default().legacy_subject_bypass
}

fn default_spawn_world_id() -> String {
    UniverseConfig::default().spawn_world_id.to_string()
}

fn default_spawn_world_name() -> String {
    UniverseConfig::default().spawn_world_name
}

fn default_pipeline_capacity() -> usize {
    UniverseConfig::default().pipeline_capacity
}

fn default_session_queue_capacity() -> usize {
    UniverseConfig::default().session_queue_capacity
}

fn default_notifier_capacity() -> usize {
    UniverseConfig::default().notifier_capacity
}

impl Default for UniverseSettings {
    fn default() -> Self {
        Self {
            spawn_world_id: default_spawn_world_id(),
            spawn_world_name: default_spawn_world_name(),
            pipeline_capacity: default_pipeline_capacity(),
            session_queue_capacity: default_session_queue_capacity(),
            notifier_capacity: default_notifier_capacity(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                bind_address: "127.0.0.1:4000".to_string(),
                max_connections: default_max_connections(),
                handshake_timeout_secs: default_handshake_timeout(),
                acceptors: 0,
                max_message_size: default_max_message_size(),
            },
            auth: AuthSettings {
                jwt_secret: String::new(),
                legacy_subject_bypass: default_legacy_subjects(),
            },
            universe: UniverseSettings::default(),
            logging: LoggingSettings {
                level: "info".to_string(),
                json_format: false,
            },
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, creates a default configuration file at the
    /// specified path and returns the default configuration. The default has
    /// no token secret and does not validate until one is set.
    pub async fn load_from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Converts the application configuration to a server configuration.
    pub fn to_server_config(&self) -> Result<ServerConfig, Box<dyn std::error::Error>> {
        let defaults = UniverseConfig::default();
        Ok(ServerConfig {
            bind_address: self.server.bind_address.parse()?,
            max_connections: self.server.max_connections,
            handshake_timeout_secs: self.server.handshake_timeout_secs,
            acceptors: self.server.acceptors,
            security: SecurityConfig {
                jwt_secret: self.auth.jwt_secret.clone(),
                legacy_subject_bypass: self.auth.legacy_subject_bypass.clone(),
                max_message_size: self.server.max_message_size,
            },
            universe: UniverseConfig {
                spawn_world_id: self.universe.spawn_world_id.parse::<ObjectId>()?,
                spawn_world_name: self.universe.spawn_world_name.clone(),
                system_plugin_id: defaults.system_plugin_id,
                pipeline_capacity: self.universe.pipeline_capacity,
                session_queue_capacity: self.universe.session_queue_capacity,
                notifier_capacity: self.universe.notifier_capacity,
            },
        })
    }

    /// Validates the configuration settings.
    ///
    /// # Returns
    ///
    /// `Ok(())` if the configuration is valid, or an error message describing
    /// the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        if self.server.bind_address.parse::<std::net::SocketAddr>().is_err() {
            return Err(format!("Invalid bind address: {}", &self.server.bind_address));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        if self.universe.pipeline_capacity == 0 {
            return Err("universe.pipeline_capacity must be greater than 0".to_string());
        }
        if self.universe.session_queue_capacity == 0 {
            return Err("universe.session_queue_capacity must be greater than 0".to_string());
        }

        if self.auth.jwt_secret.is_empty() {
            return Err("auth.jwt_secret cannot be empty".to_string());
        }

        if self.universe.spawn_world_id.parse::<ObjectId>().is_err() {
            return Err(format!(
                "Invalid spawn world id: {}",
                &self.universe.spawn_world_id
            ));
        }

        Ok(())
    }
}
