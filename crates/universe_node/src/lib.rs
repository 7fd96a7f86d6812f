//! # Universe Node - Main Entry Point
//!
//! Runs a universe server: parses the command line, loads the TOML
//! configuration, sets up logging and drives the application until a
//! shutdown signal.
//!
//! ## Quick Start
//!
//! ```bash
//! # Run with default configuration (a secret is still required)
//! universe_node --jwt-secret change-me
//!
//! # Specify custom configuration
//! universe_node --config production.toml
//!
//! # Override specific settings
//! universe_node --bind 0.0.0.0:4000 --spawn-world d83670c7-a120-47a4-892d-f9ec75604f74 --log-level debug
//!
//! # JSON logging for production
//! universe_node --json-logs
//! ```
//!
//! ## Configuration
//!
//! The node loads configuration from a TOML file (default: `config.toml`)
//! with `[server]`, `[auth]`, `[universe]` and `[logging]` sections. If the
//! file doesn't exist, a default configuration is written.
//!
//! ## Signal Handling
//!
//! The node shuts down gracefully on SIGINT (Ctrl+C) and SIGTERM. A second
//! signal exits immediately.

use tracing::error;

pub mod app;
pub mod cli;
pub mod config;
pub mod logging;
pub mod signals;

use app::Application;
use cli::CliArgs;
use config::AppConfig;

/// Runs the node from the process arguments.
///
/// # Exit Codes
///
/// * **0**: Successful execution and shutdown
/// * **1**: Error during startup, configuration, or runtime
pub async fn init() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // logging settings come from the file, before overrides are applied
    let mut config = AppConfig::load_from_file(&args.config_path)
        .await
        .unwrap_or_default();
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }

    if let Err(e) = logging::setup_logging(&config.logging, args.json_logs) {
        eprintln!("❌ Failed to setup logging: {e}");
        std::process::exit(1);
    }

    match Application::new(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("❌ Application error: {:?}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!("❌ Failed to start application: {e:?}");
            std::process::exit(1);
        }
    }

    Ok(())
}

// Re-export main types for library usage
pub use config::{AuthSettings, LoggingSettings, ServerSettings, UniverseSettings};
