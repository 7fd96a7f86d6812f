//! Main application logic and lifecycle management.
//!
//! This module contains the `Application` struct that builds the universe
//! server from the merged configuration, runs it and shuts it down in
//! phases.

use crate::{
    cli::CliArgs,
    config::AppConfig,
    logging::display_banner,
    signals::{setup_signal_handlers, setup_signal_handlers_silent},
};
use std::future::Future;
use std::sync::Arc;
use tokio::time::{timeout, Duration};
use tracing::{error, info, warn};
use universe::ShutdownState;
use universe_server::UniverseServer;

/// Time allowed for each shutdown phase
const PHASE_TIMEOUT: Duration = Duration::from_secs(8);

/// The running node: configuration plus the server built from it.
pub struct Application {
    /// Loaded application configuration
    config: AppConfig,
    /// Universe server instance
    server: Arc<UniverseServer>,
}

impl Application {
    /// Creates a new application instance.
    ///
    /// # Process
    ///
    /// 1. Load configuration from file (creating default if missing)
    /// 2. Apply command-line argument overrides
    /// 3. Validate merged configuration
    /// 4. Display startup banner
    /// 5. Build the server
    pub async fn new(args: CliArgs) -> Result<Self, Box<dyn std::error::Error>> {
        info!("🔧 Loading configuration from: {}", args.config_path.display());
        let mut config = AppConfig::load_from_file(&args.config_path).await?;
        info!("✅ Configuration loaded successfully from {}", args.config_path.display());

        if let Some(bind_address) = args.bind_address {
            config.server.bind_address = bind_address;
        }
        if let Some(log_level) = args.log_level {
            config.logging.level = log_level;
        }
        if args.json_logs {
            config.logging.json_format = true;
        }
        if let Some(secret) = args.jwt_secret {
            config.auth.jwt_secret = secret;
        }
        if let Some(spawn_world) = args.spawn_world {
            config.universe.spawn_world_id = spawn_world;
        }

        display_banner();
        Self::from_config(config)
    }

    /// Builds the application from an already merged configuration.
    pub fn from_config(config: AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        if let Err(e) = config.validate() {
            return Err(format!("Configuration validation failed: {e}").into());
        }
        info!("✅ Configuration validated successfully");

        let server = Arc::new(UniverseServer::new(config.to_server_config()?));
        Ok(Self { config, server })
    }

    pub fn server(&self) -> &Arc<UniverseServer> {
        &self.server
    }

    /// Runs until SIGINT or SIGTERM, then shuts down gracefully.
    ///
    /// A second signal during shutdown exits immediately.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        self.run_until(async {
                let state = setup_signal_handlers().await?;
                tokio::spawn(async move {
                    if let Err(e) = setup_signal_handlers_silent().await {
                        error!("Failed to set up merciless shutdown signal handler: {e}");
                        return;
                    }
                    warn!("Shutdown handler received again! I'll make this quick.");
                    std::process::exit(1);
                });
                Ok(state)
            })
            .await
    }

    /// Runs until `shutdown` resolves, then shuts down in three phases:
    ///
    /// 1. Stop the accept loops and close open connections
    /// 2. Stop every world, draining its broadcast pipelines
    /// 3. Complete the shutdown state and log final statistics
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), Box<dyn std::error::Error>>
    where
        F: Future<Output = Result<ShutdownState, Box<dyn std::error::Error>>>,
    {
        info!("🌟 Starting Universe Node");
        self.log_configuration_summary();

        let shutdown_state = ShutdownState::new();
        let server_handle = {
            let server = Arc::clone(&self.server);
            let shutdown_state = shutdown_state.clone();
            tokio::spawn(async move {
                match server.start_with_shutdown_state(shutdown_state).await {
                    Ok(()) => info!("✅ Server completed successfully"),
                    Err(e) => {
                        error!("❌ Server error: {:?}", e);
                        std::process::exit(1);
                    }
                }
            })
        };

        let monitoring_handle = {
            let server = Arc::clone(&self.server);
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(60));
                interval.tick().await;
                loop {
                    interval.tick().await;
                    let node = server.node();
                    info!(
                        "📊 System Health - {} connections | {} sessions | {} worlds",
                        server.connection_manager().connection_count().await,
                        node.ctx().session_count(),
                        node.world_count()
                    );
                }
            })
        };

        info!("✅ Universe Node is now running!");
        info!("🎮 Ready to accept connections on {}", self.config.server.bind_address);
        info!("🛑 Press Ctrl+C to gracefully shutdown");

        let signal_state = shutdown.await?;
        if signal_state.is_shutdown_initiated() {
            shutdown_state.initiate_shutdown();
        }
        info!("🛑 Shutdown signal received, beginning graceful shutdown...");

        info!("📡 Phase 1: Stopping accept loops and closing connections...");
        monitoring_handle.abort();
        self.server.shutdown();
        match timeout(PHASE_TIMEOUT, server_handle).await {
            Ok(_) => info!("✅ Server task completed gracefully"),
            Err(_) => warn!("⏰ Server task did not complete within timeout, proceeding with shutdown"),
        }

        info!("⏳ Phase 2: Draining world pipelines...");
        let node = Arc::clone(self.server.node());
        if timeout(PHASE_TIMEOUT, node.stop()).await.is_err() {
            warn!("⏰ Worlds did not stop within timeout, some broadcasts may be lost");
        } else {
            info!("✅ All worlds stopped");
        }

        info!("🧹 Phase 3: Final cleanup...");
        shutdown_state.complete_shutdown();
        self.log_final_statistics().await;
        info!("✅ Universe Node shutdown complete");
        Ok(())
    }

    fn log_configuration_summary(&self) {
        info!("📋 Configuration Summary:");
        info!("  🌐 Bind address: {}", self.config.server.bind_address);
        info!("  👥 Max connections: {}", self.config.server.max_connections);
        info!("  🌍 Spawn world: {} ({})", self.config.universe.spawn_world_name, self.config.universe.spawn_world_id);
        info!(
            "  📦 Queues: pipeline {} | session {}",
            self.config.universe.pipeline_capacity, self.config.universe.session_queue_capacity
        );
    }

    async fn log_final_statistics(&self) {
        let node = self.server.node();
        info!("📊 Final Statistics:");
        info!("  - Worlds: {}", node.world_count());
        info!("  - Sessions still registered: {}", node.ctx().session_count());
        info!(
            "  - Connections still open: {}",
            self.server.connection_manager().connection_count().await
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.server.bind_address = "127.0.0.1:0".to_string();
        config.auth.jwt_secret = "secret".to_string();
        config
    }

    #[test]
    fn test_invalid_config_is_refused() {
        assert!(Application::from_config(AppConfig::default()).is_err());
        assert!(Application::from_config(config()).is_ok());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_run_until_shuts_down_in_phases() {
        let app = Application::from_config(config()).unwrap();
        let server = Arc::clone(app.server());

        app.run_until(async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            let state = ShutdownState::new();
            state.initiate_shutdown();
            Ok(state)
        })
        .await
        .unwrap();

        let spawn_id = server.config().universe.spawn_world_id;
        let world = server.node().get_world(&spawn_id).unwrap();
        assert!(!world.is_running());
        assert_eq!(server.connection_manager().connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_new_applies_cli_overrides() {
        let dir = tempfile::TempDir::new().unwrap();
        let args = CliArgs {
            config_path: dir.path().join("config.toml"),
            bind_address: Some("127.0.0.1:0".to_string()),
            log_level: Some("debug".to_string()),
            json_logs: true,
            jwt_secret: Some("from-cli".to_string()),
            spawn_world: Some("7f1f3cf6-0c0a-4b7e-9d7e-3c1b2a6c9a10".to_string()),
        };

        let app = Application::new(args).await.unwrap();
        assert_eq!(app.config.auth.jwt_secret, "from-cli");
        assert_eq!(app.config.logging.level, "debug");
        assert!(app.config.logging.json_format);
        assert_eq!(
            app.server().config().universe.spawn_world_id.to_string(),
            "7f1f3cf6-0c0a-4b7e-9d7e-3c1b2a6c9a10"
        );
    }
}
