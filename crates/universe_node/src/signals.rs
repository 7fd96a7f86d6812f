//! Signal handling for graceful node shutdown.
//!
//! The returned [`ShutdownState`] is already initiated; the application
//! hands it to the accept loops and completes it once cleanup is done.

use tokio::signal;
use tracing::info;
use universe::ShutdownState;

/// Waits for SIGINT or SIGTERM (Ctrl+C on Windows).
///
/// # Example
///
/// ```rust,no_run
/// use lib_universe_node::signals::setup_signal_handlers;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let shutdown_state = setup_signal_handlers().await?;
///     assert!(shutdown_state.is_shutdown_initiated());
///     Ok(())
/// }
/// ```
pub async fn setup_signal_handlers() -> Result<ShutdownState, Box<dyn std::error::Error>> {
    let shutdown_state = setup_signal_handlers_silent().await?;
    info!("📡 Received shutdown signal - initiating graceful shutdown");
    Ok(shutdown_state)
}

pub async fn setup_signal_handlers_silent() -> Result<ShutdownState, Box<dyn std::error::Error>> {
    let shutdown_state = ShutdownState::new();

    #[cfg(unix)]
    {
        use signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = sigint.recv() => (),
            _ = sigterm.recv() => ()
        }
    }

    #[cfg(windows)]
    signal::ctrl_c().await?;

    shutdown_state.initiate_shutdown();
    Ok(shutdown_state)
}
