//! Core server implementation and connection handling.
//!
//! This module contains the main universe server structure and the logic
//! that admits a websocket client into a world and serves it.

pub mod core;
pub mod handlers;

pub use core::UniverseServer;
pub use handlers::ConnectionContext;
