//! # Universe Core
//!
//! The in-memory model of a multi-user 3D world server: a concurrent object
//! tree per world, an attribute engine with typed options, and per-object
//! broadcast pipelines that fan binary [`posbus`] frames out to connected
//! sessions.
//!
//! ## Architecture Overview
//!
//! - **[`Node`]**: registry of worlds; picks the world a session spawns into
//!   and moves sessions between worlds
//! - **[`World`]**: a root [`Object`] plus an id index of every object below
//!   it and the users currently spawned
//! - **[`Object`]**: node of the tree. Owns its children, its attribute
//!   payloads and a [`BroadcastPipeline`]
//! - **Attributes**: payloads keyed by owner and attribute id. Changes of
//!   attributes declaring `posbus_auto` are announced by the [`auto`]
//!   handlers
//! - **[`merge`]**: deep merge of instance options over type defaults
//! - **[`Session`]**: core-side handle of one client connection
//!
//! Shared registries and storage backends live in a [`UniverseContext`]
//! passed down explicitly; there are no globals.
//!
//! ## Example
//!
//! ```rust,no_run
//! use universe::{Node, Session, SessionId, UniverseConfig, UniverseContext, UserId, UserProfile};
//!
//! # async fn run() -> universe::Result<()> {
//! let ctx = UniverseContext::in_memory(UniverseConfig::default());
//! let node = Node::new(ctx);
//! let spawn = node.ensure_spawn_world().await?;
//! node.run().await;
//!
//! let (session, mut outlet) = Session::new(UserId::new(), SessionId::new(), UserProfile::guest(), 10);
//! spawn.add_user(&session).await?;
//! while let Some(frames) = outlet.recv().await {
//!     // write `frames` to the socket
//! #   let _ = frames;
//! }
//! # Ok(())
//! # }
//! ```

pub mod attributes;
pub mod auto;
pub mod config;
pub mod context;
pub mod error;
pub mod ids;
pub mod merge;
pub mod node;
pub mod object;
pub mod options;
pub mod pipeline;
pub mod session;
pub mod shutdown;
pub mod users;
pub mod work_queue;
pub mod world;

pub use attributes::{
    AttributeChange, AttributeMap, AttributeOwner, AttributePersistence, AttributeType,
    AttributeTypes, InMemoryStore, NodeAttributeStore, ObjectPersistence, ObjectRecord,
};
pub use config::UniverseConfig;
pub use context::{UniverseContext, UniverseContextBuilder};
pub use error::{DeliveryErrors, Result, UniverseError};
pub use ids::{AssetId, AttributeId, ObjectId, ObjectTypeId, PluginId, SessionId, UserId};
pub use merge::{merge, MergeHooks, MergeStrategy, Mergeable};
pub use node::{AdmissionRequest, Node, SpawnWorldResolver, WorldResolver};
pub use object::{Object, ObjectAttributes, ObjectType, ObjectTypes};
pub use options::{
    AttributeOptions, AttributePayload, AttributeValue, AutoOption, AutoScope, ObjectOptions,
};
pub use pipeline::{BroadcastPipeline, PipelineState};
pub use session::{Session, SessionOutlet, UserProfile};
pub use shutdown::ShutdownState;
pub use users::{StaticProfiles, UserProfileSource};
pub use world::World;
