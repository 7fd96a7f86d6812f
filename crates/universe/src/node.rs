//! The node: registry of worlds and entry point for sessions.
//!
//! A [`Node`] owns every loaded [`World`], decides which world a new
//! connection lands in (through a [`WorldResolver`]) and moves sessions
//! between worlds. It also runs the notifiers of the node-level attribute
//! stores, whose changes may concern users on any world.

use crate::attributes::{AttributeChange, ObjectRecord};
use crate::auto;
use crate::context::UniverseContext;
use crate::error::{Result, UniverseError};
use crate::ids::{ObjectId, ObjectTypeId, SessionId, UserId};
use crate::object::Object;
use crate::session::Session;
use crate::world::World;
use async_trait::async_trait;
use dashmap::DashMap;
use posbus::{Message, Signal, SignalType};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// What a connection asked for when it was admitted.
#[derive(Debug, Clone)]
pub struct AdmissionRequest {
    pub user_id: UserId,
    pub session_id: SessionId,
    /// Url the client was opened on
    pub url: String,
}

/// Picks the world an admitted session is spawned into.
#[async_trait]
pub trait WorldResolver: Send + Sync {
    async fn resolve(&self, node: &Node, request: &AdmissionRequest) -> Result<Arc<World>>;
}

/// Sends everyone to the configured spawn world.
#[derive(Debug, Default, Clone, Copy)]
pub struct SpawnWorldResolver;

#[async_trait]
impl WorldResolver for SpawnWorldResolver {
    async fn resolve(&self, node: &Node, _request: &AdmissionRequest) -> Result<Arc<World>> {
        let spawn_id = node.ctx().config().spawn_world_id;
        node.get_world(&spawn_id)
            .ok_or_else(|| UniverseError::NotFound(format!("spawn world {spawn_id}")))
    }
}

pub struct Node {
    ctx: Arc<UniverseContext>,
    worlds: DashMap<ObjectId, Arc<World>>,
    resolver: Arc<dyn WorldResolver>,
}

impl Node {
    pub fn new(ctx: Arc<UniverseContext>) -> Arc<Node> {
        Self::with_resolver(ctx, Arc::new(SpawnWorldResolver))
    }

    pub fn with_resolver(ctx: Arc<UniverseContext>, resolver: Arc<dyn WorldResolver>) -> Arc<Node> {
        Arc::new(Node {
            ctx,
            worlds: DashMap::new(),
            resolver,
        })
    }

    pub fn ctx(&self) -> &Arc<UniverseContext> {
        &self.ctx
    }

    pub fn add_world(&self, world: Arc<World>) {
        self.worlds.insert(world.id(), world);
    }

    pub fn get_world(&self, id: &ObjectId) -> Option<Arc<World>> {
        self.worlds.get(id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn worlds(&self) -> Vec<Arc<World>> {
        self.worlds.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    pub fn world_count(&self) -> usize {
        self.worlds.len()
    }

    /// Creates an empty world, registers it and optionally stores its root.
    pub async fn create_world(&self, id: ObjectId, name: &str, persist: bool) -> Result<Arc<World>> {
        if self.worlds.contains_key(&id) {
            return Err(UniverseError::Validation(format!("world {id} already exists")));
        }
        let record = ObjectRecord {
            id,
            parent_id: None,
            owner_id: UserId::nil(),
            object_type_id: ObjectTypeId::nil(),
            name: name.to_string(),
            asset_3d_id: None,
            options: None,
            transform: None,
        };
        let world = World::new(&record, Arc::clone(&self.ctx));
        if persist {
            world.root().persist().await?;
        }
        self.add_world(Arc::clone(&world));
        info!("🌍 World {} ({}) created", id, name);
        Ok(world)
    }

    /// Loads a world and everything below it from the object store.
    pub async fn load_world(&self, id: &ObjectId) -> Result<Arc<World>> {
        let records = self.ctx.object_store().load_world(id).await?;
        let world = World::from_records(records, Arc::clone(&self.ctx)).await?;
        self.add_world(Arc::clone(&world));
        Ok(world)
    }

    /// Makes sure the spawn world exists: loaded from storage if it was
    /// stored before, created and stored otherwise.
    pub async fn ensure_spawn_world(&self) -> Result<Arc<World>> {
        let config = self.ctx.config();
        if let Some(world) = self.get_world(&config.spawn_world_id) {
            return Ok(world);
        }
        match self.load_world(&config.spawn_world_id).await {
            Ok(world) => Ok(world),
            Err(UniverseError::NotFound(_)) => {
                self.create_world(config.spawn_world_id, &config.spawn_world_name, true)
                    .await
            }
            Err(e) => Err(e),
        }
    }

    /// Finds an object in any world.
    pub fn get_object_from_all_objects(&self, id: &ObjectId) -> Option<Arc<Object>> {
        self.worlds
            .iter()
            .find_map(|entry| entry.value().get_object(id))
    }

    pub async fn resolve_world(&self, request: &AdmissionRequest) -> Result<Arc<World>> {
        self.resolver.resolve(self, request).await
    }

    /// Moves `session` to the world `target`. The connection stays open; if
    /// the target does not exist the client is told and nothing else
    /// happens.
    pub async fn teleport(&self, session: &Arc<Session>, target: &ObjectId) -> Result<()> {
        let Some(world) = self.get_world(target) else {
            let signal = Signal {
                value: SignalType::WorldDoesNotExist,
            }
            .to_frame();
            session.send_direct(signal).await?;
            return Err(UniverseError::NotFound(format!("world {target}")));
        };

        if let Some(current) = session.world().await {
            if current.id() == world.id() {
                debug!("User {} is already in world {}", session.user_id(), target);
                return Ok(());
            }
            if let Err(e) = current.remove_user(session, false).await {
                warn!("Leaving world {} for {} failed: {}", current.id(), target, e);
            }
        }
        world.add_user(session).await
    }

    /// Takes `session` out of its world without closing the connection.
    pub async fn leave_world(&self, session: &Arc<Session>) -> Result<bool> {
        match session.world().await {
            Some(world) => world.remove_user(session, false).await,
            None => Ok(false),
        }
    }

    /// Starts the node-level notifiers, then every world.
    pub async fn run(self: &Arc<Self>) {
        for store in self.ctx.node_level_stores() {
            let weak: Weak<Node> = Arc::downgrade(self);
            let kind = store.kind();
            store
                .start_notifier(move |change: AttributeChange| {
                    let weak = weak.clone();
                    async move {
                        if let Some(node) = weak.upgrade() {
                            let errors = auto::dispatch_node_change(&node, &change).await;
                            if !errors.is_empty() {
                                warn!(
                                    "📭 Auto broadcast of {} {} failed: {}",
                                    kind, change.attribute_id, errors
                                );
                            }
                        }
                    }
                })
                .await;
        }
        for world in self.worlds() {
            world.run().await;
        }
        info!("🚀 Node running {} worlds", self.world_count());
    }

    /// Stops every world, then the node-level notifiers.
    pub async fn stop(&self) {
        for world in self.worlds() {
            world.stop().await;
        }
        for store in self.ctx.node_level_stores() {
            store.stop_notifier().await;
        }
        info!("🛑 Node stopped");
    }
}
