//! Worlds: the root object of a tree plus the indices over it.
//!
//! A [`World`] owns its root [`Object`], keeps an id index of every object
//! reachable from the root and tracks the sessions currently spawned in it.
//! The index is updated when subtrees are linked or detached; the tree
//! itself stays the source of truth.

use crate::attributes::{AttributeOwner, ObjectRecord};
use crate::context::UniverseContext;
use crate::error::{Result, UniverseError};
use crate::ids::{AssetId, ObjectId, UserId};
use crate::object::Object;
use crate::options::{AttributePayload, AttributeValue};
use crate::session::Session;
use bytes::Bytes;
use dashmap::DashMap;
use posbus::{
    AddObjects, AddUsers, Message, MyTransform, RemoveObjects, RemoveUsers, SetWorld, Signal,
    SignalType, TransformNoScale,
};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default)]
struct WorldMeta {
    avatar: Option<AssetId>,
    avatar_3d: Option<AssetId>,
}

pub struct World {
    id: ObjectId,
    root: Arc<Object>,
    ctx: Arc<UniverseContext>,
    objects: DashMap<ObjectId, Arc<Object>>,
    users: DashMap<UserId, Arc<Session>>,
    meta: RwLock<WorldMeta>,
    /// Serializes reparenting and detaching within this world
    tree_lock: Mutex<()>,
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("id", &self.id)
            .field("objects", &self.objects.len())
            .field("users", &self.users.len())
            .finish()
    }
}

impl World {
    /// Creates a world whose root is built from `record`. The world id is the
    /// root's id.
    pub fn new(record: &ObjectRecord, ctx: Arc<UniverseContext>) -> Arc<World> {
        Arc::new_cyclic(|weak| {
            let root = Object::new(record, record.id, weak.clone(), Arc::clone(&ctx));
            let objects = DashMap::new();
            objects.insert(root.id(), Arc::clone(&root));
            World {
                id: record.id,
                root,
                ctx,
                objects,
                users: DashMap::new(),
                meta: RwLock::new(WorldMeta::default()),
                tree_lock: Mutex::new(()),
            }
        })
    }

    /// Rebuilds a world from stored records, root first and every parent
    /// before its children. Attribute payloads are loaded for each object.
    pub async fn from_records(
        records: Vec<ObjectRecord>,
        ctx: Arc<UniverseContext>,
    ) -> Result<Arc<World>> {
        let mut records = records.into_iter();
        let root = records
            .next()
            .ok_or_else(|| UniverseError::NotFound("world root record".to_string()))?;
        let world = World::new(&root, ctx);
        world.root.attributes().load().await?;

        for record in records {
            let parent_id = record.parent_id.unwrap_or(world.id);
            let parent = world.get_object(&parent_id).ok_or_else(|| {
                UniverseError::NotFound(format!(
                    "parent {parent_id} of object {} in world {}",
                    record.id, world.id
                ))
            })?;
            let object = Object::new(&record, world.id, Arc::downgrade(&world), Arc::clone(&world.ctx));
            parent.add_child(&object, false).await?;
            object.attributes().load().await?;
        }

        info!("🌍 World {} loaded with {} objects", world.id, world.object_count());
        Ok(world)
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn root(&self) -> &Arc<Object> {
        &self.root
    }

    pub fn ctx(&self) -> &Arc<UniverseContext> {
        &self.ctx
    }

    pub fn get_object(&self, id: &ObjectId) -> Option<Arc<Object>> {
        self.objects.get(id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub(crate) async fn lock_tree(&self) -> MutexGuard<'_, ()> {
        self.tree_lock.lock().await
    }

    pub(crate) async fn index_subtree(&self, top: &Arc<Object>) {
        for object in top.subtree().await {
            self.objects.insert(object.id(), object);
        }
    }

    pub(crate) async fn unindex_subtree(&self, top: &Arc<Object>) {
        for object in top.subtree().await {
            self.objects.remove(&object.id());
        }
    }

    pub async fn set_avatars(&self, avatar: Option<AssetId>, avatar_3d: Option<AssetId>) {
        let mut meta = self.meta.write().await;
        meta.avatar = avatar;
        meta.avatar_3d = avatar_3d;
    }

    /// Sends `frame` to every session in the world.
    pub async fn broadcast(&self, frame: Bytes) {
        self.root.send(frame, true).await;
    }

    pub async fn set_world_message(&self) -> Bytes {
        let meta = self.meta.read().await.clone();
        SetWorld {
            id: self.id.0,
            name: self.root.name().await,
            avatar: meta.avatar.map(|a| a.0).unwrap_or_default(),
            owner: self.root.owner_id().await.0,
            avatar_3d_asset_id: meta.avatar_3d.map(|a| a.0).unwrap_or_default(),
        }
        .to_frame()
    }

    /// One `AddObjects` frame describing the whole tree, parents first.
    pub async fn spawn_message(&self) -> Bytes {
        let mut objects = Vec::with_capacity(self.objects.len());
        for object in self.root.subtree().await {
            objects.push(object.definition().await);
        }
        AddObjects { objects }.to_frame()
    }

    /// Starts every pipeline and notifier and enables the tree.
    pub async fn run(&self) {
        self.root.run().await;
        self.root.set_enabled_recursive(true).await;
        info!("🌍 World {} running with {} objects", self.id, self.object_count());
    }

    /// Disables the tree and drains its pipelines.
    pub async fn stop(&self) {
        self.root.set_enabled_recursive(false).await;
        self.root.stop().await;
        info!("🌍 World {} stopped", self.id);
    }

    pub fn is_running(&self) -> bool {
        self.root.is_running()
    }

    /// Creates an object under `record.parent_id` (the root when absent),
    /// starts it if the world is running and announces it.
    pub async fn create_object(self: &Arc<Self>, record: &ObjectRecord, persist: bool) -> Result<Arc<Object>> {
        if self.objects.contains_key(&record.id) {
            return Err(UniverseError::Validation(format!(
                "object {} already exists in world {}",
                record.id, self.id
            )));
        }
        let parent = match record.parent_id {
            Some(parent_id) => self.get_object(&parent_id).ok_or_else(|| {
                UniverseError::NotFound(format!("parent {parent_id} in world {}", self.id))
            })?,
            None => Arc::clone(&self.root),
        };

        let object = Object::new(record, self.id, Arc::downgrade(self), Arc::clone(&self.ctx));
        parent.add_child(&object, false).await?;
        if self.is_running() {
            object.run().await;
            object.set_enabled(true);
        }
        self.broadcast(object.spawn_message().await).await;
        debug!("🧱 Object {} created under {}", object.id(), parent.id());

        if persist {
            object.persist().await?;
        }
        Ok(object)
    }

    /// Detaches the object `id` with its subtree, tells clients and stops
    /// the detached workers. Returns whether the object was found.
    pub async fn remove_object(&self, id: &ObjectId, persist: bool) -> Result<bool> {
        if *id == self.id {
            return Err(UniverseError::Validation(format!(
                "root of world {} cannot be removed",
                self.id
            )));
        }
        let Some(object) = self.get_object(id) else {
            return Ok(false);
        };
        let Some(parent) = object.parent().await else {
            return Ok(false);
        };
        let subtree = object.subtree().await;
        let removed = parent.remove_child(id, false, persist).await;
        if matches!(removed, Ok(None)) {
            return Ok(false);
        }

        let ids = subtree.iter().map(|o| o.id().0).collect();
        self.broadcast(RemoveObjects { objects: ids }.to_frame()).await;
        object.set_enabled_recursive(false).await;
        object.stop().await;
        removed.map(|_| true)
    }

    pub fn get_user(&self, user_id: &UserId) -> Option<Arc<Session>> {
        self.users.get(user_id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn users(&self) -> Vec<Arc<Session>> {
        self.users.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    /// Spawns `session` into this world.
    ///
    /// An older session of the same user is told about the dual connection
    /// and closed first. The newcomer's regular sends are held back until it
    /// has received the world snapshot, so everyone else's updates reach it
    /// after the snapshot and in order.
    pub async fn add_user(self: &Arc<Self>, session: &Arc<Session>) -> Result<()> {
        let user_id = session.user_id();
        if let Some(previous) = self.ctx.session(&user_id) {
            if !Arc::ptr_eq(&previous, session) {
                self.replace_previous_session(&previous, session).await;
            }
        }
        self.ctx.register_session(session);

        session.set_world(Some(self)).await;
        if let Some(transform) = self.last_known_position(&user_id).await {
            session.set_transform(transform).await;
        }

        session.lock_send_buffer().await;
        self.root.attach_session(session).await;
        self.users.insert(user_id, Arc::clone(session));
        self.broadcast(
            AddUsers {
                users: vec![session.user_data().await],
            }
            .to_frame(),
        )
        .await;

        let spawned = self.send_spawn_sequence(session).await;
        session.release_send_buffer().await;

        if let Err(e) = spawned {
            warn!("❌ Failed to spawn user {} into world {}: {}", user_id, self.id, e);
            if let Err(cleanup) = self.remove_user(session, true).await {
                warn!("Cleanup after failed spawn of {} failed: {}", user_id, cleanup);
            }
            return Err(e);
        }

        info!(
            "👤 User {} joined world {} (session {})",
            user_id,
            self.id,
            session.session_id()
        );
        Ok(())
    }

    async fn replace_previous_session(&self, previous: &Arc<Session>, session: &Arc<Session>) {
        if previous.session_id() != session.session_id() {
            let signal = Signal {
                value: SignalType::DualConnection,
            }
            .to_frame();
            if let Err(e) = previous.send_direct(signal).await {
                debug!("Dual connection signal to {} not delivered: {}", previous.session_id(), e);
            }
        }
        info!(
            "🔁 User {} connected again, closing session {}",
            previous.user_id(),
            previous.session_id()
        );
        match previous.world().await {
            Some(world) => {
                if let Err(e) = world.remove_user(previous, true).await {
                    warn!("Removing previous session of {} failed: {}", previous.user_id(), e);
                }
            }
            None => {
                previous.stop().await;
                self.ctx.unregister_session(previous);
            }
        }
    }

    async fn send_spawn_sequence(&self, session: &Arc<Session>) -> Result<()> {
        session.send_direct(self.set_world_message().await).await?;
        session
            .send_direct(MyTransform(session.transform().await).to_frame())
            .await?;
        session.send_direct(self.spawn_message().await).await?;

        for object in self.root.subtree().await {
            for frame in object.auto_attribute_messages().await {
                session.send_direct(frame).await?;
            }
        }

        let mut others = Vec::new();
        for other in self.users() {
            if !Arc::ptr_eq(&other, session) {
                others.push(other.user_data().await);
            }
        }
        if !others.is_empty() {
            session
                .send_direct(AddUsers { users: others }.to_frame())
                .await?;
        }
        Ok(())
    }

    /// Takes `session` out of this world and remembers where it was.
    ///
    /// With `stop` the connection is closed and the session leaves the
    /// directory; without it the session stays connected, ready to be added
    /// to another world. Returns whether the session was in this world.
    pub async fn remove_user(&self, session: &Arc<Session>, stop: bool) -> Result<bool> {
        let user_id = session.user_id();
        let removed = self
            .users
            .remove_if(&user_id, |_, current| Arc::ptr_eq(current, session))
            .is_some();
        if !removed {
            if stop {
                session.stop().await;
                self.ctx.unregister_session(session);
            }
            return Ok(false);
        }

        let stored = self
            .store_last_known_position(&user_id, session.transform().await)
            .await;

        if let Some(object) = session.object().await {
            object.detach_session(session).await;
        }
        let in_this_world = session.world().await.is_some_and(|w| w.id == self.id);
        if in_this_world {
            session.set_world(None).await;
        }
        if stop {
            session.stop().await;
            self.ctx.unregister_session(session);
        }

        self.broadcast(
            RemoveUsers {
                users: vec![user_id.0],
            }
            .to_frame(),
        )
        .await;
        info!("👋 User {} left world {}", user_id, self.id);

        stored.map(|_| true)
    }

    async fn last_known_position(&self, user_id: &UserId) -> Option<TransformNoScale> {
        let store = self.ctx.object_user_attributes();
        let owner = AttributeOwner::ObjectUser(self.id, *user_id);
        let id = self.ctx.last_known_position_id();

        if store.get_payload(&owner, &id).await.is_none() {
            if let Err(e) = store.load(&owner).await {
                warn!("Failed to load last position of {} in {}: {}", user_id, self.id, e);
                return None;
            }
        }
        let value = store.get_value(&owner, &id).await?;
        match serde_json::from_value(serde_json::Value::Object(value.into_inner())) {
            Ok(transform) => Some(transform),
            Err(e) => {
                warn!("Ignoring malformed last position of {}: {}", user_id, e);
                None
            }
        }
    }

    async fn store_last_known_position(&self, user_id: &UserId, transform: TransformNoScale) -> Result<()> {
        let value = match serde_json::to_value(transform) {
            Ok(serde_json::Value::Object(map)) => AttributeValue(map),
            Ok(_) => return Ok(()),
            Err(e) => return Err(UniverseError::Internal(e.to_string())),
        };
        let owner = AttributeOwner::ObjectUser(self.id, *user_id);
        self.ctx
            .object_user_attributes()
            .upsert(
                &owner,
                &self.ctx.last_known_position_id(),
                move |current| {
                    let mut payload = current.unwrap_or_default();
                    payload.value = Some(value);
                    Ok::<AttributePayload, UniverseError>(payload)
                },
                true,
            )
            .await
            .map(|_| ())
    }
}
