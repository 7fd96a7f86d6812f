//! Objects of the spatial tree.
//!
//! An [`Object`] owns its children (strong references) and points back at its
//! parent weakly, so a detached subtree stays intact for as long as someone
//! holds its top. All of an object's mutable state sits behind one lock:
//! parent link, children, options and their cached effective value,
//! transform and attribute payloads.
//!
//! While running, an object has two workers: its [`BroadcastPipeline`] and
//! an attribute change notifier feeding the auto handlers.

mod attributes;
mod tree;
pub mod types;

pub use attributes::ObjectAttributes;
pub use types::{ObjectType, ObjectTypes, ASSET_FORMAT_ADDRESSABLE};

use crate::attributes::{AttributeChange, AttributeMap, AttributeOwner, ObjectRecord};
use crate::auto;
use crate::context::UniverseContext;
use crate::error::{Result, UniverseError};
use crate::ids::{AssetId, ObjectId, ObjectTypeId, UserId};
use crate::merge::merge;
use crate::options::{AutoScope, ObjectOptions};
use crate::pipeline::{AttachedSessions, BroadcastPipeline, PipelineState};
use crate::session::Session;
use crate::work_queue::WorkQueue;
use crate::world::World;
use bytes::Bytes;
use posbus::{
    AddObjects, AttributeChangeType, Message, ObjectDefinition, ObjectTransform, Transform,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::RwLock;
use tracing::{debug, warn};

pub(crate) struct ObjectState {
    parent: Option<Weak<Object>>,
    children: HashMap<ObjectId, Arc<Object>>,
    owner_id: UserId,
    object_type_id: ObjectTypeId,
    name: String,
    asset_3d_id: Option<AssetId>,
    options: Option<ObjectOptions>,
    /// `None` until computed; cleared whenever options or type change
    effective_options: Option<Option<ObjectOptions>>,
    transform: Option<Transform>,
    attributes: AttributeMap,
}

pub struct Object {
    id: ObjectId,
    world_id: ObjectId,
    world: Weak<World>,
    ctx: Arc<UniverseContext>,
    state: RwLock<ObjectState>,
    sessions: Arc<AttachedSessions>,
    pipeline: BroadcastPipeline,
    notifier: WorkQueue<AttributeChange>,
    enabled: AtomicBool,
}

impl std::fmt::Debug for Object {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Object")
            .field("id", &self.id)
            .field("world_id", &self.world_id)
            .finish()
    }
}

impl Object {
    /// Builds a detached, stopped, disabled object from its stored shape.
    /// The record's parent id is ignored; linking is done with
    /// [`Object::add_child`].
    pub(crate) fn new(
        record: &ObjectRecord,
        world_id: ObjectId,
        world: Weak<World>,
        ctx: Arc<UniverseContext>,
    ) -> Arc<Self> {
        let config = ctx.config();
        Arc::new(Object {
            id: record.id,
            world_id,
            world,
            pipeline: BroadcastPipeline::new(format!("object-{}", record.id), config.pipeline_capacity),
            notifier: WorkQueue::new(format!("object-{}-attributes", record.id), config.notifier_capacity),
            state: RwLock::new(ObjectState {
                parent: None,
                children: HashMap::new(),
                owner_id: record.owner_id,
                object_type_id: record.object_type_id,
                name: record.name.clone(),
                asset_3d_id: record.asset_3d_id,
                options: record.options.clone(),
                effective_options: None,
                transform: record.transform,
                attributes: AttributeMap::new(),
            }),
            sessions: Arc::new(AttachedSessions::new()),
            enabled: AtomicBool::new(false),
            ctx,
        })
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn world_id(&self) -> ObjectId {
        self.world_id
    }

    pub fn world(&self) -> Option<Arc<World>> {
        self.world.upgrade()
    }

    pub fn ctx(&self) -> &Arc<UniverseContext> {
        &self.ctx
    }

    pub async fn parent(&self) -> Option<Arc<Object>> {
        self.state.read().await.parent.as_ref().and_then(Weak::upgrade)
    }

    /// Direct children, ordered by id.
    pub async fn children(&self) -> Vec<Arc<Object>> {
        let mut children: Vec<Arc<Object>> =
            self.state.read().await.children.values().cloned().collect();
        children.sort_by_key(|c| c.id);
        children
    }

    pub async fn name(&self) -> String {
        self.state.read().await.name.clone()
    }

    pub async fn owner_id(&self) -> UserId {
        self.state.read().await.owner_id
    }

    pub async fn object_type_id(&self) -> ObjectTypeId {
        self.state.read().await.object_type_id
    }

    pub async fn transform(&self) -> Option<Transform> {
        self.state.read().await.transform
    }

    pub async fn options(&self) -> Option<ObjectOptions> {
        self.state.read().await.options.clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.pipeline.state() == PipelineState::Running
    }

    /// Instance options merged over the object type's defaults. Memoized
    /// until the options or the type change.
    pub async fn effective_options(&self) -> Option<ObjectOptions> {
        if let Some(cached) = &self.state.read().await.effective_options {
            return cached.clone();
        }

        let mut state = self.state.write().await;
        if let Some(cached) = &state.effective_options {
            return cached.clone();
        }
        let defaults = self
            .ctx
            .object_types()
            .get(&state.object_type_id)
            .and_then(|t| t.options);
        let merged = merge(state.options.as_ref(), defaults.as_ref(), self.ctx.object_hooks());
        state.effective_options = Some(merged.clone());
        merged
    }

    pub async fn set_options(&self, options: Option<ObjectOptions>, persist: bool) -> Result<()> {
        {
            let mut state = self.state.write().await;
            state.options = options;
            state.effective_options = None;
        }
        if persist {
            self.persist().await?;
        }
        Ok(())
    }

    /// Switches the object to another registered type.
    pub async fn set_object_type(&self, object_type_id: ObjectTypeId, persist: bool) -> Result<()> {
        if self.ctx.object_types().get(&object_type_id).is_none() {
            return Err(UniverseError::NotFound(format!("object type {object_type_id}")));
        }
        {
            let mut state = self.state.write().await;
            state.object_type_id = object_type_id;
            state.effective_options = None;
        }
        if persist {
            self.persist().await?;
        }
        Ok(())
    }

    /// Updates the transform and optionally tells the whole world.
    pub async fn set_transform(
        &self,
        transform: Transform,
        broadcast: bool,
        persist: bool,
    ) -> Result<()> {
        self.state.write().await.transform = Some(transform);

        if broadcast {
            if let Some(world) = self.world() {
                let frame = ObjectTransform {
                    id: self.id.0,
                    transform,
                }
                .to_frame();
                world.broadcast(frame).await;
            }
        }
        if persist {
            self.persist().await?;
        }
        Ok(())
    }

    /// Stored shape of this object.
    pub async fn to_record(&self) -> ObjectRecord {
        let state = self.state.read().await;
        ObjectRecord {
            id: self.id,
            parent_id: state.parent.as_ref().and_then(Weak::upgrade).map(|p| p.id),
            owner_id: state.owner_id,
            object_type_id: state.object_type_id,
            name: state.name.clone(),
            asset_3d_id: state.asset_3d_id,
            options: state.options.clone(),
            transform: state.transform,
        }
    }

    pub(crate) async fn persist(&self) -> Result<()> {
        let record = self.to_record().await;
        self.ctx.object_store().upsert_object(&record).await
    }

    /// Client-facing description of this object.
    pub async fn definition(&self) -> ObjectDefinition {
        let effective = self.effective_options().await.unwrap_or_default();
        let state = self.state.read().await;
        let parent_id = state
            .parent
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|p| p.id.0)
            .unwrap_or_default();
        let asset = state.asset_3d_id.or_else(|| {
            self.ctx
                .object_types()
                .get(&state.object_type_id)
                .and_then(|t| t.asset_3d_id)
        });
        ObjectDefinition {
            id: self.id.0,
            parent_id,
            asset_type: asset.map(|a| a.0).unwrap_or_default(),
            asset_format: ASSET_FORMAT_ADDRESSABLE,
            name: state.name.clone(),
            transform: state.transform.unwrap_or_default(),
            is_editable: effective.editable.unwrap_or(true),
            tethered_to_parent: true,
            show_on_minimap: effective.minimap.unwrap_or(true),
        }
    }

    /// `AddObjects` frame announcing this object alone.
    pub async fn spawn_message(&self) -> Bytes {
        AddObjects {
            objects: vec![self.definition().await],
        }
        .to_frame()
    }

    /// Hands `frame` to this object's pipeline and, if `recursive`, to every
    /// descendant's. Returns the number of enqueue attempts made.
    ///
    /// Disabled objects are skipped but still counted.
    pub async fn send(self: &Arc<Self>, frame: Bytes, recursive: bool) -> usize {
        let mut attempts = 0;
        let mut stack = vec![Arc::clone(self)];
        while let Some(object) = stack.pop() {
            attempts += 1;
            if object.is_enabled() && !object.pipeline.send(frame.clone()).await {
                debug!("Object {} is not running, frame dropped", object.id);
            }
            if recursive {
                stack.extend(object.state.read().await.children.values().cloned());
            }
        }
        attempts
    }

    /// Starts the pipeline and notifier of this object and every descendant.
    pub async fn run(self: &Arc<Self>) {
        for object in self.subtree().await {
            object.run_single().await;
        }
    }

    async fn run_single(self: &Arc<Self>) {
        self.pipeline
            .run(format!("object {}", self.id), Arc::clone(&self.sessions))
            .await;

        let weak = Arc::downgrade(self);
        self.notifier
            .start(move |change: AttributeChange| {
                let weak = weak.clone();
                async move {
                    if let Some(object) = weak.upgrade() {
                        let errors = auto::dispatch_object_change(&object, &change).await;
                        if !errors.is_empty() {
                            warn!(
                                "📭 Auto broadcast of {} on object {} failed: {}",
                                change.attribute_id, object.id, errors
                            );
                        }
                    }
                }
            })
            .await;
    }

    /// Drains and stops the workers of this object and every descendant.
    pub async fn stop(self: &Arc<Self>) {
        for object in self.subtree().await {
            object.notifier.stop().await;
            object.pipeline.stop().await;
        }
    }

    /// Enables or disables this object and every descendant.
    pub async fn set_enabled_recursive(self: &Arc<Self>, enabled: bool) {
        for object in self.subtree().await {
            object.set_enabled(enabled);
        }
    }

    /// Attaches `session`, detaching it from whatever object it was on.
    pub async fn attach_session(self: &Arc<Self>, session: &Arc<Session>) {
        if let Some(previous) = session.replace_object(Some(self)).await {
            if !Arc::ptr_eq(&previous, self) {
                previous.sessions.remove(session).await;
            }
        }
        self.sessions.insert(session).await;
    }

    /// Returns whether `session` was attached here.
    pub async fn detach_session(self: &Arc<Self>, session: &Arc<Session>) -> bool {
        let removed = self.sessions.remove(session).await;
        if removed {
            session.clear_object(self).await;
        }
        removed
    }

    pub async fn get_session(&self, user_id: &UserId) -> Option<Arc<Session>> {
        self.sessions.get(user_id).await
    }

    pub async fn sessions(&self) -> Vec<Arc<Session>> {
        self.sessions.snapshot().await
    }

    /// Attribute operations on this object.
    pub fn attributes(self: &Arc<Self>) -> ObjectAttributes<'_> {
        ObjectAttributes::new(self)
    }

    /// `AttributeValueChanged` frames for every attribute whose auto
    /// behavior is visible to the whole object or world.
    pub async fn auto_attribute_messages(&self) -> Vec<Bytes> {
        let state = self.state.read().await;
        let mut frames = Vec::new();
        for (id, payload) in state.attributes.iter() {
            let change = AttributeChange {
                owner: AttributeOwner::Object(self.id),
                attribute_id: id.clone(),
                change_type: AttributeChangeType::Changed,
                value: payload.value.clone(),
                effective_options: self
                    .ctx
                    .attribute_types()
                    .effective_options(id, payload.options.as_ref()),
            };
            if let Some((option, frame)) = auto::change_message(&change) {
                let shared = option
                    .scope
                    .iter()
                    .any(|s| matches!(s, AutoScope::Object | AutoScope::World));
                if shared {
                    frames.push(frame);
                }
            }
        }
        frames
    }
}

#[cfg(test)]
mod tests;
