//! Shared state handed to every world and object.
//!
//! Everything that would otherwise be a process-wide singleton (type
//! registries, storage backends, the session directory, node-level attribute
//! stores) lives here and is passed around as `Arc<UniverseContext>`.

use crate::attributes::{
    AttributePersistence, AttributeTypes, InMemoryStore, NodeAttributeStore, ObjectPersistence,
};
use crate::config::UniverseConfig;
use crate::ids::{AttributeId, UserId};
use crate::merge::MergeHooks;
use crate::object::ObjectTypes;
use crate::session::Session;
use crate::users::{StaticProfiles, UserProfileSource};
use dashmap::DashMap;
use std::sync::{Arc, Weak};
use tracing::debug;

pub struct UniverseContext {
    config: UniverseConfig,
    attribute_types: Arc<AttributeTypes>,
    object_types: ObjectTypes,
    object_hooks: MergeHooks,
    attribute_store: Arc<dyn AttributePersistence>,
    object_store: Arc<dyn ObjectPersistence>,
    profiles: Arc<dyn UserProfileSource>,
    sessions: DashMap<UserId, Weak<Session>>,
    user_attributes: NodeAttributeStore,
    object_user_attributes: NodeAttributeStore,
    user_user_attributes: NodeAttributeStore,
    node_attributes: NodeAttributeStore,
}

/// Builder for [`UniverseContext`]; unset backends default to in-memory.
pub struct UniverseContextBuilder {
    config: UniverseConfig,
    attribute_store: Option<Arc<dyn AttributePersistence>>,
    object_store: Option<Arc<dyn ObjectPersistence>>,
    profiles: Option<Arc<dyn UserProfileSource>>,
    attribute_hooks: MergeHooks,
    object_hooks: MergeHooks,
}

impl UniverseContextBuilder {
    pub fn attribute_store(mut self, store: Arc<dyn AttributePersistence>) -> Self {
        self.attribute_store = Some(store);
        self
    }

    pub fn object_store(mut self, store: Arc<dyn ObjectPersistence>) -> Self {
        self.object_store = Some(store);
        self
    }

    /// Uses one store for both attributes and objects.
    pub fn store<S>(self, store: Arc<S>) -> Self
    where
        S: AttributePersistence + ObjectPersistence + 'static,
    {
        let attributes: Arc<dyn AttributePersistence> = store.clone();
        let objects: Arc<dyn ObjectPersistence> = store;
        self.attribute_store(attributes).object_store(objects)
    }

    pub fn profiles(mut self, profiles: Arc<dyn UserProfileSource>) -> Self {
        self.profiles = Some(profiles);
        self
    }

    /// Merge hooks applied when attribute options are merged over their
    /// type defaults.
    pub fn attribute_hooks(mut self, hooks: MergeHooks) -> Self {
        self.attribute_hooks = hooks;
        self
    }

    /// Replaces the object option hooks (default:
    /// [`MergeHooks::object_options`]).
    pub fn object_hooks(mut self, hooks: MergeHooks) -> Self {
        self.object_hooks = hooks;
        self
    }

    pub fn build(self) -> Arc<UniverseContext> {
        let (attribute_store, object_store) = match (self.attribute_store, self.object_store) {
            (Some(a), Some(o)) => (a, o),
            (a, o) => {
                let memory = Arc::new(InMemoryStore::new());
                let a = a.unwrap_or_else(|| memory.clone() as Arc<dyn AttributePersistence>);
                let o = o.unwrap_or_else(|| memory as Arc<dyn ObjectPersistence>);
                (a, o)
            }
        };
        let attribute_types = Arc::new(AttributeTypes::with_hooks(self.attribute_hooks));
        let capacity = self.config.notifier_capacity;
        let node_store = |kind: &'static str| {
            NodeAttributeStore::new(
                kind,
                Arc::clone(&attribute_types),
                Arc::clone(&attribute_store),
                capacity,
            )
        };

        Arc::new(UniverseContext {
            user_attributes: node_store("user"),
            object_user_attributes: node_store("object_user"),
            user_user_attributes: node_store("user_user"),
            node_attributes: node_store("node"),
            config: self.config,
            object_types: ObjectTypes::new(),
            object_hooks: self.object_hooks,
            profiles: self
                .profiles
                .unwrap_or_else(|| Arc::new(StaticProfiles::new())),
            sessions: DashMap::new(),
            attribute_types,
            attribute_store,
            object_store,
        })
    }
}

impl UniverseContext {
    pub fn builder(config: UniverseConfig) -> UniverseContextBuilder {
        UniverseContextBuilder {
            config,
            attribute_store: None,
            object_store: None,
            profiles: None,
            attribute_hooks: MergeHooks::default(),
            object_hooks: MergeHooks::object_options(),
        }
    }

    /// Context with in-memory storage and guest profiles.
    pub fn in_memory(config: UniverseConfig) -> Arc<Self> {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &UniverseConfig {
        &self.config
    }

    pub fn attribute_types(&self) -> &AttributeTypes {
        &self.attribute_types
    }

    pub fn object_types(&self) -> &ObjectTypes {
        &self.object_types
    }

    pub fn object_hooks(&self) -> &MergeHooks {
        &self.object_hooks
    }

    pub fn attribute_store(&self) -> &Arc<dyn AttributePersistence> {
        &self.attribute_store
    }

    pub fn object_store(&self) -> &Arc<dyn ObjectPersistence> {
        &self.object_store
    }

    pub fn profiles(&self) -> &Arc<dyn UserProfileSource> {
        &self.profiles
    }

    pub fn user_attributes(&self) -> &NodeAttributeStore {
        &self.user_attributes
    }

    pub fn object_user_attributes(&self) -> &NodeAttributeStore {
        &self.object_user_attributes
    }

    pub fn user_user_attributes(&self) -> &NodeAttributeStore {
        &self.user_user_attributes
    }

    pub fn node_attributes(&self) -> &NodeAttributeStore {
        &self.node_attributes
    }

    /// The four node-level stores, in a fixed order.
    pub fn node_level_stores(&self) -> [&NodeAttributeStore; 4] {
        [
            &self.user_attributes,
            &self.object_user_attributes,
            &self.user_user_attributes,
            &self.node_attributes,
        ]
    }

    /// Id of the system attribute that remembers where a user left a world.
    pub fn last_known_position_id(&self) -> AttributeId {
        AttributeId::new(self.config.system_plugin_id, "last_known_position")
    }

    /// Records `session` as the live session of its user, replacing any
    /// previous one.
    pub fn register_session(&self, session: &Arc<Session>) {
        self.sessions
            .insert(session.user_id(), Arc::downgrade(session));
    }

    /// Forgets `session`, unless its user has reconnected meanwhile.
    pub fn unregister_session(&self, session: &Arc<Session>) {
        let removed = self.sessions.remove_if(&session.user_id(), |_, weak| {
            std::ptr::eq(weak.as_ptr(), Arc::as_ptr(session))
        });
        if removed.is_some() {
            debug!("Session {} unregistered", session.session_id());
        }
    }

    /// Live session of `user_id`, on any world.
    pub fn session(&self, user_id: &UserId) -> Option<Arc<Session>> {
        self.sessions.get(user_id).and_then(|weak| weak.upgrade())
    }

    pub fn session_count(&self) -> usize {
        self.sessions.iter().filter(|e| e.value().strong_count() > 0).count()
    }
}
