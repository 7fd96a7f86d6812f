//! Attribute storage primitives shared by every owner kind.
//!
//! An attribute payload is owned by exactly one `(owner, attribute id)` pair.
//! [`AttributeMap`] is the plain in-memory map; the lock that serializes
//! mutations belongs to whoever holds the map (an object, or a node-level
//! store).

pub mod node_store;
pub mod persistence;

use crate::error::{Result, UniverseError};
use crate::ids::{AttributeId, ObjectId, UserId};
use crate::merge::{merge, MergeHooks};
use crate::options::{AttributeOptions, AttributePayload, AttributeValue};
use dashmap::DashMap;
use posbus::AttributeChangeType;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

pub use node_store::NodeAttributeStore;
pub use persistence::{AttributePersistence, InMemoryStore, ObjectPersistence, ObjectRecord};

/// Owner of an attribute payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttributeOwner {
    Object(ObjectId),
    User(UserId),
    ObjectUser(ObjectId, UserId),
    /// `(source, target)`
    UserUser(UserId, UserId),
    Node,
}

impl AttributeOwner {
    /// Id reported as `target_id` in change notifications.
    pub fn target_id(&self) -> Uuid {
        match self {
            AttributeOwner::Object(object_id) => object_id.0,
            AttributeOwner::User(user_id) => user_id.0,
            AttributeOwner::ObjectUser(object_id, _) => object_id.0,
            AttributeOwner::UserUser(_, target) => target.0,
            AttributeOwner::Node => Uuid::nil(),
        }
    }
}

impl fmt::Display for AttributeOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeOwner::Object(id) => write!(f, "object:{id}"),
            AttributeOwner::User(id) => write!(f, "user:{id}"),
            AttributeOwner::ObjectUser(object_id, user_id) => {
                write!(f, "object_user:{object_id}:{user_id}")
            }
            AttributeOwner::UserUser(source, target) => write!(f, "user_user:{source}:{target}"),
            AttributeOwner::Node => write!(f, "node"),
        }
    }
}

/// One committed attribute mutation, as handed to the auto handlers.
///
/// `effective_options` are resolved while the owner's lock is still held, so a
/// notification never sees options older than the mutation itself.
#[derive(Debug, Clone)]
pub struct AttributeChange {
    pub owner: AttributeOwner,
    pub attribute_id: AttributeId,
    pub change_type: AttributeChangeType,
    pub value: Option<AttributeValue>,
    pub effective_options: Option<AttributeOptions>,
}

/// Type-level description of an attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeType {
    pub id: AttributeId,
    #[serde(default)]
    pub description: Option<String>,
    /// Default options every instance is merged over
    #[serde(default)]
    pub options: Option<AttributeOptions>,
}

/// Registry of attribute types.
#[derive(Debug, Default)]
pub struct AttributeTypes {
    types: DashMap<AttributeId, AttributeType>,
    hooks: MergeHooks,
}

impl AttributeTypes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry whose effective options are merged with `hooks`.
    pub fn with_hooks(hooks: MergeHooks) -> Self {
        Self {
            types: DashMap::new(),
            hooks,
        }
    }

    pub fn insert(&self, attribute_type: AttributeType) {
        self.types.insert(attribute_type.id.clone(), attribute_type);
    }

    pub fn get(&self, id: &AttributeId) -> Option<AttributeType> {
        self.types.get(id).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, id: &AttributeId) -> Option<AttributeType> {
        self.types.remove(id).map(|(_, t)| t)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Merges instance options over the type's default options.
    pub fn effective_options(
        &self,
        id: &AttributeId,
        instance: Option<&AttributeOptions>,
    ) -> Option<AttributeOptions> {
        let defaults = self.types.get(id).and_then(|t| t.options.clone());
        merge(instance, defaults.as_ref(), &self.hooks)
    }
}

/// In-memory attribute payloads of one owner.
#[derive(Debug, Clone, Default)]
pub struct AttributeMap {
    entries: HashMap<AttributeId, AttributePayload>,
}

impl AttributeMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = (AttributeId, AttributePayload)>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    pub fn get(&self, id: &AttributeId) -> Option<&AttributePayload> {
        self.entries.get(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&AttributeId, &AttributePayload)> {
        self.entries.iter()
    }

    /// Replaces the payload of `id` with whatever `modify_fn` builds from the
    /// current one. On error nothing is changed.
    pub fn upsert<F>(&mut self, id: &AttributeId, modify_fn: F) -> Result<AttributePayload>
    where
        F: FnOnce(Option<AttributePayload>) -> Result<AttributePayload>,
    {
        let current = self.entries.get(id).cloned();
        let next = modify_fn(current)?;
        self.entries.insert(id.clone(), next.clone());
        Ok(next)
    }

    /// Rewrites the value of an existing payload.
    pub fn update_value<F>(&mut self, id: &AttributeId, modify_fn: F) -> Result<AttributePayload>
    where
        F: FnOnce(Option<AttributeValue>) -> Result<Option<AttributeValue>>,
    {
        let payload = self
            .entries
            .get_mut(id)
            .ok_or_else(|| UniverseError::NotFound(format!("attribute {id}")))?;
        payload.value = modify_fn(payload.value.clone())?;
        Ok(payload.clone())
    }

    /// Rewrites the instance options of an existing payload.
    pub fn update_options<F>(&mut self, id: &AttributeId, modify_fn: F) -> Result<AttributePayload>
    where
        F: FnOnce(Option<AttributeOptions>) -> Result<Option<AttributeOptions>>,
    {
        let payload = self
            .entries
            .get_mut(id)
            .ok_or_else(|| UniverseError::NotFound(format!("attribute {id}")))?;
        payload.options = modify_fn(payload.options.clone())?;
        Ok(payload.clone())
    }

    pub fn remove(&mut self, id: &AttributeId) -> Option<AttributePayload> {
        self.entries.remove(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::PluginId;
    use crate::options::AutoScope;
    use serde_json::json;

    fn attr(name: &str) -> AttributeId {
        AttributeId::new(PluginId::nil(), name)
    }

    #[test]
    fn test_update_requires_existing_payload() {
        let mut map = AttributeMap::new();
        let result = map.update_value(&attr("missing"), |v| Ok(v));
        assert!(matches!(result, Err(UniverseError::NotFound(_))));
        assert!(map.is_empty());
    }

    #[test]
    fn test_failed_modify_leaves_payload_untouched() {
        let mut map = AttributeMap::new();
        let id = attr("name");
        let value = AttributeValue::from_json(json!({"v": 1})).unwrap();
        map.upsert(&id, |_| Ok(AttributePayload::with_value(value.clone())))
            .unwrap();

        let result = map.upsert(&id, |_| Err(UniverseError::Validation("rejected".into())));
        assert!(result.is_err());
        assert_eq!(map.get(&id).and_then(|p| p.value.clone()), Some(value));
    }

    #[test]
    fn test_effective_options_merge_type_defaults() {
        let types = AttributeTypes::new();
        let id = attr("state");
        types.insert(AttributeType {
            id: id.clone(),
            description: None,
            options: Some(
                AttributeOptions::from_json(json!({"posbus_auto": {"scope": ["object"]}})).unwrap(),
            ),
        });

        let effective = types.effective_options(&id, None).unwrap();
        assert_eq!(effective.auto().unwrap().scope, vec![AutoScope::Object]);
        assert!(types.effective_options(&attr("unknown"), None).is_none());
    }

    #[test]
    fn test_owner_target_id() {
        let object = ObjectId::new();
        let user = UserId::new();
        assert_eq!(AttributeOwner::ObjectUser(object, user).target_id(), object.0);
        assert_eq!(AttributeOwner::User(user).target_id(), user.0);
        assert!(AttributeOwner::Node.target_id().is_nil());
    }
}
