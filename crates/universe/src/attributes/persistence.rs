//! Durable storage seam.
//!
//! The core never talks to a database directly. Owners write through these
//! traits after their in-memory state has been committed; a failed write is
//! surfaced as [`UniverseError::Persistence`] while memory keeps the new
//! state.

use super::AttributeOwner;
use crate::error::{Result, UniverseError};
use crate::ids::{AssetId, AttributeId, ObjectId, ObjectTypeId, UserId};
use crate::options::{AttributeOptions, AttributePayload, AttributeValue, ObjectOptions};
use async_trait::async_trait;
use dashmap::DashMap;
use posbus::Transform;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};

/// Storage of attribute payloads, keyed by owner and attribute id.
///
/// Implementations must be safe to call concurrently from many owners.
#[async_trait]
pub trait AttributePersistence: Send + Sync {
    /// Loads every payload of `owner`.
    async fn load(&self, owner: &AttributeOwner) -> Result<Vec<(AttributeId, AttributePayload)>>;

    async fn upsert(
        &self,
        owner: &AttributeOwner,
        id: &AttributeId,
        payload: &AttributePayload,
    ) -> Result<()>;

    async fn update_value(
        &self,
        owner: &AttributeOwner,
        id: &AttributeId,
        value: Option<&AttributeValue>,
    ) -> Result<()>;

    async fn update_options(
        &self,
        owner: &AttributeOwner,
        id: &AttributeId,
        options: Option<&AttributeOptions>,
    ) -> Result<()>;

    async fn remove(&self, owner: &AttributeOwner, id: &AttributeId) -> Result<()>;
}

/// Stored shape of an object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectRecord {
    pub id: ObjectId,
    /// `None` only for world roots
    pub parent_id: Option<ObjectId>,
    pub owner_id: UserId,
    pub object_type_id: ObjectTypeId,
    pub name: String,
    #[serde(default)]
    pub asset_3d_id: Option<AssetId>,
    #[serde(default)]
    pub options: Option<ObjectOptions>,
    #[serde(default)]
    pub transform: Option<Transform>,
}

/// Storage of the object tree.
#[async_trait]
pub trait ObjectPersistence: Send + Sync {
    /// Loads every object of the world rooted at `world_id`, root included.
    async fn load_world(&self, world_id: &ObjectId) -> Result<Vec<ObjectRecord>>;

    async fn upsert_object(&self, record: &ObjectRecord) -> Result<()>;

    async fn update_parent(&self, id: &ObjectId, parent_id: Option<&ObjectId>) -> Result<()>;

    async fn remove_object(&self, id: &ObjectId) -> Result<()>;
}

/// In-memory implementation of both storage traits.
///
/// Used as the default backing store and in tests. Writes can be made to fail
/// on demand to exercise the memory-ahead-of-storage path.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    attributes: DashMap<(AttributeOwner, AttributeId), AttributePayload>,
    objects: DashMap<ObjectId, ObjectRecord>,
    fail_writes: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn attribute(&self, owner: &AttributeOwner, id: &AttributeId) -> Option<AttributePayload> {
        self.attributes
            .get(&(*owner, id.clone()))
            .map(|entry| entry.value().clone())
    }

    pub fn object(&self, id: &ObjectId) -> Option<ObjectRecord> {
        self.objects.get(id).map(|entry| entry.value().clone())
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(UniverseError::Persistence("store is rejecting writes".to_string()));
        }
        Ok(())
    }

    fn with_payload<F>(&self, owner: &AttributeOwner, id: &AttributeId, f: F) -> Result<()>
    where
        F: FnOnce(&mut AttributePayload),
    {
        self.check_writable()?;
        match self.attributes.get_mut(&(*owner, id.clone())) {
            Some(mut entry) => {
                f(entry.value_mut());
                Ok(())
            }
            None => Err(UniverseError::NotFound(format!("stored attribute {owner}/{id}"))),
        }
    }
}

#[async_trait]
impl AttributePersistence for InMemoryStore {
    async fn load(&self, owner: &AttributeOwner) -> Result<Vec<(AttributeId, AttributePayload)>> {
        Ok(self
            .attributes
            .iter()
            .filter(|entry| entry.key().0 == *owner)
            .map(|entry| (entry.key().1.clone(), entry.value().clone()))
            .collect())
    }

    async fn upsert(
        &self,
        owner: &AttributeOwner,
        id: &AttributeId,
        payload: &AttributePayload,
    ) -> Result<()> {
        self.check_writable()?;
        self.attributes.insert((*owner, id.clone()), payload.clone());
        Ok(())
    }

    async fn update_value(
        &self,
        owner: &AttributeOwner,
        id: &AttributeId,
        value: Option<&AttributeValue>,
    ) -> Result<()> {
        self.with_payload(owner, id, |payload| payload.value = value.cloned())
    }

    async fn update_options(
        &self,
        owner: &AttributeOwner,
        id: &AttributeId,
        options: Option<&AttributeOptions>,
    ) -> Result<()> {
        self.with_payload(owner, id, |payload| payload.options = options.cloned())
    }

    async fn remove(&self, owner: &AttributeOwner, id: &AttributeId) -> Result<()> {
        self.check_writable()?;
        self.attributes.remove(&(*owner, id.clone()));
        Ok(())
    }
}

#[async_trait]
impl ObjectPersistence for InMemoryStore {
    async fn load_world(&self, world_id: &ObjectId) -> Result<Vec<ObjectRecord>> {
        let root = self
            .object(world_id)
            .ok_or_else(|| UniverseError::NotFound(format!("world {world_id}")))?;

        let mut records = vec![root];
        let mut cursor = 0;
        while cursor < records.len() {
            let parent = records[cursor].id;
            let mut children: Vec<ObjectRecord> = self
                .objects
                .iter()
                .filter(|entry| entry.value().parent_id == Some(parent) && entry.key() != &parent)
                .map(|entry| entry.value().clone())
                .collect();
            children.sort_by_key(|record| record.id);
            records.extend(children);
            cursor += 1;
        }
        Ok(records)
    }

    async fn upsert_object(&self, record: &ObjectRecord) -> Result<()> {
        self.check_writable()?;
        self.objects.insert(record.id, record.clone());
        Ok(())
    }

    async fn update_parent(&self, id: &ObjectId, parent_id: Option<&ObjectId>) -> Result<()> {
        self.check_writable()?;
        match self.objects.get_mut(id) {
            Some(mut entry) => {
                entry.value_mut().parent_id = parent_id.copied();
                Ok(())
            }
            None => Err(UniverseError::NotFound(format!("stored object {id}"))),
        }
    }

    async fn remove_object(&self, id: &ObjectId) -> Result<()> {
        self.check_writable()?;
        self.objects.remove(id);
        Ok(())
    }
}
