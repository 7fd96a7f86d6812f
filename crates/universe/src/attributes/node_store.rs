use super::persistence::AttributePersistence;
use super::{AttributeChange, AttributeMap, AttributeOwner, AttributeTypes};
use crate::error::{Result, UniverseError};
use crate::ids::AttributeId;
use crate::options::{AttributeOptions, AttributePayload, AttributeValue};
use crate::work_queue::WorkQueue;
use posbus::AttributeChangeType;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

/// Attribute store for owners that are not a single object: users,
/// object×user pairs, user×user pairs and the node itself.
///
/// All owners of one store share its lock. Change notifications are queued
/// on the store's notifier once the node has started it.
pub struct NodeAttributeStore {
    kind: &'static str,
    entries: RwLock<HashMap<AttributeOwner, AttributeMap>>,
    types: Arc<AttributeTypes>,
    persistence: Arc<dyn AttributePersistence>,
    notifier: WorkQueue<AttributeChange>,
}

impl NodeAttributeStore {
    pub fn new(
        kind: &'static str,
        types: Arc<AttributeTypes>,
        persistence: Arc<dyn AttributePersistence>,
        notifier_capacity: usize,
    ) -> Self {
        Self {
            kind,
            entries: RwLock::new(HashMap::new()),
            types,
            persistence,
            notifier: WorkQueue::new(format!("{kind}-attributes"), notifier_capacity),
        }
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Starts delivering change notifications to `handler`.
    pub async fn start_notifier<F, Fut>(&self, handler: F)
    where
        F: Fn(AttributeChange) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.notifier.start(handler).await;
    }

    pub async fn stop_notifier(&self) {
        self.notifier.stop().await;
    }

    /// Replaces the in-memory payloads of `owner` with what storage holds.
    pub async fn load(&self, owner: &AttributeOwner) -> Result<usize> {
        let stored = self.persistence.load(owner).await?;
        let count = stored.len();
        self.entries
            .write()
            .await
            .insert(*owner, AttributeMap::from_entries(stored));
        Ok(count)
    }

    pub async fn get_payload(&self, owner: &AttributeOwner, id: &AttributeId) -> Option<AttributePayload> {
        self.entries
            .read()
            .await
            .get(owner)
            .and_then(|map| map.get(id))
            .cloned()
    }

    pub async fn get_value(&self, owner: &AttributeOwner, id: &AttributeId) -> Option<AttributeValue> {
        self.get_payload(owner, id).await.and_then(|p| p.value)
    }

    pub async fn get_options(&self, owner: &AttributeOwner, id: &AttributeId) -> Option<AttributeOptions> {
        self.get_payload(owner, id).await.and_then(|p| p.options)
    }

    pub async fn get_effective_options(
        &self,
        owner: &AttributeOwner,
        id: &AttributeId,
    ) -> Option<AttributeOptions> {
        let instance = self.get_options(owner, id).await;
        self.types.effective_options(id, instance.as_ref())
    }

    pub async fn upsert<F>(
        &self,
        owner: &AttributeOwner,
        id: &AttributeId,
        modify_fn: F,
        persist: bool,
    ) -> Result<AttributePayload>
    where
        F: FnOnce(Option<AttributePayload>) -> Result<AttributePayload>,
    {
        let (payload, change, persisted) = {
            let mut entries = self.entries.write().await;
            let payload = entries.entry(*owner).or_default().upsert(id, modify_fn)?;
            let persisted = if persist {
                self.persistence.upsert(owner, id, &payload).await
            } else {
                Ok(())
            };
            let change = self.change(owner, id, AttributeChangeType::Changed, &payload);
            (payload, change, persisted)
        };
        self.notify(change).await;
        persisted.map(|_| payload)
    }

    pub async fn update_value<F>(
        &self,
        owner: &AttributeOwner,
        id: &AttributeId,
        modify_fn: F,
        persist: bool,
    ) -> Result<AttributePayload>
    where
        F: FnOnce(Option<AttributeValue>) -> Result<Option<AttributeValue>>,
    {
        let (payload, change, persisted) = {
            let mut entries = self.entries.write().await;
            let map = entries
                .get_mut(owner)
                .ok_or_else(|| UniverseError::NotFound(format!("attribute {owner}/{id}")))?;
            let payload = map.update_value(id, modify_fn)?;
            let persisted = if persist {
                self.persistence
                    .update_value(owner, id, payload.value.as_ref())
                    .await
            } else {
                Ok(())
            };
            let change = self.change(owner, id, AttributeChangeType::Changed, &payload);
            (payload, change, persisted)
        };
        self.notify(change).await;
        persisted.map(|_| payload)
    }

    pub async fn update_options<F>(
        &self,
        owner: &AttributeOwner,
        id: &AttributeId,
        modify_fn: F,
        persist: bool,
    ) -> Result<AttributePayload>
    where
        F: FnOnce(Option<AttributeOptions>) -> Result<Option<AttributeOptions>>,
    {
        let (payload, change, persisted) = {
            let mut entries = self.entries.write().await;
            let map = entries
                .get_mut(owner)
                .ok_or_else(|| UniverseError::NotFound(format!("attribute {owner}/{id}")))?;
            let payload = map.update_options(id, modify_fn)?;
            let persisted = if persist {
                self.persistence
                    .update_options(owner, id, payload.options.as_ref())
                    .await
            } else {
                Ok(())
            };
            let change = self.change(owner, id, AttributeChangeType::Changed, &payload);
            (payload, change, persisted)
        };
        self.notify(change).await;
        persisted.map(|_| payload)
    }

    /// Removes a payload. Returns whether anything was removed.
    pub async fn remove(&self, owner: &AttributeOwner, id: &AttributeId, persist: bool) -> Result<bool> {
        let (change, persisted) = {
            let mut entries = self.entries.write().await;
            let Some(map) = entries.get_mut(owner) else {
                return Ok(false);
            };
            let Some(removed) = map.remove(id) else {
                return Ok(false);
            };
            if map.is_empty() {
                entries.remove(owner);
            }
            let persisted = if persist {
                self.persistence.remove(owner, id).await
            } else {
                Ok(())
            };
            let change = self.change(owner, id, AttributeChangeType::Removed, &removed);
            (change, persisted)
        };
        self.notify(change).await;
        persisted.map(|_| true)
    }

    fn change(
        &self,
        owner: &AttributeOwner,
        id: &AttributeId,
        change_type: AttributeChangeType,
        payload: &AttributePayload,
    ) -> AttributeChange {
        AttributeChange {
            owner: *owner,
            attribute_id: id.clone(),
            change_type,
            value: match change_type {
                AttributeChangeType::Changed => payload.value.clone(),
                AttributeChangeType::Removed => None,
            },
            effective_options: self.types.effective_options(id, payload.options.as_ref()),
        }
    }

    async fn notify(&self, change: AttributeChange) {
        let has_auto = change
            .effective_options
            .as_ref()
            .is_some_and(|o| o.auto().is_some());
        if has_auto && !self.notifier.push(change).await {
            warn!("🔕 {} attribute notifier is not running, change not broadcast", self.kind);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::{AttributeType, InMemoryStore};
    use crate::ids::{PluginId, UserId};
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn store_with(types: Arc<AttributeTypes>, backend: Arc<InMemoryStore>) -> NodeAttributeStore {
        NodeAttributeStore::new("user", types, backend, 8)
    }

    fn value(v: serde_json::Value) -> AttributeValue {
        AttributeValue::from_json(v).unwrap()
    }

    #[tokio::test]
    async fn test_memory_is_ahead_when_persisting_fails() {
        let backend = Arc::new(InMemoryStore::new());
        let store = store_with(Arc::new(AttributeTypes::new()), Arc::clone(&backend));
        let owner = AttributeOwner::User(UserId::new());
        let id = AttributeId::new(PluginId::nil(), "status");

        backend.set_fail_writes(true);
        let result = store
            .upsert(&owner, &id, |_| Ok(AttributePayload::with_value(value(json!({"s": "away"})))), true)
            .await;
        assert!(matches!(result, Err(UniverseError::Persistence(_))));
        assert_eq!(store.get_value(&owner, &id).await, Some(value(json!({"s": "away"}))));
        assert!(backend.attribute(&owner, &id).is_none());
    }

    #[tokio::test]
    async fn test_removed_change_keeps_options_in_effect() {
        let types = Arc::new(AttributeTypes::new());
        let id = AttributeId::new(PluginId::new(), "badge");
        types.insert(AttributeType {
            id: id.clone(),
            description: None,
            options: Some(
                AttributeOptions::from_json(json!({"posbus_auto": {"scope": ["user"]}})).unwrap(),
            ),
        });
        let store = store_with(types, Arc::new(InMemoryStore::new()));
        let (tx, mut rx) = mpsc::unbounded_channel();
        store
            .start_notifier(move |change: AttributeChange| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(change);
                }
            })
            .await;

        let owner = AttributeOwner::User(UserId::new());
        store
            .upsert(&owner, &id, |_| Ok(AttributePayload::with_value(value(json!({"b": 1})))), false)
            .await
            .unwrap();
        assert!(store.remove(&owner, &id, false).await.unwrap());
        assert!(!store.remove(&owner, &id, false).await.unwrap());

        let changed = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert_eq!(changed.change_type, AttributeChangeType::Changed);
        let removed = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert_eq!(removed.change_type, AttributeChangeType::Removed);
        assert!(removed.value.is_none());
        assert!(removed.effective_options.unwrap().auto().is_some());

        store.stop_notifier().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_upserts_keep_exactly_one_result() {
        let store = Arc::new(store_with(
            Arc::new(AttributeTypes::new()),
            Arc::new(InMemoryStore::new()),
        ));
        let owner = AttributeOwner::Node;
        let id = AttributeId::new(PluginId::nil(), "winner");

        let mut handles = Vec::new();
        for writer in 0..2 {
            let store = Arc::clone(&store);
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                store
                    .upsert(&owner, &id, move |_| Ok(AttributePayload::with_value(value(json!({"w": writer})))), false)
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let stored = store.get_value(&owner, &id).await.unwrap();
        let w = stored.get("w").and_then(|v| v.as_i64()).unwrap();
        assert!(w == 0 || w == 1);
    }
}
