use super::Object;
use crate::attributes::{AttributeChange, AttributeMap, AttributeOwner};
use crate::error::Result;
use crate::ids::AttributeId;
use crate::options::{AttributeOptions, AttributePayload, AttributeValue};
use posbus::AttributeChangeType;
use std::sync::Arc;
use tracing::debug;

/// Attribute payloads owned by one object.
///
/// Mutations run under the object's state lock: the in-memory map is updated
/// first, storage is written next, and the change is queued for the auto
/// handlers last. A storage failure is returned after the in-memory change
/// has been kept and announced.
pub struct ObjectAttributes<'a> {
    object: &'a Arc<Object>,
}

impl<'a> ObjectAttributes<'a> {
    pub(crate) fn new(object: &'a Arc<Object>) -> Self {
        Self { object }
    }

    fn owner(&self) -> AttributeOwner {
        AttributeOwner::Object(self.object.id)
    }

    /// Replaces the in-memory payloads with what storage holds.
    pub async fn load(&self) -> Result<usize> {
        let stored = self.object.ctx.attribute_store().load(&self.owner()).await?;
        let count = stored.len();
        let mut state = self.object.state.write().await;
        state.attributes = AttributeMap::from_entries(stored);
        Ok(count)
    }

    pub async fn len(&self) -> usize {
        self.object.state.read().await.attributes.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn get_payload(&self, id: &AttributeId) -> Option<AttributePayload> {
        self.object.state.read().await.attributes.get(id).cloned()
    }

    pub async fn get_value(&self, id: &AttributeId) -> Option<AttributeValue> {
        self.get_payload(id).await.and_then(|p| p.value)
    }

    pub async fn get_options(&self, id: &AttributeId) -> Option<AttributeOptions> {
        self.get_payload(id).await.and_then(|p| p.options)
    }

    /// Instance options merged over the attribute type's defaults.
    pub async fn get_effective_options(&self, id: &AttributeId) -> Option<AttributeOptions> {
        let instance = self.get_options(id).await;
        self.object
            .ctx
            .attribute_types()
            .effective_options(id, instance.as_ref())
    }

    pub async fn upsert<F>(&self, id: &AttributeId, modify_fn: F, persist: bool) -> Result<AttributePayload>
    where
        F: FnOnce(Option<AttributePayload>) -> Result<AttributePayload>,
    {
        let owner = self.owner();
        let (payload, change, persisted) = {
            let mut state = self.object.state.write().await;
            let payload = state.attributes.upsert(id, modify_fn)?;
            let persisted = if persist {
                self.object.ctx.attribute_store().upsert(&owner, id, &payload).await
            } else {
                Ok(())
            };
            let change = self.change(id, AttributeChangeType::Changed, &payload);
            (payload, change, persisted)
        };
        self.notify(change).await;
        persisted.map(|_| payload)
    }

    pub async fn update_value<F>(&self, id: &AttributeId, modify_fn: F, persist: bool) -> Result<AttributePayload>
    where
        F: FnOnce(Option<AttributeValue>) -> Result<Option<AttributeValue>>,
    {
        let owner = self.owner();
        let (payload, change, persisted) = {
            let mut state = self.object.state.write().await;
            let payload = state.attributes.update_value(id, modify_fn)?;
            let persisted = if persist {
                self.object
                    .ctx
                    .attribute_store()
                    .update_value(&owner, id, payload.value.as_ref())
                    .await
            } else {
                Ok(())
            };
            let change = self.change(id, AttributeChangeType::Changed, &payload);
            (payload, change, persisted)
        };
        self.notify(change).await;
        persisted.map(|_| payload)
    }

    pub async fn update_options<F>(&self, id: &AttributeId, modify_fn: F, persist: bool) -> Result<AttributePayload>
    where
        F: FnOnce(Option<AttributeOptions>) -> Result<Option<AttributeOptions>>,
    {
        let owner = self.owner();
        let (payload, change, persisted) = {
            let mut state = self.object.state.write().await;
            let payload = state.attributes.update_options(id, modify_fn)?;
            let persisted = if persist {
                self.object
                    .ctx
                    .attribute_store()
                    .update_options(&owner, id, payload.options.as_ref())
                    .await
            } else {
                Ok(())
            };
            let change = self.change(id, AttributeChangeType::Changed, &payload);
            (payload, change, persisted)
        };
        self.notify(change).await;
        persisted.map(|_| payload)
    }

    /// Returns whether a payload was removed.
    pub async fn remove(&self, id: &AttributeId, persist: bool) -> Result<bool> {
        let owner = self.owner();
        let (change, persisted) = {
            let mut state = self.object.state.write().await;
            let Some(removed) = state.attributes.remove(id) else {
                return Ok(false);
            };
            let persisted = if persist {
                self.object.ctx.attribute_store().remove(&owner, id).await
            } else {
                Ok(())
            };
            (self.change(id, AttributeChangeType::Removed, &removed), persisted)
        };
        self.notify(change).await;
        persisted.map(|_| true)
    }

    fn change(
        &self,
        id: &AttributeId,
        change_type: AttributeChangeType,
        payload: &AttributePayload,
    ) -> AttributeChange {
        AttributeChange {
            owner: self.owner(),
            attribute_id: id.clone(),
            change_type,
            value: match change_type {
                AttributeChangeType::Changed => payload.value.clone(),
                AttributeChangeType::Removed => None,
            },
            effective_options: self
                .object
                .ctx
                .attribute_types()
                .effective_options(id, payload.options.as_ref()),
        }
    }

    async fn notify(&self, change: AttributeChange) {
        let has_auto = change
            .effective_options
            .as_ref()
            .is_some_and(|o| o.auto().is_some());
        if !has_auto {
            return;
        }
        if !self.object.is_enabled() {
            debug!(
                "Object {} is disabled, change of {} not announced",
                self.object.id, change.attribute_id
            );
            return;
        }
        if !self.object.notifier.push(change).await {
            debug!("Object {} is not running, attribute change dropped", self.object.id);
        }
    }
}
