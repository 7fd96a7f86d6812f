//! Parent/child mutation and lookups over the object tree.
//!
//! Every walk here is iterative with an explicit stack; each object's lock is
//! taken on its own and never while another object's lock is held.

use super::Object;
use crate::error::{DeliveryErrors, Result, UniverseError};
use crate::ids::ObjectId;
use std::sync::{Arc, Weak};
use tracing::debug;

impl Object {
    /// Links `child` below this object.
    ///
    /// Fails without any effect if `child` is this object, belongs to another
    /// world, or is an ancestor of this object. A child that already has a
    /// parent is moved. In-memory state and the world index are updated
    /// before storage is written; persisting only rewrites the stored parent
    /// id, so the child must already be stored.
    ///
    /// The ancestor check and the link run under the world's tree lock, so
    /// two opposing moves cannot both pass the check.
    pub async fn add_child(self: &Arc<Self>, child: &Arc<Object>, persist: bool) -> Result<()> {
        if child.id == self.id {
            return Err(UniverseError::Validation(format!(
                "object {} cannot be its own child",
                self.id
            )));
        }
        if child.world_id != self.world_id {
            return Err(UniverseError::Validation(format!(
                "object {} belongs to world {}, not {}",
                child.id, child.world_id, self.world_id
            )));
        }

        let world = self.world();
        {
            let _tree = match &world {
                Some(world) => Some(world.lock_tree().await),
                None => None,
            };

            let mut cursor = self.parent().await;
            while let Some(ancestor) = cursor {
                if ancestor.id == child.id {
                    return Err(UniverseError::Validation(format!(
                        "object {} is an ancestor of {}",
                        child.id, self.id
                    )));
                }
                cursor = ancestor.parent().await;
            }

            let previous = {
                let mut state = child.state.write().await;
                state.parent.replace(Arc::downgrade(self))
            };
            if let Some(previous) = previous.as_ref().and_then(Weak::upgrade) {
                if !Arc::ptr_eq(&previous, self) {
                    previous.state.write().await.children.remove(&child.id);
                }
            }
            self.state
                .write()
                .await
                .children
                .insert(child.id, Arc::clone(child));

            if let Some(world) = &world {
                world.index_subtree(child).await;
            }
        }

        if persist {
            self.ctx
                .object_store()
                .update_parent(&child.id, Some(&self.id))
                .await?;
        }
        Ok(())
    }

    /// Moves this object below `parent`.
    pub async fn set_parent(self: &Arc<Self>, parent: &Arc<Object>, persist: bool) -> Result<()> {
        parent.add_child(self, persist).await
    }

    /// Detaches the child `child_id`, searching the whole subtree when
    /// `recursive`. Returns the detached object, or `None` if it was not
    /// found. The detached object keeps its own children; with `persist`
    /// the stored records of the whole detached subtree are deleted.
    pub async fn remove_child(
        self: &Arc<Self>,
        child_id: &ObjectId,
        recursive: bool,
        persist: bool,
    ) -> Result<Option<Arc<Object>>> {
        let detached = {
            let world = self.world();
            let _tree = match &world {
                Some(world) => Some(world.lock_tree().await),
                None => None,
            };
            let detached = self.find_and_detach(child_id, recursive).await;
            if let (Some(child), Some(world)) = (&detached, &world) {
                world.unindex_subtree(child).await;
            }
            detached
        };

        let Some(child) = detached else {
            return Ok(None);
        };
        debug!("🌳 Object {} detached from the tree", child.id);
        if persist {
            for removed in child.subtree().await.iter().rev() {
                self.ctx.object_store().remove_object(&removed.id).await?;
            }
        }
        Ok(Some(child))
    }

    async fn find_and_detach(self: &Arc<Self>, child_id: &ObjectId, recursive: bool) -> Option<Arc<Object>> {
        if let Some(child) = self.detach_direct_child(child_id).await {
            return Some(child);
        }
        if !recursive {
            return None;
        }
        let mut stack = self.children().await;
        while let Some(object) = stack.pop() {
            if let Some(child) = object.detach_direct_child(child_id).await {
                return Some(child);
            }
            stack.extend(object.children().await);
        }
        None
    }

    async fn detach_direct_child(self: &Arc<Self>, child_id: &ObjectId) -> Option<Arc<Object>> {
        let child = self.state.write().await.children.remove(child_id)?;
        let mut state = child.state.write().await;
        let points_here = state
            .parent
            .as_ref()
            .is_some_and(|p| std::ptr::eq(p.as_ptr(), Arc::as_ptr(self)));
        if points_here {
            state.parent = None;
        }
        drop(state);
        Some(child)
    }

    /// This object followed by all descendants, parents before children.
    pub async fn subtree(self: &Arc<Self>) -> Vec<Arc<Object>> {
        let mut ordered = Vec::new();
        let mut stack = vec![Arc::clone(self)];
        while let Some(object) = stack.pop() {
            let mut children = object.children().await;
            children.reverse();
            stack.extend(children);
            ordered.push(object);
        }
        ordered
    }

    /// Finds a direct child, or any descendant when `recursive`.
    pub async fn get_object(self: &Arc<Self>, id: &ObjectId, recursive: bool) -> Option<Arc<Object>> {
        if let Some(child) = self.state.read().await.children.get(id) {
            return Some(Arc::clone(child));
        }
        if !recursive {
            return None;
        }
        let mut stack = self.children().await;
        while let Some(object) = stack.pop() {
            if let Some(child) = object.state.read().await.children.get(id) {
                return Some(Arc::clone(child));
            }
            stack.extend(object.children().await);
        }
        None
    }

    /// Direct children, or all descendants when `recursive`.
    pub async fn get_objects(self: &Arc<Self>, recursive: bool) -> Vec<Arc<Object>> {
        if !recursive {
            return self.children().await;
        }
        let mut all = self.subtree().await;
        all.remove(0);
        all
    }

    /// Children (or descendants) for which `predicate` holds.
    pub async fn filter_objects<P>(self: &Arc<Self>, predicate: P, recursive: bool) -> Vec<Arc<Object>>
    where
        P: Fn(&Arc<Object>) -> bool,
    {
        self.get_objects(recursive)
            .await
            .into_iter()
            .filter(|object| predicate(object))
            .collect()
    }

    /// Detaches each of `ids` from this subtree. Every id is attempted; the
    /// failures are reported together.
    pub async fn remove_objects(
        self: &Arc<Self>,
        ids: &[ObjectId],
        recursive: bool,
        persist: bool,
    ) -> std::result::Result<Vec<Arc<Object>>, DeliveryErrors> {
        let mut removed = Vec::with_capacity(ids.len());
        let mut errors = DeliveryErrors::new();
        for id in ids {
            match self.remove_child(id, recursive, persist).await {
                Ok(Some(object)) => removed.push(object),
                Ok(None) => errors.push(format!("object {id} not found")),
                Err(e) => errors.push(format!("object {id}: {e}")),
            }
        }
        errors.into_result().map(|_| removed)
    }
}
