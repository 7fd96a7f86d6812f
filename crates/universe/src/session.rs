//! Connected user sessions and their outbound queue.
//!
//! A [`Session`] is the core-side handle of one connection. Everything the
//! core wants to send goes through its bounded outbound queue; the connection
//! task drains the other end through a [`SessionOutlet`].
//!
//! While a session is being spawned into a world its regular sends are
//! buffered, so broadcasts that race the spawn snapshot arrive after it.
//! Spawn messages themselves go through [`Session::send_direct`], which skips
//! the buffer. Hold and release are markers on the same queue as the frames,
//! so the outlet sees them in exactly the order they were issued.

use crate::error::{DeliveryErrors, Result, UniverseError};
use crate::ids::{AssetId, SessionId, UserId};
use crate::object::Object;
use crate::work_queue::{self, QueueReceiver, QueueSender};
use crate::world::World;
use bytes::Bytes;
use posbus::{TransformNoScale, UserData};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use tokio::sync::RwLock;
use tracing::debug;

/// Public identity of a user as shown to other users.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub name: String,
    #[serde(default)]
    pub avatar: Option<AssetId>,
    #[serde(default)]
    pub is_guest: bool,
}

impl UserProfile {
    pub fn guest() -> Self {
        Self {
            name: "Visitor".to_string(),
            avatar: None,
            is_guest: true,
        }
    }
}

/// Item on a session's outbound queue.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// Regular frame, held back while the send buffer is locked
    Frame(Bytes),
    /// Frame that bypasses the send buffer
    Direct(Bytes),
    /// Start holding regular frames back
    Hold,
    /// Release the send buffer
    Flush,
    /// Close the connection
    Shutdown,
}

pub struct Session {
    user_id: UserId,
    session_id: SessionId,
    profile: RwLock<UserProfile>,
    transform: RwLock<TransformNoScale>,
    world: RwLock<Option<Weak<World>>>,
    object: RwLock<Option<Weak<Object>>>,
    outbound: QueueSender<Outbound>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user_id)
            .field("session_id", &self.session_id)
            .finish()
    }
}

impl Session {
    /// Creates a session and the outlet its connection task drains.
    ///
    /// Sends start out buffered until [`Session::release_send_buffer`].
    pub fn new(
        user_id: UserId,
        session_id: SessionId,
        profile: UserProfile,
        queue_capacity: usize,
    ) -> (Arc<Session>, SessionOutlet) {
        let (tx, rx) = work_queue::bounded(queue_capacity);
        let session = Arc::new(Session {
            user_id,
            session_id,
            profile: RwLock::new(profile),
            transform: RwLock::new(TransformNoScale::default()),
            world: RwLock::new(None),
            object: RwLock::new(None),
            outbound: tx,
        });
        let outlet = SessionOutlet {
            session_id,
            rx,
            buffer: VecDeque::new(),
            holding: true,
        };
        (session, outlet)
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub async fn profile(&self) -> UserProfile {
        self.profile.read().await.clone()
    }

    pub async fn transform(&self) -> TransformNoScale {
        *self.transform.read().await
    }

    pub async fn set_transform(&self, transform: TransformNoScale) {
        *self.transform.write().await = transform;
    }

    pub async fn world(&self) -> Option<Arc<World>> {
        self.world.read().await.as_ref().and_then(Weak::upgrade)
    }

    pub(crate) async fn set_world(&self, world: Option<&Arc<World>>) {
        *self.world.write().await = world.map(Arc::downgrade);
    }

    /// Object the session is currently attached to.
    pub async fn object(&self) -> Option<Arc<Object>> {
        self.object.read().await.as_ref().and_then(Weak::upgrade)
    }

    pub(crate) async fn replace_object(&self, object: Option<&Arc<Object>>) -> Option<Arc<Object>> {
        let mut current = self.object.write().await;
        let previous = current.take().and_then(|weak| weak.upgrade());
        *current = object.map(Arc::downgrade);
        previous
    }

    /// Forgets the attached object if it is still `object`.
    pub(crate) async fn clear_object(&self, object: &Arc<Object>) {
        let mut current = self.object.write().await;
        let is_same = current
            .as_ref()
            .is_some_and(|weak| std::ptr::eq(weak.as_ptr(), Arc::as_ptr(object)));
        if is_same {
            *current = None;
        }
    }

    /// Presence record broadcast in `AddUsers`.
    pub async fn user_data(&self) -> UserData {
        let profile = self.profile().await;
        UserData {
            id: self.user_id.0,
            name: profile.name,
            avatar: profile.avatar.map(|a| a.0).unwrap_or_default(),
            transform: self.transform().await,
            is_guest: profile.is_guest,
        }
    }

    /// Queues a regular frame.
    pub async fn send(&self, frame: Bytes) -> Result<()> {
        self.enqueue(Outbound::Frame(frame)).await
    }

    /// Queues a frame that is written even while the buffer is locked.
    pub async fn send_direct(&self, frame: Bytes) -> Result<()> {
        self.enqueue(Outbound::Direct(frame)).await
    }

    async fn enqueue(&self, item: Outbound) -> Result<()> {
        if self.outbound.send(item).await {
            Ok(())
        } else {
            let mut errors = DeliveryErrors::new();
            errors.push(format!("session {} is closed", self.session_id));
            Err(UniverseError::Delivery(errors))
        }
    }

    /// Holds regular frames back until [`Session::release_send_buffer`].
    pub async fn lock_send_buffer(&self) {
        // A closed queue has nothing to hold.
        let _ = self.outbound.send(Outbound::Hold).await;
    }

    /// Unlocks the buffer; frames held so far are written in order.
    pub async fn release_send_buffer(&self) {
        let _ = self.outbound.send(Outbound::Flush).await;
    }

    /// Asks the connection to close. Frames queued before the call are still
    /// written.
    pub async fn stop(&self) {
        if self.outbound.send(Outbound::Shutdown).await {
            debug!("🔌 Session {} of user {} asked to stop", self.session_id, self.user_id);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}

/// Receiving end of a session's outbound queue.
#[derive(Debug)]
pub struct SessionOutlet {
    session_id: SessionId,
    rx: QueueReceiver<Outbound>,
    buffer: VecDeque<Bytes>,
    holding: bool,
}

impl SessionOutlet {
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Waits for the next frames to write, in order.
    ///
    /// Returns `None` once the session was stopped or all senders are gone.
    pub async fn recv(&mut self) -> Option<Vec<Bytes>> {
        loop {
            match self.rx.recv().await? {
                Outbound::Shutdown => return None,
                Outbound::Direct(frame) => return Some(vec![frame]),
                Outbound::Hold => self.holding = true,
                Outbound::Flush => {
                    self.holding = false;
                    if !self.buffer.is_empty() {
                        return Some(self.buffer.drain(..).collect());
                    }
                }
                Outbound::Frame(frame) if self.holding => self.buffer.push_back(frame),
                Outbound::Frame(frame) => return Some(vec![frame]),
            }
        }
    }

    /// Closes the queue; later sends fail fast.
    pub async fn close(&mut self) {
        let dropped = self.rx.close().await;
        self.buffer.clear();
        if dropped > 0 {
            debug!("🧹 Session {} closed with {} unsent frames", self.session_id, dropped);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(s: &'static str) -> Bytes {
        Bytes::from_static(s.as_bytes())
    }

    #[tokio::test]
    async fn test_buffered_frames_follow_direct_frames() {
        let (session, mut outlet) = Session::new(UserId::new(), SessionId::new(), UserProfile::guest(), 10);

        session.send(frame("broadcast-1")).await.unwrap();
        session.send_direct(frame("set-world")).await.unwrap();
        session.send(frame("broadcast-2")).await.unwrap();
        session.release_send_buffer().await;
        session.send(frame("after")).await.unwrap();

        assert_eq!(outlet.recv().await, Some(vec![frame("set-world")]));
        assert_eq!(
            outlet.recv().await,
            Some(vec![frame("broadcast-1"), frame("broadcast-2")])
        );
        assert_eq!(outlet.recv().await, Some(vec![frame("after")]));
    }

    #[tokio::test]
    async fn test_stop_ends_outlet_and_rejects_sends_after_close() {
        let (session, mut outlet) = Session::new(UserId::new(), SessionId::new(), UserProfile::guest(), 10);
        session.release_send_buffer().await;
        session.stop().await;
        assert_eq!(outlet.recv().await, None);

        outlet.close().await;
        assert!(session.is_closed());
        assert!(matches!(
            session.send(frame("late")).await,
            Err(UniverseError::Delivery(_))
        ));
    }

    #[tokio::test]
    async fn test_user_data_reflects_profile_and_transform() {
        let (session, _outlet) = Session::new(UserId::new(), SessionId::new(), UserProfile::guest(), 10);
        let mut t = TransformNoScale::default();
        t.position.x = 4.0;
        session.set_transform(t).await;

        let data = session.user_data().await;
        assert_eq!(data.id, session.user_id().0);
        assert!(data.is_guest);
        assert_eq!(data.transform.position.x, 4.0);
    }
}
