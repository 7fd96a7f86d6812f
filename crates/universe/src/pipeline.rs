//! Per-object broadcast pipeline.

use crate::error::DeliveryErrors;
use crate::ids::UserId;
use crate::session::Session;
use crate::work_queue::WorkQueue;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Lifecycle of a [`BroadcastPipeline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PipelineState {
    NotRunning = 0,
    Running = 1,
    Draining = 2,
    Stopped = 3,
}

impl From<u8> for PipelineState {
    fn from(value: u8) -> Self {
        match value {
            1 => PipelineState::Running,
            2 => PipelineState::Draining,
            3 => PipelineState::Stopped,
            _ => PipelineState::NotRunning,
        }
    }
}

/// Sessions attached to one object, held weakly.
///
/// Shared between the object and its pipeline worker.
#[derive(Debug, Default)]
pub struct AttachedSessions {
    sessions: RwLock<HashMap<UserId, Weak<Session>>>,
}

impl AttachedSessions {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, session: &Arc<Session>) -> Option<Weak<Session>> {
        self.sessions
            .write()
            .await
            .insert(session.user_id(), Arc::downgrade(session))
    }

    /// Removes the entry of `session`, but only if it is still that exact
    /// session (a reconnect may already have replaced it).
    pub async fn remove(&self, session: &Arc<Session>) -> bool {
        let mut sessions = self.sessions.write().await;
        let is_same = sessions
            .get(&session.user_id())
            .map(|weak| std::ptr::eq(weak.as_ptr(), Arc::as_ptr(session)))
            .unwrap_or(false);
        if is_same {
            sessions.remove(&session.user_id());
        }
        is_same
    }

    pub async fn get(&self, user_id: &UserId) -> Option<Arc<Session>> {
        self.sessions.read().await.get(user_id).and_then(Weak::upgrade)
    }

    /// Live sessions at this instant.
    pub async fn snapshot(&self) -> Vec<Arc<Session>> {
        self.sessions
            .read()
            .await
            .values()
            .filter_map(Weak::upgrade)
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

/// Hands `frame` to every attached session.
///
/// The session set is snapshotted under the read lock and the lock is
/// released before any send, so a slow session never blocks attach/detach.
pub async fn perform_broadcast(sessions: &AttachedSessions, frame: &Bytes) -> DeliveryErrors {
    let mut errors = DeliveryErrors::new();
    for session in sessions.snapshot().await {
        if let Err(e) = session.send(frame.clone()).await {
            errors.push(format!("session {}: {}", session.session_id(), e));
        }
    }
    errors
}

/// Bounded delivery queue with one worker, owned by a running object.
pub struct BroadcastPipeline {
    queue: WorkQueue<Bytes>,
    state: AtomicU8,
}

impl BroadcastPipeline {
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            queue: WorkQueue::new(name, capacity),
            state: AtomicU8::new(PipelineState::NotRunning as u8),
        }
    }

    pub fn state(&self) -> PipelineState {
        PipelineState::from(self.state.load(Ordering::Acquire))
    }

    /// Opens the queue and starts the worker that fans frames out to
    /// `sessions`.
    pub async fn run(&self, owner: String, sessions: Arc<AttachedSessions>) {
        let started = self
            .queue
            .start(move |frame: Bytes| {
                let sessions = Arc::clone(&sessions);
                let owner = owner.clone();
                async move {
                    let errors = perform_broadcast(&sessions, &frame).await;
                    if !errors.is_empty() {
                        warn!("📭 Broadcast from {} partially failed: {}", owner, errors);
                    }
                }
            })
            .await;
        if started {
            self.state
                .store(PipelineState::Running as u8, Ordering::Release);
        }
    }

    /// Enqueues a frame. Returns `false` when the pipeline is not running;
    /// the frame is dropped in that case.
    pub async fn send(&self, frame: Bytes) -> bool {
        self.queue.push(frame).await
    }

    /// Drains what was queued before the call, then closes the queue.
    pub async fn stop(&self) {
        if self.state() != PipelineState::Running {
            return;
        }
        self.state
            .store(PipelineState::Draining as u8, Ordering::Release);
        self.queue.stop().await;
        self.state
            .store(PipelineState::Stopped as u8, Ordering::Release);
        debug!("Pipeline stopped");
    }
}
