//! Bounded queues with an in-flight counter and a closed sentinel.
//!
//! Every producer bumps the counter before enqueueing. Once the consumer has
//! swapped the counter to [`CLOSED`] any later producer sees a negative value
//! and backs off without touching the channel, so a send racing a shutdown
//! never blocks and never delivers.

use std::future::Future;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Counter value of a closed queue. Large enough that no number of racing
/// producers can bring it back to zero.
pub const CLOSED: i64 = -0x3FFF_FFFF_FFFF_FFFF;

/// Creates a bounded queue pair.
pub fn bounded<T>(capacity: usize) -> (QueueSender<T>, QueueReceiver<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let in_flight = Arc::new(AtomicI64::new(0));
    (
        QueueSender {
            tx,
            in_flight: Arc::clone(&in_flight),
        },
        QueueReceiver { rx, in_flight },
    )
}

/// Producer half.
#[derive(Debug)]
pub struct QueueSender<T> {
    tx: mpsc::Sender<T>,
    in_flight: Arc<AtomicI64>,
}

impl<T> Clone for QueueSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            in_flight: Arc::clone(&self.in_flight),
        }
    }
}

impl<T> QueueSender<T> {
    /// Enqueues `item`, waiting for capacity if the queue is full.
    ///
    /// Returns `false` without blocking when the queue is closed.
    pub async fn send(&self, item: T) -> bool {
        if self.in_flight.fetch_add(1, Ordering::AcqRel) < 0 {
            return false;
        }
        self.tx.send(item).await.is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.in_flight.load(Ordering::Acquire) < 0 || self.tx.is_closed()
    }

    /// Messages counted but not yet taken by the consumer.
    pub fn in_flight(&self) -> i64 {
        self.in_flight.load(Ordering::Acquire).max(0)
    }
}

/// Consumer half.
#[derive(Debug)]
pub struct QueueReceiver<T> {
    rx: mpsc::Receiver<T>,
    in_flight: Arc<AtomicI64>,
}

impl<T> QueueReceiver<T> {
    pub async fn recv(&mut self) -> Option<T> {
        let item = self.rx.recv().await;
        if item.is_some() {
            self.in_flight.fetch_sub(1, Ordering::AcqRel);
        }
        item
    }

    /// Closes the queue and discards everything still queued.
    ///
    /// Producers blocked on a full queue are released with a failed send.
    /// Returns the number of items that were in flight at close time.
    pub async fn close(&mut self) -> i64 {
        let pending = self.in_flight.swap(CLOSED, Ordering::AcqRel);
        if pending < 0 {
            return 0;
        }
        self.rx.close();
        while self.rx.recv().await.is_some() {}
        pending
    }
}

enum Control<T> {
    Item(T),
    Stop,
}

struct Running<T> {
    tx: QueueSender<Control<T>>,
    worker: JoinHandle<()>,
}

/// A bounded queue drained by a single worker task.
///
/// The queue only exists between [`WorkQueue::start`] and
/// [`WorkQueue::stop`]; pushes outside that window are rejected.
pub struct WorkQueue<T> {
    name: String,
    capacity: usize,
    running: Mutex<Option<Running<T>>>,
}

impl<T: Send + 'static> WorkQueue<T> {
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            name: name.into(),
            capacity,
            running: Mutex::new(None),
        }
    }

    /// Opens the queue and spawns its worker. Returns `false` if it was
    /// already running.
    pub async fn start<F, Fut>(&self, handler: F) -> bool
    where
        F: Fn(T) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return false;
        }

        let (tx, mut rx) = bounded::<Control<T>>(self.capacity);
        let name = self.name.clone();
        let worker = tokio::spawn(async move {
            while let Some(control) = rx.recv().await {
                match control {
                    Control::Item(item) => handler(item).await,
                    Control::Stop => break,
                }
            }
            let dropped = rx.close().await;
            if dropped > 0 {
                debug!("🧹 Queue {} discarded {} pending items on stop", name, dropped);
            } else {
                trace!("Queue {} closed", name);
            }
        });

        *running = Some(Running { tx, worker });
        true
    }

    /// Enqueues `item` for the worker. Returns `false` if the queue is not
    /// running.
    pub async fn push(&self, item: T) -> bool {
        let tx = {
            let running = self.running.lock().await;
            match running.as_ref() {
                Some(r) => r.tx.clone(),
                None => return false,
            }
        };
        tx.send(Control::Item(item)).await
    }

    /// Stops the worker after it has finished the items queued before the
    /// stop marker. Idempotent.
    pub async fn stop(&self) {
        let running = self.running.lock().await.take();
        if let Some(Running { tx, worker }) = running {
            tx.send(Control::Stop).await;
            drop(tx);
            if let Err(e) = worker.await {
                debug!("Queue {} worker ended abnormally: {}", self.name, e);
            }
        }
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn test_send_after_close_is_rejected_without_blocking() {
        let (tx, mut rx) = bounded::<u32>(1);
        assert!(tx.send(1).await);
        assert_eq!(rx.close().await, 1);

        let rejected = tokio::time::timeout(Duration::from_millis(100), tx.send(2)).await;
        assert_eq!(rejected, Ok(false));
        assert!(tx.is_closed());
    }

    #[tokio::test]
    async fn test_close_releases_blocked_producer() {
        let (tx, mut rx) = bounded::<u32>(1);
        assert!(tx.send(1).await);

        let blocked = {
            let tx = tx.clone();
            tokio::spawn(async move { tx.send(2).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        rx.close().await;
        let delivered = tokio::time::timeout(Duration::from_secs(1), blocked)
            .await
            .expect("producer released")
            .unwrap();
        assert!(!delivered);
    }

    #[tokio::test]
    async fn test_work_queue_processes_items_before_stop() {
        let queue = WorkQueue::new("test", 4);
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        assert!(
            queue
                .start(move |n: usize| {
                    let counter = Arc::clone(&counter);
                    async move {
                        counter.fetch_add(n, Ordering::SeqCst);
                    }
                })
                .await
        );

        for _ in 0..10 {
            assert!(queue.push(1).await);
        }
        queue.stop().await;

        assert_eq!(seen.load(Ordering::SeqCst), 10);
        assert!(!queue.push(1).await);
        assert!(!queue.is_running().await);
    }

    #[tokio::test]
    async fn test_push_before_start_is_rejected() {
        let queue: WorkQueue<u8> = WorkQueue::new("idle", 1);
        assert!(!queue.push(7).await);
        queue.stop().await;
    }
}
