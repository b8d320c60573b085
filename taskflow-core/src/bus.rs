//! In-memory change-event bus.
//!
//! Subscribers register a bounded buffer under a key: a task id for per-task
//! delivery, or [`GLOBAL_KEY`] to observe every event. Publication goes
//! through a single bounded pipeline drained by one worker, which keeps
//! events in publish order for each subscriber. Delivery is best-effort:
//! a full buffer drops the event for that subscriber and bumps the drop
//! counter, so a slow watcher can never stall a mutation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::event::TaskChangeEvent;

/// Subscription key that matches every event.
pub const GLOBAL_KEY: &str = "";

/// Bounded buffer size of a single subscriber.
pub const SUBSCRIBER_BUFFER: usize = 10;

/// Bounded size of the publication pipeline.
pub const PIPELINE_CAPACITY: usize = 100;

struct SubscriberHandle {
    id: u64,
    tx: mpsc::Sender<TaskChangeEvent>,
}

struct Shared {
    registry: RwLock<HashMap<String, Vec<SubscriberHandle>>>,
    dropped: AtomicU64,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl Shared {
    // A poisoned registry lock only means a panicking thread held it; the
    // map itself is still consistent, so recover instead of propagating.
    fn read_registry(&self) -> RwLockReadGuard<'_, HashMap<String, Vec<SubscriberHandle>>> {
        self.registry.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write_registry(&self) -> RwLockWriteGuard<'_, HashMap<String, Vec<SubscriberHandle>>> {
        self.registry.write().unwrap_or_else(|p| p.into_inner())
    }
}

/// Handle to the bus. Cheap to clone; all clones share one registry and one
/// fan-out worker.
#[derive(Clone)]
pub struct EventBus {
    shared: Arc<Shared>,
    publish_tx: mpsc::Sender<TaskChangeEvent>,
}

/// A registered subscriber buffer. Dropping the subscription removes exactly
/// this handle from the registry, so every handler exit path deregisters.
pub struct Subscription {
    key: String,
    id: u64,
    rx: mpsc::Receiver<TaskChangeEvent>,
    shared: Arc<Shared>,
}

impl EventBus {
    /// Start the bus and its fan-out worker.
    pub fn start() -> Self {
        let (publish_tx, publish_rx) = mpsc::channel(PIPELINE_CAPACITY);
        let shared = Arc::new(Shared {
            registry: RwLock::new(HashMap::new()),
            dropped: AtomicU64::new(0),
            next_id: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        });

        let worker_shared = Arc::clone(&shared);
        tokio::spawn(async move {
            Self::run_fanout(publish_rx, worker_shared).await;
        });

        Self { shared, publish_tx }
    }

    /// Register a subscriber under `key` (a task id, or [`GLOBAL_KEY`]).
    pub fn subscribe(&self, key: &str) -> Subscription {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        self.shared
            .write_registry()
            .entry(key.to_owned())
            .or_default()
            .push(SubscriberHandle { id, tx });
        debug!(key, subscriber_id = id, "subscriber registered");
        Subscription {
            key: key.to_owned(),
            id,
            rx,
            shared: Arc::clone(&self.shared),
        }
    }

    /// Publish an event. Never blocks: if the pipeline is full the event is
    /// dropped (the database has already committed; only observers miss it).
    pub fn publish(&self, event: TaskChangeEvent) {
        if self.shared.closed.load(Ordering::Relaxed) {
            debug!(task_id = %event.task_id, "bus closed; event discarded");
            return;
        }
        if let Err(e) = self.publish_tx.try_send(event) {
            match e {
                mpsc::error::TrySendError::Full(ev) => {
                    self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(task_id = %ev.task_id, "publication pipeline full; event dropped");
                }
                mpsc::error::TrySendError::Closed(_) => {
                    debug!("fan-out worker gone; event discarded");
                }
            }
        }
    }

    /// Total events dropped due to a full pipeline or full subscriber buffer.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Number of subscribers currently registered under `key`.
    pub fn subscriber_count(&self, key: &str) -> usize {
        self.shared
            .read_registry()
            .get(key)
            .map_or(0, |subs| subs.len())
    }

    /// Close the bus: stop accepting publications and close every subscriber
    /// buffer. Receivers see end-of-stream after draining.
    pub fn shutdown(&self) {
        self.shared.closed.store(true, Ordering::Relaxed);
        self.shared.write_registry().clear();
        debug!("event bus shut down");
    }

    async fn run_fanout(mut rx: mpsc::Receiver<TaskChangeEvent>, shared: Arc<Shared>) {
        while let Some(event) = rx.recv().await {
            // Snapshot matching senders under the read lock, send outside it.
            let targets: Vec<mpsc::Sender<TaskChangeEvent>> = {
                let registry = shared.read_registry();
                let mut targets = Vec::new();
                if let Some(subs) = registry.get(event.task_id.as_str()) {
                    targets.extend(subs.iter().map(|s| s.tx.clone()));
                }
                if let Some(subs) = registry.get(GLOBAL_KEY) {
                    targets.extend(subs.iter().map(|s| s.tx.clone()));
                }
                targets
            };

            for tx in targets {
                match tx.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        shared.dropped.fetch_add(1, Ordering::Relaxed);
                        debug!(task_id = %event.task_id, "subscriber buffer full; event dropped");
                    }
                    // Subscriber is going away; its Drop cleans the registry.
                    Err(mpsc::error::TrySendError::Closed(_)) => {}
                }
            }
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("dropped", &self.dropped())
            .finish_non_exhaustive()
    }
}

impl Subscription {
    /// Receive the next event, or `None` once the bus has shut down.
    pub async fn recv(&mut self) -> Option<TaskChangeEvent> {
        self.rx.recv().await
    }

    /// Non-blocking receive, used by drain loops and tests.
    pub fn try_recv(&mut self) -> Option<TaskChangeEvent> {
        self.rx.try_recv().ok()
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let mut registry = self.shared.write_registry();
        if let Some(subs) = registry.get_mut(&self.key) {
            subs.retain(|s| s.id != self.id);
            if subs.is_empty() {
                registry.remove(&self.key);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;
    use std::time::Duration;

    use super::*;
    use crate::event::{ChangeType, TaskChangeEvent};
    use crate::model::{Task, TaskPriority, TaskStatus};

    fn event_for(task_id: &str) -> TaskChangeEvent {
        let mut task = Task::new(
            "t",
            "",
            TaskPriority::Normal,
            "test",
            HashMap::new(),
            vec![],
            0,
            "tester",
        );
        task.id = task_id.to_owned();
        TaskChangeEvent::new(task, TaskStatus::Pending, TaskStatus::Running, ChangeType::Updated)
    }

    async fn recv_within(sub: &mut Subscription, ms: u64) -> Option<TaskChangeEvent> {
        tokio::time::timeout(Duration::from_millis(ms), sub.recv())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test]
    async fn per_task_subscriber_sees_only_its_task() {
        let bus = EventBus::start();
        let mut sub = bus.subscribe("a");

        bus.publish(event_for("b"));
        bus.publish(event_for("a"));

        let ev = recv_within(&mut sub, 500).await.expect("event for a");
        assert_eq!(ev.task_id, "a");
        assert!(recv_within(&mut sub, 50).await.is_none(), "no event for b");
    }

    #[tokio::test]
    async fn global_subscriber_sees_everything_in_order() {
        let bus = EventBus::start();
        let mut sub = bus.subscribe(GLOBAL_KEY);

        for id in ["x", "y", "z"] {
            bus.publish(event_for(id));
        }

        for expected in ["x", "y", "z"] {
            let ev = recv_within(&mut sub, 500).await.expect("event");
            assert_eq!(ev.task_id, expected, "publish order preserved");
        }
    }

    #[tokio::test]
    async fn slow_subscriber_drops_and_counter_increments() {
        let bus = EventBus::start();
        let _sub = bus.subscribe("slow");

        // One more than the buffer; the subscriber never drains.
        for _ in 0..=SUBSCRIBER_BUFFER {
            bus.publish(event_for("slow"));
        }

        // The fan-out worker runs asynchronously; poll for the counter.
        for _ in 0..50 {
            if bus.dropped() >= 1 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("drop counter never incremented");
    }

    #[tokio::test]
    async fn drop_deregisters_exactly_one_handle() {
        let bus = EventBus::start();
        let sub1 = bus.subscribe("k");
        let sub2 = bus.subscribe("k");
        assert_eq!(bus.subscriber_count("k"), 2);

        drop(sub1);
        assert_eq!(bus.subscriber_count("k"), 1);
        drop(sub2);
        assert_eq!(bus.subscriber_count("k"), 0);
    }

    #[tokio::test]
    async fn shutdown_closes_subscriber_buffers() {
        let bus = EventBus::start();
        let mut sub = bus.subscribe(GLOBAL_KEY);

        bus.publish(event_for("a"));
        let _ = recv_within(&mut sub, 500).await.expect("delivered before shutdown");

        bus.shutdown();
        assert!(sub.recv().await.is_none(), "buffer closed after shutdown");
        assert_eq!(bus.subscriber_count(GLOBAL_KEY), 0);
    }
}
