//! Named publish-to-many-handlers primitive: each handler owns a bounded
//! FIFO queue, a worker pool, an overflow policy, and a pause flag.
//!
//! Grounded on the handler registration call sites in `server/service.py`
//! (`EventBus`, `HandlerConfig`) and the bus property checks in
//! `server/tests/test_audio_components.py`; `server/core/event_bus.py` itself
//! was not part of the retrieved source, so the queue/worker mechanics below
//! are this crate's own implementation of the documented contract.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::warn;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

/// Per-handler-slot rule applied when its queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    DropNewest,
    DropOldest,
    Block,
}

/// Configuration for one named handler slot.
#[derive(Debug, Clone)]
pub struct HandlerSettings {
    pub name: String,
    pub queue_max: usize,
    pub overflow_policy: OverflowPolicy,
    pub concurrency: usize,
}

impl HandlerSettings {
    pub fn new(name: impl Into<String>, queue_max: usize, overflow_policy: OverflowPolicy) -> Self {
        Self {
            name: name.into(),
            queue_max,
            overflow_policy,
            concurrency: 1,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }
}

type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type HandlerFn<T> = Arc<dyn Fn(Arc<T>) -> HandlerFuture + Send + Sync>;

struct HandlerSlot<T> {
    settings: HandlerSettings,
    queue: Arc<Mutex<VecDeque<Arc<T>>>>,
    paused: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    item_ready: Arc<Notify>,
    space_freed: Arc<Notify>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl<T: Send + Sync + 'static> HandlerSlot<T> {
    fn spawn(settings: HandlerSettings, handler: HandlerFn<T>) -> Self {
        let queue = Arc::new(Mutex::new(VecDeque::with_capacity(settings.queue_max)));
        let paused = Arc::new(AtomicBool::new(false));
        let shutdown = Arc::new(AtomicBool::new(false));
        let item_ready = Arc::new(Notify::new());
        let space_freed = Arc::new(Notify::new());

        let mut workers = Vec::with_capacity(settings.concurrency);
        for _ in 0..settings.concurrency {
            let queue = queue.clone();
            let paused = paused.clone();
            let shutdown = shutdown.clone();
            let item_ready = item_ready.clone();
            let space_freed = space_freed.clone();
            let handler = handler.clone();
            let slot_name = settings.name.clone();
            workers.push(tokio::spawn(async move {
                worker_loop(queue, paused, shutdown, item_ready, space_freed, handler, slot_name).await;
            }));
        }

        Self {
            settings,
            queue,
            paused,
            shutdown,
            item_ready,
            space_freed,
            workers: Mutex::new(workers),
        }
    }

    async fn enqueue(&self, item: Arc<T>) {
        loop {
            let mut q = self.queue.lock().await;
            if q.len() < self.settings.queue_max {
                q.push_back(item);
                drop(q);
                self.item_ready.notify_one();
                return;
            }
            match self.settings.overflow_policy {
                OverflowPolicy::DropNewest => {
                    warn!("bus slot '{}' full, dropping newest publication", self.settings.name);
                    return;
                }
                OverflowPolicy::DropOldest => {
                    q.pop_front();
                    q.push_back(item);
                    drop(q);
                    self.item_ready.notify_one();
                    return;
                }
                OverflowPolicy::Block => {
                    drop(q);
                    self.space_freed.notified().await;
                }
            }
        }
    }

    fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.item_ready.notify_waiters();
    }

    async fn clear(&self) -> usize {
        let mut q = self.queue.lock().await;
        let n = q.len();
        q.clear();
        drop(q);
        self.space_freed.notify_waiters();
        n
    }

    async fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.item_ready.notify_waiters();
        let mut workers = self.workers.lock().await;
        for handle in workers.drain(..) {
            let _ = handle.await;
        }
    }
}

async fn worker_loop<T: Send + Sync + 'static>(
    queue: Arc<Mutex<VecDeque<Arc<T>>>>,
    paused: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    item_ready: Arc<Notify>,
    space_freed: Arc<Notify>,
    handler: HandlerFn<T>,
    slot_name: String,
) {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            log::debug!("worker for bus slot '{slot_name}' shutting down");
            return;
        }
        if paused.load(Ordering::SeqCst) {
            item_ready.notified().await;
            continue;
        }
        let item = queue.lock().await.pop_front();
        match item {
            Some(item) => {
                space_freed.notify_waiters();
                handler(item).await;
            }
            None => {
                tokio::select! {
                    _ = item_ready.notified() => {}
                    _ = tokio::time::sleep(std::time::Duration::from_millis(200)) => {}
                }
            }
        }
    }
}

/// A named bus hosting one or more handler slots, each fed from `publish`.
pub struct EventBus<T> {
    name: String,
    slots: HashMap<String, HandlerSlot<T>>,
}

impl<T: Send + Sync + 'static> EventBus<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            slots: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attaches a handler slot. `handler` runs with up to
    /// `settings.concurrency` invocations in flight at once.
    pub fn register_handler<F, Fut>(&mut self, settings: HandlerSettings, handler: F)
    where
        F: Fn(Arc<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = settings.name.clone();
        let boxed: HandlerFn<T> = Arc::new(move |item| Box::pin(handler(item)));
        self.slots.insert(name, HandlerSlot::spawn(settings, boxed));
    }

    /// Enqueues `item` into every registered slot, applying each slot's
    /// overflow policy independently.
    pub async fn publish(&self, item: T) {
        let item = Arc::new(item);
        for slot in self.slots.values() {
            slot.enqueue(item.clone()).await;
        }
    }

    pub fn pause(&self, name: &str) {
        if let Some(slot) = self.slots.get(name) {
            slot.pause();
        }
    }

    pub fn resume(&self, name: &str) {
        if let Some(slot) = self.slots.get(name) {
            slot.resume();
        }
    }

    /// Discards all items currently queued for `name`, returning the count
    /// discarded.
    pub async fn clear(&self, name: &str) -> usize {
        match self.slots.get(name) {
            Some(slot) => slot.clear().await,
            None => 0,
        }
    }

    pub fn is_paused(&self, name: &str) -> bool {
        self.slots
            .get(name)
            .map(|s| s.paused.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// Cancels every slot's workers and drains them.
    pub async fn shutdown(&self) {
        for slot in self.slots.values() {
            slot.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc;

    fn settings(name: &str, queue_max: usize, policy: OverflowPolicy) -> HandlerSettings {
        HandlerSettings::new(name, queue_max, policy)
    }

    #[tokio::test]
    async fn drop_newest_keeps_first_q_items_while_paused() {
        let mut bus: EventBus<u32> = EventBus::new("test");
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.register_handler(settings("h", 4, OverflowPolicy::DropNewest), move |item| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(*item);
            }
        });
        bus.pause("h");
        for i in 0..10u32 {
            bus.publish(i).await;
        }
        bus.resume("h");

        let mut received = Vec::new();
        while received.len() < 4 {
            if let Some(v) = rx.recv().await {
                received.push(v);
            } else {
                break;
            }
        }
        assert_eq!(received, vec![0, 1, 2, 3]);
        bus.shutdown().await;
    }

    #[tokio::test]
    async fn drop_oldest_keeps_last_q_items_while_paused() {
        let mut bus: EventBus<u32> = EventBus::new("test");
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.register_handler(settings("h", 4, OverflowPolicy::DropOldest), move |item| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(*item);
            }
        });
        bus.pause("h");
        for i in 0..10u32 {
            bus.publish(i).await;
        }
        bus.resume("h");

        let mut received = Vec::new();
        while received.len() < 4 {
            if let Some(v) = rx.recv().await {
                received.push(v);
            } else {
                break;
            }
        }
        assert_eq!(received, vec![6, 7, 8, 9]);
        bus.shutdown().await;
    }

    #[tokio::test]
    async fn clear_returns_exact_discarded_count_and_empties_slot() {
        let mut bus: EventBus<u32> = EventBus::new("test");
        bus.register_handler(settings("h", 10, OverflowPolicy::DropNewest), |_item| async move {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
        });
        bus.pause("h");
        for i in 0..5u32 {
            bus.publish(i).await;
        }
        let cleared = bus.clear("h").await;
        assert_eq!(cleared, 5);
        assert_eq!(bus.clear("h").await, 0);
        bus.shutdown().await;
    }

    #[tokio::test]
    async fn concurrency_bounds_parallel_invocations() {
        let mut bus: EventBus<u32> = EventBus::new("test");
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let in_flight_h = in_flight.clone();
        let max_seen_h = max_seen.clone();
        bus.register_handler(
            settings("h", 20, OverflowPolicy::Block).with_concurrency(3),
            move |_item| {
                let in_flight = in_flight_h.clone();
                let max_seen = max_seen_h.clone();
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(std::time::Duration::from_millis(30)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                }
            },
        );
        for i in 0..12u32 {
            bus.publish(i).await;
        }
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        assert!(max_seen.load(Ordering::SeqCst) <= 3);
        bus.shutdown().await;
    }
}
