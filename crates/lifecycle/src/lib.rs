//! In-process pub/sub for lifecycle events.
//!
//! `push` fans an event out to every matching subscriber. Each subscriber
//! owns a bounded queue drained at its own pace; when the queue is full the
//! oldest event is dropped and counted, so a stalled dashboard can never
//! wedge the runtime. Nothing is persisted — subscribers exist only for
//! the life of the process.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use perch_domain::event::LifecycleEvent;
use perch_domain::stream::BoxStream;

const DEFAULT_SUBSCRIBER_CAPACITY: usize = 256;

struct SubscriberSlot {
    id: u64,
    /// `None` subscribes to every session.
    filter: Option<String>,
    queue: Mutex<VecDeque<LifecycleEvent>>,
    notify: Notify,
}

struct Inner {
    subscribers: Mutex<Vec<Arc<SubscriberSlot>>>,
    next_id: AtomicU64,
    dropped_events: AtomicU64,
    capacity: usize,
}

/// Counters exposed through the orchestrator's `get_state()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleStats {
    pub subscribers: usize,
    pub dropped_events: u64,
}

#[derive(Clone)]
pub struct LifecycleStream {
    inner: Arc<Inner>,
}

impl Default for LifecycleStream {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_CAPACITY)
    }
}

impl LifecycleStream {
    pub fn new(subscriber_capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                subscribers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
                dropped_events: AtomicU64::new(0),
                capacity: subscriber_capacity.max(1),
            }),
        }
    }

    /// Fan an event out to every subscriber whose filter matches.
    pub fn push(&self, event: LifecycleEvent) {
        let subscribers = self.inner.subscribers.lock();
        for slot in subscribers.iter() {
            if let Some(filter) = &slot.filter {
                if filter != &event.session_id {
                    continue;
                }
            }
            let mut queue = slot.queue.lock();
            if queue.len() >= self.inner.capacity {
                queue.pop_front();
                self.inner.dropped_events.fetch_add(1, Ordering::Relaxed);
            }
            queue.push_back(event.clone());
            slot.notify.notify_one();
        }
    }

    /// Subscribe, optionally filtered to one session. The first event
    /// delivered is always the synthetic `connecting` event.
    pub fn subscribe(&self, session_filter: Option<&str>) -> LifecycleSubscription {
        let slot = Arc::new(SubscriberSlot {
            id: self.inner.next_id.fetch_add(1, Ordering::Relaxed),
            filter: session_filter.map(str::to_owned),
            queue: Mutex::new(VecDeque::from([LifecycleEvent::connecting()])),
            notify: Notify::new(),
        });
        self.inner.subscribers.lock().push(slot.clone());
        LifecycleSubscription {
            inner: self.inner.clone(),
            slot,
        }
    }

    pub fn stats(&self) -> LifecycleStats {
        LifecycleStats {
            subscribers: self.inner.subscribers.lock().len(),
            dropped_events: self.inner.dropped_events.load(Ordering::Relaxed),
        }
    }
}

/// One subscriber's end of the stream. Unregisters on drop.
pub struct LifecycleSubscription {
    inner: Arc<Inner>,
    slot: Arc<SubscriberSlot>,
}

impl LifecycleSubscription {
    /// Wait for the next event.
    pub async fn recv(&mut self) -> LifecycleEvent {
        loop {
            if let Some(event) = self.slot.queue.lock().pop_front() {
                return event;
            }
            self.slot.notify.notified().await;
        }
    }

    /// Pop without waiting.
    pub fn try_recv(&mut self) -> Option<LifecycleEvent> {
        self.slot.queue.lock().pop_front()
    }

    /// Consume the subscription as a lazy async stream.
    pub fn into_stream(mut self) -> BoxStream<'static, LifecycleEvent> {
        Box::pin(async_stream::stream! {
            loop {
                yield self.recv().await;
            }
        })
    }
}

impl Drop for LifecycleSubscription {
    fn drop(&mut self) {
        self.inner
            .subscribers
            .lock()
            .retain(|s| s.id != self.slot.id);
    }
}
