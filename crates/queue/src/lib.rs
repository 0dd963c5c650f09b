//! Durable per-session FIFO queues with at-least-once delivery.
//!
//! `dequeue` peeks the head without removing it; consumers call `remove`
//! only after the item has been fully processed. A crash in between makes
//! the item show up again on the next `dequeue` — consumers deduplicate by
//! item id or an idempotency key in the payload.

pub mod file;
pub mod memory;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use perch_domain::Result;

pub use file::FileQueue;
pub use memory::InMemoryQueue;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: String,
    pub session_id: String,
    pub payload: serde_json::Value,
    pub enqueued_at: DateTime<Utc>,
}

/// Backend contract. In-memory for tests and ephemeral hosts, file-backed
/// for durability; both honor the same ordering and delivery semantics.
#[async_trait::async_trait]
pub trait QueueBackend: Send + Sync {
    /// Append an item; returns its id. Ids increase monotonically within
    /// a process (`q-<counter>-<wallclock-ms>`).
    async fn enqueue(&self, session_id: &str, payload: serde_json::Value) -> Result<String>;

    /// Peek the head of a session's queue without removing it.
    /// `None` when the queue is empty.
    async fn dequeue(&self, session_id: &str) -> Result<Option<QueueItem>>;

    /// All pending items for a session, head first.
    async fn list_pending(&self, session_id: &str) -> Result<Vec<QueueItem>>;

    /// Acknowledge (delete) a processed item. Unknown ids are a no-op.
    async fn remove(&self, session_id: &str, item_id: &str) -> Result<()>;

    /// Flush and release resources.
    async fn close(&self) -> Result<()>;
}

static QUEUE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Mint the next queue item id.
pub(crate) fn next_item_id(now: DateTime<Utc>) -> String {
    let counter = QUEUE_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("q-{counter}-{}", now.timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_ids_increase_monotonically() {
        let a = next_item_id(Utc::now());
        let b = next_item_id(Utc::now());
        let counter = |id: &str| -> u64 { id.split('-').nth(1).unwrap().parse().unwrap() };
        assert!(counter(&b) > counter(&a));
    }
}
