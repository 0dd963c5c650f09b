//! In-memory queue backend.

use std::collections::HashMap;

use chrono::Utc;
use parking_lot::Mutex;

use perch_domain::Result;

use crate::{next_item_id, QueueBackend, QueueItem};

#[derive(Default)]
pub struct InMemoryQueue {
    queues: Mutex<HashMap<String, Vec<QueueItem>>>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl QueueBackend for InMemoryQueue {
    async fn enqueue(&self, session_id: &str, payload: serde_json::Value) -> Result<String> {
        let item = QueueItem {
            id: next_item_id(Utc::now()),
            session_id: session_id.to_owned(),
            payload,
            enqueued_at: Utc::now(),
        };
        let id = item.id.clone();
        self.queues
            .lock()
            .entry(session_id.to_owned())
            .or_default()
            .push(item);
        Ok(id)
    }

    async fn dequeue(&self, session_id: &str) -> Result<Option<QueueItem>> {
        Ok(self
            .queues
            .lock()
            .get(session_id)
            .and_then(|q| q.first().cloned()))
    }

    async fn list_pending(&self, session_id: &str) -> Result<Vec<QueueItem>> {
        Ok(self
            .queues
            .lock()
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn remove(&self, session_id: &str, item_id: &str) -> Result<()> {
        if let Some(q) = self.queues.lock().get_mut(session_id) {
            q.retain(|item| item.id != item_id);
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
