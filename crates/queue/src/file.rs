//! File-backed queue backend.
//!
//! One JSON file per sanitized session id under `queues/`, rewritten via
//! the atomic snapshot primitive on every mutation. Files are the source
//! of truth: a fresh process sees exactly what the last `enqueue`/`remove`
//! left behind, which is what gives the queue its at-least-once behavior.

use chrono::Utc;
use tokio::sync::Mutex;

use perch_domain::trace::TraceEvent;
use perch_domain::Result;
use perch_store::snapshot::{load_json, save_json};
use perch_store::ProfilePaths;

use crate::{next_item_id, QueueBackend, QueueItem};

pub struct FileQueue {
    paths: ProfilePaths,
    /// One mutation at a time; rewrite-then-rename is atomic per file but
    /// read-modify-write across files is not.
    write_chain: Mutex<()>,
}

impl FileQueue {
    pub fn new(paths: ProfilePaths) -> Self {
        Self {
            paths,
            write_chain: Mutex::new(()),
        }
    }

    fn load(&self, session_id: &str) -> Result<Vec<QueueItem>> {
        Ok(load_json(&self.paths.queue_file(session_id))?.unwrap_or_default())
    }

    fn save(&self, session_id: &str, items: &[QueueItem]) -> Result<()> {
        save_json(&self.paths.queue_file(session_id), &items)
    }
}

#[async_trait::async_trait]
impl QueueBackend for FileQueue {
    async fn enqueue(&self, session_id: &str, payload: serde_json::Value) -> Result<String> {
        let _guard = self.write_chain.lock().await;
        let mut items = self.load(session_id)?;
        let item = QueueItem {
            id: next_item_id(Utc::now()),
            session_id: session_id.to_owned(),
            payload,
            enqueued_at: Utc::now(),
        };
        let id = item.id.clone();
        items.push(item);
        self.save(session_id, &items)?;

        TraceEvent::QueueEnqueued {
            session_id: session_id.to_owned(),
            item_id: id.clone(),
        }
        .emit();
        Ok(id)
    }

    async fn dequeue(&self, session_id: &str) -> Result<Option<QueueItem>> {
        Ok(self.load(session_id)?.into_iter().next())
    }

    async fn list_pending(&self, session_id: &str) -> Result<Vec<QueueItem>> {
        self.load(session_id)
    }

    async fn remove(&self, session_id: &str, item_id: &str) -> Result<()> {
        let _guard = self.write_chain.lock().await;
        let mut items = self.load(session_id)?;
        let before = items.len();
        items.retain(|item| item.id != item_id);
        if items.len() != before {
            self.save(session_id, &items)?;
            TraceEvent::QueueDrained {
                session_id: session_id.to_owned(),
                item_id: item_id.to_owned(),
            }
            .emit();
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        // Every mutation is already durable; nothing buffered to flush.
        Ok(())
    }
}
