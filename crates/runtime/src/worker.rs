//! Durable-queue consumer.
//!
//! Incoming turn requests land in the queue first; the worker pulls them
//! per session, runs the turn, and only then acknowledges the item. A
//! crash between `dequeue` and `remove` re-delivers on restart — turns
//! deduplicate by `run_id`, so the at-least-once replay is harmless.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use perch_domain::session::SessionContext;
use perch_domain::tool::Message;
use perch_domain::{Error, Result};
use perch_queue::QueueBackend;

use crate::turn::{TurnRequest, TurnRuntime};

/// The payload shape the worker understands. Anything else in the queue
/// is acknowledged and dropped with a warning.
#[derive(Debug, Serialize, Deserialize)]
pub struct TurnPayload {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<uuid::Uuid>,
}

pub struct QueueWorker {
    queue: Arc<dyn QueueBackend>,
    runtime: Arc<TurnRuntime>,
    /// Global cap on turns in flight across sessions.
    workers: Arc<Semaphore>,
}

impl QueueWorker {
    pub fn new(queue: Arc<dyn QueueBackend>, runtime: Arc<TurnRuntime>, worker_cap: usize) -> Self {
        Self {
            queue,
            runtime,
            workers: Arc::new(Semaphore::new(worker_cap.max(1))),
        }
    }

    /// Enqueue a turn request for a session.
    pub async fn submit(&self, session: &SessionContext, text: &str) -> Result<String> {
        let payload = serde_json::to_value(TurnPayload {
            text: text.to_owned(),
            run_id: Some(uuid::Uuid::new_v4()),
        })?;
        self.queue.enqueue(&session.session_id, payload).await
    }

    /// Drain everything currently queued for one session, in order.
    /// Returns the number of items processed.
    pub async fn drain_session(&self, session: &SessionContext) -> Result<usize> {
        let mut processed = 0;
        loop {
            let Some(item) = self.queue.dequeue(&session.session_id).await? else {
                break;
            };

            let permit = self
                .workers
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| Error::Fatal("worker semaphore closed".into()))?;

            match serde_json::from_value::<TurnPayload>(item.payload.clone()) {
                Ok(payload) => {
                    // Re-delivered items keep their run id, so consumers
                    // downstream can deduplicate.
                    let req = TurnRequest {
                        session: session.clone(),
                        messages: vec![Message::user(&payload.text)],
                        run_id: payload.run_id.unwrap_or_else(uuid::Uuid::new_v4),
                    };
                    if let Err(e) = self.runtime.run_turn(req).await {
                        tracing::warn!(
                            error = %e,
                            session_id = %session.session_id,
                            "queued turn failed"
                        );
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        item_id = %item.id,
                        "unrecognized queue payload; dropping"
                    );
                }
            }

            // Acknowledge only after processing.
            self.queue.remove(&session.session_id, &item.id).await?;
            drop(permit);
            processed += 1;
        }
        Ok(processed)
    }
}
