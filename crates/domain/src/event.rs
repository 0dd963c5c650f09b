//! Lifecycle events emitted during a run.
//!
//! Produced by the turn runtime, fanned out by the lifecycle stream to any
//! number of subscribers (dashboards, channel adapters, tests).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEventKind {
    /// Synthetic first event on every subscription, so consumers can tell
    /// "connected, nothing happened yet" from "disconnected".
    Connecting,
    Queued,
    Started,
    Tool,
    Assistant,
    Compaction,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub kind: LifecycleEventKind,
    pub session_id: String,
    pub run_id: Uuid,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl LifecycleEvent {
    pub fn new(kind: LifecycleEventKind, session_id: impl Into<String>, run_id: Uuid) -> Self {
        Self {
            kind,
            session_id: session_id.into(),
            run_id,
            at: Utc::now(),
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// The synthetic event delivered first on every subscription.
    pub fn connecting() -> Self {
        Self::new(LifecycleEventKind::Connecting, "", Uuid::nil())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_serializes_snake_case() {
        let e = LifecycleEvent::new(LifecycleEventKind::Completed, "s1", Uuid::new_v4());
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["kind"], "completed");
        assert!(json.get("payload").is_none());
    }

    #[test]
    fn connecting_is_sessionless() {
        let e = LifecycleEvent::connecting();
        assert_eq!(e.kind, LifecycleEventKind::Connecting);
        assert!(e.session_id.is_empty());
        assert!(e.run_id.is_nil());
    }
}
