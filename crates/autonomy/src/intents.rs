//! Proactive intents: messages the agent decides to send later.
//!
//! An intent is queued with an earliest-delivery time and dispatched by
//! the orchestrator when the budget allows. Intents that sit pending past
//! the expiry window are marked expired rather than delivered late.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use perch_domain::trace::TraceEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentStatus {
    Pending,
    Sent,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProactiveIntent {
    pub id: String,
    pub channel_id: String,
    pub text: String,
    /// Earliest delivery time, epoch ms.
    pub not_before_ms: i64,
    pub status: IntentStatus,
    pub created_at: DateTime<Utc>,
}

impl ProactiveIntent {
    pub fn new(channel_id: impl Into<String>, text: impl Into<String>, not_before_ms: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            channel_id: channel_id.into(),
            text: text.into(),
            not_before_ms,
            status: IntentStatus::Pending,
            created_at: Utc::now(),
        }
    }
}

#[derive(Default)]
pub struct IntentStore {
    intents: Mutex<Vec<ProactiveIntent>>,
}

impl IntentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(intents: Vec<ProactiveIntent>) -> Self {
        Self {
            intents: Mutex::new(intents),
        }
    }

    pub fn queue(&self, intent: ProactiveIntent) -> String {
        let id = intent.id.clone();
        self.intents.lock().push(intent);
        id
    }

    /// Pending intents whose `not_before_ms` has passed, oldest first.
    pub fn due(&self, now: DateTime<Utc>) -> Vec<ProactiveIntent> {
        let now_ms = now.timestamp_millis();
        let mut due: Vec<ProactiveIntent> = self
            .intents
            .lock()
            .iter()
            .filter(|i| i.status == IntentStatus::Pending && i.not_before_ms <= now_ms)
            .cloned()
            .collect();
        due.sort_by_key(|i| i.not_before_ms);
        due
    }

    pub fn mark_sent(&self, id: &str) {
        let mut intents = self.intents.lock();
        if let Some(intent) = intents.iter_mut().find(|i| i.id == id) {
            intent.status = IntentStatus::Sent;
            TraceEvent::IntentDelivered {
                intent_id: intent.id.clone(),
                channel_id: intent.channel_id.clone(),
            }
            .emit();
        }
    }

    /// Expire pending intents whose delivery window has passed.
    pub fn expire_stale(&self, now: DateTime<Utc>, expiry_ms: u64) -> usize {
        let now_ms = now.timestamp_millis();
        let mut expired = 0;
        for intent in self.intents.lock().iter_mut() {
            if intent.status == IntentStatus::Pending
                && now_ms - intent.not_before_ms > expiry_ms as i64
            {
                intent.status = IntentStatus::Expired;
                expired += 1;
            }
        }
        expired
    }

    pub fn snapshot(&self) -> Vec<ProactiveIntent> {
        self.intents.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intent_at(not_before_ms: i64) -> ProactiveIntent {
        ProactiveIntent::new("dm", "remember to stretch", not_before_ms)
    }

    #[test]
    fn due_respects_not_before_and_order() {
        let store = IntentStore::new();
        let now = Utc::now();
        let now_ms = now.timestamp_millis();

        store.queue(intent_at(now_ms + 60_000)); // future
        let b = store.queue(intent_at(now_ms - 1_000));
        let a = store.queue(intent_at(now_ms - 5_000));

        let due = store.due(now);
        assert_eq!(due.len(), 2);
        assert_eq!(due[0].id, a, "older not_before first");
        assert_eq!(due[1].id, b);
    }

    #[test]
    fn sent_intents_leave_the_due_set() {
        let store = IntentStore::new();
        let now = Utc::now();
        let id = store.queue(intent_at(now.timestamp_millis() - 1));

        store.mark_sent(&id);
        assert!(store.due(now).is_empty());
        assert_eq!(store.snapshot()[0].status, IntentStatus::Sent);
    }

    #[test]
    fn stale_intents_expire_instead_of_sending_late() {
        let store = IntentStore::new();
        let now = Utc::now();
        store.queue(intent_at(now.timestamp_millis() - 100_000));

        let expired = store.expire_stale(now, 50_000);
        assert_eq!(expired, 1);
        assert!(store.due(now).is_empty());
        assert_eq!(store.snapshot()[0].status, IntentStatus::Expired);
    }
}
