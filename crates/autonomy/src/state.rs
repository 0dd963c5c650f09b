//! The autonomy-state snapshot: budget windows + intents in one file,
//! flushed after every mutation so a restart resumes exactly where the
//! schedulers left off.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use perch_domain::config::AutonomyConfig;
use perch_domain::Result;
use perch_store::snapshot::{load_json, save_json};

use crate::budget::{AutonomyBudget, BudgetDecision, ChannelWindows};
use crate::intents::{IntentStore, ProactiveIntent};

#[derive(Debug, Default, Serialize, Deserialize)]
struct AutonomyStateFile {
    budget: HashMap<String, ChannelWindows>,
    intents: Vec<ProactiveIntent>,
}

/// Budget + intents with a shared durable snapshot.
pub struct AutonomyState {
    path: PathBuf,
    pub budget: AutonomyBudget,
    pub intents: IntentStore,
}

impl AutonomyState {
    pub fn open(path: PathBuf, config: AutonomyConfig) -> Result<Self> {
        let state: AutonomyStateFile = load_json(&path)?.unwrap_or_default();
        Ok(Self {
            path,
            budget: AutonomyBudget::from_snapshot(config, state.budget),
            intents: IntentStore::from_snapshot(state.intents),
        })
    }

    /// Spend budget and persist on success. Denials change nothing, so
    /// nothing is written for them.
    pub fn try_consume(&self, channel_id: &str, now: DateTime<Utc>) -> Result<BudgetDecision> {
        let decision = self.budget.try_consume(channel_id, now);
        if decision.is_allowed() {
            self.flush()?;
        }
        Ok(decision)
    }

    pub fn queue_intent(&self, intent: ProactiveIntent) -> Result<String> {
        let id = self.intents.queue(intent);
        self.flush()?;
        Ok(id)
    }

    pub fn mark_intent_sent(&self, id: &str) -> Result<()> {
        self.intents.mark_sent(id);
        self.flush()
    }

    pub fn expire_stale_intents(&self, now: DateTime<Utc>, expiry_ms: u64) -> Result<usize> {
        let expired = self.intents.expire_stale(now, expiry_ms);
        if expired > 0 {
            self.flush()?;
        }
        Ok(expired)
    }

    pub fn flush(&self) -> Result<()> {
        save_json(
            &self.path,
            &AutonomyStateFile {
                budget: self.budget.snapshot(),
                intents: self.intents.snapshot(),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(dir: &std::path::Path) -> AutonomyState {
        AutonomyState::open(dir.join("autonomy-state.json"), AutonomyConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn consume_persists_and_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc::now();
        {
            let s = state(dir.path());
            assert!(s.try_consume("dm", now).unwrap().is_allowed());
        }

        let s = state(dir.path());
        assert_eq!(s.budget.snapshot()["dm"].hourly.len(), 1);
    }

    #[tokio::test]
    async fn intents_persist_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc::now();
        let id = {
            let s = state(dir.path());
            s.queue_intent(ProactiveIntent::new("dm", "ping", now.timestamp_millis()))
                .unwrap()
        };

        let s = state(dir.path());
        let due = s.intents.due(now);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, id);
    }
}
