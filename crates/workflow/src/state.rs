//! Persisted workflow checkpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Approved,
    Running,
    Done,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Done,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepState {
    pub id: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub definition_id: String,
    pub idempotency_key: String,
    pub status: WorkflowStatus,
    pub steps: Vec<StepState>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowState {
    pub fn new(definition_id: &str, idempotency_key: &str, step_ids: &[String]) -> Self {
        Self {
            definition_id: definition_id.to_owned(),
            idempotency_key: idempotency_key.to_owned(),
            status: WorkflowStatus::Pending,
            steps: step_ids
                .iter()
                .map(|id| StepState {
                    id: id.clone(),
                    status: StepStatus::Pending,
                    error: None,
                })
                .collect(),
            updated_at: Utc::now(),
        }
    }

    /// The storage key: one file per `(definition, idempotency_key)` pair.
    pub fn storage_key(definition_id: &str, idempotency_key: &str) -> String {
        format!("{definition_id}--{idempotency_key}")
    }

    pub fn step(&self, id: &str) -> Option<&StepState> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn step_mut(&mut self, id: &str) -> Option<&mut StepState> {
        self.steps.iter_mut().find(|s| s.id == id)
    }
}
