//! Step-by-step workflow execution.
//!
//! Every transition is persisted before the next step starts, so the
//! worst a crash can do is re-run the step that was in flight — step
//! bodies are expected to be idempotent, the same contract the durable
//! queue imposes on its consumers.

use std::sync::Arc;

use futures_util::future::BoxFuture;

use perch_domain::trace::TraceEvent;
use perch_domain::{Error, Result};
use perch_store::snapshot::{load_json, save_json};
use perch_store::ProfilePaths;

use crate::state::{StepStatus, WorkflowState, WorkflowStatus};

/// A step body. Application-defined failures use `anyhow`; the runtime
/// records the message and fails the workflow.
pub type StepFn =
    Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<serde_json::Value>> + Send + Sync>;

/// Asked once per unapproved gated step; `false` skips the step and fails
/// the workflow.
pub type ApprovalFn = Arc<dyn Fn(String) -> BoxFuture<'static, bool> + Send + Sync>;

pub struct WorkflowStep {
    pub id: String,
    pub requires_approval: bool,
    pub run: StepFn,
}

impl WorkflowStep {
    pub fn new(id: impl Into<String>, run: StepFn) -> Self {
        Self {
            id: id.into(),
            requires_approval: false,
            run,
        }
    }

    pub fn gated(mut self) -> Self {
        self.requires_approval = true;
        self
    }
}

pub struct WorkflowDefinition {
    pub id: String,
    pub steps: Vec<WorkflowStep>,
}

pub struct RunOptions {
    pub idempotency_key: String,
    pub approval: Option<ApprovalFn>,
}

pub struct WorkflowRuntime {
    paths: ProfilePaths,
}

impl WorkflowRuntime {
    pub fn new(paths: ProfilePaths) -> Self {
        Self { paths }
    }

    pub fn load_state(&self, definition_id: &str, idempotency_key: &str) -> Result<Option<WorkflowState>> {
        let key = WorkflowState::storage_key(definition_id, idempotency_key);
        load_json(&self.paths.workflow_state_file(&key))
    }

    /// Run (or resume) a workflow. Already-`done` workflows return
    /// immediately; `done` steps are skipped on resume.
    pub async fn run(
        &self,
        definition: &WorkflowDefinition,
        opts: &RunOptions,
    ) -> Result<WorkflowState> {
        let step_ids: Vec<String> = definition.steps.iter().map(|s| s.id.clone()).collect();
        let mut state = self
            .load_state(&definition.id, &opts.idempotency_key)?
            .unwrap_or_else(|| WorkflowState::new(&definition.id, &opts.idempotency_key, &step_ids));

        if state.status == WorkflowStatus::Done {
            return Ok(state);
        }
        if state.steps.len() != definition.steps.len() {
            return Err(Error::SchemaInvalid(format!(
                "workflow \"{}\" shape changed under idempotency key \"{}\"",
                definition.id, opts.idempotency_key
            )));
        }

        state.status = WorkflowStatus::Running;
        self.persist(&mut state)?;

        for step in &definition.steps {
            let status = state
                .step(&step.id)
                .map(|s| s.status)
                .unwrap_or(StepStatus::Pending);

            if status == StepStatus::Done {
                continue;
            }

            // Approval gate — asked once; the grant is checkpointed so a
            // restart does not re-ask.
            if step.requires_approval && status != StepStatus::Approved {
                let approved = match &opts.approval {
                    Some(gate) => gate(step.id.clone()).await,
                    None => false,
                };
                if !approved {
                    self.transition(&mut state, &step.id, StepStatus::Skipped, None)?;
                    state.status = WorkflowStatus::Failed;
                    self.persist(&mut state)?;
                    return Ok(state);
                }
                self.transition(&mut state, &step.id, StepStatus::Approved, None)?;
            }

            self.transition(&mut state, &step.id, StepStatus::Running, None)?;

            match (step.run)().await {
                Ok(_output) => {
                    self.transition(&mut state, &step.id, StepStatus::Done, None)?;
                }
                Err(e) => {
                    self.transition(&mut state, &step.id, StepStatus::Failed, Some(e.to_string()))?;
                    state.status = WorkflowStatus::Failed;
                    self.persist(&mut state)?;
                    return Ok(state);
                }
            }
        }

        state.status = WorkflowStatus::Done;
        self.persist(&mut state)?;
        Ok(state)
    }

    fn transition(
        &self,
        state: &mut WorkflowState,
        step_id: &str,
        status: StepStatus,
        error: Option<String>,
    ) -> Result<()> {
        if let Some(step) = state.step_mut(step_id) {
            step.status = status;
            step.error = error;
        }
        TraceEvent::WorkflowStepTransition {
            definition_id: state.definition_id.clone(),
            step_id: step_id.to_owned(),
            status: format!("{status:?}"),
        }
        .emit();
        self.persist(state)
    }

    fn persist(&self, state: &mut WorkflowState) -> Result<()> {
        state.updated_at = chrono::Utc::now();
        let key = WorkflowState::storage_key(&state.definition_id, &state.idempotency_key);
        save_json(&self.paths.workflow_state_file(&key), state)
    }
}
