//! Durable workflows: ordered steps with approval gates, checkpointed to
//! disk after every transition so a restart resumes instead of redoing.

pub mod runtime;
pub mod state;

pub use runtime::{ApprovalFn, RunOptions, StepFn, WorkflowDefinition, WorkflowRuntime, WorkflowStep};
pub use state::{StepState, StepStatus, WorkflowState, WorkflowStatus};
