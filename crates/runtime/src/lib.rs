//! The turn-execution and orchestration layer.
//!
//! [`TurnRuntime`] drives one agent turn end to end: context assembly from
//! memory and plugins, adapter streaming, tool dispatch, lifecycle events,
//! and the closing memory write. [`AutonomyOrchestrator`] owns the four
//! background schedulers (cron, heartbeat, integrity scan, intents) and
//! funnels their firings through the same turn path under one budget.

pub mod context;
pub mod orchestrator;
pub mod plugins;
pub mod reliability;
pub mod session;
pub mod snapshot;
pub mod turn;
pub mod worker;

pub use context::{DirectiveConflictHeuristic, PatternConflictHeuristic, PromptAssembler};
pub use orchestrator::{AutonomyOrchestrator, OrchestratorState};
pub use plugins::{ContextArtifact, ContextCollector, ContextInsight, ContextSynthesizer, InsightAnalyzer, PluginSet};
pub use reliability::{ActionEnvelope, ConfidenceInput, ConfidenceModel, ConfidenceReport, ReasoningResetController};
pub use session::{CancelMap, SessionLockMap};
pub use turn::{TurnOutcome, TurnRequest, TurnRuntime, TurnStatus};
pub use worker::QueueWorker;
