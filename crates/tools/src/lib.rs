//! The tool layer: registry and routing, argument validation, policy
//! enforcement, approval gating, and the exec sandbox.

pub mod approval;
pub mod decisions;
pub mod policy;
pub mod router;
pub mod sandbox;

pub use approval::{AlwaysDenyGate, ApprovalGate, AutoApproveGate, PendingApprovalGate};
pub use decisions::{Decision, PolicyDecisionLog};
pub use policy::ToolPolicy;
pub use router::{ToolContext, ToolHandler, ToolRouter};
pub use sandbox::{ExecOptions, ExecOutcome, ExecSandbox, ExecTool, ProcessSandbox};
