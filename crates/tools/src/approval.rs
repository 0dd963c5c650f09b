//! Approval gating for risky tool calls.
//!
//! High-risk tools (and any tool flagged `requires_approval`) pause until
//! the gate answers. The built-in [`PendingApprovalGate`] parks the call in
//! a store that a human resolves through the host's API; a timeout ensures
//! the runtime never blocks indefinitely.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::oneshot;
use uuid::Uuid;

use perch_domain::tool::ToolCall;
use perch_domain::Result;

use crate::router::ToolContext;

/// Answers "may this call run?". `Ok(false)` is a clean denial; errors are
/// gate failures (treated as denial by the router).
#[async_trait::async_trait]
pub trait ApprovalGate: Send + Sync {
    async fn check(&self, call: &ToolCall, ctx: &ToolContext) -> Result<bool>;
}

/// Approves everything. For trusted hosts and tests.
pub struct AutoApproveGate;

#[async_trait::async_trait]
impl ApprovalGate for AutoApproveGate {
    async fn check(&self, _call: &ToolCall, _ctx: &ToolContext) -> Result<bool> {
        Ok(true)
    }
}

/// Denies everything. The safe default when no reviewer is wired up.
pub struct AlwaysDenyGate;

#[async_trait::async_trait]
impl ApprovalGate for AlwaysDenyGate {
    async fn check(&self, _call: &ToolCall, _ctx: &ToolContext) -> Result<bool> {
        Ok(false)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pending approvals
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The decision made by a human reviewer.
#[derive(Debug)]
enum ReviewDecision {
    Approved,
    Denied,
}

struct PendingApproval {
    info: ApprovalInfo,
    respond: oneshot::Sender<ReviewDecision>,
}

/// Serializable snapshot of a pending approval (for host APIs / UIs).
#[derive(Debug, Clone, Serialize)]
pub struct ApprovalInfo {
    pub id: Uuid,
    pub tool_name: String,
    pub arguments: serde_json::Value,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
}

/// Gate that parks calls until a human approves or denies them.
///
/// Each pending entry holds a `oneshot::Sender` that unblocks the waiting
/// `check` when resolved; entries that outlive the timeout are removed and
/// denied.
pub struct PendingApprovalGate {
    pending: RwLock<HashMap<Uuid, PendingApproval>>,
    timeout: Duration,
}

impl PendingApprovalGate {
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: RwLock::new(HashMap::new()),
            timeout,
        }
    }

    /// Resolve a pending approval as approved. Returns `true` if found.
    pub fn approve(&self, id: &Uuid) -> bool {
        if let Some(pending) = self.pending.write().remove(id) {
            let _ = pending.respond.send(ReviewDecision::Approved);
            return true;
        }
        false
    }

    /// Resolve a pending approval as denied. Returns `true` if found.
    pub fn deny(&self, id: &Uuid) -> bool {
        if let Some(pending) = self.pending.write().remove(id) {
            let _ = pending.respond.send(ReviewDecision::Denied);
            return true;
        }
        false
    }

    /// All currently pending approvals, for dashboard introspection.
    pub fn list_pending(&self) -> Vec<ApprovalInfo> {
        self.pending.read().values().map(|p| p.info.clone()).collect()
    }
}

#[async_trait::async_trait]
impl ApprovalGate for PendingApprovalGate {
    async fn check(&self, call: &ToolCall, ctx: &ToolContext) -> Result<bool> {
        let (tx, rx) = oneshot::channel();
        let id = Uuid::new_v4();
        let info = ApprovalInfo {
            id,
            tool_name: call.tool_name.clone(),
            arguments: call.arguments.clone(),
            session_id: ctx.session.session_id.clone(),
            created_at: Utc::now(),
        };
        self.pending
            .write()
            .insert(id, PendingApproval { info, respond: tx });

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(ReviewDecision::Approved)) => Ok(true),
            Ok(Ok(ReviewDecision::Denied)) | Ok(Err(_)) => Ok(false),
            Err(_elapsed) => {
                self.pending.write().remove(&id);
                tracing::warn!(tool = %call.tool_name, %id, "approval timed out; denying");
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use perch_domain::session::{ChannelKind, SessionContext};

    fn ctx() -> ToolContext {
        ToolContext::new(
            SessionContext::new("s1", "dm-1", ChannelKind::Dm),
            Uuid::new_v4(),
        )
    }

    fn call() -> ToolCall {
        ToolCall {
            call_id: "c1".into(),
            tool_name: "exec".into(),
            arguments: serde_json::json!({"command": "true"}),
        }
    }

    #[tokio::test]
    async fn approve_unblocks_check() {
        let gate = std::sync::Arc::new(PendingApprovalGate::new(Duration::from_secs(5)));

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.check(&call(), &ctx()).await })
        };

        // Wait until the request is parked, then approve it.
        let id = loop {
            if let Some(info) = gate.list_pending().first() {
                break info.id;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };
        assert!(gate.approve(&id));

        assert!(waiter.await.unwrap().unwrap());
        assert!(gate.list_pending().is_empty());
    }

    #[tokio::test]
    async fn deny_unblocks_check_with_false() {
        let gate = std::sync::Arc::new(PendingApprovalGate::new(Duration::from_secs(5)));
        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.check(&call(), &ctx()).await })
        };
        let id = loop {
            if let Some(info) = gate.list_pending().first() {
                break info.id;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };
        assert!(gate.deny(&id));
        assert!(!waiter.await.unwrap().unwrap());
    }

    #[tokio::test]
    async fn timeout_denies_and_cleans_up() {
        let gate = PendingApprovalGate::new(Duration::from_millis(20));
        let approved = gate.check(&call(), &ctx()).await.unwrap();
        assert!(!approved);
        assert!(gate.list_pending().is_empty());
    }

    #[test]
    fn resolve_unknown_id_returns_false() {
        let gate = PendingApprovalGate::new(Duration::from_secs(1));
        assert!(!gate.approve(&Uuid::new_v4()));
        assert!(!gate.deny(&Uuid::new_v4()));
    }
}
