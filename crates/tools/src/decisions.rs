//! Audit records for every routing decision.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use perch_domain::tool::DecisionReasonCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Allow,
    Deny,
}

/// One line of the per-turn audit trail. Appended by the router for every
/// call it sees, allowed or not.
#[derive(Debug, Clone, Serialize)]
pub struct PolicyDecisionLog {
    pub audit_id: Uuid,
    pub tool_name: String,
    pub decision: Decision,
    pub reason_code: DecisionReasonCode,
    pub detail: String,
    pub at: DateTime<Utc>,
}

impl PolicyDecisionLog {
    pub fn new(
        tool_name: &str,
        decision: Decision,
        reason_code: DecisionReasonCode,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            audit_id: Uuid::new_v4(),
            tool_name: tool_name.to_owned(),
            decision,
            reason_code,
            detail: detail.into(),
            at: Utc::now(),
        }
    }
}
