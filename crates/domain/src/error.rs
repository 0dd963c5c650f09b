use crate::tool::DecisionReasonCode;

/// Shared error type used across all Perch crates.
///
/// Variants are the stable error *kinds*; callers match on the variant,
/// never on message text.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid input shape (tool arguments, record fields, expressions).
    #[error("schema: {0}")]
    SchemaInvalid(String),

    /// A policy layer (tool policy, approval gate, budget, quiet hours)
    /// refused the operation.
    #[error("policy denied ({reason}): {detail}")]
    PolicyDenied {
        reason: DecisionReasonCode,
        detail: String,
    },

    /// A wall-clock deadline expired (model, tool, plugin).
    #[error("timeout: {0}")]
    Timeout(String),

    /// A retryable failure (interrupted I/O, reset connection).
    #[error("transient: {0}")]
    Transient(String),

    /// A memory integrity finding surfaced as an error. Never fatal.
    #[error("integrity: {0}")]
    Integrity(String),

    /// Internal invariant violation. The orchestrator stops taking new
    /// work when it sees one of these.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl Error {
    /// Whether a bounded retry with backoff is appropriate.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transient(_))
            || matches!(self, Error::Io(e) if e.kind() == std::io::ErrorKind::Interrupted)
    }

    /// The decision reason code to surface in lifecycle `failed` payloads.
    pub fn reason_code(&self) -> DecisionReasonCode {
        match self {
            Error::SchemaInvalid(_) => DecisionReasonCode::ToolSchemaInvalid,
            Error::PolicyDenied { reason, .. } => *reason,
            Error::Timeout(_) => DecisionReasonCode::Timeout,
            _ => DecisionReasonCode::InternalError,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_denied_carries_reason_code() {
        let err = Error::PolicyDenied {
            reason: DecisionReasonCode::ToolApprovalRequired,
            detail: "gate refused".into(),
        };
        assert_eq!(err.reason_code(), DecisionReasonCode::ToolApprovalRequired);
        assert!(format!("{err}").contains("TOOL_APPROVAL_REQUIRED"));
    }

    #[test]
    fn transient_is_retryable() {
        assert!(Error::Transient("reset".into()).is_retryable());
        assert!(!Error::Fatal("bug".into()).is_retryable());
    }
}
