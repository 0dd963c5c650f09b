//! Tool policy: name allowlist plus destructive-pattern screening.

use regex::Regex;

use perch_domain::config::ToolsConfig;
use perch_domain::tool::{DecisionReasonCode, ToolCall};
use perch_domain::{Error, Result};

pub struct ToolPolicy {
    /// `None` allows every registered tool.
    allowlist: Option<Vec<String>>,
    denied: Vec<Regex>,
}

impl ToolPolicy {
    /// Compile the policy. Invalid regexes are config errors — fail fast
    /// rather than silently skipping a safety pattern.
    pub fn from_config(config: &ToolsConfig) -> Result<Self> {
        let denied = config
            .denied_patterns
            .iter()
            .map(|p| {
                Regex::new(p)
                    .map_err(|e| Error::SchemaInvalid(format!("denied pattern \"{p}\": {e}")))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            allowlist: config.allowlist.clone(),
            denied,
        })
    }

    /// Screen one call. `Ok` means the policy layer has no objection;
    /// schema and approval checks still apply.
    pub fn check(&self, call: &ToolCall) -> Result<()> {
        if let Some(allowlist) = &self.allowlist {
            if !allowlist.iter().any(|t| t == &call.tool_name) {
                return Err(Error::PolicyDenied {
                    reason: DecisionReasonCode::ToolPolicyBlocked,
                    detail: format!("tool \"{}\" is not in the allowlist", call.tool_name),
                });
            }
        }

        let rendered = call.arguments.to_string();
        for pattern in &self.denied {
            if pattern.is_match(&rendered) {
                return Err(Error::PolicyDenied {
                    reason: DecisionReasonCode::ToolDestructiveDenied,
                    detail: format!("arguments match destructive pattern \"{pattern}\""),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, args: serde_json::Value) -> ToolCall {
        ToolCall {
            call_id: "c1".into(),
            tool_name: name.into(),
            arguments: args,
        }
    }

    #[test]
    fn default_policy_allows_harmless_calls() {
        let policy = ToolPolicy::from_config(&ToolsConfig::default()).unwrap();
        assert!(policy.check(&call("probe", serde_json::json!({"q": "status"}))).is_ok());
    }

    #[test]
    fn allowlist_blocks_unlisted_tools() {
        let config = ToolsConfig {
            allowlist: Some(vec!["probe".into()]),
            ..Default::default()
        };
        let policy = ToolPolicy::from_config(&config).unwrap();
        assert!(policy.check(&call("probe", serde_json::json!({}))).is_ok());

        let err = policy.check(&call("exec", serde_json::json!({}))).unwrap_err();
        match err {
            Error::PolicyDenied { reason, .. } => {
                assert_eq!(reason, DecisionReasonCode::ToolPolicyBlocked)
            }
            other => panic!("expected PolicyDenied, got {other:?}"),
        }
    }

    #[test]
    fn destructive_arguments_are_denied() {
        let policy = ToolPolicy::from_config(&ToolsConfig::default()).unwrap();
        let err = policy
            .check(&call("exec", serde_json::json!({"command": "rm -rf / --no-preserve-root"})))
            .unwrap_err();
        match err {
            Error::PolicyDenied { reason, .. } => {
                assert_eq!(reason, DecisionReasonCode::ToolDestructiveDenied)
            }
            other => panic!("expected PolicyDenied, got {other:?}"),
        }
    }

    #[test]
    fn invalid_pattern_fails_compilation() {
        let config = ToolsConfig {
            denied_patterns: vec!["[broken".into()],
            ..Default::default()
        };
        assert!(matches!(
            ToolPolicy::from_config(&config),
            Err(Error::SchemaInvalid(_))
        ));
    }
}
