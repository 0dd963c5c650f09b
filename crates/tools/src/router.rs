//! Tool registry and dispatch.
//!
//! `execute` runs the full gauntlet for one call: resolve, validate
//! arguments against the tool's JSON Schema, policy screen, approval gate
//! for risky tools, then the handler under a timeout. Every call — allowed
//! or denied — leaves one audit entry in the call context.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;

use perch_domain::cancel::CancelToken;
use perch_domain::config::ToolsConfig;
use perch_domain::session::SessionContext;
use perch_domain::tool::{DecisionReasonCode, ToolCall, ToolDefinition};
use perch_domain::trace::TraceEvent;
use perch_domain::{Error, Result};

use crate::approval::ApprovalGate;
use crate::decisions::{Decision, PolicyDecisionLog};
use crate::policy::ToolPolicy;

/// The executable side of a tool. Definitions are data; handlers are
/// capabilities registered at startup.
#[async_trait::async_trait]
pub trait ToolHandler: Send + Sync {
    async fn run(&self, arguments: &serde_json::Value, ctx: &ToolContext)
        -> Result<serde_json::Value>;
}

/// Per-call context handed to gates and handlers. The decision log
/// accumulates one entry per routed call for the life of a turn.
pub struct ToolContext {
    pub session: SessionContext,
    pub run_id: uuid::Uuid,
    pub cancel: CancelToken,
    pub decision_logs: Vec<PolicyDecisionLog>,
}

impl ToolContext {
    pub fn new(session: SessionContext, run_id: uuid::Uuid) -> Self {
        Self {
            session,
            run_id,
            cancel: CancelToken::new(),
            decision_logs: Vec::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }
}

struct RegisteredTool {
    definition: ToolDefinition,
    validator: jsonschema::Validator,
    handler: Arc<dyn ToolHandler>,
}

pub struct ToolRouter {
    tools: RwLock<HashMap<String, Arc<RegisteredTool>>>,
    policy: ToolPolicy,
    approval: Arc<dyn ApprovalGate>,
    config: ToolsConfig,
}

impl ToolRouter {
    pub fn new(config: ToolsConfig, approval: Arc<dyn ApprovalGate>) -> Result<Self> {
        let policy = ToolPolicy::from_config(&config)?;
        Ok(Self {
            tools: RwLock::new(HashMap::new()),
            policy,
            approval,
            config,
        })
    }

    /// Register a tool. The schema is compiled now so a malformed one
    /// fails at startup, not on first call.
    pub fn register(&self, definition: ToolDefinition, handler: Arc<dyn ToolHandler>) -> Result<()> {
        let validator = jsonschema::validator_for(&definition.schema).map_err(|e| {
            Error::SchemaInvalid(format!("tool \"{}\" schema: {e}", definition.name))
        })?;
        let name = definition.name.clone();
        self.tools.write().insert(
            name,
            Arc::new(RegisteredTool {
                definition,
                validator,
                handler,
            }),
        );
        Ok(())
    }

    /// Definitions to expose to the model, name-sorted for stable prompts.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .read()
            .values()
            .map(|t| t.definition.clone())
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Route one call. Appends exactly one decision-log entry to `ctx`.
    pub async fn execute(
        &self,
        call: &ToolCall,
        ctx: &mut ToolContext,
    ) -> Result<serde_json::Value> {
        let started = Instant::now();
        let result = self.execute_inner(call, ctx).await;

        let (decision, reason, detail) = match &result {
            Ok(_) => (Decision::Allow, DecisionReasonCode::Allowed, String::new()),
            Err(e) => (Decision::Deny, e.reason_code(), e.to_string()),
        };
        ctx.decision_logs.push(PolicyDecisionLog::new(
            &call.tool_name,
            decision,
            reason,
            detail,
        ));

        TraceEvent::ToolDispatched {
            tool_name: call.tool_name.clone(),
            decision: format!("{decision:?}"),
            reason_code: reason.to_string(),
            duration_ms: started.elapsed().as_millis() as u64,
        }
        .emit();

        result
    }

    async fn execute_inner(
        &self,
        call: &ToolCall,
        ctx: &ToolContext,
    ) -> Result<serde_json::Value> {
        // 1. Resolve.
        let tool = self.tools.read().get(&call.tool_name).cloned();
        let Some(tool) = tool else {
            return Err(Error::PolicyDenied {
                reason: DecisionReasonCode::ToolUnknown,
                detail: format!("no tool named \"{}\"", call.tool_name),
            });
        };

        // 2. Validate arguments against the tool's schema.
        if let Err(e) = tool.validator.validate(&call.arguments) {
            return Err(Error::SchemaInvalid(format!(
                "arguments for \"{}\": {e}",
                call.tool_name
            )));
        }

        // 3. Policy screen.
        self.policy.check(call)?;

        // 4. Approval gate for risky tools.
        if tool.definition.risk_level == perch_domain::tool::RiskLevel::High
            || tool.definition.requires_approval
        {
            let approved = self.approval.check(call, ctx).await.unwrap_or(false);
            if !approved {
                return Err(Error::PolicyDenied {
                    reason: DecisionReasonCode::ToolApprovalRequired,
                    detail: format!("approval refused for \"{}\"", call.tool_name),
                });
            }
        }

        if ctx.cancel.is_cancelled() {
            return Err(Error::PolicyDenied {
                reason: DecisionReasonCode::Cancelled,
                detail: "turn cancelled before dispatch".into(),
            });
        }

        // 5. Invoke under the wall clock.
        let timeout = std::time::Duration::from_millis(self.config.default_timeout_ms);
        match tokio::time::timeout(timeout, tool.handler.run(&call.arguments, ctx)).await {
            Ok(result) => result,
            Err(_elapsed) => Err(Error::Timeout(format!(
                "tool \"{}\" exceeded {}ms",
                call.tool_name, self.config.default_timeout_ms
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::{AlwaysDenyGate, AutoApproveGate};
    use perch_domain::session::ChannelKind;
    use perch_domain::tool::RiskLevel;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct EchoTool;

    #[async_trait::async_trait]
    impl ToolHandler for EchoTool {
        async fn run(
            &self,
            arguments: &serde_json::Value,
            _ctx: &ToolContext,
        ) -> Result<serde_json::Value> {
            Ok(serde_json::json!({"echo": arguments}))
        }
    }

    struct CountingTool(Arc<AtomicUsize>);

    #[async_trait::async_trait]
    impl ToolHandler for CountingTool {
        async fn run(
            &self,
            _arguments: &serde_json::Value,
            _ctx: &ToolContext,
        ) -> Result<serde_json::Value> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(serde_json::json!("ok"))
        }
    }

    struct SlowTool;

    #[async_trait::async_trait]
    impl ToolHandler for SlowTool {
        async fn run(
            &self,
            _arguments: &serde_json::Value,
            _ctx: &ToolContext,
        ) -> Result<serde_json::Value> {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
            Ok(serde_json::json!("never"))
        }
    }

    fn def(name: &str, risk: RiskLevel) -> ToolDefinition {
        ToolDefinition {
            name: name.into(),
            description: "test tool".into(),
            schema: serde_json::json!({
                "type": "object",
                "properties": { "q": { "type": "string" } },
                "required": ["q"],
                "additionalProperties": false
            }),
            risk_level: risk,
            requires_approval: false,
        }
    }

    fn call(name: &str, args: serde_json::Value) -> ToolCall {
        ToolCall {
            call_id: "c1".into(),
            tool_name: name.into(),
            arguments: args,
        }
    }

    fn ctx() -> ToolContext {
        ToolContext::new(
            SessionContext::new("s1", "dm-1", ChannelKind::Dm),
            uuid::Uuid::new_v4(),
        )
    }

    fn router(gate: Arc<dyn ApprovalGate>) -> ToolRouter {
        ToolRouter::new(ToolsConfig::default(), gate).unwrap()
    }

    #[tokio::test]
    async fn happy_path_logs_allow() {
        let r = router(Arc::new(AutoApproveGate));
        r.register(def("echo", RiskLevel::Low), Arc::new(EchoTool)).unwrap();

        let mut ctx = ctx();
        let out = r
            .execute(&call("echo", serde_json::json!({"q": "hello"})), &mut ctx)
            .await
            .unwrap();
        assert_eq!(out["echo"]["q"], "hello");

        assert_eq!(ctx.decision_logs.len(), 1);
        assert_eq!(ctx.decision_logs[0].decision, Decision::Allow);
        assert_eq!(ctx.decision_logs[0].reason_code, DecisionReasonCode::Allowed);
    }

    #[tokio::test]
    async fn unknown_tool() {
        let r = router(Arc::new(AutoApproveGate));
        let mut ctx = ctx();
        let err = r
            .execute(&call("ghost", serde_json::json!({})), &mut ctx)
            .await
            .unwrap_err();
        assert_eq!(err.reason_code(), DecisionReasonCode::ToolUnknown);
        assert_eq!(ctx.decision_logs[0].decision, Decision::Deny);
    }

    #[tokio::test]
    async fn schema_mismatch_is_rejected() {
        let r = router(Arc::new(AutoApproveGate));
        r.register(def("echo", RiskLevel::Low), Arc::new(EchoTool)).unwrap();

        let mut ctx = ctx();
        let err = r
            .execute(&call("echo", serde_json::json!({"q": 42})), &mut ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SchemaInvalid(_)));
        assert_eq!(
            ctx.decision_logs[0].reason_code,
            DecisionReasonCode::ToolSchemaInvalid
        );
    }

    #[tokio::test]
    async fn high_risk_denied_without_approval_and_no_side_effect() {
        let counter = Arc::new(AtomicUsize::new(0));
        let r = router(Arc::new(AlwaysDenyGate));
        r.register(
            def("wipe", RiskLevel::High),
            Arc::new(CountingTool(counter.clone())),
        )
        .unwrap();

        let mut ctx = ctx();
        let err = r
            .execute(&call("wipe", serde_json::json!({"q": "all"})), &mut ctx)
            .await
            .unwrap_err();
        assert_eq!(err.reason_code(), DecisionReasonCode::ToolApprovalRequired);
        assert_eq!(counter.load(Ordering::SeqCst), 0, "handler must not run");
    }

    #[tokio::test]
    async fn requires_approval_flag_gates_low_risk_tools() {
        let r = router(Arc::new(AlwaysDenyGate));
        let mut d = def("careful", RiskLevel::Low);
        d.requires_approval = true;
        r.register(d, Arc::new(EchoTool)).unwrap();

        let mut ctx = ctx();
        let err = r
            .execute(&call("careful", serde_json::json!({"q": "x"})), &mut ctx)
            .await
            .unwrap_err();
        assert_eq!(err.reason_code(), DecisionReasonCode::ToolApprovalRequired);
    }

    #[tokio::test]
    async fn handler_timeout_maps_to_timeout_error() {
        let config = ToolsConfig { default_timeout_ms: 20, ..Default::default() };
        let r = ToolRouter::new(config, Arc::new(AutoApproveGate)).unwrap();
        r.register(def("slow", RiskLevel::Low), Arc::new(SlowTool)).unwrap();

        let mut ctx = ctx();
        let err = r
            .execute(&call("slow", serde_json::json!({"q": "x"})), &mut ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert_eq!(ctx.decision_logs[0].reason_code, DecisionReasonCode::Timeout);
    }

    #[tokio::test]
    async fn cancelled_context_blocks_dispatch() {
        let counter = Arc::new(AtomicUsize::new(0));
        let r = router(Arc::new(AutoApproveGate));
        r.register(
            def("count", RiskLevel::Low),
            Arc::new(CountingTool(counter.clone())),
        )
        .unwrap();

        let mut ctx = ctx();
        ctx.cancel.cancel();
        let err = r
            .execute(&call("count", serde_json::json!({"q": "x"})), &mut ctx)
            .await
            .unwrap_err();
        assert_eq!(err.reason_code(), DecisionReasonCode::Cancelled);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn bad_schema_fails_registration() {
        let r = router(Arc::new(AutoApproveGate));
        let mut d = def("broken", RiskLevel::Low);
        d.schema = serde_json::json!({"type": "not-a-type"});
        assert!(matches!(
            r.register(d, Arc::new(EchoTool)),
            Err(Error::SchemaInvalid(_))
        ));
    }

    #[tokio::test]
    async fn definitions_are_sorted() {
        let r = router(Arc::new(AutoApproveGate));
        r.register(def("zeta", RiskLevel::Low), Arc::new(EchoTool)).unwrap();
        r.register(def("alpha", RiskLevel::Low), Arc::new(EchoTool)).unwrap();
        let names: Vec<String> = r.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, ["alpha", "zeta"]);
    }
}
