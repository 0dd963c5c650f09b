//! Turn execution — the inner loop that streams the model, dispatches
//! tool calls, and finalizes memory.
//!
//! One turn: assemble the prompt, stream adapter events, run requested
//! tools through the router, feed results back, and on completion write a
//! turn summary to memory and update the embedding index. Turns are
//! serialized per session; cancellation is cooperative and observed at
//! every suspension point. A cancelled turn writes no memory record.

use std::sync::Arc;

use futures_util::StreamExt;
use uuid::Uuid;

use perch_domain::cancel::CancelToken;
use perch_domain::config::RuntimeConfig;
use perch_domain::event::{LifecycleEvent, LifecycleEventKind};
use perch_domain::memory::{MemoryCategory, MemoryRecord, Provenance, Sensitivity};
use perch_domain::scrub::{NoopScrubber, SharedScrubber};
use perch_domain::session::SessionContext;
use perch_domain::stream::{AdapterEvent, AdapterHandle, ModelAdapter, TurnOptions, Usage};
use perch_domain::tool::{DecisionReasonCode, Message, Role, ToolCall};
use perch_domain::trace::TraceEvent;
use perch_domain::Result;
use perch_lifecycle::LifecycleStream;
use perch_memory::{MemoryEmbeddingIndex, MemoryStore};
use perch_tools::{PolicyDecisionLog, ToolContext, ToolRouter};

use crate::context::PromptAssembler;
use crate::reliability::{ActionEnvelope, ConfidenceInput, ConfidenceModel, ReasoningResetController};
use crate::session::{CancelMap, SessionLockMap};
use crate::snapshot::{SnapshotWriter, TurnSnapshot};

pub struct TurnRequest {
    pub session: SessionContext,
    pub messages: Vec<Message>,
    pub run_id: Uuid,
}

impl TurnRequest {
    /// Convenience for the common case: one user message.
    pub fn from_text(session: SessionContext, text: impl Into<String>) -> Self {
        Self {
            session,
            messages: vec![Message::user(text)],
            run_id: Uuid::new_v4(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStatus {
    Completed,
    Failed,
    Cancelled,
}

pub struct TurnOutcome {
    pub run_id: Uuid,
    pub status: TurnStatus,
    pub final_text: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Usage,
    pub reason_code: Option<DecisionReasonCode>,
    pub decision_logs: Vec<PolicyDecisionLog>,
    /// Present on completed turns with visible output.
    pub envelope: Option<ActionEnvelope>,
}

pub struct TurnRuntime {
    adapter: Arc<dyn ModelAdapter>,
    router: Arc<ToolRouter>,
    lifecycle: LifecycleStream,
    memory: Arc<MemoryStore>,
    embeddings: Arc<MemoryEmbeddingIndex>,
    assembler: PromptAssembler,
    scrubber: SharedScrubber,
    reset: ReasoningResetController,
    locks: SessionLockMap,
    cancels: CancelMap,
    config: RuntimeConfig,
    snapshots: Option<SnapshotWriter>,
}

impl TurnRuntime {
    pub fn new(
        adapter: Arc<dyn ModelAdapter>,
        router: Arc<ToolRouter>,
        lifecycle: LifecycleStream,
        memory: Arc<MemoryStore>,
        embeddings: Arc<MemoryEmbeddingIndex>,
        assembler: PromptAssembler,
        config: RuntimeConfig,
    ) -> Self {
        let snapshots = config
            .snapshot_dir
            .clone()
            .map(SnapshotWriter::new);
        Self {
            adapter,
            router,
            lifecycle,
            memory,
            embeddings,
            assembler,
            scrubber: Arc::new(NoopScrubber),
            reset: ReasoningResetController::new(config.reasoning_reset_threshold),
            locks: SessionLockMap::new(),
            cancels: CancelMap::new(),
            config,
            snapshots,
        }
    }

    pub fn with_scrubber(mut self, scrubber: SharedScrubber) -> Self {
        self.scrubber = scrubber;
        self
    }

    pub fn lifecycle(&self) -> &LifecycleStream {
        &self.lifecycle
    }

    /// Request cancellation of the session's in-flight turn.
    pub fn cancel_session(&self, session_id: &str) -> bool {
        self.cancels.cancel(session_id)
    }

    pub fn is_running(&self, session_id: &str) -> bool {
        self.cancels.is_running(session_id)
    }

    /// Run one turn to completion. At most one turn per session runs at a
    /// time; a second request waits for the first to release the session.
    pub async fn run_turn(&self, req: TurnRequest) -> Result<TurnOutcome> {
        self.emit(LifecycleEventKind::Queued, &req.session.session_id, req.run_id, None);

        let _permit = self.locks.acquire(&req.session.session_id).await;
        let cancel = self.cancels.register(&req.session.session_id);

        let result = self.run_turn_inner(&req, &cancel).await;
        self.cancels.remove(&req.session.session_id);

        match result {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.emit_failed(&req, e.reason_code(), &e.to_string());
                Err(e)
            }
        }
    }

    async fn run_turn_inner(
        &self,
        req: &TurnRequest,
        cancel: &CancelToken,
    ) -> Result<TurnOutcome> {
        self.emit(LifecycleEventKind::Started, &req.session.session_id, req.run_id, None);

        // Phase 1: context assembly.
        let assembled = self.assembler.assemble(&req.session, req.messages.clone()).await;
        let mut messages = assembled.messages;

        let handle = self.adapter.create_session(&req.session).await?;
        let outcome = self
            .tool_loop(req, cancel, &handle, &mut messages, assembled.plugin_diagnostics)
            .await;
        if let Err(e) = self.adapter.close(handle).await {
            tracing::warn!(error = %e, "adapter session close failed");
        }
        outcome
    }

    /// Phase 2: the model ↔ tool loop.
    async fn tool_loop(
        &self,
        req: &TurnRequest,
        cancel: &CancelToken,
        handle: &AdapterHandle,
        messages: &mut Vec<Message>,
        plugin_diagnostics: u32,
    ) -> Result<TurnOutcome> {
        let session_id = req.session.session_id.as_str();
        let tools = self.router.definitions();
        let options = TurnOptions {
            turn_id: req.run_id,
            ..Default::default()
        };

        let mut tool_ctx =
            ToolContext::new(req.session.clone(), req.run_id).with_cancel(cancel.clone());
        let mut total_usage = Usage::default();
        let mut all_tool_calls: Vec<ToolCall> = Vec::new();
        let mut tool_failures = 0u32;

        for _loop_idx in 0..self.config.max_tool_loops {
            if cancel.is_cancelled() {
                return Ok(self.finish_cancelled(req, tool_ctx, all_tool_calls, total_usage));
            }

            let mut stream = self
                .adapter
                .send_turn(handle, messages, &tools, &options)
                .await?;

            let mut text_buf = String::new();
            let mut pending: Vec<ToolCall> = Vec::new();
            let mut adapter_error: Option<String> = None;

            while let Some(event) = stream.next().await {
                if cancel.is_cancelled() {
                    if let Err(e) = self.adapter.cancel(req.run_id).await {
                        tracing::debug!(error = %e, "adapter cancel failed");
                    }
                    return Ok(self.finish_cancelled(req, tool_ctx, all_tool_calls, total_usage));
                }

                match event? {
                    AdapterEvent::AssistantDelta { text } => {
                        self.emit(
                            LifecycleEventKind::Assistant,
                            session_id,
                            req.run_id,
                            Some(serde_json::json!({ "delta": text })),
                        );
                        text_buf.push_str(&text);
                    }
                    AdapterEvent::ToolCall { call } => pending.push(call),
                    AdapterEvent::Usage { usage } => {
                        total_usage.prompt_tokens += usage.prompt_tokens;
                        total_usage.completion_tokens += usage.completion_tokens;
                        total_usage.total_tokens += usage.total_tokens;
                    }
                    AdapterEvent::Error { message } => {
                        adapter_error = Some(message);
                        break;
                    }
                    AdapterEvent::Done => break,
                }
            }

            if let Some(message) = adapter_error {
                self.emit_failed(req, DecisionReasonCode::AdapterError, &message);
                return Ok(TurnOutcome {
                    run_id: req.run_id,
                    status: TurnStatus::Failed,
                    final_text: text_buf,
                    tool_calls: all_tool_calls,
                    usage: total_usage,
                    reason_code: Some(DecisionReasonCode::AdapterError),
                    decision_logs: tool_ctx.decision_logs,
                    envelope: None,
                });
            }

            // No tool calls: this was the final answer.
            if pending.is_empty() {
                return Ok(self
                    .finish_completed(
                        req,
                        tool_ctx,
                        all_tool_calls,
                        total_usage,
                        text_buf,
                        messages,
                        plugin_diagnostics,
                        tool_failures,
                    )
                    .await);
            }

            // Tool dispatch, results fed back for the next iteration.
            messages.push(Message::assistant_with_tool_calls(&text_buf, &pending));
            for call in pending.drain(..) {
                self.emit(
                    LifecycleEventKind::Tool,
                    session_id,
                    req.run_id,
                    Some(serde_json::json!({
                        "call_id": call.call_id,
                        "tool_name": call.tool_name,
                    })),
                );

                if self.reset.note_iteration(session_id) {
                    messages.push(Message::system(
                        "Reset reasoning: the tool-call chain has grown long. Restate the \
                         goal in one sentence and continue from the current state.",
                    ));
                }

                match self.router.execute(&call, &mut tool_ctx).await {
                    Ok(value) => {
                        let rendered = serde_json::to_string(&value).unwrap_or_default();
                        messages.push(Message::tool_result(&call.call_id, rendered));
                    }
                    Err(e) if e.reason_code() == DecisionReasonCode::Cancelled => {
                        all_tool_calls.push(call);
                        return Ok(self.finish_cancelled(req, tool_ctx, all_tool_calls, total_usage));
                    }
                    Err(e) => {
                        tool_failures += 1;
                        let scrubbed = self.scrubber.scrub_text(&e.to_string(), session_id);
                        messages.push(Message::tool_result_with(&call.call_id, scrubbed, true));
                    }
                }
                all_tool_calls.push(call);
            }
        }

        self.emit_failed(req, DecisionReasonCode::InternalError, "tool loop limit reached");
        Ok(TurnOutcome {
            run_id: req.run_id,
            status: TurnStatus::Failed,
            final_text: String::new(),
            tool_calls: all_tool_calls,
            usage: total_usage,
            reason_code: Some(DecisionReasonCode::InternalError),
            decision_logs: tool_ctx.decision_logs,
            envelope: None,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish_completed(
        &self,
        req: &TurnRequest,
        tool_ctx: ToolContext,
        tool_calls: Vec<ToolCall>,
        usage: Usage,
        final_text: String,
        messages: &[Message],
        plugin_diagnostics: u32,
        tool_failures: u32,
    ) -> TurnOutcome {
        let session_id = req.session.session_id.as_str();

        // Record the exchange. The scrubber runs before anything is
        // persisted; a write failure degrades the turn, not the answer.
        if !final_text.trim().is_empty() {
            let user_text = req
                .messages
                .iter()
                .rev()
                .find(|m| m.role == Role::User)
                .map(|m| m.content.extract_all_text())
                .unwrap_or_default();
            let summary = self.scrubber.scrub_text(
                &format!("User: {user_text}\n---\nAssistant: {final_text}"),
                session_id,
            );
            let record = MemoryRecord::new(
                session_id,
                MemoryCategory::TurnSummary,
                summary,
                Provenance::new(&req.session.channel_id, Sensitivity::PrivateUser),
            );
            match self.memory.append(&record).await {
                Ok(()) => {
                    // Index update is fire-and-forget; recall lags a
                    // write by at most one task hop.
                    let embeddings = self.embeddings.clone();
                    tokio::spawn(async move {
                        if let Err(e) = embeddings.upsert(&record).await {
                            tracing::warn!(error = %e, "embedding upsert failed");
                        }
                    });
                }
                Err(e) => {
                    tracing::warn!(error = %e, "turn summary append failed");
                }
            }
        }

        let confidence = ConfidenceModel::assess(&ConfidenceInput {
            failure_count: tool_failures,
            has_deep_scan: false,
            plugin_diagnostic_count: plugin_diagnostics,
            tool_call_count: tool_calls.len() as u32,
            has_recent_tests_passing: false,
        });
        let envelope = (!final_text.trim().is_empty())
            .then(|| ActionEnvelope::wrap(req.run_id, session_id, "assistant_message", confidence));

        if let Some(writer) = &self.snapshots {
            writer.write(&TurnSnapshot {
                run_id: req.run_id,
                session_id,
                status: "completed",
                input_messages: messages,
                tool_calls: &tool_calls,
                final_text: &final_text,
                at: chrono::Utc::now(),
            });
        }

        self.reset.note_task_resolved(session_id);
        self.emit(
            LifecycleEventKind::Completed,
            session_id,
            req.run_id,
            Some(serde_json::json!({ "final_text": final_text })),
        );
        TraceEvent::TurnFinished {
            session_id: session_id.to_owned(),
            run_id: req.run_id.to_string(),
            status: "completed".into(),
            tool_calls: tool_calls.len(),
        }
        .emit();

        TurnOutcome {
            run_id: req.run_id,
            status: TurnStatus::Completed,
            final_text,
            tool_calls,
            usage,
            reason_code: None,
            decision_logs: tool_ctx.decision_logs,
            envelope,
        }
    }

    /// Cancellation: emit `failed { reason: cancelled }` and write nothing.
    fn finish_cancelled(
        &self,
        req: &TurnRequest,
        tool_ctx: ToolContext,
        tool_calls: Vec<ToolCall>,
        usage: Usage,
    ) -> TurnOutcome {
        self.emit(
            LifecycleEventKind::Failed,
            &req.session.session_id,
            req.run_id,
            Some(serde_json::json!({
                "reason_code": DecisionReasonCode::Cancelled,
                "reason": "cancelled",
            })),
        );
        TraceEvent::TurnFinished {
            session_id: req.session.session_id.clone(),
            run_id: req.run_id.to_string(),
            status: "cancelled".into(),
            tool_calls: tool_calls.len(),
        }
        .emit();
        TurnOutcome {
            run_id: req.run_id,
            status: TurnStatus::Cancelled,
            final_text: String::new(),
            tool_calls,
            usage,
            reason_code: Some(DecisionReasonCode::Cancelled),
            decision_logs: tool_ctx.decision_logs,
            envelope: None,
        }
    }

    fn emit_failed(&self, req: &TurnRequest, reason: DecisionReasonCode, message: &str) {
        let scrubbed = self.scrubber.scrub_text(message, &req.session.session_id);
        self.emit(
            LifecycleEventKind::Failed,
            &req.session.session_id,
            req.run_id,
            Some(serde_json::json!({
                "reason_code": reason,
                "message": scrubbed,
            })),
        );
    }

    fn emit(
        &self,
        kind: LifecycleEventKind,
        session_id: &str,
        run_id: Uuid,
        payload: Option<serde_json::Value>,
    ) {
        let mut event = LifecycleEvent::new(kind, session_id, run_id);
        if let Some(payload) = payload {
            event = event.with_payload(payload);
        }
        self.lifecycle.push(event);
    }
}
