//! The autonomy orchestrator.
//!
//! Owns the four background loops — cron tick, heartbeat, memory
//! integrity scan, proactive-intent dispatch — and funnels every firing
//! through the shared budget before it reaches the turn runtime. Budget
//! denials defer work (the next tick retries); nothing is dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use perch_autonomy::cron::{CronRunner, CronService};
use perch_autonomy::heartbeat::{HeartbeatOutcome, HeartbeatRunner};
use perch_autonomy::intents::ProactiveIntent;
use perch_autonomy::AutonomyState;
use perch_domain::config::Config;
use perch_domain::event::{LifecycleEvent, LifecycleEventKind};
use perch_domain::session::{ChannelKind, SessionContext};
use perch_domain::tool::DecisionReasonCode;
use perch_domain::{Error, Result};
use perch_memory::{IntegrityFinding, MemoryStore};
use perch_store::ProfilePaths;
use perch_workflow::{RunOptions, WorkflowDefinition, WorkflowRuntime, WorkflowState};

use crate::turn::{TurnRequest, TurnRuntime, TurnStatus};

/// Snapshot returned by [`AutonomyOrchestrator::get_state`].
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorState {
    pub running: bool,
    pub cron_jobs: usize,
    pub cron_in_flight: usize,
    pub pending_intents: usize,
    pub integrity_findings: usize,
    pub lifecycle_subscribers: usize,
    pub dropped_events: u64,
}

struct Inner {
    config: Config,
    runtime: Arc<TurnRuntime>,
    memory: Arc<MemoryStore>,
    autonomy: Arc<AutonomyState>,
    cron: CronService,
    heartbeat: Arc<HeartbeatRunner>,
    workflows: WorkflowRuntime,
    cron_handler: Mutex<Option<CronRunner>>,
    started: AtomicBool,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    last_integrity: Mutex<Vec<IntegrityFinding>>,
}

#[derive(Clone)]
pub struct AutonomyOrchestrator {
    inner: Arc<Inner>,
}

impl AutonomyOrchestrator {
    pub fn new(
        config: Config,
        paths: ProfilePaths,
        runtime: Arc<TurnRuntime>,
        memory: Arc<MemoryStore>,
    ) -> Result<Self> {
        let autonomy = Arc::new(AutonomyState::open(
            paths.autonomy_state_file(),
            config.autonomy.clone(),
        )?);
        let cron = CronService::open(paths.cron_state_file(), config.autonomy.clone())?;
        let heartbeat = Arc::new(HeartbeatRunner::new(config.heartbeat.clone()));
        let workflows = WorkflowRuntime::new(paths);
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                runtime,
                memory,
                autonomy,
                cron,
                heartbeat,
                workflows,
                cron_handler: Mutex::new(None),
                started: AtomicBool::new(false),
                shutdown,
                tasks: Mutex::new(Vec::new()),
                last_integrity: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn cron(&self) -> &CronService {
        &self.inner.cron
    }

    /// Replace the default cron handler (a self-prompt turn) with a
    /// host-provided one. The budget check still wraps it.
    pub fn set_cron_handler(&self, handler: CronRunner) {
        *self.inner.cron_handler.lock() = Some(handler);
    }

    /// Start the schedulers. Idempotent: a second call is a no-op.
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut tasks = self.inner.tasks.lock();
        tasks.push(self.spawn_cron_loop());
        tasks.push(self.spawn_heartbeat_loop());
        tasks.push(self.spawn_integrity_loop());
        tasks.push(self.spawn_intent_loop());
        tracing::info!("autonomy orchestrator started");
    }

    /// Stop all loops and flush durable state.
    pub fn stop(&self) {
        if !self.inner.started.swap(false, Ordering::SeqCst) {
            return;
        }
        let _ = self.inner.shutdown.send(true);
        for task in self.inner.tasks.lock().drain(..) {
            task.abort();
        }
        let _ = self.inner.shutdown.send(false);
        if let Err(e) = self.inner.autonomy.flush() {
            tracing::warn!(error = %e, "autonomy state flush on stop failed");
        }
        tracing::info!("autonomy orchestrator stopped");
    }

    pub fn get_state(&self) -> OrchestratorState {
        let lifecycle = self.inner.runtime.lifecycle().stats();
        OrchestratorState {
            running: self.inner.started.load(Ordering::SeqCst),
            cron_jobs: self.inner.cron.list().len(),
            cron_in_flight: self.inner.cron.in_flight_count(),
            pending_intents: self
                .inner
                .autonomy
                .intents
                .snapshot()
                .iter()
                .filter(|i| i.status == perch_autonomy::IntentStatus::Pending)
                .count(),
            integrity_findings: self.inner.last_integrity.lock().len(),
            lifecycle_subscribers: lifecycle.subscribers,
            dropped_events: lifecycle.dropped_events,
        }
    }

    /// Findings from the most recent integrity scan.
    pub fn integrity_findings(&self) -> Vec<IntegrityFinding> {
        self.inner.last_integrity.lock().clone()
    }

    /// Run (or resume) a workflow through the durable runtime.
    pub async fn run_workflow(
        &self,
        definition: &WorkflowDefinition,
        opts: &RunOptions,
    ) -> Result<WorkflowState> {
        self.inner.workflows.run(definition, opts).await
    }

    /// Queue a proactive message for later, budget-permitting delivery.
    pub fn queue_proactive_intent(&self, intent: ProactiveIntent) -> Result<String> {
        self.inner.autonomy.queue_intent(intent)
    }

    // ── Loops ────────────────────────────────────────────────────────

    fn spawn_cron_loop(&self) -> JoinHandle<()> {
        let orchestrator = self.clone();
        let mut shutdown = self.inner.shutdown.subscribe();
        tokio::spawn(async move {
            let tick = std::time::Duration::from_millis(
                orchestrator.inner.config.autonomy.cron_tick_ms.max(100),
            );
            let runner = orchestrator.budgeted_cron_runner();
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(tick) => {
                        orchestrator.inner.cron.tick(Utc::now(), &runner);
                    }
                    _ = shutdown.changed() => break,
                }
            }
        })
    }

    /// Wrap the cron handler with the budget check. A denial returns an
    /// error so the service's retry/backoff path re-runs the job later —
    /// deferred, not dropped.
    fn budgeted_cron_runner(&self) -> CronRunner {
        let inner = self.inner.clone();
        Arc::new(move |job| {
            let inner = inner.clone();
            Box::pin(async move {
                let decision = inner.autonomy.try_consume("cron", Utc::now())?;
                if !decision.is_allowed() {
                    return Err(Error::PolicyDenied {
                        reason: DecisionReasonCode::BudgetExhausted,
                        detail: format!("cron job \"{}\" deferred by budget", job.id),
                    });
                }

                let handler = inner.cron_handler.lock().clone();
                match handler {
                    Some(handler) => handler(job).await,
                    None => {
                        let session = SessionContext::new(
                            format!("cron:{}", job.id),
                            "cron",
                            ChannelKind::Web,
                        );
                        let req = TurnRequest::from_text(
                            session,
                            format!("Scheduled job \"{}\" fired. Handle it.", job.id),
                        );
                        inner.runtime.run_turn(req).await.map(|_| ())
                    }
                }
            })
        })
    }

    fn spawn_heartbeat_loop(&self) -> JoinHandle<()> {
        let inner = self.inner.clone();
        let mut shutdown = self.inner.shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                let interval =
                    std::time::Duration::from_millis(inner.heartbeat.next_interval(0));
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = shutdown.changed() => break,
                }

                let now = Utc::now();
                if !inner.heartbeat.in_active_hours(now) {
                    inner.heartbeat.record_outcome(HeartbeatOutcome::Skipped, 0);
                    continue;
                }

                let channel = inner.heartbeat.channel_id().to_owned();
                match inner.autonomy.try_consume(&channel, now) {
                    Ok(decision) if decision.is_allowed() => {}
                    Ok(_denied) => {
                        inner.heartbeat.record_outcome(HeartbeatOutcome::Skipped, 0);
                        continue;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "heartbeat budget check failed");
                        continue;
                    }
                }

                let session =
                    SessionContext::new("heartbeat", channel.clone(), ChannelKind::Web);
                let req = TurnRequest::from_text(
                    session,
                    "Heartbeat: review pending work, queued intents, and anything that \
                     needs flagging. Reply HEARTBEAT_OK if nothing needs attention.",
                );
                match inner.runtime.run_turn(req).await {
                    Ok(outcome) => {
                        let quiet = outcome.final_text.trim().is_empty()
                            || outcome.final_text.contains("HEARTBEAT_OK");
                        let result = if outcome.status == TurnStatus::Completed && !quiet {
                            HeartbeatOutcome::Sent
                        } else {
                            HeartbeatOutcome::Ok
                        };
                        inner.heartbeat.record_outcome(result, 0);
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "heartbeat turn failed");
                        inner.heartbeat.record_outcome(HeartbeatOutcome::Ok, 0);
                    }
                }
            }
        })
    }

    fn spawn_integrity_loop(&self) -> JoinHandle<()> {
        let inner = self.inner.clone();
        let mut shutdown = self.inner.shutdown.subscribe();
        tokio::spawn(async move {
            let every = std::time::Duration::from_millis(
                inner.config.autonomy.integrity_scan_ms.max(1_000),
            );
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(every) => {}
                    _ = shutdown.changed() => break,
                }
                match inner.memory.integrity_scan().await {
                    Ok(findings) => {
                        if !findings.is_empty() {
                            tracing::warn!(count = findings.len(), "memory integrity findings");
                        }
                        *inner.last_integrity.lock() = findings;
                    }
                    Err(e) if e.is_retryable() => {
                        tracing::debug!(error = %e, "integrity scan deferred");
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "integrity scan failed");
                    }
                }
            }
        })
    }

    fn spawn_intent_loop(&self) -> JoinHandle<()> {
        let inner = self.inner.clone();
        let mut shutdown = self.inner.shutdown.subscribe();
        tokio::spawn(async move {
            let every = std::time::Duration::from_millis(
                inner.config.autonomy.intent_tick_ms.max(100),
            );
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(every) => {}
                    _ = shutdown.changed() => break,
                }
                let now = Utc::now();
                if let Err(e) = inner
                    .autonomy
                    .expire_stale_intents(now, inner.config.autonomy.intent_expiry_ms)
                {
                    tracing::warn!(error = %e, "intent expiry failed");
                }

                for intent in inner.autonomy.intents.due(now) {
                    match inner.autonomy.try_consume(&intent.channel_id, now) {
                        Ok(decision) if decision.is_allowed() => {}
                        // Deferred: stays pending for the next tick.
                        Ok(_denied) => continue,
                        Err(e) => {
                            tracing::warn!(error = %e, "intent budget check failed");
                            continue;
                        }
                    }

                    // Delivery is a lifecycle event on the intent's
                    // channel; channel adapters subscribe and forward.
                    inner.runtime.lifecycle().push(
                        LifecycleEvent::new(
                            LifecycleEventKind::Assistant,
                            format!("intent:{}", intent.channel_id),
                            uuid::Uuid::new_v4(),
                        )
                        .with_payload(serde_json::json!({
                            "intent_id": intent.id,
                            "text": intent.text,
                        })),
                    );
                    if let Err(e) = inner.autonomy.mark_intent_sent(&intent.id) {
                        tracing::warn!(error = %e, intent_id = %intent.id, "intent ack failed");
                    }
                }
            }
        })
    }
}
