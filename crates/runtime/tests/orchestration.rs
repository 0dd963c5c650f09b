//! Orchestrator-level scenarios: cron firing, queue at-least-once through
//! the worker, intent delivery, heartbeats, and workflow resume.

mod support;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use perch_autonomy::cron::{CronJob, CronRunner};
use perch_autonomy::ProactiveIntent;
use perch_domain::config::Config;
use perch_domain::event::LifecycleEventKind;
use perch_memory::ReadFilter;
use perch_queue::{FileQueue, QueueBackend};
use perch_runtime::{AutonomyOrchestrator, QueueWorker};
use perch_store::ProfilePaths;
use perch_workflow::{RunOptions, StepStatus, WorkflowDefinition, WorkflowStep, WorkflowStatus};

use support::{auto_approve, build_runtime, dm_session, ScriptedAdapter};

fn fast_config() -> Config {
    let mut config = Config::default();
    config.autonomy.cron_tick_ms = 100;
    config.autonomy.intent_tick_ms = 100;
    config.autonomy.hourly_cap = 100;
    config.autonomy.daily_cap = 1_000;
    // Keep the heartbeat quiet during scheduler tests.
    config.heartbeat.every_ms = 3_600_000;
    config.heartbeat.min_ms = 3_600_000;
    config.heartbeat.max_ms = 7_200_000;
    config
}

fn orchestrator(
    dir: &std::path::Path,
    adapter: Arc<ScriptedAdapter>,
    config: Config,
) -> AutonomyOrchestrator {
    let (runtime, memory, _router, _lifecycle) =
        build_runtime(dir, adapter, auto_approve(), config.clone());
    AutonomyOrchestrator::new(config, ProfilePaths::new(dir), runtime, memory).unwrap()
}

#[tokio::test]
async fn cron_job_fires_and_state_is_durable() {
    let dir = tempfile::tempdir().unwrap();
    let adapter = Arc::new(ScriptedAdapter::new(vec![]));
    let orch = orchestrator(dir.path(), adapter, fast_config());

    let fired = Arc::new(AtomicU32::new(0));
    let handler: CronRunner = {
        let fired = fired.clone();
        Arc::new(move |_job| {
            let fired = fired.clone();
            Box::pin(async move {
                fired.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        })
    };
    orch.set_cron_handler(handler);
    orch.cron()
        .add(CronJob::new("pulse", "every 1s").unwrap().isolated(true))
        .unwrap();

    orch.start();
    tokio::time::sleep(Duration::from_millis(2_500)).await;
    orch.stop();

    assert!(fired.load(Ordering::SeqCst) >= 1, "cron job never fired");
    let raw = std::fs::read_to_string(dir.path().join("cron-state.json")).unwrap();
    assert!(raw.contains("\"expression\": \"1s\""));
}

#[tokio::test]
async fn start_is_idempotent_and_stop_clears_loops() {
    let dir = tempfile::tempdir().unwrap();
    let adapter = Arc::new(ScriptedAdapter::new(vec![]));
    let orch = orchestrator(dir.path(), adapter, fast_config());

    orch.start();
    orch.start(); // no double loops
    let state = orch.get_state();
    assert!(state.running);

    orch.stop();
    assert!(!orch.get_state().running);
    // Stopping flushed the autonomy snapshot.
    assert!(dir.path().join("autonomy-state.json").exists());
}

#[tokio::test]
async fn queue_worker_delivers_at_least_once_across_restart() {
    let dir = tempfile::tempdir().unwrap();
    let session = dm_session("s1");

    // Session 1: enqueue and "crash" after dequeue, before remove.
    {
        let queue = FileQueue::new(ProfilePaths::new(dir.path()));
        queue
            .enqueue(
                &session.session_id,
                serde_json::to_value(perch_runtime::worker::TurnPayload {
                    text: "remember the milk".into(),
                    run_id: None,
                })
                .unwrap(),
            )
            .await
            .unwrap();
        let _peeked = queue.dequeue(&session.session_id).await.unwrap().unwrap();
        // No remove: the process dies here.
    }

    // Session 2: a fresh worker drains the re-delivered item.
    let adapter = Arc::new(ScriptedAdapter::new(vec![ScriptedAdapter::say("noted")]));
    let (runtime, memory, _router, _lifecycle) =
        build_runtime(dir.path(), adapter, auto_approve(), Config::default());
    let queue = Arc::new(FileQueue::new(ProfilePaths::new(dir.path())));
    let worker = QueueWorker::new(queue.clone(), runtime, 4);

    let processed = worker.drain_session(&session).await.unwrap();
    assert_eq!(processed, 1);
    assert!(queue.dequeue(&session.session_id).await.unwrap().is_none());

    let records = memory.read_all(&ReadFilter::default()).await;
    assert_eq!(records.len(), 1);
    assert!(records[0].text.contains("remember the milk"));
}

#[tokio::test]
async fn intents_are_delivered_when_budget_allows() {
    let dir = tempfile::tempdir().unwrap();
    let adapter = Arc::new(ScriptedAdapter::new(vec![]));
    let (runtime, memory, _router, lifecycle) =
        build_runtime(dir.path(), adapter, auto_approve(), fast_config());
    let orch =
        AutonomyOrchestrator::new(fast_config(), ProfilePaths::new(dir.path()), runtime, memory)
            .unwrap();
    let mut sub = lifecycle.subscribe(Some("intent:dm-42"));

    orch.queue_proactive_intent(ProactiveIntent::new(
        "dm-42",
        "your build finished",
        chrono::Utc::now().timestamp_millis() - 1,
    ))
    .unwrap();

    orch.start();
    tokio::time::sleep(Duration::from_millis(500)).await;
    orch.stop();

    assert_eq!(sub.recv().await.kind, LifecycleEventKind::Connecting);
    let event = sub.recv().await;
    assert_eq!(event.kind, LifecycleEventKind::Assistant);
    assert_eq!(event.payload.unwrap()["text"], "your build finished");

    assert_eq!(orch.get_state().pending_intents, 0, "intent must be marked sent");
}

#[tokio::test]
async fn heartbeat_runs_a_turn_on_its_channel() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = fast_config();
    config.heartbeat.every_ms = 200;
    config.heartbeat.min_ms = 100;
    config.heartbeat.max_ms = 500;

    let adapter = Arc::new(ScriptedAdapter::new(vec![ScriptedAdapter::say(
        "HEARTBEAT_OK",
    )]));
    let (runtime, memory, _router, lifecycle) =
        build_runtime(dir.path(), adapter, auto_approve(), config.clone());
    let orch =
        AutonomyOrchestrator::new(config, ProfilePaths::new(dir.path()), runtime, memory).unwrap();

    let mut sub = lifecycle.subscribe(Some("heartbeat"));
    orch.start();
    tokio::time::sleep(Duration::from_millis(800)).await;
    orch.stop();

    assert_eq!(sub.recv().await.kind, LifecycleEventKind::Connecting);
    let mut saw_completed = false;
    while let Some(event) = sub.try_recv() {
        if event.kind == LifecycleEventKind::Completed {
            saw_completed = true;
        }
    }
    assert!(saw_completed, "heartbeat turn should complete on its session");
}

#[tokio::test]
async fn workflow_runs_and_resumes_through_the_orchestrator() {
    let dir = tempfile::tempdir().unwrap();
    let adapter = Arc::new(ScriptedAdapter::new(vec![]));
    let orch = orchestrator(dir.path(), adapter, fast_config());

    let ran = Arc::new(AtomicU32::new(0));
    let step = |id: &str, ran: Arc<AtomicU32>| {
        WorkflowStep::new(
            id,
            Arc::new(move || {
                let ran = ran.clone();
                Box::pin(async move {
                    ran.fetch_add(1, Ordering::SeqCst);
                    Ok(serde_json::json!("ok"))
                })
            }),
        )
    };

    let definition = WorkflowDefinition {
        id: "nightly-report".into(),
        steps: vec![step("gather", ran.clone()), step("publish", ran.clone())],
    };
    let opts = RunOptions {
        idempotency_key: "2026-08-01".into(),
        approval: None,
    };

    let state = orch.run_workflow(&definition, &opts).await.unwrap();
    assert_eq!(state.status, WorkflowStatus::Done);
    assert!(state.steps.iter().all(|s| s.status == StepStatus::Done));
    assert_eq!(ran.load(Ordering::SeqCst), 2);

    // Second run under the same idempotency key does nothing.
    let again = orch.run_workflow(&definition, &opts).await.unwrap();
    assert_eq!(again.status, WorkflowStatus::Done);
    assert_eq!(ran.load(Ordering::SeqCst), 2);
}
