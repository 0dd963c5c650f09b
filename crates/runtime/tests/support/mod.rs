//! Shared test fixtures: a scripted model adapter and a runtime builder
//! wired onto a temp profile directory.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use perch_domain::config::Config;
use perch_domain::session::{ChannelKind, SessionContext};
use perch_domain::stream::{
    AdapterEvent, AdapterHandle, BoxStream, ModelAdapter, TurnOptions,
};
use perch_domain::tool::{Message, ToolDefinition};
use perch_domain::Result;
use perch_lifecycle::LifecycleStream;
use perch_memory::{MemoryEmbeddingIndex, MemoryStore};
use perch_runtime::{PluginSet, PromptAssembler, TurnRuntime};
use perch_store::ProfilePaths;
use perch_tools::{ApprovalGate, AutoApproveGate, ToolRouter};

/// Plays back pre-scripted event sequences, one per `send_turn`, and
/// records every prompt it was shown.
pub struct ScriptedAdapter {
    scripts: Mutex<VecDeque<Vec<AdapterEvent>>>,
    /// Delay between yielded events; gives cancellation a window.
    pub event_gap: Duration,
    pub seen_prompts: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedAdapter {
    pub fn new(scripts: Vec<Vec<AdapterEvent>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            event_gap: Duration::from_millis(0),
            seen_prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn with_event_gap(mut self, gap: Duration) -> Self {
        self.event_gap = gap;
        self
    }

    pub fn say(text: &str) -> Vec<AdapterEvent> {
        vec![
            AdapterEvent::AssistantDelta { text: text.into() },
            AdapterEvent::Done,
        ]
    }
}

#[async_trait::async_trait]
impl ModelAdapter for ScriptedAdapter {
    async fn create_session(&self, _ctx: &SessionContext) -> Result<AdapterHandle> {
        Ok(AdapterHandle("scripted".into()))
    }

    async fn send_turn(
        &self,
        _handle: &AdapterHandle,
        messages: &[Message],
        _tools: &[ToolDefinition],
        _options: &TurnOptions,
    ) -> Result<BoxStream<'static, Result<AdapterEvent>>> {
        self.seen_prompts.lock().push(messages.to_vec());
        let events = self
            .scripts
            .lock()
            .pop_front()
            .unwrap_or_else(|| vec![AdapterEvent::Done]);
        let gap = self.event_gap;
        Ok(Box::pin(async_stream::stream! {
            for event in events {
                if !gap.is_zero() {
                    tokio::time::sleep(gap).await;
                }
                yield Ok(event);
            }
        }))
    }

    async fn cancel(&self, _turn_id: uuid::Uuid) -> Result<()> {
        Ok(())
    }

    async fn close(&self, _handle: AdapterHandle) -> Result<()> {
        Ok(())
    }
}

pub fn dm_session(id: &str) -> SessionContext {
    SessionContext::new(id, "dm-test", ChannelKind::Dm)
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Build a full runtime over a temp profile with the given adapter,
/// router gate, and config.
pub fn build_runtime(
    dir: &std::path::Path,
    adapter: Arc<ScriptedAdapter>,
    gate: Arc<dyn ApprovalGate>,
    config: Config,
) -> (Arc<TurnRuntime>, Arc<MemoryStore>, Arc<ToolRouter>, LifecycleStream) {
    init_tracing();
    let paths = ProfilePaths::new(dir);
    let memory = Arc::new(MemoryStore::new(paths.clone(), config.memory.clone()));
    let embeddings = Arc::new(
        MemoryEmbeddingIndex::open(paths.embeddings_file(), config.memory.embedding.clone())
            .expect("open embedding index"),
    );
    let router = Arc::new(ToolRouter::new(config.tools.clone(), gate).expect("router"));
    let lifecycle = LifecycleStream::default();
    let assembler = PromptAssembler::new(
        memory.clone(),
        Arc::new(PluginSet::new()),
        config.runtime.clone(),
        "You are a resident agent. Be brief.",
    );
    let runtime = Arc::new(TurnRuntime::new(
        adapter,
        router.clone(),
        lifecycle.clone(),
        memory.clone(),
        embeddings,
        assembler,
        config.runtime.clone(),
    ));
    (runtime, memory, router, lifecycle)
}

#[allow(dead_code)]
pub fn auto_approve() -> Arc<dyn ApprovalGate> {
    Arc::new(AutoApproveGate)
}
