//! Context plugins: collectors gather raw artifacts, analyzers distill
//! them into insights, synthesizers turn insights into system messages.
//!
//! Plugins are best-effort. A collector that times out or fails loses its
//! artifacts; the turn continues without them.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use perch_domain::session::SessionContext;
use perch_domain::tool::Message;
use perch_domain::Result;

#[derive(Debug, Clone, Serialize)]
pub struct ContextArtifact {
    pub source: String,
    pub content: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContextInsight {
    pub source: String,
    pub text: String,
}

#[async_trait::async_trait]
pub trait ContextCollector: Send + Sync {
    fn name(&self) -> &str;
    async fn collect(&self, session: &SessionContext) -> Result<Vec<ContextArtifact>>;
}

#[async_trait::async_trait]
pub trait InsightAnalyzer: Send + Sync {
    fn name(&self) -> &str;
    async fn analyze(&self, artifacts: &[ContextArtifact]) -> Result<Vec<ContextInsight>>;
}

#[async_trait::async_trait]
pub trait ContextSynthesizer: Send + Sync {
    fn name(&self) -> &str;
    /// Turn insights into an extra system message, or nothing.
    async fn synthesize(&self, insights: &[ContextInsight]) -> Result<Option<Message>>;
}

#[derive(Default)]
pub struct PluginSet {
    collectors: Vec<Arc<dyn ContextCollector>>,
    analyzers: Vec<Arc<dyn InsightAnalyzer>>,
    synthesizers: Vec<Arc<dyn ContextSynthesizer>>,
}

/// What one assembly pass produced, including how many plugins failed —
/// the failure count feeds the confidence model.
pub struct PluginHarvest {
    pub messages: Vec<Message>,
    pub diagnostics: u32,
}

impl PluginSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_collector(&mut self, collector: Arc<dyn ContextCollector>) -> &mut Self {
        self.collectors.push(collector);
        self
    }

    pub fn add_analyzer(&mut self, analyzer: Arc<dyn InsightAnalyzer>) -> &mut Self {
        self.analyzers.push(analyzer);
        self
    }

    pub fn add_synthesizer(&mut self, synthesizer: Arc<dyn ContextSynthesizer>) -> &mut Self {
        self.synthesizers.push(synthesizer);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.collectors.is_empty() && self.synthesizers.is_empty()
    }

    /// Run the collect → analyze → synthesize pipeline with a per-plugin
    /// wall clock. Failures are isolated and counted, never propagated.
    pub async fn gather(&self, session: &SessionContext, plugin_timeout_ms: u64) -> PluginHarvest {
        let timeout = Duration::from_millis(plugin_timeout_ms);
        let mut diagnostics = 0u32;

        let mut artifacts: Vec<ContextArtifact> = Vec::new();
        for collector in &self.collectors {
            match tokio::time::timeout(timeout, collector.collect(session)).await {
                Ok(Ok(mut found)) => artifacts.append(&mut found),
                Ok(Err(e)) => {
                    diagnostics += 1;
                    tracing::warn!(plugin = collector.name(), error = %e, "collector failed");
                }
                Err(_elapsed) => {
                    diagnostics += 1;
                    tracing::warn!(plugin = collector.name(), "collector timed out");
                }
            }
        }

        let mut insights: Vec<ContextInsight> = Vec::new();
        for analyzer in &self.analyzers {
            match tokio::time::timeout(timeout, analyzer.analyze(&artifacts)).await {
                Ok(Ok(mut found)) => insights.append(&mut found),
                Ok(Err(e)) => {
                    diagnostics += 1;
                    tracing::warn!(plugin = analyzer.name(), error = %e, "analyzer failed");
                }
                Err(_elapsed) => {
                    diagnostics += 1;
                    tracing::warn!(plugin = analyzer.name(), "analyzer timed out");
                }
            }
        }

        let mut messages = Vec::new();
        for synthesizer in &self.synthesizers {
            match tokio::time::timeout(timeout, synthesizer.synthesize(&insights)).await {
                Ok(Ok(Some(message))) => messages.push(message),
                Ok(Ok(None)) => {}
                Ok(Err(e)) => {
                    diagnostics += 1;
                    tracing::warn!(plugin = synthesizer.name(), error = %e, "synthesizer failed");
                }
                Err(_elapsed) => {
                    diagnostics += 1;
                    tracing::warn!(plugin = synthesizer.name(), "synthesizer timed out");
                }
            }
        }

        PluginHarvest {
            messages,
            diagnostics,
        }
    }
}
