//! Prompt assembly.
//!
//! A turn's prompt is built from four layers: the system guidance, a
//! memory context block (recent records, the last two daily logs, the
//! tail of LONGMEMORY.md), whatever the context plugins contribute, and
//! the incoming conversation — after the context-drift policy has pruned
//! it and the directive-conflict heuristic has had a look.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, Utc};
use regex::Regex;

use perch_domain::config::RuntimeConfig;
use perch_domain::memory::{MemoryCategory, MemoryRecord};
use perch_domain::session::SessionContext;
use perch_domain::tool::{Message, Role};
use perch_memory::{MemoryStore, ReadFilter};

use crate::plugins::PluginSet;

/// How many recent records the memory block may carry.
const MEMORY_CONTEXT_RECORDS: usize = 20;
/// How much of LONGMEMORY.md's tail is injected.
const LONG_MEMORY_TAIL_CHARS: usize = 2_000;

pub struct AssembledPrompt {
    pub messages: Vec<Message>,
    /// Plugin failures during assembly; feeds the confidence model.
    pub plugin_diagnostics: u32,
}

pub struct PromptAssembler {
    memory: Arc<MemoryStore>,
    plugins: Arc<PluginSet>,
    config: RuntimeConfig,
    conflicts: Arc<dyn DirectiveConflictHeuristic>,
    system_guidance: String,
}

impl PromptAssembler {
    pub fn new(
        memory: Arc<MemoryStore>,
        plugins: Arc<PluginSet>,
        config: RuntimeConfig,
        system_guidance: impl Into<String>,
    ) -> Self {
        Self {
            memory,
            plugins,
            config,
            conflicts: Arc::new(PatternConflictHeuristic::new()),
            system_guidance: system_guidance.into(),
        }
    }

    /// Swap the conflict heuristic (it is deliberately crude; hosts may
    /// know better).
    pub fn with_conflict_heuristic(mut self, heuristic: Arc<dyn DirectiveConflictHeuristic>) -> Self {
        self.conflicts = heuristic;
        self
    }

    pub async fn assemble(
        &self,
        session: &SessionContext,
        incoming: Vec<Message>,
    ) -> AssembledPrompt {
        let mut messages = vec![Message::system(&self.system_guidance)];

        if let Some(memory_block) = self.memory_context(session).await {
            messages.push(Message::system(memory_block));
        }

        let harvest = self
            .plugins
            .gather(session, self.config.plugin_timeout_ms)
            .await;
        messages.extend(harvest.messages);

        let (mut conversation, freshness_note) = apply_drift_policy(incoming, self.config.max_user_messages);
        if let Some(note) = freshness_note {
            messages.push(Message::system(note));
        }

        let user_texts: Vec<String> = conversation
            .iter()
            .filter(|m| m.role == Role::User)
            .map(|m| m.content.extract_all_text())
            .collect();
        let conflicts = self.conflicts.find_conflicts(&user_texts);
        if !conflicts.is_empty() {
            messages.push(Message::system(format!(
                "Conflicting directives found: {}",
                conflicts.join("; ")
            )));
        }

        messages.append(&mut conversation);
        AssembledPrompt {
            messages,
            plugin_diagnostics: harvest.diagnostics,
        }
    }

    /// Recent records for this session (plus global user preferences),
    /// merged with the last two daily logs and the LONGMEMORY tail.
    async fn memory_context(&self, session: &SessionContext) -> Option<String> {
        let recent = self
            .memory
            .read_all(&ReadFilter {
                limit: Some(MEMORY_CONTEXT_RECORDS * 4),
                ..Default::default()
            })
            .await;

        let mut seen: HashSet<String> = HashSet::new();
        let mut picked: Vec<MemoryRecord> = Vec::new();
        for record in recent.into_iter().rev() {
            let relevant = record.session_id == session.session_id
                || record.category == MemoryCategory::UserPreference;
            if relevant && seen.insert(record.id.clone()) {
                picked.push(record);
            }
            if picked.len() >= MEMORY_CONTEXT_RECORDS {
                break;
            }
        }
        picked.reverse();

        // The last two daily logs can hold records newer than the last
        // MEMORY.md read (or survive its truncation).
        for offset in [1i64, 0] {
            let date = (Utc::now() - Duration::days(offset)).date_naive();
            let path = self.memory.paths().daily_file(date);
            if let Ok(raw) = tokio::fs::read_to_string(&path).await {
                for record in perch_memory::parse_records(&raw) {
                    if !record.is_secret()
                        && record.session_id == session.session_id
                        && seen.insert(record.id.clone())
                    {
                        picked.push(record);
                    }
                }
            }
        }

        let mut block = String::new();
        if !picked.is_empty() {
            block.push_str("Long-term memory context:\n");
            for record in &picked {
                block.push_str(&format!("- {}\n", record.text));
            }
        }

        let long_path = self.memory.paths().long_memory_file();
        if let Ok(long) = tokio::fs::read_to_string(&long_path).await {
            let tail_start = long.len().saturating_sub(LONG_MEMORY_TAIL_CHARS);
            let mut boundary = tail_start;
            while boundary < long.len() && !long.is_char_boundary(boundary) {
                boundary += 1;
            }
            block.push_str("\nCompacted history:\n");
            block.push_str(&long[boundary..]);
        }

        (!block.is_empty()).then_some(block)
    }
}

/// Keep only the newest `max_user` user messages (system/assistant/tool
/// messages are untouched). Returns the synthetic freshness note when
/// anything was pruned.
fn apply_drift_policy(messages: Vec<Message>, max_user: usize) -> (Vec<Message>, Option<String>) {
    let total_users = messages.iter().filter(|m| m.role == Role::User).count();
    if total_users <= max_user {
        return (messages, None);
    }

    let drop_count = total_users - max_user;
    let mut seen_users = 0;
    let retained: Vec<Message> = messages
        .into_iter()
        .filter(|m| {
            if m.role != Role::User {
                return true;
            }
            seen_users += 1;
            seen_users > drop_count
        })
        .collect();

    let note = format!("Context freshness policy retained {max_user} of {total_users} messages");
    (retained, Some(note))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Directive conflicts
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Detects contradictory instructions across retained user messages.
pub trait DirectiveConflictHeuristic: Send + Sync {
    /// Human-readable descriptions of each conflict found.
    fn find_conflicts(&self, user_texts: &[String]) -> Vec<String>;
}

/// Pattern-based heuristic: a directive tail seen with both a positive
/// marker ("always …", "do …") and a negative one ("never …",
/// "don't …") is a conflict.
pub struct PatternConflictHeuristic {
    positive: Vec<Regex>,
    negative: Vec<Regex>,
}

impl Default for PatternConflictHeuristic {
    fn default() -> Self {
        Self::new()
    }
}

impl PatternConflictHeuristic {
    pub fn new() -> Self {
        let tail = r"([a-z0-9][a-z0-9 _/-]{2,60})";
        let compile = |pattern: String| Regex::new(&pattern).expect("static directive pattern");
        Self {
            positive: vec![compile(format!(r"\balways\s+{tail}"))],
            negative: vec![
                compile(format!(r"\bnever\s+{tail}")),
                compile(format!(r"\bdo\s+not\s+{tail}")),
                compile(format!(r"\bdon'?t\s+{tail}")),
            ],
        }
    }

    fn tails(patterns: &[Regex], text: &str) -> Vec<String> {
        patterns
            .iter()
            .flat_map(|p| p.captures_iter(text))
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str().trim().to_owned())
            .collect()
    }
}

impl DirectiveConflictHeuristic for PatternConflictHeuristic {
    fn find_conflicts(&self, user_texts: &[String]) -> Vec<String> {
        // tail → (positively directed, negatively directed)
        let mut directives: HashMap<String, (bool, bool)> = HashMap::new();

        for text in user_texts {
            let lower = text.to_lowercase();
            for tail in Self::tails(&self.positive, &lower) {
                directives.entry(tail).or_default().0 = true;
            }
            for tail in Self::tails(&self.negative, &lower) {
                directives.entry(tail).or_default().1 = true;
            }
        }

        let mut conflicts: Vec<String> = directives
            .into_iter()
            .filter(|(_, (pos, neg))| *pos && *neg)
            .map(|(tail, _)| format!("\"{tail}\" is both required and forbidden"))
            .collect();
        conflicts.sort();
        conflicts
    }
}
