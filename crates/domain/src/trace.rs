use serde::Serialize;

/// Structured trace events emitted across all Perch crates.
///
/// Serialized to JSON and written through `tracing` so hosts can grep one
/// field (`trace_event`) for a machine-readable audit line per mutation.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    MemoryAppended {
        session_id: String,
        category: String,
        chars: usize,
    },
    MemoryCompacted {
        records_compacted: usize,
        records_after: usize,
    },
    IntegrityScanned {
        findings: usize,
    },
    EmbeddingIndexed {
        record_id: String,
        dimensions: usize,
    },
    QueueEnqueued {
        session_id: String,
        item_id: String,
    },
    QueueDrained {
        session_id: String,
        item_id: String,
    },
    CronFired {
        job_id: String,
        attempt: u32,
    },
    CronBackoff {
        job_id: String,
        attempt: u32,
        delay_ms: u64,
    },
    HeartbeatTick {
        channel_id: String,
        outcome: String,
        next_interval_ms: u64,
    },
    BudgetDenied {
        channel_id: String,
        window: String,
    },
    IntentDelivered {
        intent_id: String,
        channel_id: String,
    },
    ToolDispatched {
        tool_name: String,
        decision: String,
        reason_code: String,
        duration_ms: u64,
    },
    WorkflowStepTransition {
        definition_id: String,
        step_id: String,
        status: String,
    },
    TurnFinished {
        session_id: String,
        run_id: String,
        status: String,
        tool_calls: usize,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "perch_event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_event_tags_by_variant() {
        let e = TraceEvent::CronFired {
            job_id: "daily-digest".into(),
            attempt: 0,
        };
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["event"], "CronFired");
        assert_eq!(json["job_id"], "daily-digest");
    }
}
