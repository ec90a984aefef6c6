use serde::Serialize;

/// Structured trace events emitted across all warden crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    ProviderSelected {
        job_id: String,
        provider: String,
        mode: String,
    },
    ProviderFailover {
        job_id: String,
        from_provider: String,
        to_provider: String,
        category: String,
    },
    CircuitStateChanged {
        provider: String,
        state: String,
    },
    PolicyDenied {
        job_id: String,
        tool_name: String,
        reason: String,
    },
    DriftDenied {
        job_id: String,
        tool_name: String,
        confidence: f64,
    },
    ActionFlagged {
        job_id: String,
        tool_name: String,
        category: String,
    },
    AuditAppended {
        entry_id: u64,
        event_kind: String,
    },
    ContextCompressed {
        session_id: String,
        messages: usize,
        block_tokens: usize,
        synchronous: bool,
    },
    PrecomputeDiscarded {
        session_id: String,
        reason: String,
    },
    SteeringInjected {
        job_id: String,
        message_id: String,
    },
    ReflectionCompleted {
        session_id: String,
        items_created: usize,
        condensed_tokens: usize,
    },
    JournalFlushed {
        job_id: String,
        events: usize,
    },
    TaskCompleted {
        job_id: String,
        provider: String,
        duration_ms: u64,
        aborted: bool,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "warden_event");
    }
}
