use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session journal
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalConfig {
    /// Buffered-writer flush cadence.
    #[serde(default = "d_flush_ms")]
    pub flush_interval_ms: u64,
    /// Hard cap on buffered events; the oldest are dropped beyond it so a
    /// persistently failing disk cannot grow the buffer without bound.
    #[serde(default = "d_buffer_cap")]
    pub buffer_cap: usize,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: d_flush_ms(),
            buffer_cap: d_buffer_cap(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Steering ingress
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SteeringConfig {
    /// How long a cached pending-message read stays fresh.
    #[serde(default = "d_cache_ms")]
    pub cache_max_age_ms: u64,
}

impl Default for SteeringConfig {
    fn default() -> Self {
        Self {
            cache_max_age_ms: d_cache_ms(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_flush_ms() -> u64 {
    500
}
fn d_buffer_cap() -> usize {
    1_000
}
fn d_cache_ms() -> u64 {
    1_000
}
