use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Context compressor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Budgets for the three-tier context compressor.
///
/// The working tier holds raw events at full fidelity; crossing the soft
/// threshold triggers background compression of the oldest chunk, and
/// crossing `block_after_tokens` forces a synchronous compression as the
/// safety valve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Working-tier token level that triggers background compression.
    #[serde(default = "d_soft_threshold")]
    pub soft_threshold_tokens: usize,
    /// Hard ceiling; crossing it compresses synchronously. Default 2x soft.
    #[serde(default = "d_block_after")]
    pub block_after_tokens: usize,
    /// Token budget for the session tier (compressed observation blocks).
    #[serde(default = "d_session_budget")]
    pub session_tier_max_tokens: usize,
    /// Token budget for the cross-session tier (reflected facts).
    #[serde(default = "d_cross_budget")]
    pub cross_session_max_tokens: usize,
    /// Number of oldest events compressed per chunk.
    #[serde(default = "d_chunk_size")]
    pub chunk_size: usize,
    /// Pre-compute a compressed block in the background once the working
    /// tier passes 70% of the soft threshold.
    #[serde(default = "d_true")]
    pub async_buffer: bool,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            soft_threshold_tokens: d_soft_threshold(),
            block_after_tokens: d_block_after(),
            session_tier_max_tokens: d_session_budget(),
            cross_session_max_tokens: d_cross_budget(),
            chunk_size: d_chunk_size(),
            async_buffer: true,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_soft_threshold() -> usize {
    24_000
}
fn d_block_after() -> usize {
    48_000
}
fn d_session_budget() -> usize {
    8_000
}
fn d_cross_budget() -> usize {
    4_000
}
fn d_chunk_size() -> usize {
    20
}
fn d_true() -> bool {
    true
}
