use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Memory
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MemoryConfig {
    #[serde(default)]
    pub salience: SalienceWeights,
    #[serde(default)]
    pub gates: SaveGateConfig,
}

/// Weights composing the salience score of a memory item.
/// `score = access_weight*access + recency_weight*decay + relevance_weight*relevance`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SalienceWeights {
    #[serde(default = "d_access_weight")]
    pub access_weight: f64,
    #[serde(default = "d_recency_weight")]
    pub recency_weight: f64,
    #[serde(default = "d_relevance_weight")]
    pub relevance_weight: f64,
    /// Recency half-life in days.
    #[serde(default = "d_half_life")]
    pub half_life_days: f64,
    /// Access count at which the access component saturates.
    #[serde(default = "d_access_cap")]
    pub access_cap: u64,
}

impl Default for SalienceWeights {
    fn default() -> Self {
        Self {
            access_weight: d_access_weight(),
            recency_weight: d_recency_weight(),
            relevance_weight: d_relevance_weight(),
            half_life_days: d_half_life(),
            access_cap: d_access_cap(),
        }
    }
}

/// Thresholds for the agent-initiated save validation pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveGateConfig {
    /// Minimum content length in UTF-16 code units.
    #[serde(default = "d_min_length")]
    pub min_content_length: usize,
    /// Jaccard similarity at or above which a save is a duplicate.
    #[serde(default = "d_dup_threshold")]
    pub duplicate_threshold: f64,
    /// Lower bound of the contradiction band (same tags, moderate overlap).
    #[serde(default = "d_contradiction_floor")]
    pub contradiction_floor: f64,
    /// Maximum agent-initiated saves per session.
    #[serde(default = "d_session_cap")]
    pub session_save_cap: u32,
}

impl Default for SaveGateConfig {
    fn default() -> Self {
        Self {
            min_content_length: d_min_length(),
            duplicate_threshold: d_dup_threshold(),
            contradiction_floor: d_contradiction_floor(),
            session_save_cap: d_session_cap(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_access_weight() -> f64 {
    0.3
}
fn d_recency_weight() -> f64 {
    0.3
}
fn d_relevance_weight() -> f64 {
    0.4
}
fn d_half_life() -> f64 {
    7.0
}
fn d_access_cap() -> u64 {
    20
}
fn d_min_length() -> usize {
    15
}
fn d_dup_threshold() -> f64 {
    0.7
}
fn d_contradiction_floor() -> f64 {
    0.2
}
fn d_session_cap() -> u32 {
    10
}
