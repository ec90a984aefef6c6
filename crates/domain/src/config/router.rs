use serde::{Deserialize, Serialize};

use crate::task::CostTier;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Router
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How the router picks a provider from the capable set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RouteMode {
    /// Lowest rank wins among capable, available providers.
    #[default]
    RespectRanking,
    /// Cheapest cost tier wins; ties broken by rank.
    OptimizeCost,
    /// Deterministic cycle over the capable set.
    RoundRobin,
    /// Always the named provider (if available and capable).
    ProviderOnly(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    #[serde(default)]
    pub mode: RouteMode,
    /// Cost ceiling applied under `respect_ranking`. When filtering by the
    /// ceiling empties the capable set, selection falls through to the
    /// unfiltered set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cost_tier: Option<CostTier>,
    /// Token budget for failover handoff bundles.
    #[serde(default = "d_handoff_tokens")]
    pub handoff_max_tokens: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            mode: RouteMode::RespectRanking,
            max_cost_tier: None,
            handoff_max_tokens: d_handoff_tokens(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_handoff_tokens() -> usize {
    4_000
}
