use serde::{Deserialize, Serialize};

use crate::task::{Capability, CostTier};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Provider configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    /// Registered provider back-ends (data-driven: adding a back-end =
    /// adding config).
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    /// Consecutive failures before a provider's circuit opens.
    #[serde(default = "d_failure_threshold")]
    pub breaker_failure_threshold: u32,
    /// Seconds an open circuit waits before allowing a half-open trial.
    #[serde(default = "d_cooldown_secs")]
    pub breaker_cooldown_secs: u64,
    /// Seconds an auth-check result stays cached.
    #[serde(default = "d_auth_cache_secs")]
    pub auth_cache_secs: u64,
}

/// Which adapter drives a configured provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// A local CLI driven over stdin/stdout (NDJSON event stream).
    Subprocess,
    /// An OpenAI-compatible HTTP chat-completions endpoint (SSE).
    OpenaiCompat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Unique provider name, used in routing and journal `source` fields.
    pub name: String,
    pub kind: ProviderKind,
    /// Selection rank; 1 = preferred.
    #[serde(default = "d_rank")]
    pub rank: u32,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
    #[serde(default)]
    pub cost_tier: CostTier,
    /// Disabled providers never report available.
    #[serde(default = "d_true")]
    pub enabled: bool,

    // ── Subprocess back-end ───────────────────────────────────────
    /// Binary to spawn (subprocess kind).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,

    // ── HTTP back-end ─────────────────────────────────────────────
    /// Base URL (openai_compat kind).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Environment variable holding the API key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    /// Model identifier sent to the back-end.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Request timeout in milliseconds.
    #[serde(default = "d_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
            breaker_failure_threshold: d_failure_threshold(),
            breaker_cooldown_secs: d_cooldown_secs(),
            auth_cache_secs: d_auth_cache_secs(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_rank() -> u32 {
    1
}
fn d_true() -> bool {
    true
}
fn d_failure_threshold() -> u32 {
    3
}
fn d_cooldown_secs() -> u64 {
    60
}
fn d_auth_cache_secs() -> u64 {
    60
}
fn d_timeout_ms() -> u64 {
    120_000
}
