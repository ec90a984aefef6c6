mod context;
mod guard;
mod memory;
mod paths;
mod providers;
mod router;
mod sessions;

pub use context::*;
pub use guard::*;
pub use memory::*;
pub use paths::*;
pub use providers::*;
pub use router::*;
pub use sessions::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub journal: JournalConfig,
    #[serde(default)]
    pub steering: SteeringConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate cross-field constraints. Returns issues instead of failing
    /// so callers can decide what is fatal.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.context.block_after_tokens < self.context.soft_threshold_tokens {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "context.block_after_tokens".into(),
                message: format!(
                    "hard ceiling ({}) must be >= soft threshold ({})",
                    self.context.block_after_tokens, self.context.soft_threshold_tokens
                ),
            });
        }

        let weight_sum = self.memory.salience.access_weight
            + self.memory.salience.recency_weight
            + self.memory.salience.relevance_weight;
        if (weight_sum - 1.0).abs() > 1e-6 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "memory.salience".into(),
                message: format!("salience weights sum to {weight_sum}, expected 1.0"),
            });
        }

        if self.providers.providers.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "providers".into(),
                message: "no providers configured; task submission will fail".into(),
            });
        }

        if self.router.handoff_max_tokens == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "router.handoff_max_tokens".into(),
                message: "handoff budget must be > 0".into(),
            });
        }

        issues
    }
}
