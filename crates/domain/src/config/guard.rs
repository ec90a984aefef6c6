use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Capability policy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The declarative capability policy enforced on every tool invocation.
/// Denial always takes precedence over allowance.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PolicyConfig {
    #[serde(default)]
    pub filesystem: FsRules,
    #[serde(default)]
    pub shell: ShellRules,
    #[serde(default)]
    pub actions: ActionCategories,
    #[serde(default)]
    pub network: NetworkRules,
}

/// Filesystem path rules. Prefixes are matched on whole path components.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FsRules {
    /// Paths (after `~` expansion) the agent may touch.
    #[serde(default)]
    pub allowed_prefixes: Vec<String>,
    /// Paths that are always denied, even inside an allowed prefix.
    #[serde(default)]
    pub denied_prefixes: Vec<String>,
    /// When false, symlinks are dereferenced and the target is re-checked
    /// against the denied prefixes.
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for FsRules {
    fn default() -> Self {
        Self {
            allowed_prefixes: Vec::new(),
            denied_prefixes: Vec::new(),
            follow_symlinks: false,
        }
    }
}

/// How shell commands are filtered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ShellMode {
    /// Only commands on the allowed list may run.
    #[default]
    Allowlist,
    /// Everything runs except commands on the denied list.
    Denylist,
    /// No command may run.
    DenyAll,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellRules {
    #[serde(default)]
    pub mode: ShellMode,
    #[serde(default)]
    pub allowed_commands: Vec<String>,
    #[serde(default)]
    pub denied_commands: Vec<String>,
    /// Split chained commands (`;`, `&&`, `||`, `|`) and validate each
    /// segment's base program separately.
    #[serde(default = "d_true")]
    pub split_chained: bool,
}

impl Default for ShellRules {
    fn default() -> Self {
        Self {
            mode: ShellMode::Allowlist,
            allowed_commands: Vec::new(),
            denied_commands: Vec::new(),
            split_chained: true,
        }
    }
}

/// Action categories used by the intent capsule's drift check.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ActionCategories {
    #[serde(default)]
    pub reversible: Vec<String>,
    #[serde(default)]
    pub irreversible: Vec<String>,
    /// Actions that are always surfaced for operator attention.
    #[serde(default)]
    pub always_flag: Vec<String>,
}

/// Network egress rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkRules {
    #[serde(default)]
    pub allowed_hosts: Vec<String>,
    #[serde(default)]
    pub denied_hosts: Vec<String>,
    #[serde(default = "d_true")]
    pub block_piped_downloads: bool,
}

impl Default for NetworkRules {
    fn default() -> Self {
        Self {
            allowed_hosts: Vec::new(),
            denied_hosts: Vec::new(),
            block_piped_downloads: true,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_true() -> bool {
    true
}
