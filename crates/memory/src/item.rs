use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Kinds
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What a memory item describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Profile,
    Event,
    Knowledge,
    Behavior,
    Skill,
    Tool,
}

impl ItemKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ItemKind::Profile => "profile",
            ItemKind::Event => "event",
            ItemKind::Knowledge => "knowledge",
            ItemKind::Behavior => "behavior",
            ItemKind::Skill => "skill",
            ItemKind::Tool => "tool",
        }
    }

    /// Parse a kind name, coercing anything unknown to `Knowledge`.
    pub fn parse_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "profile" => ItemKind::Profile,
            "event" => ItemKind::Event,
            "behavior" => ItemKind::Behavior,
            "skill" => ItemKind::Skill,
            "tool" => ItemKind::Tool,
            _ => ItemKind::Knowledge,
        }
    }
}

/// Where a memory item came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    UserInstruction,
    AgentAnalysis,
    ToolOutput,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// MemoryItem
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One structured memory item, persisted as one JSON file.
///
/// The id is immutable after creation; `access_count` only grows, and only
/// through read operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryItem {
    pub id: String,
    pub kind: ItemKind,
    pub summary: String,
    /// Session id the item was learned in.
    pub source: String,
    pub source_kind: SourceKind,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: u64,
    pub reinforcement: f64,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Single category path, `a/b`.
    pub category: String,
    /// Unknown fields survive read-modify-write cycles.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Caller input to item creation; the store stamps id, timestamps, and
/// counters.
#[derive(Debug, Clone)]
pub struct ItemDraft {
    pub kind: ItemKind,
    pub summary: String,
    pub source: String,
    pub source_kind: SourceKind,
    pub tags: Vec<String>,
    /// When absent, the category is derived from kind + tags.
    pub category: Option<String>,
}

impl ItemDraft {
    pub fn new(kind: ItemKind, summary: impl Into<String>) -> Self {
        Self {
            kind,
            summary: summary.into(),
            source: String::new(),
            source_kind: SourceKind::AgentAnalysis,
            tags: Vec::new(),
            category: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>, kind: SourceKind) -> Self {
        self.source = source.into();
        self.source_kind = kind;
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// The category used when the caller does not provide one.
    pub fn derived_category(&self) -> String {
        match self.tags.first() {
            Some(tag) => format!("{}/{}", self.kind.as_str(), slugify(tag)),
            None => format!("{}/general", self.kind.as_str()),
        }
    }
}

/// Filter for listing items. All present clauses must hold; tags are a
/// conjunction.
#[derive(Debug, Clone, Default)]
pub struct ItemFilter {
    pub kind: Option<ItemKind>,
    pub category: Option<String>,
    pub tags: Vec<String>,
}

impl ItemFilter {
    pub fn matches(&self, item: &MemoryItem) -> bool {
        if let Some(kind) = self.kind {
            if item.kind != kind {
                return false;
            }
        }
        if let Some(category) = &self.category {
            if &item.category != category {
                return false;
            }
        }
        self.tags.iter().all(|t| item.tags.contains(t))
    }
}

/// Lowercase, keep alphanumerics, join runs with `-`.
pub fn slugify(s: &str) -> String {
    let mut out = String::new();
    let mut last_dash = true;
    for c in s.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    out.trim_end_matches('-').to_string()
}
