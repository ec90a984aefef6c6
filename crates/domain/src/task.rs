use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Capabilities and cost tiers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A capability a provider may advertise and a task may require.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    Reasoning,
    Coding,
    Creative,
    Search,
    StructuredData,
    LargeContext,
    LongRunning,
}

/// Provider cost tier, ordered cheapest first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum CostTier {
    Free,
    #[default]
    Included,
    Metered,
    Premium,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Task request and classification
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A task submitted to the runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    /// Job id; doubles as the session id for journal, steering, and audit.
    pub job_id: String,
    /// The natural-language task.
    pub prompt: String,
    /// Capabilities the selected provider must advertise. Empty = any.
    #[serde(default)]
    pub required_capabilities: Vec<Capability>,
    /// Pin a specific provider by name, bypassing routing mode and cost
    /// ceiling (honored only if that provider is available and capable).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_preference: Option<String>,
}

impl TaskRequest {
    pub fn new(job_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            prompt: prompt.into(),
            required_capabilities: Vec::new(),
            model_preference: None,
        }
    }
}

/// How hard the classifier thinks a prompt is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
}

/// The dominant resource a prompt calls for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Reasoning,
    Coding,
    Creative,
    Search,
    Data,
}

impl ResourceType {
    /// The capability a classified resource type demands of a provider.
    pub fn required_capability(self) -> Capability {
        match self {
            ResourceType::Reasoning => Capability::Reasoning,
            ResourceType::Coding => Capability::Coding,
            ResourceType::Creative => Capability::Creative,
            ResourceType::Search => Capability::Search,
            ResourceType::Data => Capability::StructuredData,
        }
    }
}

/// Result of classifying a task prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskClassification {
    pub complexity: Complexity,
    pub resource_type: ResourceType,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cost_tiers_order_cheapest_first() {
        assert!(CostTier::Free < CostTier::Included);
        assert!(CostTier::Included < CostTier::Metered);
        assert!(CostTier::Metered < CostTier::Premium);
    }

    #[test]
    fn capability_serializes_kebab_case() {
        let json = serde_json::to_string(&Capability::StructuredData).unwrap();
        assert_eq!(json, r#""structured-data""#);
        let json = serde_json::to_string(&Capability::LargeContext).unwrap();
        assert_eq!(json, r#""large-context""#);
    }

    #[test]
    fn resource_type_maps_to_capability() {
        assert_eq!(
            ResourceType::Data.required_capability(),
            Capability::StructuredData
        );
        assert_eq!(
            ResourceType::Coding.required_capability(),
            Capability::Coding
        );
    }
}
