//! Task classification and provider selection.
//!
//! The classifier is a keyword table over the prompt: it picks the
//! dominant resource type and a complexity grade. Selection then filters
//! the registered providers down to the available, capable set and
//! applies the configured mode.

use std::sync::Arc;

use parking_lot::Mutex;

use warden_domain::config::{RouteMode, RouterConfig};
use warden_domain::task::{
    Capability, Complexity, ResourceType, TaskClassification, TaskRequest,
};
use warden_domain::trace::TraceEvent;

use crate::traits::Provider;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Classifier
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Prompts shorter than this many words are graded simple.
const SIMPLE_MAX_WORDS: usize = 4;

/// Prompts touching at least this many domains are graded complex.
const COMPLEX_DOMAIN_COUNT: usize = 3;

/// Long prompts are agentic work, not quick questions.
const COMPLEX_MIN_WORDS: usize = 80;

const CODING: &[&str] = &[
    "code", "function", "implement", "debug", "refactor", "compile", "bug", "script", "class",
    "test", "library", "api",
];
const REASONING: &[&str] = &[
    "analyze", "explain", "why", "prove", "reason", "compare", "evaluate", "derive", "tradeoff",
];
const CREATIVE: &[&str] = &[
    "write", "story", "poem", "creative", "draft", "blog", "brainstorm", "slogan",
];
const SEARCH: &[&str] = &[
    "search", "find", "lookup", "latest", "news", "current", "today", "web",
];
const DATA: &[&str] = &[
    "json", "csv", "table", "parse", "extract", "schema", "sql", "dataset", "format",
];

/// Classify a prompt into complexity and dominant resource type.
pub fn classify_task(prompt: &str) -> TaskClassification {
    let lowered = prompt.to_lowercase();
    let words: Vec<&str> = lowered.split_whitespace().collect();

    let hits = |table: &[&str]| -> usize {
        table.iter().filter(|k| lowered.contains(*k)).count()
    };
    let coding = hits(CODING);
    let reasoning = hits(REASONING);
    let creative = hits(CREATIVE);
    let search = hits(SEARCH);
    let data = hits(DATA);

    let domains_touched = [coding, reasoning, creative, search, data]
        .iter()
        .filter(|&&n| n > 0)
        .count();

    // "Analyze this function" is reasoning about code, not coding.
    let resource_type = if reasoning > 0 && coding > 0 {
        ResourceType::Reasoning
    } else {
        let scored = [
            (coding, ResourceType::Coding),
            (reasoning, ResourceType::Reasoning),
            (creative, ResourceType::Creative),
            (search, ResourceType::Search),
            (data, ResourceType::Data),
        ];
        scored
            .iter()
            .max_by_key(|(n, _)| *n)
            .filter(|(n, _)| *n > 0)
            .map(|(_, r)| *r)
            .unwrap_or(ResourceType::Reasoning)
    };

    let complexity = if words.len() < SIMPLE_MAX_WORDS {
        Complexity::Simple
    } else if domains_touched >= COMPLEX_DOMAIN_COUNT || words.len() > COMPLEX_MIN_WORDS {
        Complexity::Complex
    } else {
        Complexity::Moderate
    };

    TaskClassification {
        complexity,
        resource_type,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Router
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Router {
    providers: Vec<Arc<dyn Provider>>,
    config: RouterConfig,
    rr_cursor: Mutex<usize>,
}

impl Router {
    pub fn new(providers: Vec<Arc<dyn Provider>>, config: RouterConfig) -> Self {
        Self {
            providers,
            config,
            rr_cursor: Mutex::new(0),
        }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Required capabilities for a task: what it asked for plus what the
    /// classifier says the prompt demands.
    pub fn required_capabilities(&self, task: &TaskRequest) -> Vec<Capability> {
        let mut required = task.required_capabilities.clone();
        let classified = classify_task(&task.prompt).resource_type.required_capability();
        if !required.contains(&classified) {
            required.push(classified);
        }
        required
    }

    /// Available providers advertising every required capability, sorted
    /// by name for deterministic iteration.
    pub async fn capable_providers(
        &self,
        required: &[Capability],
        exclude: &[&str],
    ) -> Vec<Arc<dyn Provider>> {
        let mut capable = Vec::new();
        for provider in &self.providers {
            if exclude.contains(&provider.name()) {
                continue;
            }
            if !provider.supports(required) {
                continue;
            }
            if provider.is_available().await {
                capable.push(provider.clone());
            }
        }
        capable.sort_by(|a, b| a.name().cmp(b.name()));
        capable
    }

    pub async fn select(&self, task: &TaskRequest) -> Option<Arc<dyn Provider>> {
        self.select_excluding(task, &[]).await
    }

    /// Pick a provider under the configured mode, skipping `exclude`
    /// (failed providers during failover).
    pub async fn select_excluding(
        &self,
        task: &TaskRequest,
        exclude: &[&str],
    ) -> Option<Arc<dyn Provider>> {
        let required = self.required_capabilities(task);
        let capable = self.capable_providers(&required, exclude).await;
        if capable.is_empty() {
            return None;
        }

        // An explicit preference overrides mode and cost ceiling when the
        // named provider is usable.
        if let Some(preferred) = &task.model_preference {
            if let Some(provider) = capable.iter().find(|p| p.name() == preferred) {
                return Some(self.traced(task, provider.clone(), "preference"));
            }
        }

        let selected = match &self.config.mode {
            RouteMode::RespectRanking => {
                let ceiling_ok: Vec<_> = match self.config.max_cost_tier {
                    Some(ceiling) => capable
                        .iter()
                        .filter(|p| p.cost_tier() <= ceiling)
                        .cloned()
                        .collect(),
                    None => capable.clone(),
                };
                // A ceiling that empties the set falls through to the
                // unfiltered capable set.
                let pool = if ceiling_ok.is_empty() { &capable } else { &ceiling_ok };
                pool.iter()
                    .min_by_key(|p| (p.rank(), p.name().to_owned()))
                    .cloned()
            }
            RouteMode::OptimizeCost => capable
                .iter()
                .min_by_key(|p| (p.cost_tier(), p.rank(), p.name().to_owned()))
                .cloned(),
            RouteMode::RoundRobin => {
                let mut cursor = self.rr_cursor.lock();
                let picked = capable[*cursor % capable.len()].clone();
                *cursor += 1;
                Some(picked)
            }
            RouteMode::ProviderOnly(name) => {
                capable.iter().find(|p| p.name() == name).cloned()
            }
        };

        selected.map(|p| self.traced(task, p, mode_name(&self.config.mode)))
    }

    fn traced(
        &self,
        task: &TaskRequest,
        provider: Arc<dyn Provider>,
        mode: &str,
    ) -> Arc<dyn Provider> {
        TraceEvent::ProviderSelected {
            job_id: task.job_id.clone(),
            provider: provider.name().to_owned(),
            mode: mode.to_owned(),
        }
        .emit();
        provider
    }
}

fn mode_name(mode: &RouteMode) -> &'static str {
    match mode {
        RouteMode::RespectRanking => "respect_ranking",
        RouteMode::OptimizeCost => "optimize_cost",
        RouteMode::RoundRobin => "round_robin",
        RouteMode::ProviderOnly(_) => "provider_only",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Classifier ─────────────────────────────────────────────────

    #[test]
    fn short_prompts_are_simple() {
        let c = classify_task("capital of france?");
        assert_eq!(c.complexity, Complexity::Simple);
    }

    #[test]
    fn analyze_code_is_reasoning_not_coding() {
        let c = classify_task("analyze this function and explain the bug in the code");
        assert_eq!(c.resource_type, ResourceType::Reasoning);
    }

    #[test]
    fn plain_coding_prompt_is_coding() {
        let c = classify_task("implement a parser function for the config file");
        assert_eq!(c.resource_type, ResourceType::Coding);
    }

    #[test]
    fn multi_domain_prompts_are_complex() {
        let c = classify_task(
            "search the web for the latest csv schema, write a blog draft about it, and implement a parser",
        );
        assert_eq!(c.complexity, Complexity::Complex);
    }

    #[test]
    fn classifier_is_deterministic() {
        let a = classify_task("extract the json table into csv format");
        let b = classify_task("extract the json table into csv format");
        assert_eq!(a, b);
        assert_eq!(a.resource_type, ResourceType::Data);
    }
}
