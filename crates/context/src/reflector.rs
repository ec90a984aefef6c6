//! End-of-session reflection.
//!
//! Condenses a session's observations and extracts persistent facts into
//! structured memory. The condense callback returns two sections: a
//! single-line `FACTS:` JSON array and a `CONDENSED:` block holding the
//! surviving observations.

use std::sync::Arc;

use serde::Deserialize;

use warden_domain::error::Result;
use warden_domain::trace::TraceEvent;
use warden_memory::{ItemDraft, ItemKind, MemoryManager, SourceKind};

use crate::condenser::Condenser;
use crate::estimate_tokens;
use crate::store::{ObservationBlock, ObservationStore};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One extracted fact from the `FACTS:` line.
#[derive(Debug, Deserialize)]
struct ExtractedFact {
    summary: String,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
}

/// What a reflection pass produced.
#[derive(Debug, Clone)]
pub struct ReflectionOutcome {
    pub items_created: usize,
    pub condensed_observations: String,
    pub condensed_tokens: usize,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Reflector
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Reflector {
    condenser: Arc<dyn Condenser>,
}

impl Reflector {
    pub fn new(condenser: Arc<dyn Condenser>) -> Self {
        Self { condenser }
    }

    /// Reflect over session observations: extract facts into structured
    /// memory and condense the remainder. On callback failure the input
    /// observations come back unchanged with no items created.
    pub async fn reflect(
        &self,
        observations: &str,
        session_id: &str,
        memory: &MemoryManager,
    ) -> ReflectionOutcome {
        let prompt = build_prompt(observations);
        let response = match self.condenser.condense(&prompt).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(
                    session_id,
                    error = %e,
                    "reflection failed; keeping observations unchanged"
                );
                return ReflectionOutcome {
                    items_created: 0,
                    condensed_observations: observations.to_owned(),
                    condensed_tokens: estimate_tokens(observations),
                };
            }
        };

        let (facts, condensed) = parse_response(&response, observations);

        let mut items_created = 0;
        for fact in facts {
            let kind = fact
                .kind
                .as_deref()
                .map(ItemKind::parse_lossy)
                .unwrap_or(ItemKind::Knowledge);
            let draft = ItemDraft::new(kind, fact.summary)
                .with_source(session_id, SourceKind::AgentAnalysis)
                .with_tags(fact.tags)
                .with_category(format!("{}/reflected", kind.as_str()));
            match memory.create_item(draft) {
                Ok(_) => items_created += 1,
                Err(e) => {
                    tracing::warn!(session_id, error = %e, "failed to persist reflected fact");
                }
            }
        }

        let condensed_tokens = estimate_tokens(&condensed);
        TraceEvent::ReflectionCompleted {
            session_id: session_id.to_owned(),
            items_created,
            condensed_tokens,
        }
        .emit();

        ReflectionOutcome {
            items_created,
            condensed_observations: condensed,
            condensed_tokens,
        }
    }

    /// Reflect, then append the condensed output as a cross-session block.
    pub async fn reflect_and_persist(
        &self,
        observations: &str,
        session_id: &str,
        memory: &MemoryManager,
        store: &ObservationStore,
    ) -> Result<ReflectionOutcome> {
        let outcome = self.reflect(observations, session_id, memory).await;
        if !outcome.condensed_observations.is_empty() {
            store.append(&ObservationBlock::cross_session(
                session_id,
                outcome.condensed_observations.clone(),
            ))?;
        }
        Ok(outcome)
    }
}

fn build_prompt(observations: &str) -> String {
    format!(
        "Review this session's observations. Produce two sections:\n\
         1. A single line starting with FACTS: followed by a JSON array of \
         objects {{\"summary\", \"kind\", \"tags\"}} for facts worth keeping \
         across sessions (kinds: profile, event, knowledge, behavior, skill, \
         tool).\n\
         2. A CONDENSED: block containing the remaining observations, \
         compressed but with exact names, paths, and values preserved.\n\n\
         OBSERVATIONS:\n{observations}"
    )
}

/// Pull the `FACTS:` array and the `CONDENSED:` body out of the response.
/// Anything unparseable degrades to no facts and the original text.
fn parse_response(response: &str, fallback: &str) -> (Vec<ExtractedFact>, String) {
    let mut facts = Vec::new();
    let mut condensed: Option<String> = None;

    for (i, line) in response.lines().enumerate() {
        if let Some(rest) = line.trim().strip_prefix("FACTS:") {
            match serde_json::from_str::<Vec<ExtractedFact>>(rest.trim()) {
                Ok(parsed) => facts = parsed,
                Err(e) => {
                    tracing::warn!(error = %e, "unparseable FACTS line");
                }
            }
        } else if let Some(rest) = line.trim().strip_prefix("CONDENSED:") {
            let mut body = rest.trim_start().to_string();
            let tail: Vec<&str> = response.lines().skip(i + 1).collect();
            if !tail.is_empty() {
                if !body.is_empty() {
                    body.push('\n');
                }
                body.push_str(&tail.join("\n"));
            }
            condensed = Some(body.trim().to_string());
            break;
        }
    }

    let condensed = match condensed {
        Some(c) if !c.is_empty() => c,
        _ => fallback.to_owned(),
    };
    (facts, condensed)
}
