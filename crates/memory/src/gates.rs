//! Validation pipeline for agent-initiated memory saves.
//!
//! Five gates, checked in order: minimum length, transient-state
//! rejection, Jaccard duplicate detection, contradiction detection
//! (same tags with moderate overlap), and a per-session save ceiling.

use std::collections::HashSet;

use warden_domain::config::SaveGateConfig;

use crate::item::MemoryItem;

/// Phrases describing moment-to-moment state that has no business in
/// long-term memory.
const TRANSIENT_PATTERNS: &[&str] = &[
    "is busy",
    "is waiting",
    "just now",
    "currently",
    "right now",
    "at the moment",
    "is typing",
    "is loading",
];

/// The outcome of running a proposed save through the gates.
#[derive(Debug, Clone, PartialEq)]
pub enum SaveVerdict {
    Accepted,
    TooShort {
        length: usize,
        minimum: usize,
    },
    Transient {
        pattern: &'static str,
    },
    Duplicate {
        duplicate_of: String,
        similarity: f64,
    },
    Contradiction {
        conflicts_with: String,
        similarity: f64,
    },
    SessionCapReached {
        cap: u32,
    },
}

impl SaveVerdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, SaveVerdict::Accepted)
    }
}

/// Jaccard similarity on lowercase word sets.
///
/// Symmetric, bounded to [0, 1]; two empty sets are identical (1.0).
pub fn jaccard(a: &str, b: &str) -> f64 {
    let set_a = word_set(a);
    let set_b = word_set(b);
    if set_a.is_empty() && set_b.is_empty() {
        return 1.0;
    }
    let intersection = set_a.intersection(&set_b).count() as f64;
    let union = set_a.union(&set_b).count() as f64;
    intersection / union
}

fn word_set(text: &str) -> HashSet<String> {
    text.split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect()
}

/// Run a proposed summary through every gate against the existing items.
pub fn check_save(
    summary: &str,
    tags: &[String],
    existing: &[MemoryItem],
    session_saves: u32,
    config: &SaveGateConfig,
) -> SaveVerdict {
    // Gate 1: minimum content length (code units, like the save surface).
    let length = summary.encode_utf16().count();
    if length < config.min_content_length {
        return SaveVerdict::TooShort {
            length,
            minimum: config.min_content_length,
        };
    }

    // Gate 2: transient state never persists.
    let lowered = summary.to_lowercase();
    if let Some(pattern) = TRANSIENT_PATTERNS.iter().find(|p| lowered.contains(*p)) {
        return SaveVerdict::Transient { pattern };
    }

    // Gate 3: duplicate detection against every existing summary.
    for item in existing {
        let similarity = jaccard(summary, &item.summary);
        if similarity >= config.duplicate_threshold {
            return SaveVerdict::Duplicate {
                duplicate_of: item.id.clone(),
                similarity,
            };
        }
    }

    // Gate 4: same tags with moderate overlap reads as a contradicting
    // restatement rather than new information.
    for item in existing {
        let similarity = jaccard(summary, &item.summary);
        if similarity > config.contradiction_floor
            && similarity <= config.duplicate_threshold
            && !item.tags.is_empty()
            && tags_equal(&item.tags, tags)
        {
            return SaveVerdict::Contradiction {
                conflicts_with: item.id.clone(),
                similarity,
            };
        }
    }

    // Gate 5: per-session ceiling.
    if session_saves >= config.session_save_cap {
        return SaveVerdict::SessionCapReached {
            cap: config.session_save_cap,
        };
    }

    SaveVerdict::Accepted
}

fn tags_equal(a: &[String], b: &[String]) -> bool {
    let sa: HashSet<&str> = a.iter().map(|s| s.as_str()).collect();
    let sb: HashSet<&str> = b.iter().map(|s| s.as_str()).collect();
    sa == sb
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{ItemKind, SourceKind};
    use chrono::Utc;

    fn existing_item(id: &str, summary: &str, tags: &[&str]) -> MemoryItem {
        MemoryItem {
            id: id.into(),
            kind: ItemKind::Knowledge,
            summary: summary.into(),
            source: "sess".into(),
            source_kind: SourceKind::AgentAnalysis,
            created_at: Utc::now(),
            last_accessed: Utc::now(),
            access_count: 0,
            reinforcement: 0.0,
            tags: tags.iter().map(|s| s.to_string()).collect(),
            category: "knowledge/general".into(),
            extra: Default::default(),
        }
    }

    fn config() -> SaveGateConfig {
        SaveGateConfig::default()
    }

    // ── Jaccard laws ───────────────────────────────────────────────

    #[test]
    fn jaccard_is_symmetric_and_bounded() {
        let a = "Zora uses pino for logging";
        let b = "Zora uses pino for structured logging output";
        assert_eq!(jaccard(a, b), jaccard(b, a));
        let sim = jaccard(a, b);
        assert!((0.0..=1.0).contains(&sim));
    }

    #[test]
    fn jaccard_identity_and_empty_sets() {
        assert_eq!(jaccard("some words here", "some words here"), 1.0);
        assert_eq!(jaccard("", ""), 1.0);
        assert_eq!(jaccard("words", ""), 0.0);
    }

    // ── Gates ──────────────────────────────────────────────────────

    #[test]
    fn rejects_short_content() {
        let verdict = check_save("too short", &[], &[], 0, &config());
        assert!(matches!(verdict, SaveVerdict::TooShort { .. }));
    }

    #[test]
    fn rejects_transient_state() {
        let verdict = check_save(
            "the deploy pipeline is loading right now",
            &[],
            &[],
            0,
            &config(),
        );
        assert!(matches!(verdict, SaveVerdict::Transient { .. }));
    }

    #[test]
    fn near_duplicate_is_blocked_with_the_matched_id() {
        let existing = vec![existing_item(
            "item-1",
            "Zora uses pino for logging",
            &["logging"],
        )];
        let verdict = check_save(
            "Zora uses pino for structured logging output",
            &[],
            &existing,
            0,
            &config(),
        );
        match verdict {
            SaveVerdict::Duplicate {
                duplicate_of,
                similarity,
            } => {
                assert_eq!(duplicate_of, "item-1");
                assert!(similarity > 0.7 - 1e-9, "similarity {similarity}");
            }
            other => panic!("expected duplicate, got {other:?}"),
        }
    }

    #[test]
    fn unrelated_content_passes() {
        let existing = vec![existing_item(
            "item-1",
            "Zora uses pino for logging",
            &["logging"],
        )];
        let verdict = check_save("React hooks patterns worth remembering", &[], &existing, 0, &config());
        assert!(verdict.is_accepted());
    }

    #[test]
    fn same_tags_moderate_overlap_is_a_contradiction() {
        let existing = vec![existing_item(
            "item-1",
            "the staging database runs postgres fourteen",
            &["infra", "db"],
        )];
        let verdict = check_save(
            "the staging database now runs mysql eight instead",
            &["infra".into(), "db".into()],
            &existing,
            0,
            &config(),
        );
        match verdict {
            SaveVerdict::Contradiction { conflicts_with, similarity } => {
                assert_eq!(conflicts_with, "item-1");
                assert!(similarity > 0.2 && similarity <= 0.7);
            }
            other => panic!("expected contradiction, got {other:?}"),
        }
    }

    #[test]
    fn session_cap_blocks_the_eleventh_save() {
        let verdict = check_save("a perfectly reasonable fact to keep", &[], &[], 10, &config());
        assert!(matches!(verdict, SaveVerdict::SessionCapReached { cap: 10 }));
    }
}
