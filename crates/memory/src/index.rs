//! BM25+ search index over structured memory items.
//!
//! Fields are weighted (tags 2.0, category 1.5, summary 1.0), query terms
//! combine with OR, and matching extends to prefixes and bounded fuzzy
//! matches. Ranking is deterministic for a fixed corpus and query: ties
//! break on item id. The index serializes to disk and is rebuilt from the
//! items directory when no serialized copy loads.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use warden_domain::error::Result;

use crate::item::MemoryItem;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Constants
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const K1: f64 = 1.2;
const B: f64 = 0.75;
/// BM25+ lower-bound bonus for any matching document.
const DELTA: f64 = 0.5;

/// Match-quality multipliers; exact beats prefix beats fuzzy.
const EXACT_WEIGHT: f64 = 1.0;
const PREFIX_WEIGHT: f64 = 0.8;
const FUZZY_WEIGHT: f64 = 0.7;

/// Fuzzy matching allows edits up to 20% of the term length, capped.
const FUZZY_RATIO: f64 = 0.2;
const FUZZY_MAX_EDITS: usize = 2;

const FIELD_COUNT: usize = 3;
const FIELD_BOOSTS: [f64; FIELD_COUNT] = [1.0, 2.0, 1.5];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Summary = 0,
    Tags = 1,
    Category = 2,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Index structure
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A scored search result.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: String,
    pub score: f64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SearchIndex {
    /// token -> per-field map of doc id -> term frequency.
    postings: HashMap<String, [HashMap<String, u32>; FIELD_COUNT]>,
    /// doc id -> per-field token counts.
    doc_lengths: HashMap<String, [u32; FIELD_COUNT]>,
}

impl SearchIndex {
    /// Build an index over a full item set.
    pub fn build<'a>(items: impl IntoIterator<Item = &'a MemoryItem>) -> Self {
        let mut index = Self::default();
        for item in items {
            index.add(item);
        }
        index
    }

    /// Add one item to the index.
    pub fn add(&mut self, item: &MemoryItem) {
        let fields: [(Field, String); FIELD_COUNT] = [
            (Field::Summary, item.summary.clone()),
            (Field::Tags, item.tags.join(" ")),
            (Field::Category, item.category.clone()),
        ];
        let mut lengths = [0u32; FIELD_COUNT];
        for (field, text) in fields {
            let tokens = tokenize(&text);
            lengths[field as usize] = tokens.len() as u32;
            for token in tokens {
                let per_field = self.postings.entry(token).or_default();
                *per_field[field as usize]
                    .entry(item.id.clone())
                    .or_insert(0) += 1;
            }
        }
        self.doc_lengths.insert(item.id.clone(), lengths);
    }

    /// Remove one item from the index.
    pub fn remove(&mut self, id: &str) {
        self.doc_lengths.remove(id);
        self.postings.retain(|_, per_field| {
            for field in per_field.iter_mut() {
                field.remove(id);
            }
            per_field.iter().any(|f| !f.is_empty())
        });
    }

    pub fn doc_count(&self) -> usize {
        self.doc_lengths.len()
    }

    /// Search with OR-combined terms. Results are sorted score-descending,
    /// ties broken by id, so ordering is deterministic.
    pub fn search(&self, query: &str) -> Vec<SearchHit> {
        let terms = tokenize(query);
        if terms.is_empty() || self.doc_lengths.is_empty() {
            return Vec::new();
        }

        let n = self.doc_lengths.len() as f64;
        let avg_lengths = self.average_field_lengths();
        let mut scores: HashMap<&str, f64> = HashMap::new();

        for term in &terms {
            // Expand the query term over the vocabulary: exact, prefix,
            // and bounded-edit-distance matches.
            let mut matched: Vec<(&String, f64)> = Vec::new();
            let max_edits = max_edits_for(term);
            for token in self.postings.keys() {
                let weight = if token == term {
                    EXACT_WEIGHT
                } else if token.starts_with(term.as_str()) {
                    PREFIX_WEIGHT
                } else if max_edits > 0 && edit_distance_within(term, token, max_edits) {
                    FUZZY_WEIGHT
                } else {
                    continue;
                };
                matched.push((token, weight));
            }

            for (token, match_weight) in matched {
                let per_field = &self.postings[token];
                for (field_idx, field_postings) in per_field.iter().enumerate() {
                    if field_postings.is_empty() {
                        continue;
                    }
                    let df = field_postings.len() as f64;
                    let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
                    for (doc_id, &tf) in field_postings {
                        let doc_len = self.doc_lengths[doc_id][field_idx] as f64;
                        let avg = avg_lengths[field_idx].max(1.0);
                        let tf = tf as f64;
                        let norm = tf * (K1 + 1.0) / (tf + K1 * (1.0 - B + B * doc_len / avg));
                        let contribution =
                            idf * (norm + DELTA) * FIELD_BOOSTS[field_idx] * match_weight;
                        *scores.entry(doc_id.as_str()).or_insert(0.0) += contribution;
                    }
                }
            }
        }

        let mut hits: Vec<SearchHit> = scores
            .into_iter()
            .map(|(id, score)| SearchHit {
                id: id.to_owned(),
                score,
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits
    }

    /// Scores normalized to [0, 1] by the top score; used as the
    /// relevance component of salience.
    pub fn search_normalized(&self, query: &str) -> Vec<SearchHit> {
        let hits = self.search(query);
        let top = hits.first().map(|h| h.score).unwrap_or(0.0);
        if top <= 0.0 {
            return hits;
        }
        hits.into_iter()
            .map(|h| SearchHit {
                score: h.score / top,
                id: h.id,
            })
            .collect()
    }

    // ── Persistence ───────────────────────────────────────────────

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_string(self)?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Load a serialized index; `None` when missing or unreadable (the
    /// caller rebuilds from the items directory).
    pub fn load(path: &Path) -> Option<Self> {
        let raw = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(index) => Some(index),
            Err(e) => {
                tracing::warn!(error = %e, "serialized index unreadable, rebuilding");
                None
            }
        }
    }

    // ── Private ──────────────────────────────────────────────────────

    fn average_field_lengths(&self) -> [f64; FIELD_COUNT] {
        let mut totals = [0f64; FIELD_COUNT];
        for lengths in self.doc_lengths.values() {
            for (i, &len) in lengths.iter().enumerate() {
                totals[i] += len as f64;
            }
        }
        let n = self.doc_lengths.len().max(1) as f64;
        totals.map(|t| t / n)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tokenization and fuzzy matching
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Lowercase and split on whitespace plus `- _ . /`.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| c.is_whitespace() || matches!(c, '-' | '_' | '.' | '/'))
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

fn max_edits_for(term: &str) -> usize {
    ((term.chars().count() as f64 * FUZZY_RATIO).ceil() as usize).min(FUZZY_MAX_EDITS)
}

/// Bounded Levenshtein: true when distance(a, b) <= max_edits.
fn edit_distance_within(a: &str, b: &str, max_edits: usize) -> bool {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.len().abs_diff(b.len()) > max_edits {
        return false;
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    for (i, &ca) in a.iter().enumerate() {
        let mut current = vec![i + 1];
        let mut row_min = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            let value = (prev[j] + cost)
                .min(prev[j + 1] + 1)
                .min(current[j] + 1);
            row_min = row_min.min(value);
            current.push(value);
        }
        if row_min > max_edits {
            return false;
        }
        prev = current;
    }
    prev[b.len()] <= max_edits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{ItemKind, SourceKind};
    use chrono::Utc;

    fn item(id: &str, summary: &str, tags: &[&str], category: &str) -> MemoryItem {
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
            category: category.into(),
            extra: Default::default(),
        }
    }

    fn corpus() -> Vec<MemoryItem> {
        vec![
            item(
                "a",
                "user prefers rust for systems work",
                &["rust", "preferences"],
                "profile/languages",
            ),
            item(
                "b",
                "the api gateway times out after 30s",
                &["infra"],
                "knowledge/infra",
            ),
            item(
                "c",
                "rust build uses cargo workspaces",
                &["rust", "build"],
                "knowledge/rust",
            ),
        ]
    }

    #[test]
    fn tokenize_splits_on_separators() {
        assert_eq!(
            tokenize("Rust-lang/cargo build_system v1.2"),
            vec!["rust", "lang", "cargo", "build", "system", "v1", "2"]
        );
    }

    #[test]
    fn exact_match_finds_documents() {
        let index = SearchIndex::build(&corpus());
        let hits = index.search("rust");
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert!(ids.contains(&"a"));
        assert!(ids.contains(&"c"));
        assert!(!ids.contains(&"b"));
    }

    #[test]
    fn tag_matches_outrank_summary_matches() {
        let index = SearchIndex::build(&[
            item("tagged", "unrelated text", &["deploy"], "knowledge/general"),
            item("summar", "we deploy on fridays", &[], "knowledge/general"),
        ]);
        let hits = index.search("deploy");
        assert_eq!(hits[0].id, "tagged");
    }

    #[test]
    fn prefix_and_fuzzy_matching_work() {
        let index = SearchIndex::build(&corpus());
        // Prefix: "pref" matches "prefers"/"preferences".
        assert!(!index.search("pref").is_empty());
        // Fuzzy: one substitution inside budget for a 4-char term.
        assert!(index.search("rast").iter().any(|h| h.id == "a"));
    }

    #[test]
    fn ordering_is_deterministic_and_stable_under_unrelated_additions() {
        let mut items = corpus();
        let index = SearchIndex::build(&items);
        let before: Vec<String> = index
            .search("rust")
            .into_iter()
            .map(|h| h.id)
            .collect();

        // Repeat query: identical order.
        let again: Vec<String> = index.search("rust").into_iter().map(|h| h.id).collect();
        assert_eq!(before, again);

        // An unrelated item must not reorder the existing results.
        items.push(item(
            "z",
            "gardening notes about tomatoes",
            &["garden"],
            "knowledge/garden",
        ));
        let bigger = SearchIndex::build(&items);
        let after: Vec<String> = bigger.search("rust").into_iter().map(|h| h.id).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn remove_drops_document() {
        let mut index = SearchIndex::build(&corpus());
        index.remove("a");
        assert_eq!(index.doc_count(), 2);
        assert!(index.search("rust").iter().all(|h| h.id != "a"));
    }

    #[test]
    fn normalized_scores_top_out_at_one() {
        let index = SearchIndex::build(&corpus());
        let hits = index.search_normalized("rust");
        assert!((hits[0].score - 1.0).abs() < 1e-9);
        assert!(hits.iter().all(|h| h.score <= 1.0 && h.score > 0.0));
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index").join("index.json");
        let index = SearchIndex::build(&corpus());
        index.save(&path).unwrap();

        let loaded = SearchIndex::load(&path).expect("index should load");
        assert_eq!(loaded.doc_count(), 3);
        let a: Vec<String> = index.search("rust").into_iter().map(|h| h.id).collect();
        let b: Vec<String> = loaded.search("rust").into_iter().map(|h| h.id).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn missing_index_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(SearchIndex::load(&dir.path().join("absent.json")).is_none());
    }

    #[test]
    fn edit_distance_bounds() {
        assert!(edit_distance_within("rust", "rsut", 2));
        assert!(!edit_distance_within("rust", "python", 2));
        assert!(edit_distance_within("same", "same", 0));
    }

    #[test]
    fn empty_query_returns_nothing() {
        let index = SearchIndex::build(&corpus());
        assert!(index.search("").is_empty());
        assert!(index.search("   ").is_empty());
    }
}
