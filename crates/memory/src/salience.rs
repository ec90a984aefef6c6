//! Salience scoring: access x recency x relevance.

use chrono::{DateTime, Utc};

use warden_domain::config::SalienceWeights;

use crate::item::MemoryItem;

/// Composite salience of one item.
///
/// `access` saturates at the configured cap, `recency` decays
/// exponentially with the configured half-life, and `relevance` is the
/// normalized search score against the query (1.0 when no query is given).
pub fn salience_score(
    item: &MemoryItem,
    relevance: f64,
    weights: &SalienceWeights,
    now: DateTime<Utc>,
) -> f64 {
    let access = (item.access_count as f64 / weights.access_cap as f64).min(1.0);

    let age_days = (now - item.last_accessed).num_seconds().max(0) as f64 / 86_400.0;
    let recency = (-age_days * std::f64::consts::LN_2 / weights.half_life_days).exp();

    weights.access_weight * access
        + weights.recency_weight * recency
        + weights.relevance_weight * relevance
}

/// Rank items by salience, descending. Ties break on `last_accessed`
/// (newest first), then id lexicographically.
pub fn rank(
    mut scored: Vec<(MemoryItem, f64)>,
) -> Vec<(MemoryItem, f64)> {
    scored.sort_by(|(a, sa), (b, sb)| {
        sb.partial_cmp(sa)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.last_accessed.cmp(&a.last_accessed))
            .then_with(|| a.id.cmp(&b.id))
    });
    scored
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{ItemKind, SourceKind};
    use chrono::Duration;

    fn item_with(access_count: u64, accessed_days_ago: i64) -> MemoryItem {
        let accessed = Utc::now() - Duration::days(accessed_days_ago);
        MemoryItem {
            id: format!("i-{access_count}-{accessed_days_ago}"),
            kind: ItemKind::Knowledge,
            summary: "s".into(),
            source: "sess".into(),
            source_kind: SourceKind::AgentAnalysis,
            created_at: accessed,
            last_accessed: accessed,
            access_count,
            reinforcement: 0.0,
            tags: vec![],
            category: "knowledge/general".into(),
            extra: Default::default(),
        }
    }

    #[test]
    fn fresh_heavily_accessed_relevant_item_scores_near_one() {
        let weights = SalienceWeights::default();
        let item = item_with(20, 0);
        let score = salience_score(&item, 1.0, &weights, Utc::now());
        assert!(score > 0.99, "got {score}");
    }

    #[test]
    fn recency_halves_at_the_half_life() {
        let weights = SalienceWeights::default();
        let now = Utc::now();
        let fresh = salience_score(&item_with(0, 0), 0.0, &weights, now);
        let aged = salience_score(&item_with(0, 7), 0.0, &weights, now);
        // Only the recency component is non-zero here.
        assert!((aged / fresh - 0.5).abs() < 0.01, "ratio {}", aged / fresh);
    }

    #[test]
    fn access_component_saturates_at_cap() {
        let weights = SalienceWeights::default();
        let now = Utc::now();
        let at_cap = salience_score(&item_with(20, 0), 0.0, &weights, now);
        let over_cap = salience_score(&item_with(200, 0), 0.0, &weights, now);
        assert!((at_cap - over_cap).abs() < 1e-9);
    }

    #[test]
    fn rank_breaks_ties_by_recency_then_id() {
        let newer = item_with(0, 1);
        let older = item_with(0, 5);
        let ranked = rank(vec![(older.clone(), 0.4), (newer.clone(), 0.4)]);
        assert_eq!(ranked[0].0.id, newer.id);

        let mut a = item_with(0, 3);
        a.id = "aaa".into();
        let mut b = item_with(0, 3);
        b.id = "bbb".into();
        b.last_accessed = a.last_accessed;
        let ranked = rank(vec![(b.clone(), 0.4), (a.clone(), 0.4)]);
        assert_eq!(ranked[0].0.id, "aaa");
    }
}
