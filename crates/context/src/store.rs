//! Append-only observation block storage.
//!
//! One NDJSON file per session plus a shared `cross-session.jsonl`.
//! Malformed lines are skipped on load, never fatal. Session ids are
//! sanitized before they become file names.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use warden_domain::error::{Error, Result};

use crate::estimate_tokens;

const CROSS_SESSION_FILE: &str = "cross-session.jsonl";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ObservationBlock
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ObservationTier {
    Session,
    CrossSession,
}

/// A compressed text summary of a contiguous chunk of raw session events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationBlock {
    pub id: String,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub tier: ObservationTier,
    pub body: String,
    /// Inclusive-exclusive source-message index range.
    pub start: u64,
    pub end: u64,
    pub token_estimate: usize,
    /// Unknown fields survive read-modify-write cycles.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ObservationBlock {
    pub fn session(session_id: &str, body: String, start: u64, end: u64) -> Self {
        let token_estimate = estimate_tokens(&body);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_owned(),
            created_at: Utc::now(),
            tier: ObservationTier::Session,
            body,
            start,
            end,
            token_estimate,
            extra: Default::default(),
        }
    }

    pub fn cross_session(session_id: &str, body: String) -> Self {
        let token_estimate = estimate_tokens(&body);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_owned(),
            created_at: Utc::now(),
            tier: ObservationTier::CrossSession,
            body,
            start: 0,
            end: 0,
            token_estimate,
            extra: Default::default(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ObservationStore
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ObservationStore {
    dir: PathBuf,
}

impl ObservationStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Atomic single-line append to the block's file.
    pub fn append(&self, block: &ObservationBlock) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = match block.tier {
            ObservationTier::Session => self.session_path(&block.session_id)?,
            ObservationTier::CrossSession => self.dir.join(CROSS_SESSION_FILE),
        };
        let mut line = serde_json::to_string(block)?;
        line.push('\n');
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    pub fn load_session(&self, session_id: &str) -> Result<Vec<ObservationBlock>> {
        let path = self.session_path(session_id)?;
        self.load_file(&path)
    }

    /// Most recent `limit` cross-session blocks (all when `None`).
    pub fn load_cross_session(&self, limit: Option<usize>) -> Result<Vec<ObservationBlock>> {
        let mut blocks = self.load_file(&self.dir.join(CROSS_SESSION_FILE))?;
        if let Some(limit) = limit {
            let skip = blocks.len().saturating_sub(limit);
            blocks.drain(..skip);
        }
        Ok(blocks)
    }

    /// Concatenated session observation bodies.
    pub fn build_session_context(&self, session_id: &str) -> Result<String> {
        let blocks = self.load_session(session_id)?;
        Ok(join_bodies(&blocks))
    }

    pub fn build_cross_session_context(&self) -> Result<String> {
        let blocks = self.load_cross_session(None)?;
        Ok(join_bodies(&blocks))
    }

    pub fn session_token_count(&self, session_id: &str) -> Result<usize> {
        Ok(self
            .load_session(session_id)?
            .iter()
            .map(|b| b.token_estimate)
            .sum())
    }

    /// Delete all but the `keep_n` most recently modified session files.
    /// The cross-session file is never pruned.
    pub fn prune_old_sessions(&self, keep_n: usize) -> Result<usize> {
        if !self.dir.exists() {
            return Ok(0);
        }
        let mut sessions: Vec<(std::time::SystemTime, PathBuf)> = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name == CROSS_SESSION_FILE || !name.ends_with(".jsonl") {
                continue;
            }
            let modified = entry.metadata()?.modified()?;
            sessions.push((modified, entry.path()));
        }
        sessions.sort_by(|a, b| b.0.cmp(&a.0));

        let mut removed = 0;
        for (_, path) in sessions.into_iter().skip(keep_n) {
            std::fs::remove_file(&path)?;
            removed += 1;
        }
        Ok(removed)
    }

    // ── Private ──────────────────────────────────────────────────────

    fn session_path(&self, session_id: &str) -> Result<PathBuf> {
        let sanitized = sanitize_session_id(session_id)?;
        Ok(self.dir.join(format!("{sanitized}.jsonl")))
    }

    fn load_file(&self, path: &Path) -> Result<Vec<ObservationBlock>> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(path)?;
        let mut blocks = Vec::new();
        for line in raw.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ObservationBlock>(line) {
                Ok(block) => blocks.push(block),
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "skipping malformed observation line"
                    );
                }
            }
        }
        Ok(blocks)
    }
}

fn join_bodies(blocks: &[ObservationBlock]) -> String {
    blocks
        .iter()
        .map(|b| b.body.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Session ids become file names; keep them to a safe alphabet.
fn sanitize_session_id(session_id: &str) -> Result<String> {
    if session_id.is_empty() {
        return Err(Error::Other("empty session id".into()));
    }
    let sanitized: String = session_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    Ok(sanitized)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &tempfile::TempDir) -> ObservationStore {
        ObservationStore::new(dir.path().join("observations"))
    }

    #[test]
    fn append_and_load_session_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store
            .append(&ObservationBlock::session("s1", "first block".into(), 0, 5))
            .unwrap();
        store
            .append(&ObservationBlock::session("s1", "second block".into(), 5, 9))
            .unwrap();

        let blocks = store.load_session("s1").unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].start, 0);
        assert_eq!(blocks[1].end, 9);
        assert_eq!(
            store.build_session_context("s1").unwrap(),
            "first block\n\nsecond block"
        );
    }

    #[test]
    fn traversal_session_ids_are_neutralized() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store
            .append(&ObservationBlock::session("../../etc/passwd", "x".into(), 0, 1))
            .unwrap();
        // Nothing escaped the observations directory.
        assert!(dir.path().join("observations").exists());
        assert!(!dir.path().join("etc").exists());
        let blocks = store.load_session("../../etc/passwd").unwrap();
        assert_eq!(blocks.len(), 1);
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store
            .append(&ObservationBlock::session("s1", "good".into(), 0, 1))
            .unwrap();
        let path = dir.path().join("observations").join("s1.jsonl");
        let mut raw = std::fs::read_to_string(&path).unwrap();
        raw.push_str("{not json\n");
        std::fs::write(&path, raw).unwrap();
        store
            .append(&ObservationBlock::session("s1", "also good".into(), 1, 2))
            .unwrap();

        let blocks = store.load_session("s1").unwrap();
        assert_eq!(blocks.len(), 2);
    }

    #[test]
    fn cross_session_limit_returns_most_recent() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        for i in 0..5 {
            store
                .append(&ObservationBlock::cross_session("s1", format!("fact {i}")))
                .unwrap();
        }
        let recent = store.load_cross_session(Some(2)).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].body, "fact 3");
        assert_eq!(recent[1].body, "fact 4");
    }

    #[test]
    fn token_count_sums_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let block = ObservationBlock::session("s1", "a".repeat(40), 0, 1);
        let expected = block.token_estimate;
        store.append(&block).unwrap();
        assert_eq!(store.session_token_count("s1").unwrap(), expected);
        assert_eq!(store.session_token_count("missing").unwrap(), 0);
    }

    #[test]
    fn prune_keeps_most_recent_sessions_and_cross_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        for s in ["s1", "s2", "s3"] {
            store
                .append(&ObservationBlock::session(s, "x".into(), 0, 1))
                .unwrap();
        }
        store
            .append(&ObservationBlock::cross_session("s1", "kept".into()))
            .unwrap();

        let removed = store.prune_old_sessions(2).unwrap();
        assert_eq!(removed, 1);
        assert!(dir
            .path()
            .join("observations")
            .join(CROSS_SESSION_FILE)
            .exists());
    }
}
