//! File-per-item storage.
//!
//! Each item lives at `items/{id}.json`, written atomically (write tmp,
//! rename). A read-through cache avoids re-parsing hot items; the cache is
//! owned by the store and never shared across managers.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::RwLock;

use warden_domain::error::{Error, Result};

use crate::item::{ItemDraft, ItemFilter, MemoryItem};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ItemStore
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ItemStore {
    items_dir: PathBuf,
    cache: RwLock<HashMap<String, MemoryItem>>,
}

impl ItemStore {
    pub fn new(items_dir: impl Into<PathBuf>) -> Self {
        Self {
            items_dir: items_dir.into(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn items_dir(&self) -> &Path {
        &self.items_dir
    }

    /// Create an item: stamp id, timestamps, and zero counters.
    pub fn create(&self, draft: ItemDraft) -> Result<MemoryItem> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let category = draft
            .category
            .clone()
            .unwrap_or_else(|| draft.derived_category());
        let item = MemoryItem {
            id: id.clone(),
            kind: draft.kind,
            summary: draft.summary,
            source: draft.source,
            source_kind: draft.source_kind,
            created_at: now,
            last_accessed: now,
            access_count: 0,
            reinforcement: 0.0,
            tags: draft.tags,
            category,
            extra: Default::default(),
        };
        self.persist(&item)?;
        self.cache.write().insert(id, item.clone());
        Ok(item)
    }

    /// Read an item, counting the access: increments `access_count`,
    /// advances `last_accessed`, and writes the item back.
    pub fn get(&self, id: &str) -> Result<MemoryItem> {
        let mut item = self.peek(id)?;
        item.access_count += 1;
        item.last_accessed = Utc::now();
        self.persist(&item)?;
        self.cache.write().insert(item.id.clone(), item.clone());
        Ok(item)
    }

    /// Read an item without counting the access (internal ranking reads).
    pub fn peek(&self, id: &str) -> Result<MemoryItem> {
        validate_id(id)?;
        if let Some(item) = self.cache.read().get(id) {
            return Ok(item.clone());
        }
        let path = self.item_path(id);
        let raw = std::fs::read_to_string(&path)
            .map_err(|_| Error::Memory(format!("no item with id '{id}'")))?;
        let item: MemoryItem = serde_json::from_str(&raw)?;
        self.cache.write().insert(id.to_owned(), item.clone());
        Ok(item)
    }

    /// Apply a partial update. The id is immutable; timestamps of the
    /// access counters are untouched.
    pub fn update(&self, id: &str, patch: impl FnOnce(&mut MemoryItem)) -> Result<MemoryItem> {
        let mut item = self.peek(id)?;
        let original_id = item.id.clone();
        let created_at = item.created_at;
        patch(&mut item);
        item.id = original_id;
        item.created_at = created_at;
        self.persist(&item)?;
        self.cache.write().insert(item.id.clone(), item.clone());
        Ok(item)
    }

    /// Delete an item. Returns false when it did not exist.
    pub fn delete(&self, id: &str) -> Result<bool> {
        validate_id(id)?;
        self.cache.write().remove(id);
        let path = self.item_path(id);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// List items matching the filter. Items not yet cached are read from
    /// disk on demand.
    pub fn list(&self, filter: &ItemFilter) -> Result<Vec<MemoryItem>> {
        let mut items = Vec::new();
        for id in self.list_ids()? {
            match self.peek(&id) {
                Ok(item) => {
                    if filter.matches(&item) {
                        items.push(item);
                    }
                }
                Err(e) => {
                    tracing::warn!(id = %id, error = %e, "skipping unreadable item");
                }
            }
        }
        items.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(items)
    }

    /// All item ids, from the directory listing (no file contents read).
    pub fn list_ids(&self) -> Result<Vec<String>> {
        if !self.items_dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&self.items_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(id) = name.strip_suffix(".json") {
                ids.push(id.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    pub fn count(&self) -> Result<usize> {
        Ok(self.list_ids()?.len())
    }

    // ── Private ──────────────────────────────────────────────────────

    fn item_path(&self, id: &str) -> PathBuf {
        self.items_dir.join(format!("{id}.json"))
    }

    fn persist(&self, item: &MemoryItem) -> Result<()> {
        validate_id(&item.id)?;
        std::fs::create_dir_all(&self.items_dir)?;
        let path = self.item_path(&item.id);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(item)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}

/// Ids become file names; refuse anything that could traverse.
fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() || id.contains('/') || id.contains('\\') || id.contains("..") {
        return Err(Error::Memory(format!("invalid item id '{id}'")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{ItemKind, SourceKind};

    fn store_in(dir: &tempfile::TempDir) -> ItemStore {
        ItemStore::new(dir.path().join("items"))
    }

    fn draft(summary: &str) -> ItemDraft {
        ItemDraft::new(ItemKind::Knowledge, summary)
            .with_source("sess-1", SourceKind::AgentAnalysis)
            .with_tags(vec!["test".into()])
    }

    #[test]
    fn create_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let created = store.create(draft("Zora uses pino for logging")).unwrap();
        assert_eq!(created.access_count, 0);
        assert_eq!(created.category, "knowledge/test");

        let read = store.peek(&created.id).unwrap();
        assert_eq!(read.summary, created.summary);
        assert_eq!(read.created_at, created.created_at);
    }

    #[test]
    fn get_counts_accesses_and_persists_them() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let created = store.create(draft("fact")).unwrap();

        let first = store.get(&created.id).unwrap();
        assert_eq!(first.access_count, 1);
        assert!(first.last_accessed >= created.last_accessed);

        // A fresh store (cold cache) must see the persisted counter.
        let cold = store_in(&dir);
        let second = cold.get(&created.id).unwrap();
        assert_eq!(second.access_count, 2);
    }

    #[test]
    fn update_cannot_change_id_or_created_at() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let created = store.create(draft("fact")).unwrap();

        let updated = store
            .update(&created.id, |item| {
                item.id = "hijacked".into();
                item.summary = "new summary".into();
                item.reinforcement = 1.5;
            })
            .unwrap();
        assert_eq!(updated.id, created.id);
        assert_eq!(updated.created_at, created.created_at);
        assert_eq!(updated.summary, "new summary");
    }

    #[test]
    fn delete_is_reported_and_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let created = store.create(draft("fact")).unwrap();
        assert!(store.delete(&created.id).unwrap());
        assert!(!store.delete(&created.id).unwrap());
        assert!(store.peek(&created.id).is_err());
    }

    #[test]
    fn traversal_ids_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert!(store.peek("../escape").is_err());
        assert!(store.peek("a/b").is_err());
        assert!(store.delete("..").is_err());
    }

    #[test]
    fn list_applies_filters() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.create(draft("a")).unwrap();
        store
            .create(
                ItemDraft::new(ItemKind::Profile, "b")
                    .with_source("sess-1", SourceKind::UserInstruction)
                    .with_tags(vec!["prefs".into()]),
            )
            .unwrap();

        let all = store.list(&ItemFilter::default()).unwrap();
        assert_eq!(all.len(), 2);

        let profiles = store
            .list(&ItemFilter {
                kind: Some(ItemKind::Profile),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].summary, "b");
    }
}
