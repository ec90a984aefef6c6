//! The unified memory facade.
//!
//! Tier 1: the long-term document, read-only to the agent (the only core
//! write is the consolidation ledger line). Tier 2: daily note files, one
//! per UTC calendar day, append-only. Tier 3: structured items behind the
//! BM25+ index and salience ranking.
//!
//! Context loading is progressive: `load_context` returns an index block
//! (never item bodies); `recall_memory` pulls item content on demand.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{Duration, NaiveDate, Utc};
use parking_lot::{Mutex, RwLock};

use warden_domain::config::MemoryConfig;
use warden_domain::error::{Error, Result};

use crate::gates::{check_save, SaveVerdict};
use crate::index::{SearchHit, SearchIndex};
use crate::item::{slugify, ItemDraft, ItemFilter, MemoryItem};
use crate::salience;
use crate::store::ItemStore;

const LONG_TERM_FILE: &str = "MEMORY.md";
const DAILY_DIR: &str = "daily";
const ARCHIVE_DIR: &str = "archive";
const ITEMS_DIR: &str = "items";
const CATEGORIES_DIR: &str = "categories";
const INDEX_FILE: &str = "index/index.json";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Index summary
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Lightweight counts shown in the progressive context block. Computed
/// from directory listings and category files, without opening item files.
#[derive(Debug, Clone, Default)]
pub struct MemoryIndexSummary {
    pub item_count: usize,
    pub categories: Vec<String>,
    pub daily_note_count: usize,
    pub earliest_daily: Option<NaiveDate>,
}

impl MemoryIndexSummary {
    /// The one-line form injected into the system prompt.
    pub fn summary_line(&self) -> String {
        let categories = if self.categories.is_empty() {
            "none".to_string()
        } else {
            self.categories.join(", ")
        };
        let daily = match self.earliest_daily {
            Some(date) => format!("; daily notes available since {date}"),
            None => String::new(),
        };
        format!(
            "[MEMORY] {} items, {} categories: {}{}; use memory_search / recall_context / memory_save",
            self.item_count,
            self.categories.len(),
            categories,
            daily,
        )
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// MemoryManager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct MemoryManager {
    memory_dir: PathBuf,
    store: ItemStore,
    config: MemoryConfig,
    index: RwLock<Option<SearchIndex>>,
    index_summary: Mutex<Option<MemoryIndexSummary>>,
    session_saves: Mutex<HashMap<String, u32>>,
}

impl MemoryManager {
    pub fn new(memory_dir: impl Into<PathBuf>, config: MemoryConfig) -> Self {
        let memory_dir = memory_dir.into();
        let store = ItemStore::new(memory_dir.join(ITEMS_DIR));
        Self {
            memory_dir,
            store,
            config,
            index: RwLock::new(None),
            index_summary: Mutex::new(None),
            session_saves: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &ItemStore {
        &self.store
    }

    // ── Progressive context ────────────────────────────────────────

    /// The lightweight context block: long-term document body plus the
    /// `[MEMORY]` summary line. Item content is never dumped here.
    pub fn load_context(&self) -> Result<String> {
        let mut out = String::new();
        if let Some(doc) = self.read_long_term()? {
            out.push_str(&doc);
            if !out.ends_with('\n') {
                out.push('\n');
            }
        }
        out.push_str(&self.memory_index()?.summary_line());
        out.push('\n');
        Ok(out)
    }

    /// Counts for the index block, cached until the next write.
    pub fn memory_index(&self) -> Result<MemoryIndexSummary> {
        if let Some(cached) = self.index_summary.lock().clone() {
            return Ok(cached);
        }

        let item_count = self.store.count()?;
        let mut categories = self.list_categories()?;
        categories.sort();

        let mut daily_dates = self.daily_dates()?;
        daily_dates.sort();

        let summary = MemoryIndexSummary {
            item_count,
            categories,
            daily_note_count: daily_dates.len(),
            earliest_daily: daily_dates.first().copied(),
        };
        *self.index_summary.lock() = Some(summary.clone());
        Ok(summary)
    }

    // ── On-demand recall ───────────────────────────────────────────

    /// Salience-ranked recall: BM25+ relevance composed with access and
    /// recency. Returns up to `limit` items with their scores.
    pub fn recall_memory(&self, query: &str, limit: usize) -> Result<Vec<(MemoryItem, f64)>> {
        let hits = self.with_index(|index| index.search_normalized(query))?;
        let relevance: HashMap<String, f64> =
            hits.into_iter().map(|h| (h.id, h.score)).collect();

        let now = Utc::now();
        let mut scored = Vec::new();
        for id in relevance.keys() {
            let item = self.store.peek(id)?;
            let score = salience::salience_score(
                &item,
                relevance[id],
                &self.config.salience,
                now,
            );
            scored.push((item, score));
        }
        let mut ranked = salience::rank(scored);
        ranked.truncate(limit);

        // Recall is a read: count the access on everything returned.
        for (item, _) in &mut ranked {
            *item = self.store.get(&item.id)?;
        }
        Ok(ranked)
    }

    /// Raw BM25+ search, no salience composition.
    pub fn search_items(&self, query: &str) -> Result<Vec<MemoryItem>> {
        let hits = self.search_items_with_scores(query)?;
        Ok(hits.into_iter().map(|(item, _)| item).collect())
    }

    pub fn search_items_with_scores(&self, query: &str) -> Result<Vec<(MemoryItem, f64)>> {
        let hits: Vec<SearchHit> = self.with_index(|index| index.search(query))?;
        let mut out = Vec::new();
        for hit in hits {
            out.push((self.store.peek(&hit.id)?, hit.score));
        }
        Ok(out)
    }

    /// The N most recent daily note bodies, newest first.
    pub fn recall_daily_notes(&self, days: usize) -> Result<Vec<String>> {
        let mut dates = self.daily_dates()?;
        dates.sort();
        dates.reverse();
        let mut out = Vec::new();
        for date in dates.into_iter().take(days) {
            let path = self.daily_path(date);
            out.push(std::fs::read_to_string(path)?);
        }
        Ok(out)
    }

    /// The legacy full dump: all three tiers with content. Retained for
    /// tests and batch use.
    pub fn load_full_context(&self) -> Result<String> {
        let mut out = String::new();
        if let Some(doc) = self.read_long_term()? {
            out.push_str("# Long-term\n");
            out.push_str(&doc);
            out.push('\n');
        }
        let notes = self.recall_daily_notes(usize::MAX)?;
        if !notes.is_empty() {
            out.push_str("# Daily\n");
            for note in notes {
                out.push_str(&note);
                out.push('\n');
            }
        }
        let items = self.store.list(&ItemFilter::default())?;
        if !items.is_empty() {
            out.push_str("# Items\n");
            for item in items {
                out.push_str(&format!(
                    "- [{}] {} ({})\n",
                    item.kind.as_str(),
                    item.summary,
                    item.category
                ));
            }
        }
        Ok(out)
    }

    // ── Write side ─────────────────────────────────────────────────

    /// Append to today's (UTC) daily note, creating the file if missing.
    pub fn append_daily_note(&self, text: &str) -> Result<()> {
        let today = Utc::now().date_naive();
        let path = self.daily_path(today);
        std::fs::create_dir_all(self.daily_dir())?;
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        writeln!(file, "{text}")?;
        self.invalidate_summary();
        Ok(())
    }

    /// Create a structured item directly (reflector and trusted callers).
    pub fn create_item(&self, draft: ItemDraft) -> Result<MemoryItem> {
        let item = self.store.create(draft)?;
        self.record_category(&item.category)?;
        if let Some(index) = self.index.write().as_mut() {
            index.add(&item);
        }
        self.invalidate_summary();
        self.persist_index()?;
        Ok(item)
    }

    /// Agent-initiated save: run the validation pipeline first.
    pub fn save_validated(
        &self,
        session_id: &str,
        draft: ItemDraft,
    ) -> Result<SaveVerdict> {
        let existing = self.store.list(&ItemFilter::default())?;
        let saves = *self
            .session_saves
            .lock()
            .get(session_id)
            .unwrap_or(&0);
        let verdict = check_save(
            &draft.summary,
            &draft.tags,
            &existing,
            saves,
            &self.config.gates,
        );
        if verdict.is_accepted() {
            self.create_item(draft)?;
            *self
                .session_saves
                .lock()
                .entry(session_id.to_owned())
                .or_insert(0) += 1;
        }
        Ok(verdict)
    }

    /// Delete an item and invalidate the index.
    pub fn forget_item(&self, id: &str) -> Result<bool> {
        let existed = self.store.delete(id)?;
        if existed {
            if let Some(index) = self.index.write().as_mut() {
                index.remove(id);
            }
            self.invalidate_summary();
            self.persist_index()?;
        }
        Ok(existed)
    }

    /// Move daily notes older than the threshold into `archive/` and
    /// append a ledger line to the long-term document, the only write
    /// the core ever makes to it. Idempotent for a given day set.
    pub fn consolidate_daily_notes(&self, older_than_days: i64) -> Result<usize> {
        let cutoff = Utc::now().date_naive() - Duration::days(older_than_days);
        let archive = self.daily_dir().join(ARCHIVE_DIR);

        let mut moved = 0usize;
        for date in self.daily_dates()? {
            if date < cutoff {
                std::fs::create_dir_all(&archive)?;
                let from = self.daily_path(date);
                let to = archive.join(format!("{date}.md"));
                std::fs::rename(&from, &to)?;
                moved += 1;
            }
        }

        if moved > 0 {
            use std::io::Write;
            std::fs::create_dir_all(&self.memory_dir)?;
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.long_term_path())?;
            writeln!(
                file,
                "Archived {moved} notes on {}",
                Utc::now().date_naive()
            )?;
            self.invalidate_summary();
        }
        Ok(moved)
    }

    /// Rebuild the index from the items directory and persist it.
    pub fn rebuild_index(&self) -> Result<()> {
        let items = self.store.list(&ItemFilter::default())?;
        let index = SearchIndex::build(&items);
        index.save(&self.memory_dir.join(INDEX_FILE))?;
        *self.index.write() = Some(index);
        Ok(())
    }

    // ── Paths ──────────────────────────────────────────────────────

    pub fn long_term_path(&self) -> PathBuf {
        self.memory_dir.join(LONG_TERM_FILE)
    }

    fn daily_dir(&self) -> PathBuf {
        self.memory_dir.join(DAILY_DIR)
    }

    fn daily_path(&self, date: NaiveDate) -> PathBuf {
        self.daily_dir().join(format!("{date}.md"))
    }

    // ── Private ──────────────────────────────────────────────────────

    fn read_long_term(&self) -> Result<Option<String>> {
        match std::fs::read_to_string(self.long_term_path()) {
            Ok(body) => Ok(Some(body)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Run a closure against the index, loading the serialized copy or
    /// rebuilding from the items directory on first use.
    fn with_index<T>(&self, f: impl FnOnce(&SearchIndex) -> T) -> Result<T> {
        {
            let guard = self.index.read();
            if let Some(index) = guard.as_ref() {
                return Ok(f(index));
            }
        }

        let index_path = self.memory_dir.join(INDEX_FILE);
        let index = match SearchIndex::load(&index_path) {
            Some(index) if index.doc_count() == self.store.count()? => index,
            _ => {
                let items = self.store.list(&ItemFilter::default())?;
                let index = SearchIndex::build(&items);
                index.save(&index_path)?;
                index
            }
        };
        let mut guard = self.index.write();
        let result = f(&index);
        *guard = Some(index);
        Ok(result)
    }

    fn persist_index(&self) -> Result<()> {
        if let Some(index) = self.index.read().as_ref() {
            index.save(&self.memory_dir.join(INDEX_FILE))?;
        }
        Ok(())
    }

    fn invalidate_summary(&self) {
        *self.index_summary.lock() = None;
    }

    fn daily_dates(&self) -> Result<Vec<NaiveDate>> {
        let dir = self.daily_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut dates = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(stem) = name.strip_suffix(".md") {
                if let Ok(date) = stem.parse::<NaiveDate>() {
                    dates.push(date);
                }
            }
        }
        Ok(dates)
    }

    /// Track category counts as side files so the index summary never has
    /// to open item files.
    fn record_category(&self, category: &str) -> Result<()> {
        let dir = self.memory_dir.join(CATEGORIES_DIR);
        std::fs::create_dir_all(&dir)?;
        let slug = slugify(category);
        let path = dir.join(format!("{slug}.json"));
        let mut record: serde_json::Value = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|_| serde_json::json!({})),
            Err(_) => serde_json::json!({}),
        };
        record["name"] = serde_json::json!(category);
        let count = record["count"].as_u64().unwrap_or(0) + 1;
        record["count"] = serde_json::json!(count);
        record["updated_at"] = serde_json::json!(Utc::now().to_rfc3339());
        std::fs::write(&path, serde_json::to_string_pretty(&record)?)
            .map_err(Error::Io)?;
        Ok(())
    }

    fn list_categories(&self) -> Result<Vec<String>> {
        let dir = self.memory_dir.join(CATEGORIES_DIR);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut categories = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let raw = std::fs::read_to_string(entry.path())?;
            if let Ok(record) = serde_json::from_str::<serde_json::Value>(&raw) {
                if let Some(name) = record["name"].as_str() {
                    categories.push(name.to_owned());
                }
            }
        }
        Ok(categories)
    }
}
