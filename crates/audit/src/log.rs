//! The append-only audit log file.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use tokio::sync::Mutex;

use warden_domain::error::{Error, Result};
use warden_domain::trace::TraceEvent;

use crate::entry::{AuditEntry, AuditRecord, GENESIS};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Result of walking the chain from the beginning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainStatus {
    Valid { entries: u64 },
    Broken { index: u64, reason: String },
}

/// Filter for [`AuditLog::read`]. Empty filter returns everything.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub job_id: Option<String>,
    pub event_kind: Option<String>,
}

/// Cached writer position, recovered from the file tail on first use.
struct WriterState {
    next_entry_id: u64,
    last_hash: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// AuditLog
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Serialized append-only hash-chained log.
///
/// The async mutex linearizes concurrent appenders; the write itself is a
/// single newline-terminated line in append mode. A detected chain break
/// halts further writes until an operator clears it; the rest of the
/// system keeps running so the failure is not silenced.
pub struct AuditLog {
    path: PathBuf,
    state: Mutex<Option<WriterState>>,
    halted: AtomicBool,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: Mutex::new(None),
            halted: AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record, linking it to the chain. Returns the stamped
    /// entry. Write errors surface to the caller; the queue continues with
    /// subsequent entries.
    pub async fn append(&self, record: AuditRecord) -> Result<AuditEntry> {
        if self.halted.load(Ordering::Acquire) {
            return Err(Error::Integrity {
                index: 0,
                reason: "audit writes halted after chain verification failure".into(),
            });
        }

        let mut guard = self.state.lock().await;
        if guard.is_none() {
            *guard = Some(self.recover_state()?);
        }
        let state = guard.as_mut().expect("state initialized above");

        let mut entry = AuditEntry {
            entry_id: state.next_entry_id,
            job_id: record.job_id,
            event_kind: record.event_kind,
            timestamp: Utc::now().to_rfc3339(),
            provider: record.provider,
            tool_name: record.tool_name,
            parameters: record.parameters,
            result: record.result,
            previous_hash: state.last_hash.clone(),
            hash: String::new(),
        };
        entry.hash = entry.compute_hash();

        let line = serde_json::to_string(&entry)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;

        state.next_entry_id += 1;
        state.last_hash = entry.hash.clone();

        TraceEvent::AuditAppended {
            entry_id: entry.entry_id,
            event_kind: entry.event_kind.clone(),
        }
        .emit();

        Ok(entry)
    }

    /// Read entries matching the filter, in file order. A missing file is
    /// an empty log. Malformed lines are skipped.
    pub async fn read(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>> {
        let entries = self.load_entries()?;
        Ok(entries
            .into_iter()
            .filter(|e| {
                filter
                    .job_id
                    .as_ref()
                    .map_or(true, |j| &e.job_id == j)
                    && filter
                        .event_kind
                        .as_ref()
                        .map_or(true, |k| &e.event_kind == k)
            })
            .collect())
    }

    /// Walk the file from the beginning, re-computing every hash and
    /// checking every link. A missing file is a valid empty chain. On a
    /// break, further appends are halted until [`Self::clear_halt`].
    pub async fn verify_chain(&self) -> Result<ChainStatus> {
        if !self.path.exists() {
            return Ok(ChainStatus::Valid { entries: 0 });
        }

        let raw = std::fs::read_to_string(&self.path)?;
        let mut expected_previous = GENESIS.to_string();
        let mut index: u64 = 0;

        for line in raw.lines().filter(|l| !l.trim().is_empty()) {
            let entry: AuditEntry = match serde_json::from_str(line) {
                Ok(e) => e,
                Err(e) => {
                    return Ok(self.broken(index, format!("unparseable entry: {e}")));
                }
            };

            if entry.previous_hash != expected_previous {
                return Ok(self.broken(index, "previous-hash link mismatch".into()));
            }
            if entry.compute_hash() != entry.hash {
                return Ok(self.broken(index, "hash mismatch".into()));
            }

            expected_previous = entry.hash;
            index += 1;
        }

        Ok(ChainStatus::Valid { entries: index })
    }

    /// Operator intervention: resume appends after a verified repair.
    pub fn clear_halt(&self) {
        self.halted.store(false, Ordering::Release);
    }

    // ── Private ──────────────────────────────────────────────────────

    fn broken(&self, index: u64, reason: String) -> ChainStatus {
        self.halted.store(true, Ordering::Release);
        tracing::error!(index, reason = %reason, "audit chain verification failed");
        ChainStatus::Broken { index, reason }
    }

    /// Scan the existing file for the next entry id and last hash.
    fn recover_state(&self) -> Result<WriterState> {
        if !self.path.exists() {
            return Ok(WriterState {
                next_entry_id: 0,
                last_hash: GENESIS.to_string(),
            });
        }
        let entries = self.load_entries()?;
        match entries.last() {
            Some(last) => Ok(WriterState {
                next_entry_id: last.entry_id + 1,
                last_hash: last.hash.clone(),
            }),
            None => Ok(WriterState {
                next_entry_id: 0,
                last_hash: GENESIS.to_string(),
            }),
        }
    }

    fn load_entries(&self) -> Result<Vec<AuditEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(&self.path)?;
        let mut entries = Vec::new();
        for line in raw.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditEntry>(line) {
                Ok(e) => entries.push(e),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping malformed audit line");
                }
            }
        }
        Ok(entries)
    }
}
