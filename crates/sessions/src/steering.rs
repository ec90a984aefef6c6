//! Filesystem-backed steering mailboxes.
//!
//! An external operator drops guidance into a running task by writing a
//! message file under `steering/{job_id}/`; the execution loop polls the
//! mailbox between events and archives messages once injected. The
//! directory is the single source of truth: nothing in memory survives a
//! restart except a short-lived read cache.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use warden_domain::error::{Error, Result};

use crate::sanitize_id;

const ARCHIVE_DIR: &str = "archive";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SteeringMessage
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SteeringMessage {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

struct CachedPending {
    fetched_at: Instant,
    messages: Vec<SteeringMessage>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SteeringStore
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SteeringStore {
    dir: PathBuf,
    cache: Mutex<HashMap<String, CachedPending>>,
}

impl SteeringStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Write a new message into a job's mailbox (atomic: tmp + rename).
    /// Returns the generated message id.
    pub fn inject_message(&self, job_id: &str, text: &str) -> Result<String> {
        let message = SteeringMessage {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            text: text.to_owned(),
            source: None,
        };
        let job_dir = self.job_dir(job_id);
        std::fs::create_dir_all(&job_dir)?;
        let path = job_dir.join(format!("{}.json", message.id));
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(&message)?)?;
        std::fs::rename(&tmp, &path)?;

        self.cache.lock().remove(job_id);
        Ok(message.id)
    }

    /// All pending messages for a job, sorted by timestamp ascending.
    pub fn get_pending_messages(&self, job_id: &str) -> Result<Vec<SteeringMessage>> {
        let job_dir = self.job_dir(job_id);
        if !job_dir.exists() {
            return Ok(Vec::new());
        }
        let mut messages = Vec::new();
        for entry in std::fs::read_dir(&job_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !name.ends_with(".json") {
                continue;
            }
            let raw = std::fs::read_to_string(entry.path())?;
            match serde_json::from_str::<SteeringMessage>(&raw) {
                Ok(message) => messages.push(message),
                Err(e) => {
                    tracing::warn!(
                        path = %entry.path().display(),
                        error = %e,
                        "skipping malformed steering message"
                    );
                }
            }
        }
        messages.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        Ok(messages)
    }

    /// Memoized read: reuse the last result for up to `max_age`.
    /// Writes through this store invalidate the cache immediately.
    pub fn cached_get_pending_messages(
        &self,
        job_id: &str,
        max_age: Duration,
    ) -> Result<Vec<SteeringMessage>> {
        {
            let cache = self.cache.lock();
            if let Some(cached) = cache.get(job_id) {
                if cached.fetched_at.elapsed() <= max_age {
                    return Ok(cached.messages.clone());
                }
            }
        }
        let messages = self.get_pending_messages(job_id)?;
        self.cache.lock().insert(
            job_id.to_owned(),
            CachedPending {
                fetched_at: Instant::now(),
                messages: messages.clone(),
            },
        );
        Ok(messages)
    }

    /// Move a consumed message into the job's archive.
    pub fn archive_message(&self, job_id: &str, message_id: &str) -> Result<()> {
        let job_dir = self.job_dir(job_id);
        let from = job_dir.join(format!("{}.json", sanitize_id(message_id)));
        if !from.exists() {
            return Err(Error::Other(format!(
                "no pending steering message '{message_id}' for job '{job_id}'"
            )));
        }
        let archive = job_dir.join(ARCHIVE_DIR);
        std::fs::create_dir_all(&archive)?;
        std::fs::rename(&from, archive.join(format!("{}.json", sanitize_id(message_id))))?;
        self.cache.lock().remove(job_id);
        Ok(())
    }

    fn job_dir(&self, job_id: &str) -> PathBuf {
        self.dir.join(sanitize_id(job_id))
    }
}
