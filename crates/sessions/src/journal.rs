//! Append-only per-job event journals.
//!
//! Each job gets a `<job_id>.jsonl` file under the sessions directory.
//! Writes go through a buffered writer: events land in an in-memory
//! buffer, a background task flushes on a cadence, and a hard cap bounds
//! the buffer when the disk keeps failing (oldest events drop first).
//! `close()` joins the flush task and performs the final flush; skipping
//! it would lose tail events.

use std::collections::VecDeque;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use warden_domain::config::JournalConfig;
use warden_domain::error::Result;
use warden_domain::event::{AgentEvent, SessionEvent};
use warden_domain::trace::TraceEvent;

use crate::sanitize_id;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Summaries
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Running,
    Completed,
    Failed,
    Unknown,
}

/// One row of `list_sessions()`, derived from a journal file's last line.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub job_id: String,
    pub event_count: usize,
    pub last_activity: Option<DateTime<Utc>>,
    pub status: SessionStatus,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// JournalStore
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Factory and read surface over the sessions directory.
pub struct JournalStore {
    dir: PathBuf,
    config: JournalConfig,
}

impl JournalStore {
    pub fn new(dir: impl Into<PathBuf>, config: JournalConfig) -> Self {
        Self {
            dir: dir.into(),
            config,
        }
    }

    /// Open the buffered writer for one job.
    pub fn open(&self, job_id: &str) -> SessionJournal {
        SessionJournal::open(&self.dir, job_id, self.config.clone())
    }

    /// Replay a job's journal. Malformed lines are skipped.
    pub fn get_history(&self, job_id: &str) -> Result<Vec<SessionEvent>> {
        let path = self.dir.join(format!("{}.jsonl", sanitize_id(job_id)));
        read_events(&path)
    }

    /// Summaries of every journal on disk, status derived from the last
    /// line of each.
    pub fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut summaries = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let Some(job_id) = name.strip_suffix(".jsonl") else {
                continue;
            };
            let raw = std::fs::read_to_string(entry.path())?;
            let lines: Vec<&str> = raw.lines().filter(|l| !l.trim().is_empty()).collect();
            let last = lines.last().copied().unwrap_or_default();
            let (status, last_activity) = match serde_json::from_str::<SessionEvent>(last) {
                Ok(event) => {
                    let status = match &event.payload {
                        AgentEvent::TaskEnd { error: Some(_), .. } => SessionStatus::Failed,
                        AgentEvent::TaskEnd { .. } => SessionStatus::Completed,
                        _ => SessionStatus::Running,
                    };
                    (status, Some(event.timestamp))
                }
                Err(_) => (SessionStatus::Unknown, None),
            };
            summaries.push(SessionSummary {
                job_id: job_id.to_owned(),
                event_count: lines.len(),
                last_activity,
                status,
            });
        }
        summaries.sort_by(|a, b| a.job_id.cmp(&b.job_id));
        Ok(summaries)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SessionJournal: the buffered writer
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Buffer {
    events: VecDeque<SessionEvent>,
    cap: usize,
    dropped: u64,
}

impl Buffer {
    fn push(&mut self, event: SessionEvent) {
        while self.events.len() >= self.cap {
            self.events.pop_front();
            self.dropped += 1;
        }
        self.events.push_back(event);
    }

    /// Return events to the buffer front after a failed write, newest
    /// buffered content wins when the cap forces drops.
    fn restore(&mut self, mut events: VecDeque<SessionEvent>) {
        while events.len() + self.events.len() > self.cap {
            events.pop_front();
            self.dropped += 1;
        }
        for event in events.into_iter().rev() {
            self.events.push_front(event);
        }
    }
}

pub struct SessionJournal {
    job_id: String,
    path: PathBuf,
    buffer: Arc<Mutex<Buffer>>,
    shutdown: CancellationToken,
    flush_task: Option<tokio::task::JoinHandle<()>>,
}

impl SessionJournal {
    fn open(dir: &Path, job_id: &str, config: JournalConfig) -> Self {
        let path = dir.join(format!("{}.jsonl", sanitize_id(job_id)));
        let buffer = Arc::new(Mutex::new(Buffer {
            events: VecDeque::new(),
            cap: config.buffer_cap.max(1),
            dropped: 0,
        }));
        let shutdown = CancellationToken::new();

        let flush_task = {
            let buffer = buffer.clone();
            let path = path.clone();
            let token = shutdown.clone();
            let job_id = job_id.to_owned();
            let interval = std::time::Duration::from_millis(config.flush_interval_ms.max(1));
            Some(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            flush_buffer(&path, &buffer, &job_id);
                        }
                        _ = token.cancelled() => break,
                    }
                }
            }))
        };

        Self {
            job_id: job_id.to_owned(),
            path,
            buffer,
            shutdown,
            flush_task,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Buffer one event. Never blocks on disk.
    pub fn append(&self, event: SessionEvent) {
        self.buffer.lock().push(event);
    }

    /// Force a flush now (tests and checkpoints).
    pub fn flush(&self) {
        flush_buffer(&self.path, &self.buffer, &self.job_id);
    }

    /// Events dropped so far by the buffer cap.
    pub fn dropped(&self) -> u64 {
        self.buffer.lock().dropped
    }

    /// Stop the background flusher, wait for any in-flight flush, and
    /// perform the final flush.
    pub async fn close(mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.flush_task.take() {
            let _ = task.await;
        }
        flush_buffer(&self.path, &self.buffer, &self.job_id);
    }
}

impl Drop for SessionJournal {
    fn drop(&mut self) {
        // Belt and braces for paths that never called close(): stop the
        // flusher and write what we can synchronously.
        self.shutdown.cancel();
        flush_buffer(&self.path, &self.buffer, &self.job_id);
    }
}

/// Drain the buffer and append to disk. On failure, events go back to the
/// buffer (subject to the cap) for the next attempt.
fn flush_buffer(path: &Path, buffer: &Arc<Mutex<Buffer>>, job_id: &str) {
    let drained: VecDeque<SessionEvent> = {
        let mut guard = buffer.lock();
        if guard.events.is_empty() {
            return;
        }
        std::mem::take(&mut guard.events)
    };

    let mut payload = String::new();
    for event in &drained {
        match serde_json::to_string(event) {
            Ok(line) => {
                payload.push_str(&line);
                payload.push('\n');
            }
            Err(e) => {
                tracing::warn!(job_id, error = %e, "dropping unserializable event");
            }
        }
    }

    let result = (|| -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        file.write_all(payload.as_bytes())
    })();

    match result {
        Ok(()) => {
            TraceEvent::JournalFlushed {
                job_id: job_id.to_owned(),
                events: drained.len(),
            }
            .emit();
        }
        Err(e) => {
            tracing::warn!(job_id, error = %e, "journal flush failed; re-buffering");
            buffer.lock().restore(drained);
        }
    }
}

fn read_events(path: &Path) -> Result<Vec<SessionEvent>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = std::fs::read_to_string(path)?;
    let mut events = Vec::new();
    for line in raw.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<SessionEvent>(line) {
            Ok(event) => events.push(event),
            Err(e) => {
                tracing::warn!(error = %e, "skipping malformed journal line");
            }
        }
    }
    Ok(events)
}
