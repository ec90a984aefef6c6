//! The three-tier rolling context window.
//!
//! Ingestion is non-blocking; `tick()` polls the token thresholds and
//! decides between synchronous compression (the safety valve above the
//! hard ceiling), background compression (above the soft threshold), and
//! speculative pre-computation (above 70% of the soft threshold).
//!
//! At most one condense job is in flight at a time. A job's result is
//! committed only while its snapshot still matches the head of the
//! working queue and the session tier has not changed since the snapshot;
//! anything stale is discarded so block ranges stay contiguous and
//! non-overlapping. Messages are never removed before a block exists, so
//! a failed condense call leaves the working tier intact.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

use warden_domain::config::ContextConfig;
use warden_domain::error::Result;
use warden_domain::event::SessionEvent;
use warden_domain::trace::TraceEvent;

use crate::condenser::Condenser;
use crate::estimate_tokens;
use crate::store::{ObservationBlock, ObservationStore};

/// Residual working messages above this count are compressed at flush.
const FLUSH_RESIDUAL_MIN: usize = 5;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Internal state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct WorkingMessage {
    index: u64,
    event: SessionEvent,
    tokens: usize,
}

/// A completed pre-computed block waiting for a threshold to activate it.
struct HeldBlock {
    start: u64,
    end: u64,
    epoch: u64,
    body: String,
}

/// A condense job running on a background task.
struct InflightJob {
    start: u64,
    end: u64,
    epoch: u64,
    /// Background jobs commit on completion; pre-compute jobs are held
    /// until a threshold activates them.
    auto_activate: bool,
    task: JoinHandle<Result<String>>,
}

struct Inner {
    working: VecDeque<WorkingMessage>,
    working_tokens: usize,
    next_index: u64,
    session_blocks: Vec<ObservationBlock>,
    /// Bumped whenever the session tier changes; guards stale commits.
    epoch: u64,
    held: Option<HeldBlock>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Snapshot types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default)]
pub struct CompressorStats {
    pub working_messages: usize,
    pub working_tokens: usize,
    pub session_blocks: usize,
    pub session_tokens: usize,
    pub ingested_messages: u64,
}

/// A non-blocking view of all three tiers.
#[derive(Debug, Clone)]
pub struct ContextSnapshot {
    pub session_observations: String,
    pub cross_session_context: String,
    pub working_messages: Vec<SessionEvent>,
    pub stats: CompressorStats,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ContextCompressor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ContextCompressor {
    config: ContextConfig,
    session_id: String,
    store: Arc<ObservationStore>,
    condenser: Arc<dyn Condenser>,
    inner: Mutex<Inner>,
    inflight: AsyncMutex<Option<InflightJob>>,
}

impl ContextCompressor {
    /// Create a compressor for one session, resuming block ranges from any
    /// previously persisted session blocks.
    pub fn new(
        config: ContextConfig,
        session_id: impl Into<String>,
        store: Arc<ObservationStore>,
        condenser: Arc<dyn Condenser>,
    ) -> Self {
        let session_id = session_id.into();
        let session_blocks = store.load_session(&session_id).unwrap_or_default();
        let next_index = session_blocks.last().map(|b| b.end).unwrap_or(0);
        Self {
            config,
            session_id,
            store,
            condenser,
            inner: Mutex::new(Inner {
                working: VecDeque::new(),
                working_tokens: 0,
                next_index,
                session_blocks,
                epoch: 0,
                held: None,
            }),
            inflight: AsyncMutex::new(None),
        }
    }

    // ── Ingestion ──────────────────────────────────────────────────

    /// Append one event to the working tier. Never blocks.
    pub fn ingest(&self, event: SessionEvent) {
        let tokens = estimate_tokens(&event.text_form()).max(1);
        let mut inner = self.inner.lock();
        let index = inner.next_index;
        inner.next_index += 1;
        inner.working.push_back(WorkingMessage {
            index,
            event,
            tokens,
        });
        inner.working_tokens += tokens;
    }

    // ── Threshold polling ──────────────────────────────────────────

    /// Poll the thresholds and compress as needed. Only the hard-ceiling
    /// path blocks the caller on the condense call.
    pub async fn tick(&self) -> Result<()> {
        if self.config.chunk_size == 0 {
            return Ok(());
        }

        // Land any finished background work first.
        self.settle_inflight(false).await;

        let tokens = self.inner.lock().working_tokens;

        if tokens > self.config.block_after_tokens {
            // Safety valve: settle everything, then compress synchronously
            // until we are back under the ceiling.
            self.settle_inflight(true).await;
            self.activate_held();
            loop {
                let over = self.inner.lock().working_tokens > self.config.block_after_tokens;
                if !over || !self.compress_now(self.config.chunk_size).await? {
                    break;
                }
            }
        } else if tokens >= self.config.soft_threshold_tokens {
            if !self.activate_held() {
                let idle = self.inflight.lock().await.is_none();
                if idle {
                    self.start_job(true).await;
                }
            }
        } else if self.config.async_buffer
            && tokens * 10 > self.config.soft_threshold_tokens * 7
        {
            let chunk_ready = {
                let inner = self.inner.lock();
                inner.working.len() >= self.config.chunk_size && inner.held.is_none()
            };
            if chunk_ready {
                let idle = self.inflight.lock().await.is_none();
                if idle {
                    self.start_job(false).await;
                }
            }
        }

        Ok(())
    }

    /// Settle in-flight work, activate anything ready, compress the
    /// residual working tier, and return once every pending promise has
    /// resolved. The only await point callers need at session end.
    pub async fn flush(&self) -> Result<()> {
        self.settle_inflight(true).await;
        self.activate_held();

        if self.config.chunk_size > 0 {
            let residual = self.inner.lock().working.len();
            if residual > FLUSH_RESIDUAL_MIN {
                self.compress_now(residual).await?;
            }
        }
        Ok(())
    }

    // ── Snapshots ──────────────────────────────────────────────────

    /// A non-blocking view of all three tiers, each clamped to its
    /// configured budget (newest content wins).
    pub fn build_context(&self) -> ContextSnapshot {
        let cross_session_context = clamp_to_tokens(
            &self
                .store
                .build_cross_session_context()
                .unwrap_or_default(),
            self.config.cross_session_max_tokens,
        );
        let inner = self.inner.lock();
        let session_observations = clamp_to_tokens(
            &inner
                .session_blocks
                .iter()
                .map(|b| b.body.as_str())
                .collect::<Vec<_>>()
                .join("\n\n"),
            self.config.session_tier_max_tokens,
        );
        ContextSnapshot {
            session_observations,
            cross_session_context,
            working_messages: inner.working.iter().map(|m| m.event.clone()).collect(),
            stats: CompressorStats {
                working_messages: inner.working.len(),
                working_tokens: inner.working_tokens,
                session_blocks: inner.session_blocks.len(),
                session_tokens: inner.session_blocks.iter().map(|b| b.token_estimate).sum(),
                ingested_messages: inner.next_index,
            },
        }
    }

    pub fn stats(&self) -> CompressorStats {
        self.build_context().stats
    }

    // ── Compression machinery ──────────────────────────────────────

    /// Snapshot the oldest `chunk_len` messages without removing them.
    fn snapshot_chunk(&self, chunk_len: usize) -> Option<(u64, u64, u64, String)> {
        let inner = self.inner.lock();
        let take = chunk_len.min(inner.working.len());
        if take == 0 {
            return None;
        }
        let start = inner.working.front().map(|m| m.index)?;
        let end = start + take as u64;
        let serialized = inner
            .working
            .iter()
            .take(take)
            .map(|m| serde_json::to_string(&m.event).unwrap_or_default())
            .collect::<Vec<_>>()
            .join("\n");
        let existing = inner
            .session_blocks
            .iter()
            .map(|b| b.body.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        Some((start, end, inner.epoch, build_prompt(&existing, &serialized)))
    }

    /// Spawn a condense job for the oldest chunk.
    async fn start_job(&self, auto_activate: bool) {
        let Some((start, end, epoch, prompt)) = self.snapshot_chunk(self.config.chunk_size)
        else {
            return;
        };
        let condenser = self.condenser.clone();
        let task = tokio::spawn(async move { condenser.condense(&prompt).await });
        *self.inflight.lock().await = Some(InflightJob {
            start,
            end,
            epoch,
            auto_activate,
            task,
        });
    }

    /// Collect a finished (or, when `block`, any) in-flight job. Completed
    /// background jobs commit immediately; completed pre-compute jobs move
    /// to the held slot. Failures are logged and dropped; the messages
    /// were never removed, so nothing needs restoring.
    async fn settle_inflight(&self, block: bool) {
        let mut slot = self.inflight.lock().await;
        let ready = match slot.as_ref() {
            Some(job) => block || job.task.is_finished(),
            None => return,
        };
        if !ready {
            return;
        }
        let job = slot.take().expect("checked above");
        drop(slot);

        match job.task.await {
            Ok(Ok(body)) => {
                if job.auto_activate {
                    self.commit(body, job.start, job.end, job.epoch, false);
                } else {
                    self.inner.lock().held = Some(HeldBlock {
                        start: job.start,
                        end: job.end,
                        epoch: job.epoch,
                        body,
                    });
                }
            }
            Ok(Err(e)) => {
                tracing::warn!(
                    session_id = %self.session_id,
                    error = %e,
                    "background compression failed; chunk stays in the working tier"
                );
            }
            Err(e) => {
                tracing::warn!(
                    session_id = %self.session_id,
                    error = %e,
                    "compression task aborted"
                );
            }
        }
    }

    /// Activate a held pre-computed block. Returns true when a block was
    /// committed; stale blocks are discarded silently.
    fn activate_held(&self) -> bool {
        let held = self.inner.lock().held.take();
        match held {
            Some(block) => self.commit(block.body, block.start, block.end, block.epoch, true),
            None => false,
        }
    }

    /// Compress the oldest `chunk_len` messages, blocking the caller on
    /// the condense call. Returns false when there was nothing to do or
    /// the callback failed (working tier untouched either way).
    async fn compress_now(&self, chunk_len: usize) -> Result<bool> {
        let Some((start, end, epoch, prompt)) = self.snapshot_chunk(chunk_len) else {
            return Ok(false);
        };
        match self.condenser.condense(&prompt).await {
            Ok(body) => Ok(self.commit(body, start, end, epoch, false)),
            Err(e) => {
                tracing::warn!(
                    session_id = %self.session_id,
                    error = %e,
                    "synchronous compression failed; chunk stays in the working tier"
                );
                Ok(false)
            }
        }
    }

    /// Commit a condensed block: verify freshness, remove the source
    /// messages, persist the block, and bump the session-tier epoch.
    fn commit(&self, body: String, start: u64, end: u64, epoch: u64, precomputed: bool) -> bool {
        let mut inner = self.inner.lock();

        let head = inner.working.front().map(|m| m.index);
        if head != Some(start) || inner.epoch != epoch {
            TraceEvent::PrecomputeDiscarded {
                session_id: self.session_id.clone(),
                reason: if inner.epoch != epoch {
                    "session tier changed since snapshot".into()
                } else {
                    "source range no longer at queue head".into()
                },
            }
            .emit();
            return false;
        }

        let mut removed = 0usize;
        while inner
            .working
            .front()
            .map(|m| m.index < end)
            .unwrap_or(false)
        {
            if let Some(m) = inner.working.pop_front() {
                inner.working_tokens = inner.working_tokens.saturating_sub(m.tokens);
                removed += 1;
            }
        }

        let block = ObservationBlock::session(&self.session_id, body, start, end);
        if let Err(e) = self.store.append(&block) {
            tracing::warn!(error = %e, "failed to persist observation block");
        }
        let block_tokens = block.token_estimate;
        inner.session_blocks.push(block);
        inner.epoch += 1;

        TraceEvent::ContextCompressed {
            session_id: self.session_id.clone(),
            messages: removed,
            block_tokens,
            synchronous: !precomputed,
        }
        .emit();
        true
    }
}

impl Drop for ContextCompressor {
    /// Dropping the compressor aborts background work.
    fn drop(&mut self) {
        if let Ok(mut slot) = self.inflight.try_lock() {
            if let Some(job) = slot.take() {
                job.task.abort();
            }
        }
    }
}

/// Keep the newest suffix of a tier within its token budget.
fn clamp_to_tokens(text: &str, max_tokens: usize) -> String {
    let max_chars = max_tokens.saturating_mul(crate::CHARS_PER_TOKEN);
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    text.chars().skip(total - max_chars).collect()
}

/// The condense prompt: existing observations for dedup context, a
/// directive to preserve exact identifiers with a 3-6x target, and the
/// serialized chunk.
fn build_prompt(existing_observations: &str, serialized_chunk: &str) -> String {
    format!(
        "Compress the following agent session events into a dense running \
         observation log.\n\
         Preserve exact names, file paths, identifiers, and values. Target \
         3-6x compression. Do not repeat anything already covered by the \
         existing observations.\n\n\
         EXISTING OBSERVATIONS:\n{existing_observations}\n\n\
         EVENTS:\n{serialized_chunk}"
    )
}
