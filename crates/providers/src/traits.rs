use chrono::{DateTime, Utc};

use warden_domain::event::SessionEvent;
use warden_domain::stream::BoxStream;
use warden_domain::task::{Capability, CostTier};

use crate::breaker::CircuitBreaker;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What a provider receives for one run.
#[derive(Debug, Clone, Default)]
pub struct ProviderTask {
    /// Job id; `abort(job_id)` cancels the matching in-flight run.
    pub job_id: String,
    /// The running system prompt (preamble + memory index + handoff).
    pub system_prompt: String,
    /// The user task, with any steering turns appended.
    pub prompt: String,
}

/// Quota posture derived from the circuit breaker and, where available,
/// the back-end.
#[derive(Debug, Clone, Default)]
pub struct QuotaStatus {
    pub is_exhausted: bool,
    pub remaining_requests: Option<u32>,
    pub cooldown_until: Option<DateTime<Utc>>,
    /// closed = 1.0, half-open = 0.5, open = 0.0.
    pub health_score: f64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Provider contract
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The uniform contract every back-end adapter implements.
///
/// `execute` returns a strictly ordered, one-shot stream: `task.start`
/// first, then turn markers, content, tool traffic, and an optional
/// `done`, with `task.end` last. When the circuit breaker is open the
/// stream yields a single `error` event with `is_circuit_open = true`
/// and ends.
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    /// Selection rank; 1 = preferred.
    fn rank(&self) -> u32;

    fn capabilities(&self) -> &[Capability];

    fn cost_tier(&self) -> CostTier;

    /// Cheap availability predicate: false when disabled, when the
    /// breaker is open, or when the (cached) auth check fails.
    async fn is_available(&self) -> bool;

    /// Verify credentials/tooling; implementations cache the result
    /// briefly (about a minute).
    async fn check_auth(&self) -> bool;

    fn quota_status(&self) -> QuotaStatus;

    /// Run the task. The stream is not restartable.
    async fn execute(&self, task: ProviderTask) -> BoxStream<'static, SessionEvent>;

    /// Cancel an in-flight run; idempotent, unknown ids are ignored.
    fn abort(&self, job_id: &str);

    fn breaker(&self) -> &CircuitBreaker;

    /// Whether the provider advertises every capability in `required`.
    fn supports(&self, required: &[Capability]) -> bool {
        required.iter().all(|c| self.capabilities().contains(c))
    }
}
