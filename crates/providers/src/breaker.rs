//! Per-provider circuit breaker.
//!
//! Three states: closed (normal traffic), open (requests suppressed after
//! repeated failure), half-open (cooldown elapsed, one trial request
//! decides the next state). Quota errors count as failures and also mark
//! the provider exhausted for the cooldown window.

use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;

use warden_domain::trace::TraceEvent;

use crate::traits::QuotaStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half-open",
        }
    }
}

struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    /// Half-open admits exactly one trial at a time.
    trial_in_flight: bool,
    quota_exhausted_until: Option<Instant>,
}

pub struct CircuitBreaker {
    provider: String,
    failure_threshold: u32,
    cooldown: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(provider: impl Into<String>, failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            provider: provider.into(),
            failure_threshold: failure_threshold.max(1),
            cooldown,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_in_flight: false,
                quota_exhausted_until: None,
            }),
        }
    }

    /// Current state, promoting open → half-open once the cooldown has
    /// elapsed.
    pub fn state(&self) -> BreakerState {
        let mut inner = self.inner.lock();
        self.promote_if_cooled(&mut inner);
        inner.state
    }

    /// Whether a request may proceed right now. In half-open, only the
    /// single trial request is admitted.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.inner.lock();
        self.promote_if_cooled(&mut inner);
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open => false,
            BreakerState::HalfOpen => {
                if inner.trial_in_flight {
                    false
                } else {
                    inner.trial_in_flight = true;
                    true
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        let was = inner.state;
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.trial_in_flight = false;
        inner.quota_exhausted_until = None;
        if was != BreakerState::Closed {
            self.trace(BreakerState::Closed);
        }
    }

    pub fn record_failure(&self) {
        self.fail(false);
    }

    /// A 429 / RESOURCE_EXHAUSTED failure: trips like any failure and
    /// marks the provider exhausted for the cooldown window.
    pub fn record_quota_failure(&self) {
        self.fail(true);
    }

    pub fn health_score(&self) -> f64 {
        match self.state() {
            BreakerState::Closed => 1.0,
            BreakerState::HalfOpen => 0.5,
            BreakerState::Open => 0.0,
        }
    }

    pub fn quota_status(&self) -> QuotaStatus {
        let health_score = self.health_score();
        let inner = self.inner.lock();
        let now = Instant::now();
        let cooldown_until = inner
            .quota_exhausted_until
            .filter(|until| *until > now)
            .map(|until| Utc::now() + chrono::Duration::from_std(until - now).unwrap_or_default());
        QuotaStatus {
            is_exhausted: cooldown_until.is_some(),
            remaining_requests: None,
            cooldown_until,
            health_score,
        }
    }

    // ── Private ──────────────────────────────────────────────────────

    fn fail(&self, quota: bool) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures += 1;
        inner.trial_in_flight = false;
        if quota {
            inner.quota_exhausted_until = Some(Instant::now() + self.cooldown);
        }

        let should_open = match inner.state {
            // A failed half-open trial re-opens immediately.
            BreakerState::HalfOpen => true,
            _ => inner.consecutive_failures >= self.failure_threshold,
        };
        if should_open && inner.state != BreakerState::Open {
            inner.state = BreakerState::Open;
            inner.opened_at = Some(Instant::now());
            self.trace(BreakerState::Open);
        } else if should_open {
            // Already open: refresh the cooldown clock.
            inner.opened_at = Some(Instant::now());
        }
    }

    fn promote_if_cooled(&self, inner: &mut Inner) {
        if inner.state == BreakerState::Open {
            let cooled = inner
                .opened_at
                .map(|at| at.elapsed() >= self.cooldown)
                .unwrap_or(true);
            if cooled {
                inner.state = BreakerState::HalfOpen;
                inner.trial_in_flight = false;
                self.trace(BreakerState::HalfOpen);
            }
        }
    }

    fn trace(&self, state: BreakerState) {
        TraceEvent::CircuitStateChanged {
            provider: self.provider.clone(),
            state: state.as_str().to_owned(),
        }
        .emit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(cooldown_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new("p1", 3, Duration::from_millis(cooldown_ms))
    }

    #[test]
    fn opens_after_three_consecutive_failures() {
        let b = breaker(60_000);
        b.record_failure();
        b.record_failure();
        assert_eq!(b.state(), BreakerState::Closed);
        b.record_failure();
        assert_eq!(b.state(), BreakerState::Open);
        assert!(!b.allow_request());
        assert_eq!(b.health_score(), 0.0);
    }

    #[test]
    fn success_resets_the_failure_streak() {
        let b = breaker(60_000);
        b.record_failure();
        b.record_failure();
        b.record_success();
        b.record_failure();
        b.record_failure();
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[test]
    fn half_open_after_cooldown_admits_one_trial() {
        let b = breaker(0);
        for _ in 0..3 {
            b.record_failure();
        }
        // Zero cooldown: immediately half-open.
        assert_eq!(b.state(), BreakerState::HalfOpen);
        assert_eq!(b.health_score(), 0.5);

        assert!(b.allow_request(), "first trial admitted");
        assert!(!b.allow_request(), "second concurrent trial rejected");
    }

    #[test]
    fn trial_outcome_decides_next_state() {
        let b = breaker(0);
        for _ in 0..3 {
            b.record_failure();
        }
        assert!(b.allow_request());
        b.record_success();
        assert_eq!(b.state(), BreakerState::Closed);
        assert!(b.allow_request());

        for _ in 0..3 {
            b.record_failure();
        }
        assert!(b.allow_request());
        b.record_failure();
        // Failed trial: straight back to open... which with a zero
        // cooldown promotes to half-open again on observation.
        assert_ne!(b.health_score(), 1.0);
    }

    #[test]
    fn quota_failures_mark_exhaustion() {
        let b = breaker(60_000);
        b.record_quota_failure();
        let status = b.quota_status();
        assert!(status.is_exhausted);
        assert!(status.cooldown_until.is_some());
        assert_eq!(status.health_score, 1.0); // one failure: still closed

        b.record_quota_failure();
        b.record_quota_failure();
        assert_eq!(b.quota_status().health_score, 0.0);
    }

    #[test]
    fn success_clears_exhaustion() {
        let b = breaker(60_000);
        b.record_quota_failure();
        assert!(b.quota_status().is_exhausted);
        b.record_success();
        assert!(!b.quota_status().is_exhausted);
    }
}
