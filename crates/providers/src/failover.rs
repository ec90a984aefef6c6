//! Error classification and provider failover.
//!
//! When a provider fails mid-task, the controller classifies the error,
//! asks the router for an alternative capable provider, and builds a
//! compact handoff bundle: a summary naming the failing provider and
//! error category, the completed tool history, and the running system
//! prompt, clamped to the configured token budget by dropping the
//! oldest tool pairs.

use std::fmt;
use std::sync::Arc;

use warden_domain::task::TaskRequest;
use warden_domain::tool::ToolExchange;
use warden_domain::trace::TraceEvent;

use crate::router::Router;
use crate::traits::Provider;

/// Same chars-per-token heuristic the context tiers use.
const CHARS_PER_TOKEN: usize = 4;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Error classification
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A provider failure as observed by the execution loop.
#[derive(Debug, Clone, Default)]
pub struct TaskError {
    pub status: Option<u16>,
    /// Back-end-specific error code (e.g. `RESOURCE_EXHAUSTED`).
    pub code: Option<String>,
    pub message: String,
}

impl TaskError {
    pub fn from_message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    RateLimit,
    Auth,
    Timeout,
    Transient,
    Unknown,
}

impl ErrorCategory {
    pub fn is_retryable(self) -> bool {
        !matches!(self, ErrorCategory::Unknown)
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCategory::RateLimit => "rate_limit",
            ErrorCategory::Auth => "auth",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Transient => "transient",
            ErrorCategory::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Classify a failure: structured fields first, message substrings second.
pub fn classify_error(error: &TaskError) -> ErrorCategory {
    match error.status {
        Some(429) => return ErrorCategory::RateLimit,
        Some(401) | Some(403) => return ErrorCategory::Auth,
        Some(s) if (500..600).contains(&s) => return ErrorCategory::Transient,
        _ => {}
    }

    if let Some(code) = error.code.as_deref() {
        match code {
            "RESOURCE_EXHAUSTED" => return ErrorCategory::RateLimit,
            "UNAUTHENTICATED" | "PERMISSION_DENIED" => return ErrorCategory::Auth,
            "DEADLINE_EXCEEDED" => return ErrorCategory::Timeout,
            "UNAVAILABLE" => return ErrorCategory::Transient,
            _ => {}
        }
    }

    let lowered = error.message.to_lowercase();
    if lowered.contains("rate limit") || lowered.contains("too many requests") {
        ErrorCategory::RateLimit
    } else if lowered.contains("authentication failed") || lowered.contains("unauthorized") {
        ErrorCategory::Auth
    } else if lowered.contains("timed out") || lowered.contains("timeout") {
        ErrorCategory::Timeout
    } else if lowered.contains("connection") || lowered.contains("unavailable") {
        ErrorCategory::Transient
    } else {
        ErrorCategory::Unknown
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handoff bundle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Compact replay state given to the backup provider.
#[derive(Debug, Clone)]
pub struct HandoffBundle {
    /// Carries the failing-provider identifier and error category.
    pub summary: String,
    /// Completed call/result pairs, oldest first.
    pub tool_history: Vec<ToolExchange>,
    /// The running system prompt at the time of failure.
    pub system_prompt: String,
}

impl HandoffBundle {
    pub fn token_estimate(&self) -> usize {
        let tool_chars: usize = self
            .tool_history
            .iter()
            .map(|t| {
                t.call.tool_name.len() + t.call.arguments.to_string().len() + t.result.len()
            })
            .sum();
        (self.summary.len() + self.system_prompt.len() + tool_chars).div_ceil(CHARS_PER_TOKEN)
    }

    /// Drop oldest tool pairs until the bundle fits the budget.
    pub fn clamp_to(&mut self, max_tokens: usize) {
        while self.token_estimate() > max_tokens && !self.tool_history.is_empty() {
            self.tool_history.remove(0);
        }
    }

    /// The text prepended to the backup provider's system prompt.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&self.summary);
        out.push('\n');
        for exchange in &self.tool_history {
            out.push_str(&format!(
                "tool {}({}) -> {}\n",
                exchange.call.tool_name, exchange.call.arguments, exchange.result
            ));
        }
        out
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// FailoverController
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct FailoverController {
    router: Arc<Router>,
}

impl FailoverController {
    pub fn new(router: Arc<Router>) -> Self {
        Self { router }
    }

    /// Decide whether and where to retry after a provider failure.
    ///
    /// Returns `None` when the error is not retryable or no alternative
    /// capable provider exists (the caller surfaces the error).
    pub async fn handle_failure(
        &self,
        task: &TaskRequest,
        failed_provider: &str,
        error: &TaskError,
        system_prompt: &str,
        tool_history: Vec<ToolExchange>,
    ) -> Option<(Arc<dyn Provider>, HandoffBundle)> {
        let category = classify_error(error);
        if !category.is_retryable() {
            tracing::warn!(
                provider = failed_provider,
                message = %error.message,
                "non-retryable provider error"
            );
            return None;
        }

        let alternative = self
            .router
            .select_excluding(task, &[failed_provider])
            .await?;

        let mut bundle = HandoffBundle {
            summary: format!("failing over from {failed_provider} due to {category}"),
            tool_history,
            system_prompt: system_prompt.to_owned(),
        };
        bundle.clamp_to(self.router.config().handoff_max_tokens);

        TraceEvent::ProviderFailover {
            job_id: task.job_id.clone(),
            from_provider: failed_provider.to_owned(),
            to_provider: alternative.name().to_owned(),
            category: category.to_string(),
        }
        .emit();

        Some((alternative, bundle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_domain::tool::ToolCall;

    fn exchange(tool: &str, result_len: usize) -> ToolExchange {
        ToolExchange {
            call: ToolCall {
                call_id: "c".into(),
                tool_name: tool.into(),
                arguments: serde_json::json!({}),
            },
            result: "r".repeat(result_len),
            is_error: false,
        }
    }

    // ── Classification ─────────────────────────────────────────────

    #[test]
    fn structured_fields_win() {
        assert_eq!(
            classify_error(&TaskError {
                status: Some(429),
                code: None,
                message: "whatever".into()
            }),
            ErrorCategory::RateLimit
        );
        assert_eq!(
            classify_error(&TaskError {
                status: Some(503),
                code: None,
                message: String::new()
            }),
            ErrorCategory::Transient
        );
        assert_eq!(
            classify_error(&TaskError {
                status: None,
                code: Some("RESOURCE_EXHAUSTED".into()),
                message: String::new()
            }),
            ErrorCategory::RateLimit
        );
    }

    #[test]
    fn message_substrings_classify() {
        assert_eq!(
            classify_error(&TaskError::from_message("Rate limit exceeded, slow down")),
            ErrorCategory::RateLimit
        );
        assert_eq!(
            classify_error(&TaskError::from_message("authentication failed for key")),
            ErrorCategory::Auth
        );
        assert_eq!(
            classify_error(&TaskError::from_message("request timed out after 30s")),
            ErrorCategory::Timeout
        );
        assert_eq!(
            classify_error(&TaskError::from_message("connection refused")),
            ErrorCategory::Transient
        );
        assert_eq!(
            classify_error(&TaskError::from_message("the model said something odd")),
            ErrorCategory::Unknown
        );
    }

    #[test]
    fn only_unknown_is_not_retryable() {
        assert!(ErrorCategory::RateLimit.is_retryable());
        assert!(ErrorCategory::Auth.is_retryable());
        assert!(ErrorCategory::Timeout.is_retryable());
        assert!(ErrorCategory::Transient.is_retryable());
        assert!(!ErrorCategory::Unknown.is_retryable());
    }

    // ── Bundle ─────────────────────────────────────────────────────

    #[test]
    fn bundle_summary_names_provider_and_category() {
        let bundle = HandoffBundle {
            summary: format!("failing over from P1 due to {}", ErrorCategory::RateLimit),
            tool_history: vec![],
            system_prompt: "sys".into(),
        };
        assert!(bundle.summary.contains("failing over from P1"));
        assert!(bundle.summary.contains("rate_limit"));
    }

    #[test]
    fn clamp_drops_oldest_pairs_first() {
        let mut bundle = HandoffBundle {
            summary: "s".into(),
            tool_history: vec![
                exchange("oldest", 4_000),
                exchange("middle", 4_000),
                exchange("newest", 10),
            ],
            system_prompt: String::new(),
        };
        bundle.clamp_to(1_000);
        assert!(bundle.token_estimate() <= 1_000);
        let names: Vec<&str> = bundle
            .tool_history
            .iter()
            .map(|t| t.call.tool_name.as_str())
            .collect();
        assert_eq!(names, vec!["newest"]);
    }

    #[test]
    fn clamp_never_drops_summary_or_prompt() {
        let mut bundle = HandoffBundle {
            summary: "failing over from X due to timeout".into(),
            tool_history: vec![exchange("a", 100)],
            system_prompt: "p".repeat(10_000),
        };
        bundle.clamp_to(10);
        assert!(bundle.tool_history.is_empty());
        assert!(!bundle.summary.is_empty());
        assert!(!bundle.system_prompt.is_empty());
    }
}
