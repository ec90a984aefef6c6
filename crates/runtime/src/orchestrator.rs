//! Per-task execution loop.
//!
//! One task = one journal, one compressor, one intent capsule, one cancel
//! token. The loop drives the selected provider's event stream, filters
//! every tool call through hooks, the capability policy, prompt defense,
//! and the capsule drift check, polls the steering mailbox between
//! events, audits every decision, and fails over to a backup provider
//! with a handoff bundle when the stream dies with a retryable error.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;

use warden_audit::{AuditLog, AuditRecord};
use warden_context::{Condenser, ContextCompressor, ObservationStore, Reflector};
use warden_domain::config::{Config, ConfigPaths};
use warden_domain::error::{Error, Result};
use warden_domain::event::{AgentEvent, SessionEvent};
use warden_domain::stream::Usage;
use warden_domain::task::TaskRequest;
use warden_domain::tool::{ToolCall, ToolDecision, ToolExchange};
use warden_domain::trace::TraceEvent;
use warden_guard::{CapsuleManager, IntentCapsule, LeakDetector, PolicyEngine, PromptDefense, ToolAuthorizer};
use warden_memory::MemoryManager;
use warden_providers::{FailoverController, Provider, ProviderRegistry, ProviderTask, Router, TaskError};
use warden_sessions::{JournalStore, SessionJournal, SteeringStore};

use crate::cancel::CancelMap;
use crate::hooks::{HookSet, TaskContext, ToolCallContext};
use crate::prompt::build_system_prompt;

/// Preview length stored on outcomes and audit entries.
const PREVIEW_CHARS: usize = 200;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TaskOutcome
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The caller-visible result of one task.
#[derive(Debug, Clone, Default)]
pub struct TaskOutcome {
    pub job_id: String,
    /// The provider's final `done` text, or the last recoverable text
    /// event when the run failed after producing content.
    pub result_text: Option<String>,
    pub output_preview: Option<String>,
    pub provider: Option<String>,
    pub usage: Usage,
    pub aborted: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Orchestrator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Orchestrator {
    config: Arc<Config>,
    router: Arc<Router>,
    failover: FailoverController,
    authorizer: ToolAuthorizer,
    defense: Arc<PromptDefense>,
    capsules: CapsuleManager,
    audit: Arc<AuditLog>,
    memory: Arc<MemoryManager>,
    observations: Arc<ObservationStore>,
    journals: JournalStore,
    steering: Arc<SteeringStore>,
    reflector: Reflector,
    leak: LeakDetector,
    hooks: HookSet,
    cancel_map: Arc<CancelMap>,
    condenser: Arc<dyn Condenser>,
    /// Provider currently executing each job, so cancellation can abort
    /// the in-flight run immediately.
    active: parking_lot::Mutex<std::collections::HashMap<String, Arc<dyn Provider>>>,
}

impl Orchestrator {
    /// Wire the engine together from config, the provider registry, and
    /// the caller-supplied secrets (capsule signing key, home directory).
    pub fn new(
        config: Config,
        paths: &ConfigPaths,
        registry: &ProviderRegistry,
        signing_secret: &str,
        home: impl Into<std::path::PathBuf>,
        hooks: HookSet,
        condenser: Arc<dyn Condenser>,
    ) -> Self {
        let config = Arc::new(config);
        let policy = Arc::new(PolicyEngine::new(config.policy.clone(), home));
        let defense = Arc::new(PromptDefense::new());
        let router = Arc::new(Router::new(registry.all(), config.router.clone()));
        Self {
            authorizer: ToolAuthorizer::new(policy, defense.clone()),
            defense,
            failover: FailoverController::new(router.clone()),
            router,
            capsules: CapsuleManager::new(signing_secret),
            audit: Arc::new(AuditLog::new(paths.audit_file())),
            memory: Arc::new(MemoryManager::new(
                paths.memory_dir(),
                config.memory.clone(),
            )),
            observations: Arc::new(ObservationStore::new(paths.observations_dir())),
            journals: JournalStore::new(paths.sessions_dir(), config.journal.clone()),
            steering: Arc::new(SteeringStore::new(paths.steering_dir())),
            reflector: Reflector::new(condenser.clone()),
            leak: LeakDetector::new(),
            hooks,
            cancel_map: Arc::new(CancelMap::new()),
            condenser,
            active: parking_lot::Mutex::new(std::collections::HashMap::new()),
            config,
        }
    }

    pub fn memory(&self) -> &Arc<MemoryManager> {
        &self.memory
    }

    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    pub fn steering(&self) -> &Arc<SteeringStore> {
        &self.steering
    }

    pub fn journals(&self) -> &JournalStore {
        &self.journals
    }

    /// Cancel a running job: trip its token and abort the active
    /// provider run.
    pub fn cancel(&self, job_id: &str) -> bool {
        let found = self.cancel_map.cancel(job_id);
        if let Some(provider) = self.active.lock().get(job_id) {
            provider.abort(job_id);
        }
        found
    }

    /// Run one task to completion (or cancellation / exhaustion).
    pub async fn submit_task(&self, task: TaskRequest) -> Result<TaskOutcome> {
        self.submit_inner(task, true).await
    }

    fn submit_follow_up<'a>(
        &'a self,
        task: TaskRequest,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<TaskOutcome>> + Send + 'a>>
    {
        Box::pin(self.submit_inner(task, false))
    }

    async fn submit_inner(&self, task: TaskRequest, allow_follow_up: bool) -> Result<TaskOutcome> {
        let started = std::time::Instant::now();
        let job_id = task.job_id.clone();

        // 1. System prompt (preamble + memory index) and the capsule.
        let base_system_prompt = build_system_prompt(&self.memory)?;
        let capsule = self.capsules.create(
            &task.prompt,
            self.capsule_categories(),
            None,
        );

        // 2. Provider selection.
        let Some(mut provider) = self.router.select(&task).await else {
            return Err(Error::Provider {
                provider: "router".into(),
                message: "no available provider satisfies the task".into(),
            });
        };

        let journal = self.journals.open(&job_id);
        let compressor = ContextCompressor::new(
            self.config.context.clone(),
            job_id.clone(),
            self.observations.clone(),
            self.condenser.clone(),
        );
        let cancel = self.cancel_map.register(&job_id);

        journal.append(SessionEvent::now(AgentEvent::TaskStart {
            job_id: job_id.clone(),
        }));
        self.audit_soft(
            AuditRecord::new(&job_id, "task_start").with_provider(provider.name()),
        )
        .await;

        // 3. Task-start hooks may rewrite the context.
        let mut ctx = TaskContext {
            job_id: job_id.clone(),
            prompt: task.prompt.clone(),
            system_prompt: base_system_prompt.clone(),
        };
        self.hooks.run_task_start(&mut ctx);
        let base_system_prompt = ctx.system_prompt;
        let mut prompt = ctx.prompt;
        let mut system_prompt = base_system_prompt.clone();

        // 4. Drive the stream, failing over as needed.
        let mut outcome = TaskOutcome {
            job_id: job_id.clone(),
            ..TaskOutcome::default()
        };
        let mut tool_history: Vec<ToolExchange> = Vec::new();
        let mut pending_calls: Vec<ToolCall> = Vec::new();
        let mut last_text: Option<String> = None;

        'provider: loop {
            outcome.provider = Some(provider.name().to_owned());
            self.active
                .lock()
                .insert(job_id.clone(), provider.clone());
            let mut stream = provider
                .execute(ProviderTask {
                    job_id: job_id.clone(),
                    system_prompt: system_prompt.clone(),
                    prompt: prompt.clone(),
                })
                .await;

            let mut pending_error: Option<TaskError> = None;

            while let Some(event) = stream.next().await {
                if cancel.is_cancelled() {
                    provider.abort(&job_id);
                    outcome.aborted = true;
                    break 'provider;
                }

                match &event.payload {
                    // The orchestrator owns the journal's lifecycle
                    // markers; provider ones drive control flow only.
                    AgentEvent::TaskStart { .. } => {}
                    AgentEvent::TaskEnd { error, .. } => {
                        if let (Some(message), None) = (error, &pending_error) {
                            pending_error = Some(TaskError::from_message(message.clone()));
                        }
                    }

                    AgentEvent::ToolCall {
                        call_id,
                        tool_name,
                        arguments,
                    } => {
                        let call = ToolCall {
                            call_id: call_id.clone(),
                            tool_name: tool_name.clone(),
                            arguments: arguments.clone(),
                        };
                        if let Some(allowed) = self
                            .handle_tool_call(&journal, &compressor, &capsule, &job_id, call)
                            .await
                        {
                            pending_calls.push(allowed);
                        }
                    }

                    AgentEvent::ToolResult {
                        call_id,
                        tool_name,
                        content,
                        is_error,
                    } => {
                        let call = match pending_calls.iter().position(|c| c.call_id == *call_id)
                        {
                            Some(idx) => pending_calls.remove(idx),
                            None => ToolCall {
                                call_id: call_id.clone(),
                                tool_name: tool_name.clone(),
                                arguments: serde_json::json!({}),
                            },
                        };
                        let mut content = content.clone();
                        self.hooks.run_after_tool(&call, &mut content);
                        // Secrets never reach the compressor.
                        let content = self.leak.redact(&content);

                        let redacted = SessionEvent {
                            payload: AgentEvent::ToolResult {
                                call_id: call_id.clone(),
                                tool_name: tool_name.clone(),
                                content: content.clone(),
                                is_error: *is_error,
                            },
                            ..event.clone()
                        };
                        journal.append(redacted.clone());
                        compressor.ingest(redacted);

                        tool_history.push(ToolExchange {
                            call,
                            result: content,
                            is_error: *is_error,
                        });
                    }

                    AgentEvent::Error { message, status, .. } => {
                        journal.append(event.clone());
                        pending_error = Some(TaskError {
                            status: *status,
                            code: None,
                            message: message.clone(),
                        });
                    }

                    AgentEvent::Done { text, usage } => {
                        if let Some(text) = text {
                            outcome.result_text = Some(text.clone());
                        }
                        if let Some(usage) = usage {
                            outcome.usage.prompt_tokens += usage.prompt_tokens;
                            outcome.usage.completion_tokens += usage.completion_tokens;
                            outcome.usage.total_tokens += usage.total_tokens;
                        }
                        journal.append(event.clone());
                        compressor.ingest(event.clone());
                    }

                    AgentEvent::Text { text } => {
                        last_text = Some(text.clone());
                        journal.append(event.clone());
                        compressor.ingest(event.clone());
                    }

                    _ => {
                        journal.append(event.clone());
                        compressor.ingest(event.clone());
                    }
                }

                if let Err(e) = compressor.tick().await {
                    tracing::warn!(job_id = %job_id, error = %e, "compressor tick failed");
                }

                // Steering is polled between events through the cache.
                if let Err(e) = self
                    .drain_steering(&journal, &compressor, &job_id, &mut prompt)
                    .await
                {
                    tracing::warn!(job_id = %job_id, error = %e, "steering poll failed");
                }

                if pending_error.is_some() {
                    break;
                }
            }

            match pending_error {
                Some(error) if !cancel.is_cancelled() => {
                    match self
                        .failover
                        .handle_failure(
                            &task,
                            provider.name(),
                            &error,
                            &base_system_prompt,
                            tool_history.clone(),
                        )
                        .await
                    {
                        Some((backup, bundle)) => {
                            self.audit_soft(
                                AuditRecord::new(&job_id, "failover")
                                    .with_provider(provider.name())
                                    .with_result(bundle.summary.clone()),
                            )
                            .await;
                            system_prompt =
                                format!("{}\n{}", bundle.render(), base_system_prompt);
                            provider = backup;
                            continue 'provider;
                        }
                        None => {
                            outcome.error = Some(error.message);
                            break 'provider;
                        }
                    }
                }
                _ => break 'provider,
            }
        }

        self.active.lock().remove(&job_id);
        if cancel.is_cancelled() {
            outcome.aborted = true;
        }

        // 5. Finalize: task.end, end hooks, flush, reflect, close.
        if outcome.aborted {
            TraceEvent::TaskCompleted {
                job_id: job_id.clone(),
                provider: outcome.provider.clone().unwrap_or_default(),
                duration_ms: started.elapsed().as_millis() as u64,
                aborted: true,
            }
            .emit();
        }
        journal.append(SessionEvent::now(AgentEvent::TaskEnd {
            aborted: outcome.aborted,
            error: outcome.error.clone(),
        }));
        self.audit_soft(
            AuditRecord::new(&job_id, "task_end")
                .with_result(match (&outcome.error, outcome.aborted) {
                    (Some(e), _) => format!("error: {e}"),
                    (None, true) => "aborted".into(),
                    (None, false) => "completed".into(),
                }),
        )
        .await;

        if outcome.result_text.is_none() {
            // A failed run still surfaces the last recoverable text.
            outcome.result_text = last_text;
        }
        outcome.output_preview = outcome
            .result_text
            .as_deref()
            .map(|t| truncate(t, PREVIEW_CHARS));
        outcome.duration_ms = started.elapsed().as_millis() as u64;

        let follow_up = self.hooks.run_task_end(&outcome);

        if let Err(e) = compressor.flush().await {
            tracing::warn!(job_id = %job_id, error = %e, "compressor flush failed");
        }
        let observations = self
            .observations
            .build_session_context(&job_id)
            .unwrap_or_default();
        if !observations.is_empty() {
            if let Err(e) = self
                .reflector
                .reflect_and_persist(&observations, &job_id, &self.memory, &self.observations)
                .await
            {
                tracing::warn!(job_id = %job_id, error = %e, "reflection failed");
            }
        }
        journal.close().await;
        self.cancel_map.remove(&job_id);

        if let Some(follow_up) = follow_up {
            if allow_follow_up {
                if let Err(e) = self.submit_follow_up(follow_up).await {
                    tracing::warn!(job_id = %job_id, error = %e, "follow-up task failed");
                }
            } else {
                tracing::debug!(job_id = %job_id, "follow-up suppressed (already a follow-up)");
            }
        }

        Ok(outcome)
    }

    // ── Tool filtering ─────────────────────────────────────────────

    /// Run the before-hooks, the authorizer, and the drift check for one
    /// tool call. Denials become synthetic tool results so the model can
    /// reason about them; every decision is audited. Returns the
    /// (possibly rewritten) call when it was allowed.
    async fn handle_tool_call(
        &self,
        journal: &SessionJournal,
        compressor: &ContextCompressor,
        capsule: &IntentCapsule,
        job_id: &str,
        call: ToolCall,
    ) -> Option<ToolCall> {
        // Hooks may rewrite arguments; the first deny short-circuits.
        let mut hook_ctx = ToolCallContext::new(call);
        self.hooks.run_before_tool(&mut hook_ctx);
        let mut call = hook_ctx.call;

        let decision = if !self.capsules.verify(capsule) {
            ToolDecision::deny("intent capsule signature no longer verifies")
        } else if hook_ctx.allow {
            self.authorizer.authorize(&call.tool_name, &call.arguments)
        } else {
            ToolDecision::Deny {
                reason: hook_ctx
                    .deny_reason
                    .unwrap_or_else(|| "blocked by hook".into()),
            }
        };

        let decision = match decision {
            ToolDecision::Allow { arguments } => {
                if let Some(rewritten) = arguments {
                    call.arguments = rewritten;
                }
                // Policy passed; the capsule has the final word.
                let drift = self.capsules.check_drift(
                    capsule,
                    action_kind(&call.tool_name),
                    &format!("{} {}", call.tool_name, call.arguments),
                );
                if drift.consistent {
                    ToolDecision::allow()
                } else {
                    TraceEvent::DriftDenied {
                        job_id: job_id.to_owned(),
                        tool_name: call.tool_name.clone(),
                        confidence: drift.confidence,
                    }
                    .emit();
                    self.audit_soft(
                        AuditRecord::new(job_id, "drift_deny")
                            .with_tool(&call.tool_name, call.arguments.clone())
                            .with_result(drift.reason.clone()),
                    )
                    .await;
                    ToolDecision::Deny {
                        reason: format!(
                            "action drifts from the task mandate ({})",
                            drift.reason
                        ),
                    }
                }
            }
            ToolDecision::Deny { reason } => {
                TraceEvent::PolicyDenied {
                    job_id: job_id.to_owned(),
                    tool_name: call.tool_name.clone(),
                    reason: reason.clone(),
                }
                .emit();
                self.audit_soft(
                    AuditRecord::new(job_id, "policy_deny")
                        .with_tool(&call.tool_name, call.arguments.clone())
                        .with_result(reason.clone()),
                )
                .await;
                ToolDecision::Deny { reason }
            }
        };

        match decision {
            ToolDecision::Allow { .. } => {
                self.audit_soft(
                    AuditRecord::new(job_id, "tool_call")
                        .with_tool(&call.tool_name, call.arguments.clone()),
                )
                .await;
                // Always-flag categories proceed but are surfaced for
                // operator attention with their own audit entry.
                if let Some(category) = self.flagged_category(&call.tool_name) {
                    TraceEvent::ActionFlagged {
                        job_id: job_id.to_owned(),
                        tool_name: call.tool_name.clone(),
                        category: category.clone(),
                    }
                    .emit();
                    self.audit_soft(
                        AuditRecord::new(job_id, "action_flagged")
                            .with_tool(&call.tool_name, call.arguments.clone())
                            .with_result(format!(
                                "category '{category}' is always flagged for operator attention"
                            )),
                    )
                    .await;
                }
                let event = SessionEvent::now(AgentEvent::ToolCall {
                    call_id: call.call_id.clone(),
                    tool_name: call.tool_name.clone(),
                    arguments: call.arguments.clone(),
                });
                journal.append(event.clone());
                compressor.ingest(event);
                Some(call)
            }
            ToolDecision::Deny { reason } => {
                // The original call is aborted; a synthetic result carries
                // the denial back to the model.
                let event = SessionEvent::now(AgentEvent::ToolResult {
                    call_id: call.call_id.clone(),
                    tool_name: call.tool_name.clone(),
                    content: format!("denied: {reason}"),
                    is_error: true,
                });
                journal.append(event.clone());
                compressor.ingest(event);
                None
            }
        }
    }

    // ── Steering ───────────────────────────────────────────────────

    /// Pull pending steering messages through the cache, journal them,
    /// fold them into the next provider call, and archive them.
    async fn drain_steering(
        &self,
        journal: &SessionJournal,
        compressor: &ContextCompressor,
        job_id: &str,
        prompt: &mut String,
    ) -> Result<()> {
        let max_age = Duration::from_millis(self.config.steering.cache_max_age_ms);
        let pending = self.steering.cached_get_pending_messages(job_id, max_age)?;
        for message in pending {
            // Steering text is external input: injection shapes get
            // wrapped before the text goes anywhere near a model.
            let text = self.defense.sanitize_input(&message.text);
            let event = SessionEvent::now(AgentEvent::Steering { text: text.clone() });
            journal.append(event.clone());
            compressor.ingest(event);

            prompt.push_str("\n\n[operator steering] ");
            prompt.push_str(&text);

            self.steering.archive_message(job_id, &message.id)?;
            TraceEvent::SteeringInjected {
                job_id: job_id.to_owned(),
                message_id: message.id,
            }
            .emit();
        }
        Ok(())
    }

    // ── Small helpers ──────────────────────────────────────────────

    fn capsule_categories(&self) -> Vec<String> {
        let actions = &self.config.policy.actions;
        let mut categories = Vec::new();
        categories.extend(actions.reversible.iter().cloned());
        categories.extend(actions.irreversible.iter().cloned());
        categories.sort();
        categories.dedup();
        categories
    }

    /// The always-flag entry matching a tool, by action category or by
    /// tool name.
    fn flagged_category(&self, tool_name: &str) -> Option<String> {
        let kind = action_kind(tool_name);
        self.config
            .policy
            .actions
            .always_flag
            .iter()
            .find(|c| c.as_str() == kind || c.as_str() == tool_name)
            .cloned()
    }

    /// Audit-append that never takes the loop down.
    async fn audit_soft(&self, record: AuditRecord) {
        if let Err(e) = self.audit.append(record).await {
            tracing::error!(error = %e, "audit append failed");
        }
    }
}

/// The action category of a tool, shared by the drift check and the
/// always-flag lookup.
fn action_kind(tool_name: &str) -> &'static str {
    match tool_name {
        "exec" | "shell" | "bash" | "run_command" => "shell",
        "read" | "read_file" | "cat" | "open_file" | "list_dir" => "file_read",
        "write" | "write_file" | "edit" | "edit_file" | "append_file" => "file_write",
        "fetch" | "http_request" | "web_fetch" | "download" => "network",
        _ => "other",
    }
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
