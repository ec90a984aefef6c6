//! Lifecycle hooks.
//!
//! Four ordered lists, run in registration order. A hook that errors is
//! logged and skipped; it never aborts the task.

use std::sync::Arc;

use serde_json::Value;

use warden_domain::error::Result;
use warden_domain::task::TaskRequest;
use warden_domain::tool::ToolCall;

use crate::orchestrator::TaskOutcome;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Hook contexts
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Mutable task state handed to `on_task_start` hooks.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub job_id: String,
    pub prompt: String,
    pub system_prompt: String,
}

/// Mutable tool-call state handed to `before_tool_execute` hooks. The
/// first hook that sets `allow = false` short-circuits the call.
#[derive(Debug, Clone)]
pub struct ToolCallContext {
    pub call: ToolCall,
    pub allow: bool,
    pub deny_reason: Option<String>,
}

impl ToolCallContext {
    pub fn new(call: ToolCall) -> Self {
        Self {
            call,
            allow: true,
            deny_reason: None,
        }
    }

    pub fn deny(&mut self, reason: impl Into<String>) {
        self.allow = false;
        self.deny_reason = Some(reason.into());
    }

    pub fn rewrite_arguments(&mut self, arguments: Value) {
        self.call.arguments = arguments;
    }
}

type TaskStartHook = Arc<dyn Fn(&mut TaskContext) -> Result<()> + Send + Sync>;
type BeforeToolHook = Arc<dyn Fn(&mut ToolCallContext) -> Result<()> + Send + Sync>;
type AfterToolHook = Arc<dyn Fn(&ToolCall, &mut String) -> Result<()> + Send + Sync>;
type TaskEndHook = Arc<dyn Fn(&TaskOutcome) -> Result<Option<TaskRequest>> + Send + Sync>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// HookSet
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default, Clone)]
pub struct HookSet {
    on_task_start: Vec<TaskStartHook>,
    before_tool_execute: Vec<BeforeToolHook>,
    after_tool_execute: Vec<AfterToolHook>,
    on_task_end: Vec<TaskEndHook>,
}

impl HookSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_task_start(
        &mut self,
        hook: impl Fn(&mut TaskContext) -> Result<()> + Send + Sync + 'static,
    ) -> &mut Self {
        self.on_task_start.push(Arc::new(hook));
        self
    }

    pub fn before_tool_execute(
        &mut self,
        hook: impl Fn(&mut ToolCallContext) -> Result<()> + Send + Sync + 'static,
    ) -> &mut Self {
        self.before_tool_execute.push(Arc::new(hook));
        self
    }

    pub fn after_tool_execute(
        &mut self,
        hook: impl Fn(&ToolCall, &mut String) -> Result<()> + Send + Sync + 'static,
    ) -> &mut Self {
        self.after_tool_execute.push(Arc::new(hook));
        self
    }

    pub fn on_task_end(
        &mut self,
        hook: impl Fn(&TaskOutcome) -> Result<Option<TaskRequest>> + Send + Sync + 'static,
    ) -> &mut Self {
        self.on_task_end.push(Arc::new(hook));
        self
    }

    // ── Runners ────────────────────────────────────────────────────

    pub fn run_task_start(&self, ctx: &mut TaskContext) {
        for (i, hook) in self.on_task_start.iter().enumerate() {
            if let Err(e) = hook(ctx) {
                tracing::warn!(hook = i, error = %e, "on_task_start hook failed; continuing");
            }
        }
    }

    /// Run the before-tool chain. Stops at the first hook that denies.
    pub fn run_before_tool(&self, ctx: &mut ToolCallContext) {
        for (i, hook) in self.before_tool_execute.iter().enumerate() {
            if let Err(e) = hook(ctx) {
                tracing::warn!(hook = i, error = %e, "before_tool_execute hook failed; continuing");
                continue;
            }
            if !ctx.allow {
                return;
            }
        }
    }

    pub fn run_after_tool(&self, call: &ToolCall, result: &mut String) {
        for (i, hook) in self.after_tool_execute.iter().enumerate() {
            if let Err(e) = hook(call, result) {
                tracing::warn!(hook = i, error = %e, "after_tool_execute hook failed; continuing");
            }
        }
    }

    /// Run the end chain; the first follow-up wins.
    pub fn run_task_end(&self, outcome: &TaskOutcome) -> Option<TaskRequest> {
        let mut follow_up = None;
        for (i, hook) in self.on_task_end.iter().enumerate() {
            match hook(outcome) {
                Ok(Some(task)) if follow_up.is_none() => follow_up = Some(task),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(hook = i, error = %e, "on_task_end hook failed; continuing");
                }
            }
        }
        follow_up
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn call() -> ToolCall {
        ToolCall {
            call_id: "c1".into(),
            tool_name: "exec".into(),
            arguments: serde_json::json!({"command": "ls"}),
        }
    }

    #[test]
    fn hooks_run_in_registration_order() {
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut hooks = HookSet::new();
        for i in 0..3 {
            let order = order.clone();
            hooks.on_task_start(move |_| {
                order.lock().push(i);
                Ok(())
            });
        }
        let mut ctx = TaskContext {
            job_id: "j".into(),
            prompt: "p".into(),
            system_prompt: "s".into(),
        };
        hooks.run_task_start(&mut ctx);
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn erroring_hook_is_isolated() {
        let ran = Arc::new(AtomicUsize::new(0));
        let mut hooks = HookSet::new();
        hooks.on_task_start(|_| Err(warden_domain::error::Error::Other("boom".into())));
        {
            let ran = ran.clone();
            hooks.on_task_start(move |ctx| {
                ran.fetch_add(1, Ordering::SeqCst);
                ctx.prompt.push_str(" (amended)");
                Ok(())
            });
        }
        let mut ctx = TaskContext {
            job_id: "j".into(),
            prompt: "p".into(),
            system_prompt: "s".into(),
        };
        hooks.run_task_start(&mut ctx);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(ctx.prompt, "p (amended)");
    }

    #[test]
    fn first_deny_short_circuits() {
        let later = Arc::new(AtomicUsize::new(0));
        let mut hooks = HookSet::new();
        hooks.before_tool_execute(|ctx| {
            ctx.deny("first says no");
            Ok(())
        });
        {
            let later = later.clone();
            hooks.before_tool_execute(move |_| {
                later.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        let mut ctx = ToolCallContext::new(call());
        hooks.run_before_tool(&mut ctx);
        assert!(!ctx.allow);
        assert_eq!(ctx.deny_reason.as_deref(), Some("first says no"));
        assert_eq!(later.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn after_tool_hooks_transform_results() {
        let mut hooks = HookSet::new();
        hooks.after_tool_execute(|_, result| {
            *result = result.to_uppercase();
            Ok(())
        });
        let mut result = "ok".to_string();
        hooks.run_after_tool(&call(), &mut result);
        assert_eq!(result, "OK");
    }

    #[test]
    fn first_follow_up_wins() {
        let mut hooks = HookSet::new();
        hooks.on_task_end(|_| Ok(None));
        hooks.on_task_end(|_| Ok(Some(TaskRequest::new("follow-1", "first"))));
        hooks.on_task_end(|_| Ok(Some(TaskRequest::new("follow-2", "second"))));

        let outcome = TaskOutcome::default();
        let follow = hooks.run_task_end(&outcome).unwrap();
        assert_eq!(follow.job_id, "follow-1");
    }
}
