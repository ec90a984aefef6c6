//! CLI subprocess back-end.
//!
//! Drives a local agent CLI: the prompt goes to the child's stdin, and
//! stdout is read as a newline-delimited event stream. Well-formed lines
//! map straight onto [`AgentEvent`]s; free text is additionally scanned
//! for embedded tool calls. Malformed lines are logged and skipped.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use warden_domain::config::{ProviderConfig, ProvidersConfig};
use warden_domain::error::{Error, Result};
use warden_domain::event::{AgentEvent, SessionEvent};
use warden_domain::stream::BoxStream;
use warden_domain::task::{Capability, CostTier};

use crate::breaker::CircuitBreaker;
use crate::parse::{extract_tool_calls, parse_event_line};
use crate::traits::{Provider, ProviderTask, QuotaStatus};

pub struct SubprocessProvider {
    name: String,
    rank: u32,
    capabilities: Vec<Capability>,
    cost_tier: CostTier,
    enabled: bool,
    command: String,
    args: Vec<String>,
    breaker: Arc<CircuitBreaker>,
    auth_ttl: Duration,
    auth_cache: Mutex<Option<(Instant, bool)>>,
    running: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl SubprocessProvider {
    pub fn from_config(cfg: &ProviderConfig, shared: &ProvidersConfig) -> Result<Self> {
        let command = cfg
            .command
            .clone()
            .ok_or_else(|| Error::Config(format!("provider '{}': missing command", cfg.name)))?;
        Ok(Self {
            name: cfg.name.clone(),
            rank: cfg.rank,
            capabilities: cfg.capabilities.clone(),
            cost_tier: cfg.cost_tier,
            enabled: cfg.enabled,
            command,
            args: cfg.args.clone(),
            breaker: Arc::new(CircuitBreaker::new(
                cfg.name.clone(),
                shared.breaker_failure_threshold,
                Duration::from_secs(shared.breaker_cooldown_secs),
            )),
            auth_ttl: Duration::from_secs(shared.auth_cache_secs),
            auth_cache: Mutex::new(None),
            running: Arc::new(Mutex::new(HashMap::new())),
        })
    }
}

#[async_trait::async_trait]
impl Provider for SubprocessProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn rank(&self) -> u32 {
        self.rank
    }

    fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    fn cost_tier(&self) -> CostTier {
        self.cost_tier
    }

    async fn is_available(&self) -> bool {
        self.enabled
            && self.breaker.state() != crate::breaker::BreakerState::Open
            && self.check_auth().await
    }

    /// The binary exists and answers `--version`. Cached briefly.
    async fn check_auth(&self) -> bool {
        if let Some((at, ok)) = *self.auth_cache.lock() {
            if at.elapsed() <= self.auth_ttl {
                return ok;
            }
        }
        let ok = Command::new(&self.command)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false);
        *self.auth_cache.lock() = Some((Instant::now(), ok));
        ok
    }

    fn quota_status(&self) -> QuotaStatus {
        self.breaker.quota_status()
    }

    async fn execute(&self, task: ProviderTask) -> BoxStream<'static, SessionEvent> {
        let name = self.name.clone();
        let command = self.command.clone();
        let args = self.args.clone();
        let breaker = self.breaker.clone();
        let running = self.running.clone();

        let cancel = CancellationToken::new();
        running.lock().insert(task.job_id.clone(), cancel.clone());

        let stream = async_stream::stream! {
            let ev = |payload| SessionEvent::from_provider(&name, payload);

            yield ev(AgentEvent::TaskStart { job_id: task.job_id.clone() });

            if !breaker.allow_request() {
                yield ev(AgentEvent::Error {
                    message: format!("provider '{name}' circuit is open"),
                    is_circuit_open: true,
                    status: None,
                });
                yield ev(AgentEvent::TaskEnd {
                    aborted: false,
                    error: Some("circuit open".into()),
                });
                running.lock().remove(&task.job_id);
                return;
            }

            let spawned = Command::new(&command)
                .args(&args)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .spawn();

            let mut child = match spawned {
                Ok(child) => child,
                Err(e) => {
                    breaker.record_failure();
                    yield ev(AgentEvent::Error {
                        message: format!("failed to spawn '{command}': {e}"),
                        is_circuit_open: false,
                        status: None,
                    });
                    yield ev(AgentEvent::TaskEnd {
                        aborted: false,
                        error: Some(e.to_string()),
                    });
                    running.lock().remove(&task.job_id);
                    return;
                }
            };

            // Hand the prompt over and close stdin so the CLI can start.
            if let Some(mut stdin) = child.stdin.take() {
                let payload = format!("{}\n\n{}", task.system_prompt, task.prompt);
                if let Err(e) = stdin.write_all(payload.as_bytes()).await {
                    tracing::warn!(provider = %name, error = %e, "failed to write prompt to child stdin");
                }
            }

            let stdout = child.stdout.take();
            let mut text_buf = String::new();
            let mut done_emitted = false;
            let mut aborted = false;
            let mut turn: u32 = 1;

            yield ev(AgentEvent::TurnStart { turn });

            if let Some(stdout) = stdout {
                let mut lines = BufReader::new(stdout).lines();
                loop {
                    let line = tokio::select! {
                        _ = cancel.cancelled() => {
                            aborted = true;
                            break;
                        }
                        line = lines.next_line() => line,
                    };
                    let line = match line {
                        Ok(Some(line)) => line,
                        Ok(None) => break,
                        Err(e) => {
                            tracing::warn!(provider = %name, error = %e, "stdout read failed");
                            break;
                        }
                    };

                    let Some(event) = parse_event_line(&line) else {
                        continue;
                    };
                    match event {
                        // The adapter owns the lifecycle markers.
                        AgentEvent::TaskStart { .. } | AgentEvent::TaskEnd { .. } => {}
                        AgentEvent::Done { text, usage } => {
                            done_emitted = true;
                            let text = text.or_else(|| {
                                (!text_buf.is_empty()).then(|| text_buf.clone())
                            });
                            yield ev(AgentEvent::TurnEnd { turn });
                            yield ev(AgentEvent::Done { text, usage });
                        }
                        AgentEvent::Text { text } => {
                            text_buf.push_str(&text);
                            text_buf.push('\n');
                            yield ev(AgentEvent::Text { text: text.clone() });
                            // Free-text providers embed tool calls in prose.
                            for call in extract_tool_calls(&text) {
                                yield ev(AgentEvent::ToolStart {
                                    call_id: call.call_id.clone(),
                                    tool_name: call.tool_name.clone(),
                                });
                                yield ev(AgentEvent::ToolCall {
                                    call_id: call.call_id,
                                    tool_name: call.tool_name,
                                    arguments: call.arguments,
                                });
                            }
                        }
                        AgentEvent::TurnStart { .. } => {
                            turn += 1;
                            yield ev(AgentEvent::TurnStart { turn });
                        }
                        AgentEvent::TurnEnd { .. } => {
                            yield ev(AgentEvent::TurnEnd { turn });
                        }
                        other => yield ev(other),
                    }
                }
            }

            if aborted {
                if let Err(e) = child.kill().await {
                    tracing::debug!(provider = %name, error = %e, "child already gone on abort");
                }
                yield ev(AgentEvent::TaskEnd { aborted: true, error: None });
                running.lock().remove(&task.job_id);
                return;
            }

            match child.wait().await {
                Ok(status) if status.success() => {
                    breaker.record_success();
                    if !done_emitted {
                        yield ev(AgentEvent::TurnEnd { turn });
                        yield ev(AgentEvent::Done {
                            text: (!text_buf.is_empty()).then(|| text_buf.trim_end().to_string()),
                            usage: None,
                        });
                    }
                    yield ev(AgentEvent::TaskEnd { aborted: false, error: None });
                }
                Ok(status) => {
                    breaker.record_failure();
                    let message = format!("'{command}' exited with {status}");
                    yield ev(AgentEvent::Error {
                        message: message.clone(),
                        is_circuit_open: false,
                        status: None,
                    });
                    yield ev(AgentEvent::TaskEnd { aborted: false, error: Some(message) });
                }
                Err(e) => {
                    breaker.record_failure();
                    yield ev(AgentEvent::Error {
                        message: e.to_string(),
                        is_circuit_open: false,
                        status: None,
                    });
                    yield ev(AgentEvent::TaskEnd { aborted: false, error: Some(e.to_string()) });
                }
            }
            running.lock().remove(&task.job_id);
        };

        Box::pin(stream)
    }

    fn abort(&self, job_id: &str) {
        if let Some(token) = self.running.lock().get(job_id) {
            token.cancel();
        }
    }

    fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    fn config(name: &str, command: &str, args: &[&str]) -> ProviderConfig {
        ProviderConfig {
            name: name.into(),
            kind: warden_domain::config::ProviderKind::Subprocess,
            rank: 1,
            capabilities: vec![Capability::Reasoning],
            cost_tier: CostTier::Free,
            enabled: true,
            command: Some(command.into()),
            args: args.iter().map(|s| s.to_string()).collect(),
            base_url: None,
            api_key_env: None,
            model: None,
            timeout_ms: 5_000,
        }
    }

    fn provider(command: &str, args: &[&str]) -> SubprocessProvider {
        SubprocessProvider::from_config(&config("cli", command, args), &ProvidersConfig::default())
            .unwrap()
    }

    async fn collect(provider: &SubprocessProvider, job_id: &str) -> Vec<SessionEvent> {
        let task = ProviderTask {
            job_id: job_id.into(),
            system_prompt: "you are a test".into(),
            prompt: "do the thing".into(),
        };
        provider.execute(task).await.collect().await
    }

    #[tokio::test]
    async fn streams_ndjson_events_with_lifecycle_markers() {
        let p = provider(
            "sh",
            &[
                "-c",
                r#"echo '{"type":"text","text":"working on it"}'; echo '{"type":"done","text":"all done"}'"#,
            ],
        );
        let events = collect(&p, "job-1").await;

        assert!(matches!(events[0].payload, AgentEvent::TaskStart { .. }));
        assert!(matches!(
            events.last().unwrap().payload,
            AgentEvent::TaskEnd { aborted: false, error: None }
        ));
        assert!(events
            .iter()
            .any(|e| matches!(&e.payload, AgentEvent::Text { text } if text == "working on it")));
        assert!(events
            .iter()
            .any(|e| matches!(&e.payload, AgentEvent::Done { text: Some(t), .. } if t == "all done")));
        assert_eq!(events[0].source.as_deref(), Some("cli"));
    }

    #[tokio::test]
    async fn malformed_lines_are_skipped() {
        let p = provider(
            "sh",
            &[
                "-c",
                r#"echo 'not json'; echo '{"type":"text","text":"ok"}'; echo '{broken'"#,
            ],
        );
        let events = collect(&p, "job-1").await;
        let texts: Vec<_> = events
            .iter()
            .filter(|e| matches!(e.payload, AgentEvent::Text { .. }))
            .collect();
        assert_eq!(texts.len(), 1);
    }

    #[tokio::test]
    async fn free_text_tool_calls_are_surfaced() {
        let p = provider(
            "sh",
            &[
                "-c",
                r#"echo '{"type":"text","text":"<tool_call name=\"exec\">{\"command\": \"ls\"}</tool_call>"}'"#,
            ],
        );
        let events = collect(&p, "job-1").await;
        let call = events
            .iter()
            .find_map(|e| match &e.payload {
                AgentEvent::ToolCall {
                    tool_name,
                    arguments,
                    ..
                } => Some((tool_name.clone(), arguments.clone())),
                _ => None,
            })
            .expect("tool call surfaced");
        assert_eq!(call.0, "exec");
        assert_eq!(call.1["command"], "ls");
    }

    #[tokio::test]
    async fn nonzero_exit_yields_error_and_trips_breaker() {
        let p = provider("sh", &["-c", "exit 3"]);
        for _ in 0..3 {
            let events = collect(&p, "job-1").await;
            assert!(events
                .iter()
                .any(|e| matches!(e.payload, AgentEvent::Error { .. })));
        }
        assert_eq!(p.breaker().state(), crate::breaker::BreakerState::Open);

        // Open circuit short-circuits with a marked error event.
        let events = collect(&p, "job-2").await;
        assert!(events.iter().any(|e| matches!(
            e.payload,
            AgentEvent::Error { is_circuit_open: true, .. }
        )));
        assert_eq!(events.len(), 3); // task.start, error, task.end
    }

    #[tokio::test]
    async fn abort_kills_the_run() {
        let p = Arc::new(provider("sh", &["-c", "sleep 30"]));
        let task = ProviderTask {
            job_id: "job-abort".into(),
            system_prompt: String::new(),
            prompt: String::new(),
        };
        let mut stream = p.execute(task).await;

        // task.start and turn.start arrive, then the stream blocks on the
        // sleeping child.
        let first = stream.next().await.unwrap();
        assert!(matches!(first.payload, AgentEvent::TaskStart { .. }));

        p.abort("job-abort");
        p.abort("job-abort"); // idempotent

        let rest: Vec<SessionEvent> = stream.collect().await;
        assert!(matches!(
            rest.last().unwrap().payload,
            AgentEvent::TaskEnd { aborted: true, .. }
        ));
    }

    #[tokio::test]
    async fn check_auth_caches_and_reports_missing_binaries() {
        let ok = provider("echo", &[]);
        assert!(ok.check_auth().await);
        assert!(ok.check_auth().await);

        let missing = provider("definitely-not-a-real-binary-9c4f", &[]);
        assert!(!missing.check_auth().await);
        assert!(!missing.is_available().await);
    }

    #[tokio::test]
    async fn missing_command_config_is_rejected() {
        let mut cfg = config("cli", "sh", &[]);
        cfg.command = None;
        assert!(SubprocessProvider::from_config(&cfg, &ProvidersConfig::default()).is_err());
    }
}
