//! OpenAI-compatible HTTP back-end (SSE chat completions).
//!
//! Translates the provider task into a streaming chat-completions call
//! and maps SSE deltas back onto [`AgentEvent`]s. Malformed `data:`
//! payloads are logged and skipped; HTTP 429 and `RESOURCE_EXHAUSTED`
//! count as quota failures against the circuit breaker.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use warden_domain::config::{ProviderConfig, ProvidersConfig};
use warden_domain::error::{Error, Result};
use warden_domain::event::{AgentEvent, SessionEvent};
use warden_domain::stream::{BoxStream, Usage};
use warden_domain::task::{Capability, CostTier};

use crate::breaker::CircuitBreaker;
use crate::parse::extract_tool_calls;
use crate::sse::drain_data_lines;
use crate::traits::{Provider, ProviderTask, QuotaStatus};

const DONE_SENTINEL: &str = "[DONE]";

pub struct OpenAiCompatProvider {
    name: String,
    rank: u32,
    capabilities: Vec<Capability>,
    cost_tier: CostTier,
    enabled: bool,
    base_url: String,
    api_key_env: Option<String>,
    model: String,
    client: reqwest::Client,
    breaker: Arc<CircuitBreaker>,
    auth_ttl: Duration,
    auth_cache: Mutex<Option<(Instant, bool)>>,
    running: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl OpenAiCompatProvider {
    pub fn from_config(cfg: &ProviderConfig, shared: &ProvidersConfig) -> Result<Self> {
        let base_url = cfg
            .base_url
            .clone()
            .ok_or_else(|| Error::Config(format!("provider '{}': missing base_url", cfg.name)))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            name: cfg.name.clone(),
            rank: cfg.rank,
            capabilities: cfg.capabilities.clone(),
            cost_tier: cfg.cost_tier,
            enabled: cfg.enabled,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key_env: cfg.api_key_env.clone(),
            model: cfg.model.clone().unwrap_or_else(|| "default".into()),
            client,
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

    fn api_key(&self) -> Option<String> {
        match &self.api_key_env {
            Some(var) => std::env::var(var).ok().filter(|v| !v.is_empty()),
            None => None,
        }
    }
}

/// Map one SSE `data:` payload onto events. Returns `(events, finished)`.
fn parse_sse_payload(data: &str, text_buf: &mut String) -> (Vec<AgentEvent>, bool) {
    if data == DONE_SENTINEL {
        return (Vec::new(), true);
    }
    let value: serde_json::Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!(error = %e, "skipping malformed SSE payload");
            return (Vec::new(), false);
        }
    };

    let mut events = Vec::new();
    let choice = &value["choices"][0];

    if let Some(delta) = choice["delta"]["content"].as_str() {
        if !delta.is_empty() {
            text_buf.push_str(delta);
            events.push(AgentEvent::Text {
                text: delta.to_string(),
            });
        }
    }
    if let Some(reasoning) = choice["delta"]["reasoning_content"].as_str() {
        if !reasoning.is_empty() {
            events.push(AgentEvent::Thinking {
                text: reasoning.to_string(),
            });
        }
    }

    let finished = choice["finish_reason"].is_string();
    if finished {
        let usage = value.get("usage").and_then(|u| {
            Some(Usage {
                prompt_tokens: u["prompt_tokens"].as_u64()? as u32,
                completion_tokens: u["completion_tokens"].as_u64().unwrap_or(0) as u32,
                total_tokens: u["total_tokens"].as_u64().unwrap_or(0) as u32,
            })
        });
        events.push(AgentEvent::Done {
            text: (!text_buf.is_empty()).then(|| text_buf.clone()),
            usage,
        });
    }
    (events, finished)
}

#[async_trait::async_trait]
impl Provider for OpenAiCompatProvider {
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

    /// A key is configured (when one is required). Cached briefly.
    async fn check_auth(&self) -> bool {
        if let Some((at, ok)) = *self.auth_cache.lock() {
            if at.elapsed() <= self.auth_ttl {
                return ok;
            }
        }
        let ok = self.api_key_env.is_none() || self.api_key().is_some();
        *self.auth_cache.lock() = Some((Instant::now(), ok));
        ok
    }

    fn quota_status(&self) -> QuotaStatus {
        self.breaker.quota_status()
    }

    async fn execute(&self, task: ProviderTask) -> BoxStream<'static, SessionEvent> {
        let name = self.name.clone();
        let breaker = self.breaker.clone();
        let running = self.running.clone();
        let client = self.client.clone();
        let url = format!("{}/chat/completions", self.base_url);
        let model = self.model.clone();
        let api_key = self.api_key();

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

            let body = serde_json::json!({
                "model": model,
                "stream": true,
                "messages": [
                    {"role": "system", "content": task.system_prompt},
                    {"role": "user", "content": task.prompt},
                ],
            });
            let mut request = client.post(&url).json(&body);
            if let Some(key) = &api_key {
                request = request.bearer_auth(key);
            }

            let response = tokio::select! {
                _ = cancel.cancelled() => {
                    yield ev(AgentEvent::TaskEnd { aborted: true, error: None });
                    running.lock().remove(&task.job_id);
                    return;
                }
                response = request.send() => response,
            };

            let mut response = match response {
                Ok(r) => r,
                Err(e) => {
                    breaker.record_failure();
                    let message = if e.is_timeout() {
                        format!("request to '{name}' timed out: {e}")
                    } else {
                        e.to_string()
                    };
                    yield ev(AgentEvent::Error { message: message.clone(), is_circuit_open: false, status: None });
                    yield ev(AgentEvent::TaskEnd { aborted: false, error: Some(message) });
                    running.lock().remove(&task.job_id);
                    return;
                }
            };

            let status = response.status();
            if !status.is_success() {
                let body_text = response.text().await.unwrap_or_default();
                let quota = status.as_u16() == 429 || body_text.contains("RESOURCE_EXHAUSTED");
                if quota {
                    breaker.record_quota_failure();
                } else {
                    breaker.record_failure();
                }
                let message = format!("HTTP {status}: {}", truncate(&body_text, 200));
                yield ev(AgentEvent::Error {
                    message: message.clone(),
                    is_circuit_open: false,
                    status: Some(status.as_u16()),
                });
                yield ev(AgentEvent::TaskEnd { aborted: false, error: Some(message) });
                running.lock().remove(&task.job_id);
                return;
            }

            yield ev(AgentEvent::TurnStart { turn: 1 });

            let mut buffer = String::new();
            let mut text_buf = String::new();
            let mut finished = false;
            let mut aborted = false;

            loop {
                let chunk = tokio::select! {
                    _ = cancel.cancelled() => {
                        aborted = true;
                        break;
                    }
                    chunk = response.chunk() => chunk,
                };
                match chunk {
                    Ok(Some(bytes)) => {
                        buffer.push_str(&String::from_utf8_lossy(&bytes));
                        for data in drain_data_lines(&mut buffer) {
                            let (events, done) = parse_sse_payload(&data, &mut text_buf);
                            for event in events {
                                yield ev(event);
                            }
                            finished = finished || done;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        breaker.record_failure();
                        let message = e.to_string();
                        yield ev(AgentEvent::Error { message: message.clone(), is_circuit_open: false, status: None });
                        yield ev(AgentEvent::TaskEnd { aborted: false, error: Some(message) });
                        running.lock().remove(&task.job_id);
                        return;
                    }
                }
            }

            if aborted {
                yield ev(AgentEvent::TaskEnd { aborted: true, error: None });
                running.lock().remove(&task.job_id);
                return;
            }

            // Tool calls embedded in prose surface at the end of the turn.
            for call in extract_tool_calls(&text_buf) {
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

            yield ev(AgentEvent::TurnEnd { turn: 1 });
            if !finished {
                yield ev(AgentEvent::Done {
                    text: (!text_buf.is_empty()).then(|| text_buf.clone()),
                    usage: None,
                });
            }
            breaker.record_success();
            yield ev(AgentEvent::TaskEnd { aborted: false, error: None });
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

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
