//! Router + failover integration, driven by scripted in-memory providers.

use std::sync::Arc;
use std::time::Duration;

use warden_domain::config::{RouteMode, RouterConfig};
use warden_domain::event::{AgentEvent, SessionEvent};
use warden_domain::stream::BoxStream;
use warden_domain::task::{Capability, CostTier, TaskRequest};
use warden_domain::tool::{ToolCall, ToolExchange};

use warden_providers::breaker::CircuitBreaker;
use warden_providers::failover::{FailoverController, TaskError};
use warden_providers::router::Router;
use warden_providers::traits::{Provider, ProviderTask, QuotaStatus};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scripted provider
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct MockProvider {
    name: String,
    rank: u32,
    capabilities: Vec<Capability>,
    cost_tier: CostTier,
    available: bool,
    breaker: CircuitBreaker,
}

impl MockProvider {
    fn new(name: &str, rank: u32, cost_tier: CostTier, capabilities: Vec<Capability>) -> Self {
        Self {
            name: name.into(),
            rank,
            capabilities,
            cost_tier,
            available: true,
            breaker: CircuitBreaker::new(name, 3, Duration::from_secs(60)),
        }
    }

    fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }
}

#[async_trait::async_trait]
impl Provider for MockProvider {
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
        self.available
    }
    async fn check_auth(&self) -> bool {
        self.available
    }
    fn quota_status(&self) -> QuotaStatus {
        self.breaker.quota_status()
    }
    async fn execute(&self, task: ProviderTask) -> BoxStream<'static, SessionEvent> {
        let name = self.name.clone();
        Box::pin(async_stream::stream! {
            yield SessionEvent::from_provider(&name, AgentEvent::TaskStart { job_id: task.job_id });
            yield SessionEvent::from_provider(&name, AgentEvent::Done {
                text: Some(format!("answer from {name}")),
                usage: None,
            });
            yield SessionEvent::from_provider(&name, AgentEvent::TaskEnd { aborted: false, error: None });
        })
    }
    fn abort(&self, _job_id: &str) {}
    fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }
}

fn router_with(providers: Vec<Arc<dyn Provider>>, mode: RouteMode) -> Router {
    Router::new(
        providers,
        RouterConfig {
            mode,
            max_cost_tier: None,
            handoff_max_tokens: 4_000,
        },
    )
}

fn reasoning_task(job: &str) -> TaskRequest {
    TaskRequest {
        job_id: job.into(),
        prompt: "analyze and explain the tradeoff here".into(),
        required_capabilities: vec![Capability::Reasoning],
        model_preference: None,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Selection modes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn respect_ranking_picks_lowest_rank() {
    let router = router_with(
        vec![
            Arc::new(MockProvider::new("backup", 2, CostTier::Free, vec![Capability::Reasoning])),
            Arc::new(MockProvider::new("primary", 1, CostTier::Premium, vec![Capability::Reasoning])),
        ],
        RouteMode::RespectRanking,
    );
    let picked = router.select(&reasoning_task("j1")).await.unwrap();
    assert_eq!(picked.name(), "primary");
}

#[tokio::test]
async fn cost_ceiling_filters_then_falls_through_when_empty() {
    let providers: Vec<Arc<dyn Provider>> = vec![
        Arc::new(MockProvider::new("cheap", 2, CostTier::Free, vec![Capability::Reasoning])),
        Arc::new(MockProvider::new("fancy", 1, CostTier::Premium, vec![Capability::Reasoning])),
    ];
    let router = Router::new(
        providers.clone(),
        RouterConfig {
            mode: RouteMode::RespectRanking,
            max_cost_tier: Some(CostTier::Included),
            handoff_max_tokens: 4_000,
        },
    );
    // Ceiling admits only "cheap" despite its worse rank.
    assert_eq!(router.select(&reasoning_task("j1")).await.unwrap().name(), "cheap");

    // A ceiling that excludes every capable provider falls through.
    let premium_only: Vec<Arc<dyn Provider>> = vec![Arc::new(MockProvider::new(
        "fancy",
        1,
        CostTier::Premium,
        vec![Capability::Reasoning],
    ))];
    let router = Router::new(
        premium_only,
        RouterConfig {
            mode: RouteMode::RespectRanking,
            max_cost_tier: Some(CostTier::Free),
            handoff_max_tokens: 4_000,
        },
    );
    assert_eq!(router.select(&reasoning_task("j2")).await.unwrap().name(), "fancy");
}

#[tokio::test]
async fn optimize_cost_prefers_cheapest_then_rank() {
    let router = router_with(
        vec![
            Arc::new(MockProvider::new("free-b", 2, CostTier::Free, vec![Capability::Reasoning])),
            Arc::new(MockProvider::new("free-a", 1, CostTier::Free, vec![Capability::Reasoning])),
            Arc::new(MockProvider::new("paid", 1, CostTier::Metered, vec![Capability::Reasoning])),
        ],
        RouteMode::OptimizeCost,
    );
    assert_eq!(router.select(&reasoning_task("j1")).await.unwrap().name(), "free-a");
}

#[tokio::test]
async fn round_robin_cycles_deterministically() {
    let router = router_with(
        vec![
            Arc::new(MockProvider::new("a", 1, CostTier::Free, vec![Capability::Reasoning])),
            Arc::new(MockProvider::new("b", 1, CostTier::Free, vec![Capability::Reasoning])),
        ],
        RouteMode::RoundRobin,
    );
    let task = reasoning_task("j1");
    let first = router.select(&task).await.unwrap().name().to_owned();
    let second = router.select(&task).await.unwrap().name().to_owned();
    let third = router.select(&task).await.unwrap().name().to_owned();
    assert_ne!(first, second);
    assert_eq!(first, third);
}

#[tokio::test]
async fn provider_only_mode_and_capability_filtering() {
    let router = router_with(
        vec![
            Arc::new(MockProvider::new("coder", 1, CostTier::Free, vec![Capability::Coding])),
            Arc::new(MockProvider::new("thinker", 2, CostTier::Free, vec![Capability::Reasoning])),
        ],
        RouteMode::ProviderOnly("thinker".into()),
    );
    assert_eq!(router.select(&reasoning_task("j1")).await.unwrap().name(), "thinker");

    // The pinned provider lacks the needed capability: no selection.
    let router = router_with(
        vec![Arc::new(MockProvider::new(
            "coder",
            1,
            CostTier::Free,
            vec![Capability::Coding],
        ))],
        RouteMode::ProviderOnly("coder".into()),
    );
    assert!(router.select(&reasoning_task("j1")).await.is_none());
}

#[tokio::test]
async fn model_preference_overrides_mode() {
    let router = router_with(
        vec![
            Arc::new(MockProvider::new("primary", 1, CostTier::Free, vec![Capability::Reasoning])),
            Arc::new(MockProvider::new("pinned", 9, CostTier::Premium, vec![Capability::Reasoning])),
        ],
        RouteMode::RespectRanking,
    );
    let mut task = reasoning_task("j1");
    task.model_preference = Some("pinned".into());
    assert_eq!(router.select(&task).await.unwrap().name(), "pinned");

    // An unavailable preference falls back to the mode.
    let router = router_with(
        vec![
            Arc::new(MockProvider::new("primary", 1, CostTier::Free, vec![Capability::Reasoning])),
            Arc::new(
                MockProvider::new("pinned", 9, CostTier::Premium, vec![Capability::Reasoning])
                    .unavailable(),
            ),
        ],
        RouteMode::RespectRanking,
    );
    assert_eq!(router.select(&task).await.unwrap().name(), "primary");
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Failover
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn failover_on_429_hands_off_to_backup() {
    let router = Arc::new(router_with(
        vec![
            Arc::new(MockProvider::new("P1", 1, CostTier::Metered, vec![Capability::Reasoning])),
            Arc::new(MockProvider::new("P2", 2, CostTier::Free, vec![Capability::Reasoning])),
        ],
        RouteMode::RespectRanking,
    ));
    let controller = FailoverController::new(router);

    let history = vec![ToolExchange {
        call: ToolCall {
            call_id: "c1".into(),
            tool_name: "read_file".into(),
            arguments: serde_json::json!({"path": "/tmp/a"}),
        },
        result: "file contents".into(),
        is_error: false,
    }];

    let error = TaskError {
        status: Some(429),
        code: None,
        message: "Too Many Requests".into(),
    };
    let (backup, bundle) = controller
        .handle_failure(&reasoning_task("j1"), "P1", &error, "system prompt", history)
        .await
        .expect("handoff produced");

    assert_eq!(backup.name(), "P2");
    assert!(bundle.summary.contains("failing over from P1"));
    assert!(bundle.summary.contains("rate_limit"));
    assert_eq!(bundle.tool_history.len(), 1);
    assert_eq!(bundle.system_prompt, "system prompt");
    assert!(bundle.render().contains("read_file"));
}

#[tokio::test]
async fn failover_exhausted_returns_none() {
    let router = Arc::new(router_with(
        vec![Arc::new(MockProvider::new(
            "P1",
            1,
            CostTier::Free,
            vec![Capability::Reasoning],
        ))],
        RouteMode::RespectRanking,
    ));
    let controller = FailoverController::new(router);
    let error = TaskError {
        status: Some(429),
        code: None,
        message: String::new(),
    };
    assert!(controller
        .handle_failure(&reasoning_task("j1"), "P1", &error, "sys", vec![])
        .await
        .is_none());
}

#[tokio::test]
async fn unknown_errors_do_not_fail_over() {
    let router = Arc::new(router_with(
        vec![
            Arc::new(MockProvider::new("P1", 1, CostTier::Free, vec![Capability::Reasoning])),
            Arc::new(MockProvider::new("P2", 2, CostTier::Free, vec![Capability::Reasoning])),
        ],
        RouteMode::RespectRanking,
    ));
    let controller = FailoverController::new(router);
    let error = TaskError::from_message("the output was strangely shaped");
    assert!(controller
        .handle_failure(&reasoning_task("j1"), "P1", &error, "sys", vec![])
        .await
        .is_none());
}
