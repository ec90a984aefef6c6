//! Model back-ends behind one streaming contract.
//!
//! Every provider (a local CLI subprocess or an OpenAI-compatible HTTP
//! endpoint) implements [`traits::Provider`]: a strictly ordered one-shot
//! event stream plus availability, auth, and quota surfaces. Each provider
//! owns a circuit breaker; the router classifies tasks and picks a
//! provider, and the failover controller hands work to a backup with a
//! compact replay bundle when a provider fails mid-task.

pub mod breaker;
pub mod failover;
pub mod http;
pub mod parse;
pub mod registry;
pub mod router;
pub mod sse;
pub mod subprocess;
pub mod traits;

pub use breaker::{BreakerState, CircuitBreaker};
pub use failover::{ErrorCategory, FailoverController, HandoffBundle, TaskError};
pub use http::OpenAiCompatProvider;
pub use registry::ProviderRegistry;
pub use router::{classify_task, Router};
pub use subprocess::SubprocessProvider;
pub use traits::{Provider, ProviderTask, QuotaStatus};
