//! The execution loop.
//!
//! [`orchestrator::Orchestrator`] owns a task's whole lifecycle: build
//! the system prompt from the memory index, issue an intent capsule,
//! select a provider, drive its event stream, filter every tool call
//! through policy and drift checks, interleave steering, persist
//! everything, fail over when a provider dies, and reflect at the end.

pub mod cancel;
pub mod condense;
pub mod exit;
pub mod hooks;
pub mod orchestrator;
pub mod prompt;

pub use cancel::{CancelMap, CancelToken};
pub use condense::ProviderCondenser;
pub use exit::ExitCode;
pub use hooks::{HookSet, TaskContext, ToolCallContext};
pub use orchestrator::{Orchestrator, TaskOutcome};
