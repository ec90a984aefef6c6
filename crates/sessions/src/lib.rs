//! Per-job persistence: the session journal and the steering mailbox.
//!
//! Both are plain files under the config tree. The journal is the public
//! wire contract for external observers; the steering directory is the
//! single source of truth for operator-injected guidance (no in-memory
//! queue survives a restart).

pub mod journal;
pub mod steering;

pub use journal::{JournalStore, SessionJournal, SessionStatus, SessionSummary};
pub use steering::{SteeringMessage, SteeringStore};

/// Job and session ids become file names; keep them to a safe alphabet.
pub(crate) fn sanitize_id(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
