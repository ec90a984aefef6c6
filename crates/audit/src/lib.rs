//! Hash-chained audit log.
//!
//! One JSON object per line, newline-terminated, append-only. Every entry
//! carries the hash of its predecessor; the chain is the ground truth and
//! there is no separate index. Appends are linearized through a single
//! async mutex so concurrent callers cannot interleave.

mod entry;
mod log;

pub use entry::{AuditEntry, AuditRecord, GENESIS};
pub use log::{AuditFilter, AuditLog, ChainStatus};
