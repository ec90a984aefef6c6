use std::path::{Path, PathBuf};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config tree layout
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Resolves the file layout under the per-user config directory.
///
/// All runtime state lives here as plain files; there is no database.
#[derive(Debug, Clone)]
pub struct ConfigPaths {
    root: PathBuf,
}

impl ConfigPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Hash-chained audit log file.
    pub fn audit_file(&self) -> PathBuf {
        self.root.join("audit")
    }

    /// Encrypted secrets store.
    pub fn secrets_file(&self) -> PathBuf {
        self.root.join("secrets.enc")
    }

    /// Per-job session journals: `sessions/{job_id}.jsonl`.
    pub fn sessions_dir(&self) -> PathBuf {
        self.root.join("sessions")
    }

    /// Memory tree root: long-term doc, daily notes, items, index.
    pub fn memory_dir(&self) -> PathBuf {
        self.root.join("memory")
    }

    /// Observation blocks: `observations/{session_id}.jsonl` plus the
    /// cross-session file.
    pub fn observations_dir(&self) -> PathBuf {
        self.root.join("observations")
    }

    /// Steering mailboxes: `steering/{job_id}/{message_id}.json`.
    pub fn steering_dir(&self) -> PathBuf {
        self.root.join("steering")
    }

    /// PID file and similar process-scoped state.
    pub fn state_dir(&self) -> PathBuf {
        self.root.join("state")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_rooted() {
        let paths = ConfigPaths::new("/home/u/.warden");
        assert_eq!(paths.audit_file(), PathBuf::from("/home/u/.warden/audit"));
        assert_eq!(
            paths.sessions_dir(),
            PathBuf::from("/home/u/.warden/sessions")
        );
        assert_eq!(
            paths.secrets_file(),
            PathBuf::from("/home/u/.warden/secrets.enc")
        );
    }
}
