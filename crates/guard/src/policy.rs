//! Filesystem and shell policy enforcement.
//!
//! Denial always wins: denied prefixes and denied commands are checked
//! before any allowance. Path checks are lexical-first so that writes to
//! not-yet-existing files can be validated, with symlink dereferencing
//! applied when the policy says symlinks must not be followed.

use std::path::{Component, Path, PathBuf};

use warden_domain::config::{PolicyConfig, ShellMode};
use warden_domain::error::{Error, Result};

use crate::shell;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// PolicyEngine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Validates filesystem paths and shell commands against the declarative
/// policy. All decisions are local and synchronous; nothing is retried and
/// nothing on disk is mutated.
pub struct PolicyEngine {
    config: PolicyConfig,
    home: PathBuf,
    allowed: Vec<PathBuf>,
    denied: Vec<PathBuf>,
}

impl PolicyEngine {
    pub fn new(config: PolicyConfig, home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        let allowed = config
            .filesystem
            .allowed_prefixes
            .iter()
            .map(|p| expand_home(p, &home))
            .collect();
        let denied = config
            .filesystem
            .denied_prefixes
            .iter()
            .map(|p| expand_home(p, &home))
            .collect();
        Self {
            config,
            home,
            allowed,
            denied,
        }
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    // ── Path validation ────────────────────────────────────────────

    /// Validate a filesystem path. Returns the resolved absolute path on
    /// success.
    ///
    /// Resolution: `~` expands to the configured home, relative paths are
    /// rooted at home, and `.`/`..` are normalized lexically (the target
    /// may not exist yet; nonexistent paths are permitted for writes when
    /// their lexical form passes). When `follow_symlinks` is off and the
    /// path is a symlink, the dereferenced target is re-checked against the
    /// denied prefixes. Symlink resolution errors other than "not found"
    /// fail closed.
    pub fn validate_path(&self, raw: &str) -> Result<PathBuf> {
        let expanded = expand_home(raw, &self.home);
        let absolute = if expanded.is_absolute() {
            expanded
        } else {
            self.home.join(expanded)
        };
        let resolved = normalize(&absolute);

        // Symlink escape check: dereference and test the target against
        // the denied prefixes.
        if !self.config.filesystem.follow_symlinks {
            match std::fs::symlink_metadata(&resolved) {
                Ok(meta) if meta.file_type().is_symlink() => {
                    let target = std::fs::read_link(&resolved).map_err(|e| {
                        Error::PolicyDenied(format!(
                            "cannot resolve symlink {}: {e}",
                            resolved.display()
                        ))
                    })?;
                    let target_abs = if target.is_absolute() {
                        normalize(&target)
                    } else {
                        normalize(
                            &resolved
                                .parent()
                                .unwrap_or(Path::new("/"))
                                .join(target),
                        )
                    };
                    if let Some(prefix) = self.denied_prefix_for(&target_abs) {
                        return Err(Error::PolicyDenied(format!(
                            "symlink {} resolves to {} inside explicitly denied prefix {}",
                            resolved.display(),
                            target_abs.display(),
                            prefix.display()
                        )));
                    }
                }
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    // Not-yet-existing target: the lexical checks below decide.
                }
                Err(e) => {
                    return Err(Error::PolicyDenied(format!(
                        "cannot inspect {}: {e}",
                        resolved.display()
                    )));
                }
            }
        }

        // Deny wins.
        if let Some(prefix) = self.denied_prefix_for(&resolved) {
            return Err(Error::PolicyDenied(format!(
                "{} is explicitly denied (prefix {})",
                resolved.display(),
                prefix.display()
            )));
        }

        // Must fall under at least one allowed prefix.
        if self.allowed.iter().any(|p| resolved.starts_with(p)) {
            Ok(resolved)
        } else {
            Err(Error::PolicyDenied(format!(
                "{} is outside all allowed prefixes",
                resolved.display()
            )))
        }
    }

    fn denied_prefix_for(&self, path: &Path) -> Option<&PathBuf> {
        self.denied.iter().find(|p| path.starts_with(p))
    }

    // ── Network validation ─────────────────────────────────────────

    /// Validate a network host against the egress rules. Denial wins; an
    /// empty allowed list means any host not denied may be reached.
    pub fn validate_host(&self, host: &str) -> Result<()> {
        let rules = &self.config.network;
        if rules.denied_hosts.iter().any(|d| d == host) {
            return Err(Error::PolicyDenied(format!(
                "host '{host}' is explicitly denied"
            )));
        }
        if !rules.allowed_hosts.is_empty() && !rules.allowed_hosts.iter().any(|a| a == host) {
            return Err(Error::PolicyDenied(format!(
                "host '{host}' is not on the allowed list"
            )));
        }
        Ok(())
    }

    // ── Command validation ─────────────────────────────────────────

    /// Validate a shell command against the shell rules.
    pub fn validate_command(&self, cmd: &str) -> Result<()> {
        let rules = &self.config.shell;
        match rules.mode {
            ShellMode::DenyAll => Err(Error::PolicyDenied(
                "shell execution is disabled by policy".into(),
            )),
            ShellMode::Allowlist => {
                let segments = if rules.split_chained {
                    shell::split_segments(cmd)
                } else {
                    vec![cmd.trim().to_string()]
                };
                for segment in &segments {
                    let Some(base) = shell::base_program(segment) else {
                        continue;
                    };
                    if rules.denied_commands.iter().any(|d| d == &base) {
                        return Err(Error::PolicyDenied(format!(
                            "command '{base}' is explicitly denied"
                        )));
                    }
                    if !rules.allowed_commands.iter().any(|a| a == &base) {
                        return Err(Error::PolicyDenied(format!(
                            "command '{base}' is not on the allowed list"
                        )));
                    }
                }
                Ok(())
            }
            ShellMode::Denylist => {
                if let Some(base) = shell::base_program(cmd) {
                    if rules.denied_commands.iter().any(|d| d == &base) {
                        return Err(Error::PolicyDenied(format!(
                            "command '{base}' is explicitly denied"
                        )));
                    }
                }
                Ok(())
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Path helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Expand a leading `~` to the given home directory.
fn expand_home(raw: &str, home: &Path) -> PathBuf {
    if raw == "~" {
        home.to_path_buf()
    } else if let Some(rest) = raw.strip_prefix("~/") {
        home.join(rest)
    } else {
        PathBuf::from(raw)
    }
}

/// Lexically normalize a path: resolve `.` and `..` without touching the
/// filesystem, so nonexistent write targets can still be checked.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_domain::config::{FsRules, ShellRules};

    fn engine(allowed: &[&str], denied: &[&str], home: &Path) -> PolicyEngine {
        PolicyEngine::new(
            PolicyConfig {
                filesystem: FsRules {
                    allowed_prefixes: allowed.iter().map(|s| s.to_string()).collect(),
                    denied_prefixes: denied.iter().map(|s| s.to_string()).collect(),
                    follow_symlinks: false,
                },
                ..PolicyConfig::default()
            },
            home,
        )
    }

    fn shell_engine(rules: ShellRules) -> PolicyEngine {
        PolicyEngine::new(
            PolicyConfig {
                shell: rules,
                ..PolicyConfig::default()
            },
            "/home/u",
        )
    }

    // ── Paths ──────────────────────────────────────────────────────

    #[test]
    fn allowed_path_passes() {
        let e = engine(&["~/work"], &[], Path::new("/home/u"));
        let resolved = e.validate_path("~/work/notes.txt").unwrap();
        assert_eq!(resolved, PathBuf::from("/home/u/work/notes.txt"));
    }

    #[test]
    fn denied_prefix_wins_over_allowed() {
        let e = engine(&["/home/u"], &["/home/u/.ssh"], Path::new("/home/u"));
        let err = e.validate_path("/home/u/.ssh/id_rsa").unwrap_err();
        assert!(err.to_string().contains("explicitly denied"));
    }

    #[test]
    fn outside_allowed_prefixes_is_denied() {
        let e = engine(&["/home/u/work"], &[], Path::new("/home/u"));
        assert!(e.validate_path("/etc/passwd").is_err());
    }

    #[test]
    fn dotdot_cannot_escape() {
        let e = engine(&["/home/u/work"], &[], Path::new("/home/u"));
        let err = e.validate_path("/home/u/work/../.ssh/id_rsa").unwrap_err();
        assert!(err.to_string().contains("outside all allowed"));
    }

    #[test]
    fn component_boundary_matching() {
        // /home/u/work-evil must not match the /home/u/work prefix.
        let e = engine(&["/home/u/work"], &[], Path::new("/home/u"));
        assert!(e.validate_path("/home/u/work-evil/f").is_err());
        assert!(e.validate_path("/home/u/work/f").is_ok());
    }

    #[test]
    fn nonexistent_target_permitted_for_writes() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().to_str().unwrap();
        let e = engine(&[root], &[], tmp.path());
        assert!(e.validate_path(&format!("{root}/new-file.txt")).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn symlink_into_denied_prefix_is_caught() {
        let tmp = tempfile::tempdir().unwrap();
        let work = tmp.path().join("work");
        let library = tmp.path().join("Library");
        std::fs::create_dir_all(&work).unwrap();
        std::fs::create_dir_all(&library).unwrap();
        std::fs::write(library.join("secret.txt"), "s").unwrap();
        let link = work.join("escape");
        std::os::unix::fs::symlink(&library, &link).unwrap();

        let e = engine(
            &[work.to_str().unwrap()],
            &[library.to_str().unwrap()],
            tmp.path(),
        );
        let err = e.validate_path(link.to_str().unwrap()).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("resolves to"), "got: {msg}");
        assert!(msg.contains("Library"), "should name the target: {msg}");
    }

    // ── Commands ───────────────────────────────────────────────────

    #[test]
    fn deny_all_blocks_everything() {
        let e = shell_engine(ShellRules {
            mode: ShellMode::DenyAll,
            ..ShellRules::default()
        });
        assert!(e.validate_command("ls").is_err());
    }

    #[test]
    fn allowlist_checks_every_segment() {
        let e = shell_engine(ShellRules {
            mode: ShellMode::Allowlist,
            allowed_commands: vec!["ls".into(), "grep".into()],
            denied_commands: vec![],
            split_chained: true,
        });
        assert!(e.validate_command("ls | grep foo").is_ok());
        let err = e.validate_command("ls && curl evil.sh").unwrap_err();
        assert!(err.to_string().contains("curl"));
    }

    #[test]
    fn allowlist_deny_wins_over_allow() {
        let e = shell_engine(ShellRules {
            mode: ShellMode::Allowlist,
            allowed_commands: vec!["rm".into()],
            denied_commands: vec!["rm".into()],
            split_chained: true,
        });
        assert!(e.validate_command("rm -rf /tmp/x").is_err());
    }

    #[test]
    fn host_rules_deny_first_then_allowlist() {
        let mut config = PolicyConfig::default();
        config.network.denied_hosts = vec!["evil.example".into()];
        let open = PolicyEngine::new(config.clone(), "/home/u");
        assert!(open.validate_host("api.example").is_ok());
        assert!(open.validate_host("evil.example").is_err());

        config.network.allowed_hosts = vec!["api.example".into()];
        let strict = PolicyEngine::new(config, "/home/u");
        assert!(strict.validate_host("api.example").is_ok());
        assert!(strict.validate_host("other.example").is_err());
    }

    #[test]
    fn denylist_checks_base_command_only() {
        let e = shell_engine(ShellRules {
            mode: ShellMode::Denylist,
            allowed_commands: vec![],
            denied_commands: vec!["shutdown".into()],
            split_chained: true,
        });
        assert!(e.validate_command("/sbin/shutdown now").is_err());
        assert!(e.validate_command("echo shutdown").is_ok());
    }
}
