//! Prompt-injection defense.
//!
//! Two jobs: wrap injection-shaped substrings in untrusted-content
//! delimiters before text reaches a model, and reject suspicious tool
//! invocations (piped downloads, critical-config writes, sensitive-file
//! reads, encoded injection payloads) before they execute.

use base64::Engine;
use regex::Regex;
use serde_json::Value;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Constants
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const UNTRUSTED_OPEN: &str = "[UNTRUSTED]";
const UNTRUSTED_CLOSE: &str = "[/UNTRUSTED]";

/// Phrases that try to re-seat the model's instructions.
const INJECTION_PHRASES: &[&str] = &[
    r"(?i)ignore\s+(all\s+)?previous\s+instructions",
    r"(?i)disregard\s+(all\s+)?prior\s+instructions",
    r"(?i)you\s+are\s+now\s+",
    r"(?i)forget\s+everything\s+(above|before)",
    r"(?im)^\s*system\s*:",
    r"(?im)^\s*assistant\s*:",
    r"<\|im_start\|>",
    r"\[INST\]",
];

/// Paths whose modification would let a tool rewrite the agent's own
/// behavior.
const CRITICAL_PATHS: &[&str] = &["MEMORY.md", "policy", "config"];

/// File shapes that hold credentials.
const SENSITIVE_PATH_PATTERNS: &[&str] = &[
    r"\.env(\.|$)",
    r"\.ssh/",
    r"id_rsa",
    r"id_ed25519",
    r"\.aws/credentials",
    r"\.pem$",
];

/// Tools treated as shell-like (their `command` argument is a shell line).
const SHELL_TOOLS: &[&str] = &["exec", "shell", "bash", "run_command"];

/// Tools treated as file readers (their `path` argument is read).
const READ_TOOLS: &[&str] = &["read", "read_file", "cat", "open_file"];

/// Tools treated as file writers.
const WRITE_TOOLS: &[&str] = &["write", "write_file", "edit", "edit_file", "append_file"];

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// PromptDefense
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct PromptDefense {
    injection: Vec<Regex>,
    sensitive_paths: Vec<Regex>,
    piped_download: Regex,
    base64_run: Regex,
}

impl Default for PromptDefense {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptDefense {
    pub fn new() -> Self {
        Self {
            injection: INJECTION_PHRASES
                .iter()
                .map(|p| Regex::new(p).unwrap())
                .collect(),
            sensitive_paths: SENSITIVE_PATH_PATTERNS
                .iter()
                .map(|p| Regex::new(p).unwrap())
                .collect(),
            piped_download: Regex::new(r"\|\s*(curl|wget)\b").unwrap(),
            base64_run: Regex::new(r"[A-Za-z0-9+/]{16,}={0,2}").unwrap(),
        }
    }

    // ── Input sanitization ─────────────────────────────────────────

    /// Wrap every injection-shaped substring in untrusted-content
    /// delimiters. Applied globally, not just to the first occurrence.
    /// Base64 runs that decode to an injection phrase are wrapped too.
    pub fn sanitize_input(&self, text: &str) -> String {
        let mut result = text.to_string();
        for re in &self.injection {
            result = re
                .replace_all(&result, |caps: &regex::Captures<'_>| {
                    format!("{UNTRUSTED_OPEN}{}{UNTRUSTED_CLOSE}", &caps[0])
                })
                .into_owned();
        }

        // Encoded forms: decode candidate base64 runs and re-check.
        let encoded: Vec<String> = self
            .base64_run
            .find_iter(&result)
            .filter(|m| self.decodes_to_injection(m.as_str()))
            .map(|m| m.as_str().to_string())
            .collect();
        for run in encoded {
            let wrapped = format!("{UNTRUSTED_OPEN}{run}{UNTRUSTED_CLOSE}");
            result = result.replace(&run, &wrapped);
        }

        result
    }

    fn decodes_to_injection(&self, candidate: &str) -> bool {
        let Ok(bytes) = base64::engine::general_purpose::STANDARD.decode(candidate) else {
            return false;
        };
        let Ok(decoded) = String::from_utf8(bytes) else {
            return false;
        };
        self.injection.iter().any(|re| re.is_match(&decoded))
    }

    // ── Tool-output validation ─────────────────────────────────────

    /// Check a proposed tool invocation for suspicious shapes. Returns
    /// `Err(reason)` when the invocation must be blocked.
    pub fn validate_tool_output(&self, tool_name: &str, args: &Value) -> Result<(), String> {
        let args_text = args.to_string();

        // Shell commands piping into download tools.
        if SHELL_TOOLS.contains(&tool_name) {
            let command = args
                .get("command")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            if self.piped_download.is_match(command) {
                return Err("shell command pipes into a download tool (curl/wget)".into());
            }
            if let Some(path) = touched_critical_path(command) {
                return Err(format!(
                    "shell command touches critical config path '{path}'"
                ));
            }
        }

        // Writes to the files that define the agent's own behavior.
        if WRITE_TOOLS.contains(&tool_name) {
            if let Some(path) = args.get("path").and_then(|v| v.as_str()) {
                if let Some(hit) = touched_critical_path(path) {
                    return Err(format!("write targets critical config path '{hit}'"));
                }
            }
        }

        // Reads of credential files.
        if READ_TOOLS.contains(&tool_name) {
            if let Some(path) = args.get("path").and_then(|v| v.as_str()) {
                if self.sensitive_paths.iter().any(|re| re.is_match(path)) {
                    return Err(format!("read targets sensitive path '{path}'"));
                }
            }
        }

        // Encoded injection payloads hidden anywhere in the argument map.
        for m in self.base64_run.find_iter(&args_text) {
            if self.decodes_to_injection(m.as_str()) {
                return Err("arguments contain an encoded injection payload".into());
            }
        }

        Ok(())
    }
}

fn touched_critical_path(text: &str) -> Option<&'static str> {
    CRITICAL_PATHS.iter().copied().find(|p| text.contains(p))
}
