//! Per-invocation tool authorization.
//!
//! The authorizer is handed to the execution loop and consulted for every
//! tool call the provider surfaces. It maps tool names to the appropriate
//! validator: shell-like tools go through command validation, file tools
//! through path validation, network tools through host validation, and
//! everything through the prompt-defense checks. Unknown tools default to
//! allow; downstream components still record the call in the audit log.

use std::sync::Arc;

use serde_json::Value;

use warden_domain::tool::ToolDecision;

use crate::defense::PromptDefense;
use crate::policy::PolicyEngine;

/// Tool names routed through `validate_command`.
const SHELL_TOOLS: &[&str] = &["exec", "shell", "bash", "run_command"];

/// Tool names routed through `validate_path`, with the argument key
/// holding the path.
const PATH_TOOLS: &[&str] = &[
    "read",
    "read_file",
    "write",
    "write_file",
    "edit",
    "edit_file",
    "append_file",
    "list_dir",
    "cat",
    "open_file",
];

/// Tool names routed through `validate_host`, with the argument key
/// holding the URL (or a bare host).
const NETWORK_TOOLS: &[&str] = &["fetch", "http_request", "web_fetch", "download"];

pub struct ToolAuthorizer {
    policy: Arc<PolicyEngine>,
    defense: Arc<PromptDefense>,
}

impl ToolAuthorizer {
    pub fn new(policy: Arc<PolicyEngine>, defense: Arc<PromptDefense>) -> Self {
        Self { policy, defense }
    }

    /// Authorize one tool invocation: the policy engine first, then the
    /// prompt-defense shape checks. Returns Allow (optionally with
    /// rewritten arguments; path tools get the resolved absolute path)
    /// or Deny with a user-visible reason.
    pub fn authorize(&self, tool_name: &str, arguments: &Value) -> ToolDecision {
        let mut rewritten: Option<Value> = None;

        if SHELL_TOOLS.contains(&tool_name) {
            let command = arguments
                .get("command")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            if let Err(e) = self.policy.validate_command(command) {
                return ToolDecision::deny(e.to_string());
            }
        } else if PATH_TOOLS.contains(&tool_name) {
            let Some(path) = arguments.get("path").and_then(|v| v.as_str()) else {
                return ToolDecision::deny(format!(
                    "tool '{tool_name}' requires a string 'path' argument"
                ));
            };
            match self.policy.validate_path(path) {
                Ok(resolved) => {
                    let mut args = arguments.clone();
                    args["path"] = Value::String(resolved.display().to_string());
                    rewritten = Some(args);
                }
                Err(e) => return ToolDecision::deny(e.to_string()),
            }
        } else if NETWORK_TOOLS.contains(&tool_name) {
            let url = arguments
                .get("url")
                .or_else(|| arguments.get("host"))
                .and_then(|v| v.as_str());
            let Some(url) = url else {
                return ToolDecision::deny(format!(
                    "tool '{tool_name}' requires a string 'url' argument"
                ));
            };
            let Some(host) = extract_host(url) else {
                return ToolDecision::deny(format!("cannot extract a host from '{url}'"));
            };
            if let Err(e) = self.policy.validate_host(host) {
                return ToolDecision::deny(e.to_string());
            }
        }
        // Unknown tools pass the policy by default; the audit log still
        // records the call downstream.

        // Suspicious-shape checks apply to every tool.
        let checked = rewritten.as_ref().unwrap_or(arguments);
        if let Err(reason) = self.defense.validate_tool_output(tool_name, checked) {
            return ToolDecision::deny(reason);
        }

        ToolDecision::Allow { arguments: rewritten }
    }
}

/// Pull the host out of a URL without a full parser: drop the scheme,
/// cut at the first path/query/fragment separator, then strip any
/// userinfo and port.
fn extract_host(url: &str) -> Option<&str> {
    let rest = url.split_once("://").map(|(_, r)| r).unwrap_or(url);
    let rest = rest.split(['/', '?', '#']).next().unwrap_or(rest);
    let rest = rest.rsplit('@').next().unwrap_or(rest);
    let host = rest.split(':').next().unwrap_or(rest);
    (!host.is_empty()).then_some(host)
}
