//! Tolerant stream parsing and free-text tool-call extraction.
//!
//! Newline-delimited provider streams may interleave garbage; malformed
//! JSON lines are logged and skipped, never fatal. Providers that only
//! speak free text surface tool calls as XML
//! (`<tool_call name="X">{json}</tool_call>`) or fenced JSON blocks
//! (`{"tool": "X", "arguments": {...}}`); both shapes are extracted with
//! a generated call id.

use regex::Regex;
use std::sync::LazyLock;

use warden_domain::event::AgentEvent;
use warden_domain::tool::ToolCall;

static XML_TOOL_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<tool_call\s+name="([^"]+)"\s*>\s*(\{.*?\})\s*</tool_call>"#)
        .expect("valid pattern")
});

static FENCED_JSON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").expect("valid pattern")
});

/// Parse one NDJSON line into an event. Malformed lines are logged and
/// skipped (`None`).
pub fn parse_event_line(line: &str) -> Option<AgentEvent> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str::<AgentEvent>(trimmed) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::debug!(error = %e, line = %truncate(trimmed, 120), "skipping malformed stream line");
            None
        }
    }
}

/// Extract tool calls embedded in free text. Every call gets a generated
/// id, a tool name, and an argument object.
pub fn extract_tool_calls(text: &str) -> Vec<ToolCall> {
    let mut calls = Vec::new();

    for caps in XML_TOOL_CALL.captures_iter(text) {
        let name = caps[1].to_string();
        match serde_json::from_str(&caps[2]) {
            Ok(arguments) => calls.push(ToolCall {
                call_id: uuid::Uuid::new_v4().to_string(),
                tool_name: name,
                arguments,
            }),
            Err(e) => {
                tracing::debug!(tool = %name, error = %e, "ignoring tool call with invalid JSON arguments");
            }
        }
    }

    for caps in FENCED_JSON.captures_iter(text) {
        let Ok(value) = serde_json::from_str::<serde_json::Value>(&caps[1]) else {
            continue;
        };
        let Some(name) = value.get("tool").and_then(|v| v.as_str()) else {
            continue;
        };
        let arguments = value
            .get("arguments")
            .cloned()
            .unwrap_or_else(|| serde_json::json!({}));
        calls.push(ToolCall {
            call_id: uuid::Uuid::new_v4().to_string(),
            tool_name: name.to_string(),
            arguments,
        });
    }

    calls
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_event_lines() {
        let event = parse_event_line(r#"{"type":"text","text":"hello"}"#).unwrap();
        assert!(matches!(event, AgentEvent::Text { .. }));

        let event = parse_event_line(
            r#"{"type":"tool_call","call_id":"c1","tool_name":"exec","arguments":{"command":"ls"}}"#,
        )
        .unwrap();
        assert!(matches!(event, AgentEvent::ToolCall { .. }));
    }

    #[test]
    fn malformed_lines_are_skipped_not_fatal() {
        assert!(parse_event_line("{truncated").is_none());
        assert!(parse_event_line("plain text, not json").is_none());
        assert!(parse_event_line("").is_none());
        assert!(parse_event_line(r#"{"type":"martian"}"#).is_none());
    }

    #[test]
    fn extracts_xml_tool_calls() {
        let text = r#"Let me check. <tool_call name="read_file">{"path": "/tmp/a"}</tool_call> done."#;
        let calls = extract_tool_calls(text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].tool_name, "read_file");
        assert_eq!(calls[0].arguments["path"], "/tmp/a");
        assert!(!calls[0].call_id.is_empty());
    }

    #[test]
    fn extracts_fenced_json_tool_calls() {
        let text = "I'll run it:\n```json\n{\"tool\": \"exec\", \"arguments\": {\"command\": \"ls\"}}\n```\n";
        let calls = extract_tool_calls(text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].tool_name, "exec");
        assert_eq!(calls[0].arguments["command"], "ls");
    }

    #[test]
    fn fenced_json_without_tool_key_is_ignored() {
        let text = "```json\n{\"just\": \"data\"}\n```";
        assert!(extract_tool_calls(text).is_empty());
    }

    #[test]
    fn multiple_calls_in_one_message() {
        let text = r#"
            <tool_call name="a">{"x": 1}</tool_call>
            <tool_call name="b">{"y": 2}</tool_call>
        "#;
        let calls = extract_tool_calls(text);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].tool_name, "a");
        assert_eq!(calls[1].tool_name, "b");
        assert_ne!(calls[0].call_id, calls[1].call_id);
    }

    #[test]
    fn invalid_xml_arguments_are_ignored() {
        let text = r#"<tool_call name="broken">{nope}</tool_call>"#;
        assert!(extract_tool_calls(text).is_empty());
    }
}
