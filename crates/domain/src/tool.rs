use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Internal tool call format (provider-agnostic).
/// Every provider adapter converts its native tool calls into this.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: Value,
}

/// The outcome of authorizing a single tool invocation.
#[derive(Debug, Clone)]
pub enum ToolDecision {
    /// Proceed, optionally with rewritten arguments.
    Allow { arguments: Option<Value> },
    /// Block; the reason is surfaced to the model as a synthetic result.
    Deny { reason: String },
}

impl ToolDecision {
    pub fn allow() -> Self {
        ToolDecision::Allow { arguments: None }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        ToolDecision::Deny {
            reason: reason.into(),
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, ToolDecision::Allow { .. })
    }
}

/// A completed tool call/result pair, as carried in failover handoffs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolExchange {
    pub call: ToolCall,
    pub result: String,
    #[serde(default)]
    pub is_error: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_constructors() {
        assert!(ToolDecision::allow().is_allowed());
        let deny = ToolDecision::deny("nope");
        assert!(!deny.is_allowed());
        match deny {
            ToolDecision::Deny { reason } => assert_eq!(reason, "nope"),
            _ => unreachable!(),
        }
    }

    #[test]
    fn tool_call_round_trips() {
        let call = ToolCall {
            call_id: "c1".into(),
            tool_name: "exec".into(),
            arguments: serde_json::json!({"command": "ls"}),
        };
        let json = serde_json::to_string(&call).unwrap();
        let back: ToolCall = serde_json::from_str(&json).unwrap();
        assert_eq!(back.tool_name, "exec");
        assert_eq!(back.arguments["command"], "ls");
    }
}
