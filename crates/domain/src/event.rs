use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::stream::Usage;

/// Events emitted during a task run (provider-agnostic).
///
/// Providers yield these from `execute()`; the orchestrator journals them,
/// feeds them to the context compressor, and relays them to callers. The
/// stream is strictly ordered: `task.start` first, `task.end` last when
/// emitted, and every `tool_result` after its matching `tool_call`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AgentEvent {
    /// A task run has begun.
    #[serde(rename = "task.start")]
    TaskStart { job_id: String },

    /// A model turn has begun.
    #[serde(rename = "turn.start")]
    TurnStart { turn: u32 },

    /// A model turn has ended.
    #[serde(rename = "turn.end")]
    TurnEnd { turn: u32 },

    /// A text chunk from the model.
    #[serde(rename = "text")]
    Text { text: String },

    /// Reasoning/thinking content from the model.
    #[serde(rename = "thinking")]
    Thinking { text: String },

    /// A tool invocation has started (arguments may still be streaming).
    #[serde(rename = "tool.start")]
    ToolStart { call_id: String, tool_name: String },

    /// A complete tool call with assembled arguments.
    #[serde(rename = "tool_call")]
    ToolCall {
        call_id: String,
        tool_name: String,
        arguments: Value,
    },

    /// A tool execution result (or a synthetic denial).
    #[serde(rename = "tool_result")]
    ToolResult {
        call_id: String,
        tool_name: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },

    /// An operator steering message interleaved into the run.
    #[serde(rename = "steering")]
    Steering { text: String },

    /// An error occurred during the run.
    #[serde(rename = "error")]
    Error {
        message: String,
        #[serde(default)]
        is_circuit_open: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<u16>,
    },

    /// The provider finished producing output.
    #[serde(rename = "done")]
    Done {
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },

    /// The task run is over. Last event in a session when emitted.
    #[serde(rename = "task.end")]
    TaskEnd {
        #[serde(default)]
        aborted: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl AgentEvent {
    /// The serialized tag for this event kind (e.g. `"tool_call"`).
    pub fn kind(&self) -> &'static str {
        match self {
            AgentEvent::TaskStart { .. } => "task.start",
            AgentEvent::TurnStart { .. } => "turn.start",
            AgentEvent::TurnEnd { .. } => "turn.end",
            AgentEvent::Text { .. } => "text",
            AgentEvent::Thinking { .. } => "thinking",
            AgentEvent::ToolStart { .. } => "tool.start",
            AgentEvent::ToolCall { .. } => "tool_call",
            AgentEvent::ToolResult { .. } => "tool_result",
            AgentEvent::Steering { .. } => "steering",
            AgentEvent::Error { .. } => "error",
            AgentEvent::Done { .. } => "done",
            AgentEvent::TaskEnd { .. } => "task.end",
        }
    }
}

/// A journaled session event: an [`AgentEvent`] plus arrival metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    pub timestamp: DateTime<Utc>,
    /// The provider that produced the event, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(flatten)]
    pub payload: AgentEvent,
}

impl SessionEvent {
    /// Wrap an event with the current timestamp.
    pub fn now(payload: AgentEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            source: None,
            payload,
        }
    }

    /// Wrap an event with the current timestamp and a provider source.
    pub fn from_provider(provider: &str, payload: AgentEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            source: Some(provider.to_owned()),
            payload,
        }
    }

    /// Extract the plain-text form of the event for token counting and
    /// leak scanning. Lifecycle markers yield an empty string.
    pub fn text_form(&self) -> String {
        match &self.payload {
            AgentEvent::Text { text } | AgentEvent::Thinking { text } => text.clone(),
            AgentEvent::Steering { text } => text.clone(),
            AgentEvent::ToolCall {
                tool_name,
                arguments,
                ..
            } => format!("{tool_name} {arguments}"),
            AgentEvent::ToolResult { content, .. } => content.clone(),
            AgentEvent::Error { message, .. } => message.clone(),
            AgentEvent::Done { text, .. } => text.clone().unwrap_or_default(),
            _ => String::new(),
        }
    }
}
