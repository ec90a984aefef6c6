use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Sentinel `previousHash` of the first chain entry.
pub const GENESIS: &str = "genesis";

/// A single line of the audit file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub entry_id: u64,
    pub job_id: String,
    pub event_kind: String,
    /// UTC, RFC 3339. Stored as a string so the hash input is stable
    /// across serialization round-trips.
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    pub previous_hash: String,
    pub hash: String,
}

impl AuditEntry {
    /// SHA-256 over the canonical serialization of the entry tuple
    /// including `previous_hash`. Canonical form is a JSON array in fixed
    /// field order, so map-key ordering cannot perturb the digest.
    pub fn compute_hash(&self) -> String {
        let canonical = serde_json::json!([
            self.entry_id,
            self.job_id,
            self.event_kind,
            self.timestamp,
            self.provider,
            self.tool_name,
            self.parameters,
            self.result,
            self.previous_hash,
        ]);
        hex::encode(Sha256::digest(canonical.to_string().as_bytes()))
    }
}

/// What callers hand to [`crate::AuditLog::append`]; the log stamps the
/// entry id, timestamp, and chain hashes.
#[derive(Debug, Clone, Default)]
pub struct AuditRecord {
    pub job_id: String,
    pub event_kind: String,
    pub provider: Option<String>,
    pub tool_name: Option<String>,
    pub parameters: Option<Value>,
    pub result: Option<String>,
}

impl AuditRecord {
    pub fn new(job_id: impl Into<String>, event_kind: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            event_kind: event_kind.into(),
            ..Self::default()
        }
    }

    pub fn with_tool(mut self, tool_name: impl Into<String>, parameters: Value) -> Self {
        self.tool_name = Some(tool_name.into());
        self.parameters = Some(parameters);
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_result(mut self, result: impl Into<String>) -> Self {
        self.result = Some(result.into());
        self
    }
}
