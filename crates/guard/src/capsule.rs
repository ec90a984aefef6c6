//! HMAC-signed intent capsules.
//!
//! A capsule freezes the user's original mandate: its hash, its extracted
//! keywords, the action categories it permits, and an expiry. Every
//! proposed action is checked for drift against the capsule; any mutation
//! of a signed field invalidates the signature.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Domain-separation suffix mixed into the signing key derivation.
const KEY_CONTEXT: &[u8] = b"warden-capsule";

/// Minimum keyword overlap ratio for an action to count as consistent.
const OVERLAP_FLOOR: f64 = 0.1;

/// Tokens this short carry no intent signal.
const MIN_KEYWORD_LEN: usize = 3;

const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "all", "can", "had", "her", "was", "one",
    "our", "out", "day", "get", "has", "him", "his", "how", "man", "new", "now", "old", "see",
    "two", "way", "who", "its", "did", "use", "with", "from", "this", "that", "have", "will",
    "they", "what", "when", "then", "them", "were", "been", "into", "some", "than", "each",
    "about", "would", "there", "their", "which", "these", "please",
];

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Capsule
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An HMAC-signed mandate bundle. The signature field serializes last.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentCapsule {
    pub capsule_id: String,
    pub mandate: String,
    /// SHA-256 of the mandate text, hex-encoded.
    pub mandate_hash: String,
    /// Sorted, deduplicated keywords extracted from the mandate.
    pub mandate_keywords: Vec<String>,
    /// Action categories the mandate permits. Empty = unrestricted.
    pub allowed_action_categories: Vec<String>,
    pub issued_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// HMAC-SHA-256 over the canonical serialization of all fields above.
    pub signature: String,
}

/// The result of a drift check against a capsule.
#[derive(Debug, Clone, Serialize)]
pub struct DriftAssessment {
    pub consistent: bool,
    pub confidence: f64,
    pub reason: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// CapsuleManager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Issues and verifies capsules under a process-lifetime signing key.
pub struct CapsuleManager {
    key: [u8; 32],
}

impl CapsuleManager {
    /// Derive the signing key from the caller-supplied secret.
    pub fn new(signing_secret: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(signing_secret.as_bytes());
        hasher.update(KEY_CONTEXT);
        Self {
            key: hasher.finalize().into(),
        }
    }

    /// Issue a signed capsule for a mandate.
    pub fn create(
        &self,
        mandate: &str,
        allowed_categories: Vec<String>,
        ttl: Option<chrono::Duration>,
    ) -> IntentCapsule {
        let issued_at = Utc::now();
        let mut capsule = IntentCapsule {
            capsule_id: uuid::Uuid::new_v4().to_string(),
            mandate: mandate.to_owned(),
            mandate_hash: hex::encode(Sha256::digest(mandate.as_bytes())),
            mandate_keywords: extract_keywords(mandate),
            allowed_action_categories: allowed_categories,
            issued_at,
            expires_at: ttl.map(|d| issued_at + d),
            signature: String::new(),
        };
        capsule.signature = self.sign(&capsule);
        capsule
    }

    /// Verify a capsule's signature in constant time.
    pub fn verify(&self, capsule: &IntentCapsule) -> bool {
        let expected = self.sign(capsule);
        let a = expected.as_bytes();
        let b = capsule.signature.as_bytes();
        if a.len() != b.len() {
            return false;
        }
        a.ct_eq(b).into()
    }

    /// Check a proposed action for drift from the mandate.
    pub fn check_drift(
        &self,
        capsule: &IntentCapsule,
        action_kind: &str,
        action_detail: &str,
    ) -> DriftAssessment {
        if let Some(expiry) = capsule.expires_at {
            if Utc::now() > expiry {
                return DriftAssessment {
                    consistent: false,
                    confidence: 1.0,
                    reason: "capsule has expired".into(),
                };
            }
        }

        if !capsule.allowed_action_categories.is_empty()
            && !capsule
                .allowed_action_categories
                .iter()
                .any(|c| c == action_kind)
        {
            return DriftAssessment {
                consistent: false,
                confidence: 0.8,
                reason: format!("action kind '{action_kind}' is not in the allowed categories"),
            };
        }

        let action_keywords = extract_keywords(action_detail);
        if action_keywords.is_empty() {
            // No signal either way.
            return DriftAssessment {
                consistent: true,
                confidence: 0.5,
                reason: "action carries no keywords".into(),
            };
        }

        let overlapping = action_keywords
            .iter()
            .filter(|k| capsule.mandate_keywords.contains(k))
            .count();
        let overlap = overlapping as f64 / action_keywords.len() as f64;

        if overlap >= OVERLAP_FLOOR {
            DriftAssessment {
                consistent: true,
                confidence: overlap,
                reason: format!("keyword overlap {overlap:.2}"),
            }
        } else {
            DriftAssessment {
                consistent: false,
                confidence: 1.0 - overlap,
                reason: format!("keyword overlap {overlap:.2} below {OVERLAP_FLOOR}"),
            }
        }
    }

    /// Canonical serialization for signing: a JSON array of the signed
    /// fields in fixed order, so key ordering cannot perturb the MAC.
    fn sign(&self, capsule: &IntentCapsule) -> String {
        let canonical = serde_json::json!([
            capsule.capsule_id,
            capsule.mandate,
            capsule.mandate_hash,
            capsule.mandate_keywords,
            capsule.allowed_action_categories,
            capsule.issued_at.to_rfc3339(),
            capsule.expires_at.map(|t| t.to_rfc3339()),
        ]);
        let mut mac =
            HmacSha256::new_from_slice(&self.key).expect("HMAC accepts any key length");
        mac.update(canonical.to_string().as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

/// Extract intent keywords: lowercase, split on every non-alphanumeric
/// boundary (so paths and serialized arguments still yield words), drop
/// stop-words and short tokens. Result is sorted and deduplicated.
pub fn extract_keywords(text: &str) -> Vec<String> {
    let mut keywords: Vec<String> = text
        .split(|c: char| !c.is_ascii_alphanumeric())
        .map(str::to_lowercase)
        .filter(|w| w.len() >= MIN_KEYWORD_LEN && !STOP_WORDS.contains(&w.as_str()))
        .collect();
    keywords.sort();
    keywords.dedup();
    keywords
}
