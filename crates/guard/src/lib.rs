//! Capability policy, prompt defense, and intent verification.
//!
//! Everything here is local and synchronous: path and command validation
//! against the declarative policy, injection sanitization and secret-leak
//! scanning, and the HMAC-signed intent capsule used to check goal drift
//! on every proposed action. Validation never mutates filesystem state.

pub mod authorizer;
pub mod capsule;
pub mod defense;
pub mod leak;
pub mod policy;
pub mod shell;

pub use authorizer::ToolAuthorizer;
pub use capsule::{CapsuleManager, DriftAssessment, IntentCapsule};
pub use defense::PromptDefense;
pub use leak::{LeakDetector, LeakMatch, LeakSeverity};
pub use policy::PolicyEngine;
