//! Provider registry.
//!
//! Instantiates the configured back-end adapters at startup. Providers
//! that fail to initialize are recorded (with secrets masked) and
//! skipped rather than aborting the runtime.

use std::sync::Arc;

use warden_domain::config::{ProviderKind, ProvidersConfig};
use warden_domain::error::Result;

use crate::http::OpenAiCompatProvider;
use crate::subprocess::SubprocessProvider;
use crate::traits::Provider;

pub struct ProviderRegistry {
    providers: Vec<Arc<dyn Provider>>,
    init_errors: Vec<ProviderInitError>,
}

/// Records a provider that failed to initialize.
#[derive(Debug, Clone)]
pub struct ProviderInitError {
    pub provider: String,
    pub kind: String,
    /// Error message with key-shaped substrings masked.
    pub error: String,
}

/// Mask substrings that look like API keys or bearer tokens so raw
/// secrets never reach logs or status surfaces.
pub fn mask_secrets(msg: &str) -> String {
    let mut result = msg.to_string();
    for word in msg.split(|c: char| c.is_whitespace() || c == '\'' || c == '"' || c == ',') {
        let trimmed = word.trim();
        if trimmed.len() >= 20
            && trimmed
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            let masked = format!("{}...{}", &trimmed[..4], &trimmed[trimmed.len() - 4..]);
            result = result.replace(trimmed, &masked);
        }
    }
    result
}

impl ProviderRegistry {
    pub fn from_config(config: &ProvidersConfig) -> Result<Self> {
        let mut providers: Vec<Arc<dyn Provider>> = Vec::new();
        let mut init_errors = Vec::new();

        for pc in &config.providers {
            let result: Result<Arc<dyn Provider>> = match pc.kind {
                ProviderKind::Subprocess => SubprocessProvider::from_config(pc, config)
                    .map(|p| Arc::new(p) as Arc<dyn Provider>),
                ProviderKind::OpenaiCompat => OpenAiCompatProvider::from_config(pc, config)
                    .map(|p| Arc::new(p) as Arc<dyn Provider>),
            };
            match result {
                Ok(provider) => {
                    tracing::info!(
                        provider = %pc.name,
                        kind = ?pc.kind,
                        rank = pc.rank,
                        "registered provider"
                    );
                    providers.push(provider);
                }
                Err(e) => {
                    let safe_error = mask_secrets(&e.to_string());
                    tracing::warn!(
                        provider = %pc.name,
                        kind = ?pc.kind,
                        error = %safe_error,
                        "failed to initialize provider, skipping"
                    );
                    init_errors.push(ProviderInitError {
                        provider: pc.name.clone(),
                        kind: format!("{:?}", pc.kind),
                        error: safe_error,
                    });
                }
            }
        }

        Ok(Self {
            providers,
            init_errors,
        })
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.iter().find(|p| p.name() == name).cloned()
    }

    pub fn all(&self) -> Vec<Arc<dyn Provider>> {
        self.providers.clone()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn init_errors(&self) -> &[ProviderInitError] {
        &self.init_errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_domain::config::ProviderConfig;
    use warden_domain::task::{Capability, CostTier};

    fn subprocess_cfg(name: &str) -> ProviderConfig {
        ProviderConfig {
            name: name.into(),
            kind: ProviderKind::Subprocess,
            rank: 1,
            capabilities: vec![Capability::Reasoning],
            cost_tier: CostTier::Free,
            enabled: true,
            command: Some("echo".into()),
            args: vec![],
            base_url: None,
            api_key_env: None,
            model: None,
            timeout_ms: 1_000,
        }
    }

    #[test]
    fn registers_configured_providers() {
        let config = ProvidersConfig {
            providers: vec![subprocess_cfg("p1"), subprocess_cfg("p2")],
            ..ProvidersConfig::default()
        };
        let registry = ProviderRegistry::from_config(&config).unwrap();
        assert_eq!(registry.len(), 2);
        assert!(registry.get("p1").is_some());
        assert!(registry.get("missing").is_none());
        assert!(registry.init_errors().is_empty());
    }

    #[test]
    fn broken_provider_is_skipped_and_recorded() {
        let mut broken = subprocess_cfg("broken");
        broken.command = None;
        let config = ProvidersConfig {
            providers: vec![broken, subprocess_cfg("ok")],
            ..ProvidersConfig::default()
        };
        let registry = ProviderRegistry::from_config(&config).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.init_errors().len(), 1);
        assert_eq!(registry.init_errors()[0].provider, "broken");
    }

    #[test]
    fn mask_secrets_hides_key_shapes() {
        let masked = mask_secrets("auth failed for key sk-ant-REDACTED");
        assert!(!masked.contains("abc123def456"));
        assert!(masked.contains("auth failed"));

        // Short tokens and ordinary words survive.
        assert_eq!(mask_secrets("connection refused"), "connection refused");
    }
}
