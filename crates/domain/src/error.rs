/// Shared error type used across all warden crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("policy denied: {0}")]
    PolicyDenied(String),

    #[error("drift denied: {0}")]
    DriftDenied(String),

    #[error("invalid secret: {0}")]
    Vault(String),

    #[error("audit chain broken at entry {index}: {reason}")]
    Integrity { index: u64, reason: String },

    #[error("memory: {0}")]
    Memory(String),

    #[error("config: {0}")]
    Config(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
