//! Crate-wide error types.

use thiserror::Error;

pub type EcoResult<T> = Result<T, EcoError>;

#[derive(Debug, Error)]
pub enum EcoError {
    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    /// The toolchain rejected the program; carries the raw diagnostic.
    #[error("{0}")]
    Compilation(String),

    #[error("execution timeout ({} seconds)", .timeout.as_secs_f64())]
    TrialTimeout { timeout: std::time::Duration },

    #[error("emissions sampler unavailable: {0}")]
    SamplerUnavailable(String),

    #[error("store error: {0}")]
    Store(String),
}

impl EcoError {
    /// Client errors are never retried and map to a usage failure on the CLI.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidArgument(_) | Self::UnsupportedLanguage(_) | Self::Config(_)
        )
    }
}

impl From<time::error::Format> for EcoError {
    fn from(value: time::error::Format) -> Self {
        Self::Store(format!("timestamp format error: {value}"))
    }
}
