use thiserror::Error;

/// Failures reported by a [`crate::ResourceSource`].
///
/// None of these are fatal to the engine: the reflector classifies them and
/// either drops the offending event or restarts from a full list.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    /// Connectivity or server-side failure; retried with backoff.
    #[error("source unavailable: {0}")]
    Unavailable(String),
    /// The requested resource version is no longer retained by the source.
    #[error("resource version too old")]
    StaleResourceVersion,
    /// A single notification could not be decoded.
    #[error("malformed event: {0}")]
    Malformed(String),
}

impl SourceError {
    pub fn unavailable(msg: impl Into<String>) -> Self { Self::Unavailable(msg.into()) }
    pub fn malformed(msg: impl Into<String>) -> Self { Self::Malformed(msg.into()) }
}

/// Invalid configuration. Surfaces at startup only.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },
    #[error("backoff initial delay {initial_ms}ms exceeds max delay {max_ms}ms")]
    BackoffBounds { initial_ms: u128, max_ms: u128 },
}
