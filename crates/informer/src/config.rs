use std::str::FromStr;
use std::time::Duration;

use nexlink_core::ConfigError;

/// Exponential backoff bounds for relisting after a failed or closed watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffConfig {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self { initial: Duration::from_millis(500), max: Duration::from_secs(30) }
    }
}

/// Runtime knobs of one informer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InformerConfig {
    /// Period of synthetic update events; zero disables resync.
    pub resync: Duration,
    pub backoff: BackoffConfig,
}

impl InformerConfig {
    /// Defaults overridden by `NEXLINK_RESYNC_SECS`, `NEXLINK_WATCH_BACKOFF_INITIAL_MS`
    /// and `NEXLINK_WATCH_BACKOFF_MAX_SECS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        if let Some(secs) = env_parse::<i64>("NEXLINK_RESYNC_SECS")? {
            cfg = cfg.with_resync_secs(secs);
        }
        if let Some(ms) = env_parse::<u64>("NEXLINK_WATCH_BACKOFF_INITIAL_MS")? {
            cfg.backoff.initial = Duration::from_millis(ms);
        }
        if let Some(secs) = env_parse::<u64>("NEXLINK_WATCH_BACKOFF_MAX_SECS")? {
            cfg.backoff.max = Duration::from_secs(secs);
        }
        cfg.validate()?;
        Ok(cfg)
    }

    /// Zero or negative disables resync.
    pub fn with_resync_secs(mut self, secs: i64) -> Self {
        self.resync = u64::try_from(secs).map(Duration::from_secs).unwrap_or(Duration::ZERO);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let BackoffConfig { initial, max } = &self.backoff;
        if initial.is_zero() {
            return Err(ConfigError::InvalidValue { name: "backoff.initial", value: "0".into() });
        }
        if initial > max {
            return Err(ConfigError::BackoffBounds { initial_ms: initial.as_millis(), max_ms: max.as_millis() });
        }
        Ok(())
    }
}

fn env_parse<T: FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| ConfigError::InvalidValue { name, value: raw }),
        Err(_) => Ok(None),
    }
}
