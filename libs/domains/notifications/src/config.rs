//! Delivery engine configuration.
//!
//! Everything is read from the environment with defaults suitable for local
//! development: mock providers, the standard backoff and a short settings TTL.

use std::env;
use std::str::FromStr;
use std::time::Duration;
use strum::{Display, EnumString};
use thiserror::Error;

use crate::backoff::{BackoffPolicy, MAX_BACKOFF_SECS};
use crate::retry::RetryConfig;
use crate::templates::BusinessContext;

/// Configuration error type
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Environment variable '{0}' is required but not set")]
    MissingEnvVar(String),

    #[error("Failed to parse environment variable '{key}': {details}")]
    ParseError { key: String, details: String },
}

/// Helper to load environment variable with a default value
pub fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Helper to load environment variable or return error
pub fn env_required(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Parse an environment variable, using `default` when it is unset.
pub fn env_parse<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::ParseError {
            key: key.to_string(),
            details: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

fn invalid(key: &str, details: String) -> ConfigError {
    ConfigError::ParseError {
        key: key.to_string(),
        details,
    }
}

/// Whether real transports are contacted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ProviderMode {
    #[default]
    Mock,
    Live,
}

/// Email transport used in live mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum EmailTransport {
    #[default]
    Smtp,
    SendGrid,
}

/// Configuration for the delivery engine
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    pub provider_mode: ProviderMode,
    pub email_transport: EmailTransport,
    /// Upper bound for a single provider call.
    pub transport_timeout: Duration,
    pub backoff: BackoffPolicy,
    /// Retry budget used when a type has no stored settings.
    pub default_max_retries: u32,
    pub settings_cache_ttl: Duration,
    pub sweep: RetryConfig,
    pub business: BusinessContext,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            provider_mode: ProviderMode::Mock,
            email_transport: EmailTransport::Smtp,
            transport_timeout: Duration::from_secs(10),
            backoff: BackoffPolicy::default(),
            default_max_retries: 2,
            settings_cache_ttl: Duration::from_secs(300),
            sweep: RetryConfig::default(),
            business: BusinessContext::default(),
        }
    }
}

impl DeliveryConfig {
    /// Load configuration from `NOTIFY_*` and `BUSINESS_*` variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let sweep_defaults = RetryConfig::default();

        let backoff = BackoffPolicy {
            base_secs: env_parse("NOTIFY_BACKOFF_BASE_SECS", defaults.backoff.base_secs)?,
            max_secs: env_parse("NOTIFY_BACKOFF_MAX_SECS", defaults.backoff.max_secs)?,
            jitter_fraction: env_parse("NOTIFY_BACKOFF_JITTER", defaults.backoff.jitter_fraction)?,
        };
        let sweep = RetryConfig {
            batch_limit: env_parse("NOTIFY_SWEEP_BATCH_LIMIT", sweep_defaults.batch_limit)?,
            budget: Duration::from_secs(env_parse(
                "NOTIFY_SWEEP_BUDGET_SECS",
                sweep_defaults.budget.as_secs(),
            )?),
            stagger_max: Duration::from_millis(env_parse(
                "NOTIFY_SWEEP_STAGGER_MS",
                sweep_defaults.stagger_max.as_millis() as u64,
            )?),
            concurrency: env_parse("NOTIFY_SWEEP_CONCURRENCY", sweep_defaults.concurrency)?.max(1),
            stale_after: Duration::from_secs(env_parse(
                "NOTIFY_STALE_PENDING_SECS",
                sweep_defaults.stale_after.as_secs(),
            )?),
        };

        let config = Self {
            provider_mode: env_parse("NOTIFY_PROVIDER_MODE", defaults.provider_mode)?,
            email_transport: env_parse("NOTIFY_EMAIL_TRANSPORT", defaults.email_transport)?,
            transport_timeout: Duration::from_secs(env_parse(
                "NOTIFY_TRANSPORT_TIMEOUT_SECS",
                defaults.transport_timeout.as_secs(),
            )?),
            backoff,
            default_max_retries: env_parse(
                "NOTIFY_DEFAULT_MAX_RETRIES",
                defaults.default_max_retries,
            )?,
            settings_cache_ttl: Duration::from_secs(env_parse(
                "NOTIFY_SETTINGS_CACHE_TTL_SECS",
                defaults.settings_cache_ttl.as_secs(),
            )?),
            sweep,
            business: BusinessContext::from_env(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the values that would otherwise misbehave at delivery time.
    ///
    /// A pending attempt is only treated as stale once it has been untouched
    /// for longer than a dispatch can take, otherwise the sweep would send an
    /// attempt that is still in flight a second time.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let backoff = &self.backoff;
        if !(0.0..=1.0).contains(&backoff.jitter_fraction) {
            return Err(invalid(
                "NOTIFY_BACKOFF_JITTER",
                format!("{} is outside 0.0..=1.0", backoff.jitter_fraction),
            ));
        }
        if !(0.0..=MAX_BACKOFF_SECS).contains(&backoff.base_secs) {
            return Err(invalid(
                "NOTIFY_BACKOFF_BASE_SECS",
                format!("{} is outside 0..={MAX_BACKOFF_SECS}", backoff.base_secs),
            ));
        }
        if !(0.0..=MAX_BACKOFF_SECS).contains(&backoff.max_secs) {
            return Err(invalid(
                "NOTIFY_BACKOFF_MAX_SECS",
                format!("{} is outside 0..={MAX_BACKOFF_SECS}", backoff.max_secs),
            ));
        }

        let in_flight = self.transport_timeout + self.sweep.stagger_max;
        if self.sweep.stale_after <= in_flight {
            return Err(invalid(
                "NOTIFY_STALE_PENDING_SECS",
                format!(
                    "{:?} must be longer than the transport timeout plus stagger ({in_flight:?})",
                    self.sweep.stale_after
                ),
            ));
        }
        Ok(())
    }

    pub fn with_provider_mode(mut self, mode: ProviderMode) -> Self {
        self.provider_mode = mode;
        self
    }

    pub fn with_transport_timeout(mut self, timeout: Duration) -> Self {
        self.transport_timeout = timeout;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_sweep(mut self, sweep: RetryConfig) -> Self {
        self.sweep = sweep;
        self
    }

    pub fn with_business(mut self, business: BusinessContext) -> Self {
        self.business = business;
        self
    }
}
