use domain_notifications::config::{ConfigError, env_or_default, env_parse, env_required};
use std::time::Duration;

/// Process-level settings for the worker binary
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// `APP_ENV`; "production" switches logs to JSON
    pub environment: String,
    pub database_url: String,
    pub max_connections: u32,
    pub connect_attempts: u32,
    /// Pause between retry sweeps
    pub sweep_interval: Duration,
    pub run_migrations: bool,
    pub metrics_port: u16,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            environment: env_or_default("APP_ENV", "development"),
            database_url: env_required("DATABASE_URL")?,
            max_connections: env_parse("DATABASE_MAX_CONNECTIONS", 10)?,
            connect_attempts: env_parse("DATABASE_CONNECT_ATTEMPTS", 5)?.max(1),
            sweep_interval: Duration::from_secs(
                env_parse("NOTIFY_SWEEP_INTERVAL_SECS", 120)?.max(1),
            ),
            run_migrations: env_parse("NOTIFY_RUN_MIGRATIONS", false)?,
            metrics_port: env_parse("NOTIFY_METRICS_PORT", 9102)?,
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}
