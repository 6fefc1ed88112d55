use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub exit: ExitConfig,
    #[serde(default)]
    pub indicator: IndicatorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Retry engine budget. Attempt-count-based, not wall-clock, matching a fixed
/// polling cadence under an external scheduler.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts for a retried remote call
    #[serde(default = "default_retry_attempts")]
    pub max_attempts: u32,
    /// Delay between attempts in milliseconds
    #[serde(default = "default_retry_delay_ms")]
    pub delay_ms: u64,
    /// Double the delay after each failed attempt
    #[serde(default)]
    pub backoff: bool,
}

fn default_retry_attempts() -> u32 {
    5
}

fn default_retry_delay_ms() -> u64 {
    500
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_attempts(),
            delay_ms: default_retry_delay_ms(),
            backoff: false,
        }
    }
}

impl RetryConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Order reconciler budget
#[derive(Debug, Clone, Deserialize)]
pub struct ReconcileConfig {
    /// Maximum order-history polls before giving up on a target state
    #[serde(default = "default_max_polls")]
    pub max_polls: u32,
    /// Delay between history polls in milliseconds
    #[serde(default = "default_poll_delay_ms")]
    pub poll_delay_ms: u64,
}

fn default_max_polls() -> u32 {
    10
}

fn default_poll_delay_ms() -> u64 {
    1000
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            max_polls: default_max_polls(),
            poll_delay_ms: default_poll_delay_ms(),
        }
    }
}

impl ReconcileConfig {
    pub fn poll_delay(&self) -> Duration {
        Duration::from_millis(self.poll_delay_ms)
    }
}

/// Exit-strategy pacing
#[derive(Debug, Clone, Deserialize)]
pub struct ExitConfig {
    /// Delay before a below-threshold delta checker re-queues itself (ms)
    #[serde(default = "default_requeue_delay_ms")]
    pub requeue_delay_ms: u64,
    /// Delay between skew re-checks during entry (ms)
    #[serde(default = "default_skew_recheck_delay_ms")]
    pub skew_recheck_delay_ms: u64,
}

fn default_requeue_delay_ms() -> u64 {
    60_000
}

fn default_skew_recheck_delay_ms() -> u64 {
    2_000
}

impl Default for ExitConfig {
    fn default() -> Self {
        Self {
            requeue_delay_ms: default_requeue_delay_ms(),
            skew_recheck_delay_ms: default_skew_recheck_delay_ms(),
        }
    }
}

impl ExitConfig {
    pub fn requeue_delay(&self) -> Duration {
        Duration::from_millis(self.requeue_delay_ms)
    }

    pub fn skew_recheck_delay(&self) -> Duration {
        Duration::from_millis(self.skew_recheck_delay_ms)
    }
}

/// Indicator/option-chain service endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct IndicatorConfig {
    #[serde(default = "default_indicator_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
}

fn default_indicator_url() -> String {
    "https://indicator.signalx.trade".to_string()
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            base_url: default_indicator_url(),
            api_key: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            .add_source(
                File::from(config_dir.join(
                    std::env::var("LEGWORK_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (LEGWORK_RETRY__MAX_ATTEMPTS, etc.)
            .add_source(
                Environment::with_prefix("LEGWORK")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.retry.max_attempts == 0 {
            errors.push("retry.max_attempts must be at least 1".to_string());
        }

        if self.reconcile.max_polls == 0 {
            errors.push("reconcile.max_polls must be at least 1".to_string());
        }

        if self.indicator.base_url.is_empty() {
            errors.push("indicator.base_url must not be empty".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.reconcile.max_polls, 10);
        assert_eq!(config.exit.requeue_delay_ms, 60_000);
    }

    #[test]
    fn zero_budgets_rejected() {
        let mut config = AppConfig::default();
        config.retry.max_attempts = 0;
        config.reconcile.max_polls = 0;
        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 2);
    }
}
