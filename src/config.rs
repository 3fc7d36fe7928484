//! Runtime settings, loaded from `ACCRUAL_*` environment variables.

use std::time::Duration;

use config::{Config, ConfigError, Environment};
use serde::Deserialize;

use crate::reconciler::RetryPolicy;

/// Flat settings as they appear in the environment, durations in milliseconds.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    /// Base URL of the accrual oracle (`ACCRUAL_SYSTEM_ADDRESS`).
    pub system_address: String,
    pub request_timeout_ms: u64,
    pub min_request_interval_ms: u64,
    pub poll_delay_ms: u64,
    pub rate_limit_delay_ms: u64,
    pub max_rate_limit_delay_ms: u64,
    pub retry_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub max_attempts: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            system_address: "http://localhost:8080".to_string(),
            request_timeout_ms: 5_000,
            min_request_interval_ms: 1_000,
            poll_delay_ms: 1_000,
            rate_limit_delay_ms: 60_000,
            max_rate_limit_delay_ms: 600_000,
            retry_backoff_ms: 500,
            max_backoff_ms: 30_000,
            max_attempts: 3,
        }
    }
}

impl Settings {
    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_environment(Environment::with_prefix("ACCRUAL"))
    }

    fn from_environment(env: Environment) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(env.prefix_separator("_").try_parsing(true))
            .build()?
            .try_deserialize()
    }

    pub fn oracle(&self) -> OracleConfig {
        OracleConfig {
            base_url: self.system_address.clone(),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
        }
    }

    pub fn dispatcher(&self) -> DispatcherConfig {
        DispatcherConfig {
            min_request_interval: Duration::from_millis(self.min_request_interval_ms),
            retry: RetryPolicy {
                poll_delay: Duration::from_millis(self.poll_delay_ms),
                rate_limit_delay: Duration::from_millis(self.rate_limit_delay_ms),
                max_rate_limit_delay: Duration::from_millis(self.max_rate_limit_delay_ms),
                initial_backoff: Duration::from_millis(self.retry_backoff_ms),
                max_backoff: Duration::from_millis(self.max_backoff_ms),
                max_attempts: self.max_attempts,
            },
        }
    }
}

/// Settings consumed by [`HttpOracle`](crate::oracle::HttpOracle).
#[derive(Debug, Clone)]
pub struct OracleConfig {
    pub base_url: String,
    pub request_timeout: Duration,
}

/// Settings consumed by [`Dispatcher`](crate::dispatcher::Dispatcher).
#[derive(Debug, Clone, Default)]
pub struct DispatcherConfig {
    /// Global minimum gap between two consecutive oracle requests.
    pub min_request_interval: Duration,
    pub retry: RetryPolicy,
}
