//! Client configuration.
//!
//! Loaded from an optional YAML file layered under `VELLUM__*` environment
//! overrides, e.g. `VELLUM__POOL__MAX_SESSIONS=8`. Durations are whole
//! milliseconds.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use vellum_session_pool::SessionPoolOptions;
use vellum_txn::RetryPolicy;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub pool: PoolConfig,
    pub retry: RetryConfig,
    pub backend: BackendConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub min_sessions: usize,
    pub max_sessions: usize,
    pub inc_step: usize,
    pub fail_on_session_leak: bool,
    pub acquire_timeout_ms: u64,
    pub close_grace_period_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        SessionPoolOptions::default().into()
    }
}

impl From<SessionPoolOptions> for PoolConfig {
    fn from(options: SessionPoolOptions) -> Self {
        Self {
            min_sessions: options.min_sessions,
            max_sessions: options.max_sessions,
            inc_step: options.inc_step,
            fail_on_session_leak: options.fail_on_session_leak,
            acquire_timeout_ms: options.acquire_timeout.as_millis() as u64,
            close_grace_period_ms: options.close_grace_period.as_millis() as u64,
        }
    }
}

impl From<&PoolConfig> for SessionPoolOptions {
    fn from(config: &PoolConfig) -> Self {
        Self {
            min_sessions: config.min_sessions,
            max_sessions: config.max_sessions,
            inc_step: config.inc_step,
            fail_on_session_leak: config.fail_on_session_leak,
            acquire_timeout: Duration::from_millis(config.acquire_timeout_ms),
            close_grace_period: Duration::from_millis(config.close_grace_period_ms),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub jitter: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryPolicy::default().into()
    }
}

impl From<RetryPolicy> for RetryConfig {
    fn from(policy: RetryPolicy) -> Self {
        Self {
            max_attempts: policy.max_attempts,
            base_delay_ms: policy.base_delay.as_millis() as u64,
            multiplier: policy.multiplier,
            jitter: policy.jitter,
            max_delay_ms: policy.max_delay.as_millis() as u64,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.base_delay_ms),
            multiplier: config.multiplier,
            jitter: config.jitter,
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

/// Settings for the in-process backend used by `vellum simulate`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub seed: u64,
    pub abort_probability: f64,
    pub min_latency_ms: u64,
    pub random_latency_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            abort_probability: 0.0,
            min_latency_ms: 0,
            random_latency_ms: 0,
        }
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("vellum").join("config.yaml"))
}

/// Loads `path` (or the default location) and applies environment overrides.
/// A missing file is not an error.
pub fn load_config(path: Option<&Path>) -> Result<ClientConfig> {
    let path = match path {
        Some(path) => Some(path.to_path_buf()),
        None => default_config_path(),
    };

    let mut builder = ::config::Config::builder();
    match &path {
        Some(path) if path.exists() => {
            info!(target: "vellum", path = %path.display(), "loading configuration");
            builder = builder.add_source(::config::File::from(path.as_path()).required(true));
        }
        Some(path) => {
            warn!(
                target: "vellum",
                path = %path.display(),
                "config file not found, using defaults"
            );
        }
        None => {}
    }

    let config: ClientConfig = builder
        .add_source(
            ::config::Environment::with_prefix("VELLUM")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("failed to assemble configuration")?
        .try_deserialize()
        .context("failed to parse configuration")?;
    Ok(config)
}
