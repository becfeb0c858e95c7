use std::path::Path;
use std::time::Duration;

use thiserror::Error;

use crate::cli::Args;
use crate::cluster::version::{ApiVersion, VersionParseError};

/// Upper bound for every interval and timeout setting, one week
pub const MAX_INTERVAL_SECS: u64 = 7 * 24 * 60 * 60;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load env file {path}: {source}")]
    EnvFile {
        path: String,
        #[source]
        source: dotenvy::Error,
    },

    #[error("Manager URL must start with http:// or https://, got '{0}'")]
    InvalidManagerUrl(String),

    #[error("Invalid API version: {0}")]
    InvalidApiVersion(#[from] VersionParseError),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("{name} must be at most {max}, got {value}")]
    TooLarge {
        name: &'static str,
        value: u64,
        max: u64,
    },
}

/// Validated runtime configuration
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub manager_url: String,
    pub agent_dns: String,
    pub agent_port: u16,
    pub api_version: Option<ApiVersion>,
    pub stats_interval: Duration,
    pub retention_ttl: Duration,
    pub discovery_interval: Duration,
    pub heartbeat_interval: Duration,
    pub retry: Duration,
    pub sample_concurrency: usize,
    pub request_timeout: Duration,
    pub keep_stale_on_error: bool,
    pub bind_addr: String,
    pub port: u16,
}

impl MonitorConfig {
    pub fn from_args(args: &Args) -> Result<Self, ConfigError> {
        let manager_url = args.manager_url.trim().trim_end_matches('/').to_string();
        if !(manager_url.starts_with("http://") || manager_url.starts_with("https://")) {
            return Err(ConfigError::InvalidManagerUrl(args.manager_url.clone()));
        }

        let bounded = |value: u64, name: &'static str| {
            if value == 0 {
                Err(ConfigError::Zero(name))
            } else if value > MAX_INTERVAL_SECS {
                Err(ConfigError::TooLarge {
                    name,
                    value,
                    max: MAX_INTERVAL_SECS,
                })
            } else {
                Ok(value)
            }
        };

        let stats_secs = bounded(args.stats_interval, "stats interval")?;
        let discovery_secs = bounded(args.discovery_interval, "discovery interval")?;
        let heartbeat_secs = bounded(args.heartbeat_interval, "heartbeat interval")?;
        let timeout_secs = bounded(args.request_timeout, "request timeout")?;
        if args.sample_concurrency == 0 {
            return Err(ConfigError::Zero("sample concurrency"));
        }

        let api_version = args
            .api_version
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::parse::<ApiVersion>)
            .transpose()?;

        let retention_ms = args
            .retention_ttl_ms
            .unwrap_or_else(|| stats_secs.saturating_mul(1000));

        Ok(Self {
            manager_url,
            agent_dns: args.agent_dns.clone(),
            agent_port: args.agent_port,
            api_version,
            stats_interval: Duration::from_secs(stats_secs),
            retention_ttl: Duration::from_millis(retention_ms),
            discovery_interval: Duration::from_secs(discovery_secs),
            heartbeat_interval: Duration::from_secs(heartbeat_secs),
            retry: Duration::from_millis(args.retry_ms),
            sample_concurrency: args.sample_concurrency,
            request_timeout: Duration::from_secs(timeout_secs),
            keep_stale_on_error: args.keep_stale_on_error,
            bind_addr: args.bind_addr.clone(),
            port: args.port,
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

// ============================================================================
// SBIO: I/O wrapper
// ============================================================================

/// Load `KEY=value` pairs from `path` into the process environment.
/// Variables already set in the environment win.
pub fn load_env_file(path: &Path) -> Result<(), ConfigError> {
    dotenvy::from_path(path).map_err(|source| ConfigError::EnvFile {
        path: path.display().to_string(),
        source,
    })
}
