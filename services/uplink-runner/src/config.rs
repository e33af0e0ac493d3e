//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The bearer token is loaded from the UPLINK_TOKEN env var or token_file,
//! never stored in the TOML directly to avoid leaking secrets.

use common::Secret;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub uplink: UplinkConfig,
    #[serde(default)]
    pub pool: PoolSettings,
    pub ops: OpsConfig,
}

/// Upstream connection settings
#[derive(Debug, Deserialize)]
pub struct UplinkConfig {
    /// One proxy address per line, ordered; the front of the list is
    /// activated first.
    pub proxy_file: PathBuf,
    /// JSON session cache, created on first run.
    pub session_file: PathBuf,
    #[serde(skip)]
    pub token: Option<Secret<String>>,
    /// Path to a file containing the bearer token (alternative to the
    /// UPLINK_TOKEN env var)
    #[serde(default)]
    pub token_file: Option<PathBuf>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

/// Worker pool settings
#[derive(Debug, Deserialize)]
pub struct PoolSettings {
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_secs: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            ping_interval_secs: default_ping_interval(),
            reconcile_interval_secs: default_reconcile_interval(),
        }
    }
}

/// Operational HTTP endpoints (/health, /metrics)
#[derive(Debug, Deserialize)]
pub struct OpsConfig {
    pub listen_addr: SocketAddr,
}

fn default_request_timeout() -> u64 {
    10
}

fn default_max_concurrency() -> usize {
    100
}

fn default_ping_interval() -> u64 {
    30
}

fn default_reconcile_interval() -> u64 {
    3
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Token resolution order:
    /// 1. UPLINK_TOKEN env var
    /// 2. token_file path from config
    ///
    /// A missing token is a load error: every API call carries it, so the
    /// service cannot start without one.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if config.uplink.request_timeout_secs == 0 {
            return Err(common::Error::Config(
                "request_timeout_secs must be greater than 0".into(),
            ));
        }
        if config.pool.max_concurrency == 0 {
            return Err(common::Error::Config(
                "max_concurrency must be greater than 0".into(),
            ));
        }
        if config.pool.ping_interval_secs == 0 {
            return Err(common::Error::Config(
                "ping_interval_secs must be greater than 0".into(),
            ));
        }
        if config.pool.reconcile_interval_secs == 0 {
            return Err(common::Error::Config(
                "reconcile_interval_secs must be greater than 0".into(),
            ));
        }

        // Resolve token: env var takes precedence over file
        if let Ok(token) = std::env::var("UPLINK_TOKEN") {
            config.uplink.token = Some(Secret::new(token));
        } else if let Some(ref token_file) = config.uplink.token_file {
            let raw = std::fs::read_to_string(token_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read token_file {}: {e}",
                    token_file.display()
                ))
            })?;
            config.uplink.token = Secret::from_trimmed(&raw);
        }

        if config.uplink.token.is_none() {
            return Err(common::Error::Config(
                "no bearer token: set UPLINK_TOKEN or token_file".into(),
            ));
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("uplink-runner.toml")
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.uplink.request_timeout_secs)
    }

    pub fn pool_config(&self) -> uplink_pool::PoolConfig {
        uplink_pool::PoolConfig {
            max_concurrency: self.pool.max_concurrency,
            ping_interval: Duration::from_secs(self.pool.ping_interval_secs),
            reconcile_interval: Duration::from_secs(self.pool.reconcile_interval_secs),
        }
    }
}
