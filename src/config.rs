// SPDX-License-Identifier: MIT
//! Structs used to configure `start_server` and the `tallyd` command line
//! application in general.
//!
//! Typically instantiated using `serde_yaml`.
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

const DEFAULT_CONFIG_STR: &str = include_str!("../etc/example-config.yml");

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(deserialize_with = "deserialize_socket_addrs")]
    pub listen: Vec<SocketAddr>,
    pub admin_token: String,
    pub tls: TlsConfig,
}

// Custom deserializer for SocketAddr vector
fn deserialize_socket_addrs<'de, D>(deserializer: D) -> Result<Vec<SocketAddr>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let strs: Vec<String> = Vec::deserialize(deserializer)?;
    let mut addrs = Vec::with_capacity(strs.len());

    for addr_str in strs {
        let addr = addr_str.parse().map_err(|e| {
            serde::de::Error::custom(format!("Invalid socket address '{}': {}", addr_str, e))
        })?;
        addrs.push(addr);
    }

    Ok(addrs)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    pub enable: bool,
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub file: PathBuf,

    #[serde(default)]
    pub fsync: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_rate_window")]
    pub window: String,

    #[serde(default = "default_rate_max_requests")]
    pub max_requests: u32,

    #[serde(default = "default_sweep_interval")]
    pub sweep_interval: String,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window: default_rate_window(),
            max_requests: default_rate_max_requests(),
            sweep_interval: default_sweep_interval(),
        }
    }
}

fn default_rate_window() -> String {
    "60s".to_string()
}

fn default_rate_max_requests() -> u32 {
    crate::constants::RATE_LIMIT_MAX_REQUESTS
}

fn default_sweep_interval() -> String {
    "60s".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    pub level: String,
}

impl Config {
    /// Fixed configuration for tests: in-process HTTP, throwaway database.
    pub fn test_default() -> Self {
        Self {
            server: ServerConfig {
                listen: vec!["127.0.0.1:18080".parse().unwrap()],
                admin_token: "test".to_string(),
                tls: TlsConfig {
                    enable: false,
                    cert_file: None,
                    key_file: None,
                },
            },
            database: DatabaseConfig {
                file: PathBuf::from("/tmp/tallyd-test.db"),
                fsync: false,
            },
            rate_limit: RateLimitConfig::default(),
            log: LogConfig {
                level: "debug".to_string(),
            },
        }
    }

    pub fn from_yaml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_yaml_str(&contents),
            Err(e) => {
                warn!("could not open config ({e}), using default config");
                Self::from_yaml_str(DEFAULT_CONFIG_STR)
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.server.admin_token.is_empty() {
            return Err(ConfigError::Invalid("admin_token must not be empty".into()));
        }

        if let Err(e) = parse_duration(&self.rate_limit.window) {
            return Err(ConfigError::Invalid(format!(
                "Invalid rate limit window: {e}"
            )));
        }
        if let Err(e) = parse_duration(&self.rate_limit.sweep_interval) {
            return Err(ConfigError::Invalid(format!("Invalid sweep interval: {e}")));
        }
        if self.rate_limit.max_requests == 0 {
            return Err(ConfigError::Invalid(
                "rate limit max_requests must be at least 1".into(),
            ));
        }

        if self.server.tls.enable
            && (self.server.tls.cert_file.is_none() || self.server.tls.key_file.is_none())
        {
            return Err(ConfigError::Invalid(
                "TLS enabled but cert_file or key_file missing".into(),
            ));
        }

        Ok(())
    }

    pub fn get_rate_limit_window(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.rate_limit.window)
            .map_err(|e| ConfigError::Invalid(format!("Failed to parse rate limit window: {e}")))
    }

    pub fn get_sweep_interval(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.rate_limit.sweep_interval)
            .map_err(|e| ConfigError::Invalid(format!("Failed to parse sweep interval: {e}")))
    }
}

pub fn parse_duration(duration_str: &str) -> Result<Duration, ConfigError> {
    let mut s = duration_str.to_string();
    if s.ends_with("ms") {
        s.truncate(s.len() - 2);
        Ok(Duration::from_millis(s.parse::<u64>().map_err(|e| {
            ConfigError::Invalid(format!("Invalid milliseconds value: {e}"))
        })?))
    } else if s.ends_with('s') {
        s.truncate(s.len() - 1);
        Ok(Duration::from_secs(s.parse::<u64>().map_err(|e| {
            ConfigError::Invalid(format!("Invalid seconds value: {e}"))
        })?))
    } else if s.ends_with('h') {
        s.truncate(s.len() - 1);
        Ok(Duration::from_secs(
            s.parse::<u64>()
                .map_err(|e| ConfigError::Invalid(format!("Invalid hours value: {e}")))?
                * 3600,
        ))
    } else if s.ends_with('d') {
        s.truncate(s.len() - 1);
        Ok(Duration::from_secs(
            s.parse::<u64>()
                .map_err(|e| ConfigError::Invalid(format!("Invalid days value: {e}")))?
                * 86400,
        ))
    } else {
        Err(ConfigError::Invalid(format!(
            "invalid suffix in duration: {duration_str}"
        )))
    }
}
