// SPDX-License-Identifier: MIT
//! Common `Error` and `Result` types used throughout the library and application.
use crate::config::ConfigError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("db error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("failed to apply migrations: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("config file error: {0}")]
    ConfigFileError(#[from] ConfigError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("missing API key")]
    MissingCredential,

    #[error("malformed API key")]
    MalformedCredential,

    #[error("rate limit exceeded")]
    RateLimited { limit: u32, reset_at_ms: i64 },

    #[error("invalid API key")]
    InvalidCredential,

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("{0}")]
    Runtime(String),
}

pub type Result<T> = std::result::Result<T, Error>;
