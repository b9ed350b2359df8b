// SPDX-License-Identifier: MIT
//! Provides the queries and pools needed to manipulate the state of the
//! leaderboard service. The core operations (leaderboard resolution, score
//! upserts, rank computation, retention pruning) are implemented in the
//! submodules.

pub mod api_key;
pub mod environment;
pub mod game;
pub mod leaderboard;
pub mod models;
pub mod score;
#[cfg(test)]
pub mod tests;

use crate::config::Config;
use crate::errors::Error;
pub use crate::errors::Result;
use sqlx::migrate::Migrator;
use sqlx::{Pool, Sqlite};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Provides methods to interact with the SQLite database that is core to
/// tallyd. The write pool is capped at a single connection so conditional
/// writes for the same player serialize behind it.
pub struct LeaderboardDB {
    pub write_pool: Pool<Sqlite>,
    pub read_pool: Pool<Sqlite>,
    pub path: String,
}

impl LeaderboardDB {
    /// Creates a new `LeaderboardDB` instance with a connection pool and applies migrations.
    pub async fn new<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

        let path_str = path
            .as_ref()
            .to_str()
            .ok_or_else(|| Error::Config("Invalid path".into()))?
            .to_string();

        let options = SqliteConnectOptions::new()
            .filename(&path_str)
            .foreign_keys(true)
            .create_if_missing(true);

        let write_pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options.clone())
            .await
            .map_err(Error::Database)?;

        let read_pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .map_err(Error::Database)?;

        MIGRATOR.run(&write_pool).await.map_err(Error::Migrate)?;

        Ok(Self {
            write_pool,
            read_pool,
            path: path_str,
        })
    }

    /// Alternative constructor: create from config and apply pragmas.
    pub async fn with_config(config: &Config) -> Result<Self> {
        let db = Self::new(&config.database.file).await?;
        db.apply_pragmas(config).await;
        Ok(db)
    }

    async fn apply_pragmas(&self, config: &Config) {
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&self.write_pool)
            .await
            .ok();

        let sync_mode = if !config.database.fsync {
            "PRAGMA synchronous = OFF"
        } else {
            "PRAGMA synchronous = FULL"
        };
        sqlx::query(sync_mode).execute(&self.write_pool).await.ok();
    }
}

#[allow(unused)]
pub use models::*;
