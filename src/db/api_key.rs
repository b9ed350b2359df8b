// src/db/api_key.rs

use crate::constants::API_KEY_PREFIX;
use crate::db::models::ApiKey;
use crate::db::{LeaderboardDB, Result};
use crate::errors::Error;
use chrono::{DateTime, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

/// Scope resolved from a presented credential: the single (game, environment)
/// pair the key may act on.
#[derive(Debug, Clone)]
pub struct KeyScope {
    pub key_id: i64,
    pub game_id: i64,
    pub environment_id: i64,
    pub environment: String,
}

pub(crate) fn hash_key(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hex::encode(hasher.finalize())
}

fn row_to_api_key(row: &SqliteRow) -> Result<ApiKey> {
    Ok(ApiKey {
        id: row.try_get("id")?,
        game_id: row.try_get("game_id")?,
        environment_id: row.try_get("environment_id")?,
        key_prefix: row.try_get("key_prefix")?,
        last_used_at: row
            .try_get::<Option<i64>, _>("last_used_at")?
            .and_then(DateTime::<Utc>::from_timestamp_millis),
        created_at: DateTime::<Utc>::from_timestamp_millis(row.try_get("created_at")?)
            .ok_or_else(|| Error::Parse("created_at out of range".to_string()))?,
    })
}

impl LeaderboardDB {
    /// Creates an API key scoped to one (game, environment). Returns the raw
    /// key, which is shown to the caller exactly once; only its SHA-256 hash
    /// and a display prefix are stored.
    pub async fn create_api_key(&self, game_id: i64, environment_id: i64) -> Result<String> {
        let mut key_material = [0u8; 16];
        rand::rng().fill_bytes(&mut key_material);
        let raw = format!("{}{}", API_KEY_PREFIX, hex::encode(key_material));
        let key_hash = hash_key(&raw);
        let key_prefix = &raw[..API_KEY_PREFIX.len() + 8];

        sqlx::query(
            r#"
            INSERT INTO api_key (game_id, environment_id, key_hash, key_prefix)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(game_id)
        .bind(environment_id)
        .bind(&key_hash)
        .bind(key_prefix)
        .execute(&self.write_pool)
        .await?;

        Ok(raw)
    }

    /// Resolves a raw key to its scope by hash lookup, joining the owning
    /// environment for its name. Returns `None` when no stored hash matches.
    pub async fn lookup_api_key(&self, raw: &str) -> Result<Option<KeyScope>> {
        let key_hash = hash_key(raw);

        let row = sqlx::query(
            r#"
            SELECT k.id, k.game_id, k.environment_id, e.name AS environment
            FROM api_key k
            JOIN environment e ON e.id = k.environment_id
            WHERE k.key_hash = ?1
            "#,
        )
        .bind(&key_hash)
        .fetch_optional(&self.read_pool)
        .await?;

        Ok(match row {
            Some(row) => Some(KeyScope {
                key_id: row.try_get("id")?,
                game_id: row.try_get("game_id")?,
                environment_id: row.try_get("environment_id")?,
                environment: row.try_get("environment")?,
            }),
            None => None,
        })
    }

    /// Opportunistic `last_used_at` update. A lost update here is acceptable,
    /// so callers spawn this and only log failures.
    pub async fn touch_api_key(&self, key_id: i64) -> Result<()> {
        sqlx::query("UPDATE api_key SET last_used_at = unixepoch('subsec') * 1000 WHERE id = ?1")
            .bind(key_id)
            .execute(&self.write_pool)
            .await?;
        Ok(())
    }

    /// Retrieves all keys for a game (hashes are never returned).
    pub async fn list_api_keys(&self, game_id: i64) -> Result<Vec<ApiKey>> {
        let rows = sqlx::query(
            r#"
            SELECT id, game_id, environment_id, key_prefix, last_used_at, created_at
            FROM api_key
            WHERE game_id = ?1
            ORDER BY created_at
            "#,
        )
        .bind(game_id)
        .fetch_all(&self.read_pool)
        .await?;

        rows.iter().map(row_to_api_key).collect()
    }

    /// Revokes a key by id.
    pub async fn revoke_api_key(&self, id: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM api_key WHERE id = ?1")
            .bind(id)
            .execute(&self.write_pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("API key {id}")));
        }
        Ok(())
    }
}
