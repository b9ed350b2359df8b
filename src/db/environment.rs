// src/db/environment.rs

use crate::db::models::Environment;
use crate::db::{LeaderboardDB, Result};
use crate::errors::Error;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

pub(crate) fn row_to_environment(row: &SqliteRow) -> Result<Environment> {
    Ok(Environment {
        id: row.try_get("id")?,
        game_id: row.try_get("game_id")?,
        name: row.try_get("name")?,
        is_default: row.try_get("is_default")?,
        created_at: DateTime::<Utc>::from_timestamp_millis(row.try_get("created_at")?)
            .ok_or_else(|| Error::Parse("created_at out of range".to_string()))?,
    })
}

impl LeaderboardDB {
    /// Creates an environment under a game. The first environment always
    /// becomes the default; creating a later one with `is_default` moves the
    /// flag in the same transaction, so exactly one default exists per game.
    pub async fn create_environment(
        &self,
        game_id: i64,
        name: &str,
        is_default: bool,
    ) -> Result<Environment> {
        let mut tx = self.write_pool.begin().await?;

        let existing: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM environment WHERE game_id = ?1")
                .bind(game_id)
                .fetch_one(&mut *tx)
                .await?;

        let becomes_default = is_default || existing == 0;
        if becomes_default && existing > 0 {
            sqlx::query("UPDATE environment SET is_default = 0 WHERE game_id = ?1")
                .bind(game_id)
                .execute(&mut *tx)
                .await?;
        }

        let row = sqlx::query(
            r#"
            INSERT INTO environment (game_id, name, is_default)
            VALUES (?1, ?2, ?3)
            RETURNING id, game_id, name, is_default, created_at
            "#,
        )
        .bind(game_id)
        .bind(name)
        .bind(becomes_default)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(d) if d.is_unique_violation() => {
                Error::AlreadyExists(format!("environment '{name}'"))
            }
            _ => Error::Database(e),
        })?;

        let environment = row_to_environment(&row)?;
        tx.commit().await.map_err(Error::Database)?;
        Ok(environment)
    }

    /// Retrieves an environment by name within a game.
    pub async fn get_environment(&self, game_id: i64, name: &str) -> Result<Environment> {
        let row = sqlx::query(
            r#"
            SELECT id, game_id, name, is_default, created_at
            FROM environment
            WHERE game_id = ?1 AND name = ?2
            "#,
        )
        .bind(game_id)
        .bind(name)
        .fetch_optional(&self.read_pool)
        .await?;

        let row = row.ok_or_else(|| Error::NotFound(format!("environment '{name}'")))?;
        row_to_environment(&row)
    }

    /// Retrieves all environments for a game, oldest first.
    pub async fn list_environments(&self, game_id: i64) -> Result<Vec<Environment>> {
        let rows = sqlx::query(
            r#"
            SELECT id, game_id, name, is_default, created_at
            FROM environment
            WHERE game_id = ?1
            ORDER BY created_at
            "#,
        )
        .bind(game_id)
        .fetch_all(&self.read_pool)
        .await?;

        rows.iter().map(row_to_environment).collect()
    }

    /// Deletes an environment. Deleting the default is forbidden while the
    /// game still has environments; leaderboards and scores cascade.
    pub async fn delete_environment(&self, id: i64) -> Result<()> {
        let is_default: Option<bool> =
            sqlx::query_scalar("SELECT is_default FROM environment WHERE id = ?1")
                .bind(id)
                .fetch_optional(&self.write_pool)
                .await?;

        match is_default {
            None => Err(Error::NotFound(format!("environment {id}"))),
            Some(true) => Err(Error::InvalidRequest(
                "cannot delete the default environment".to_string(),
            )),
            Some(false) => {
                sqlx::query("DELETE FROM environment WHERE id = ?1")
                    .bind(id)
                    .execute(&self.write_pool)
                    .await?;
                Ok(())
            }
        }
    }
}
