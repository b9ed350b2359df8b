// src/db/game.rs

use crate::db::models::Game;
use crate::db::{LeaderboardDB, Result};
use crate::errors::Error;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

pub(crate) fn row_to_game(row: &SqliteRow) -> Result<Game> {
    Ok(Game {
        id: row.try_get("id")?,
        owner: row.try_get("owner")?,
        name: row.try_get("name")?,
        slug: row.try_get("slug")?,
        created_at: DateTime::<Utc>::from_timestamp_millis(row.try_get("created_at")?)
            .ok_or_else(|| Error::Parse("created_at out of range".to_string()))?,
    })
}

impl LeaderboardDB {
    /// Creates a new game. The slug is immutable once created; a duplicate
    /// slug surfaces as `AlreadyExists`.
    pub async fn create_game(&self, owner: &str, name: &str, slug: &str) -> Result<Game> {
        let row = sqlx::query(
            r#"
            INSERT INTO game (owner, name, slug)
            VALUES (?1, ?2, ?3)
            RETURNING id, owner, name, slug, created_at
            "#,
        )
        .bind(owner)
        .bind(name)
        .bind(slug)
        .fetch_one(&self.write_pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(d) if d.is_unique_violation() => {
                Error::AlreadyExists(format!("game '{slug}'"))
            }
            _ => Error::Database(e),
        })?;

        row_to_game(&row)
    }

    /// Retrieves a game by slug.
    pub async fn get_game_by_slug(&self, slug: &str) -> Result<Game> {
        let row = sqlx::query(
            "SELECT id, owner, name, slug, created_at FROM game WHERE slug = ?1",
        )
        .bind(slug)
        .fetch_optional(&self.read_pool)
        .await?;

        let row = row.ok_or_else(|| Error::NotFound(format!("game '{slug}'")))?;
        row_to_game(&row)
    }

    /// Retrieves all games owned by `owner`, oldest first.
    pub async fn list_games(&self, owner: &str) -> Result<Vec<Game>> {
        let rows = sqlx::query(
            r#"
            SELECT id, owner, name, slug, created_at
            FROM game
            WHERE owner = ?1
            ORDER BY created_at
            "#,
        )
        .bind(owner)
        .fetch_all(&self.read_pool)
        .await?;

        rows.iter().map(row_to_game).collect()
    }

    /// Deletes a game. Environments, leaderboards, keys, and scores cascade.
    pub async fn delete_game(&self, id: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM game WHERE id = ?1")
            .bind(id)
            .execute(&self.write_pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("game {id}")));
        }
        Ok(())
    }
}
