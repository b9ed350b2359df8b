// src/db/score.rs
//! Score ledger: conditional best-score upserts, ranked listing, and
//! version-retention pruning.

use crate::db::models::{Leaderboard, Score, SortOrder};
use crate::db::{LeaderboardDB, Result};
use crate::errors::Error;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::info;

/// Result of a submit: the stored row's id, the score that now stands for the
/// player, their rank within the current version, and whether this submission
/// changed the ledger.
#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    pub id: i64,
    pub final_score: f64,
    pub rank: i64,
    pub is_new_high_score: bool,
}

fn row_to_score(row: &SqliteRow) -> Result<Score> {
    let metadata: Option<String> = row.try_get("metadata")?;
    Ok(Score {
        id: row.try_get("id")?,
        leaderboard_id: row.try_get("leaderboard_id")?,
        version: row.try_get("version")?,
        player_guid: row.try_get("player_guid")?,
        player_name: row.try_get("player_name")?,
        score: row.try_get("score")?,
        metadata: metadata
            .map(|m| serde_json::from_str(&m))
            .transpose()
            .map_err(Error::JsonParse)?,
        is_migrated: row.try_get("is_migrated")?,
        migrated_from: row.try_get("migrated_from")?,
        created_at: DateTime::<Utc>::from_timestamp_millis(row.try_get("created_at")?)
            .ok_or_else(|| Error::Parse("created_at out of range".to_string()))?,
        updated_at: DateTime::<Utc>::from_timestamp_millis(row.try_get("updated_at")?)
            .ok_or_else(|| Error::Parse("updated_at out of range".to_string()))?,
    })
}

/// `<` for ascending boards (lower is better), `>` for descending.
fn better_than(sort_order: SortOrder) -> &'static str {
    match sort_order {
        SortOrder::Asc => "<",
        SortOrder::Desc => ">",
    }
}

const SCORE_COLUMNS: &str = "id, leaderboard_id, version, player_guid, player_name, score, \
     metadata, is_migrated, migrated_from, created_at, updated_at";

impl LeaderboardDB {
    /// Records a score for a player in the leaderboard's current version.
    ///
    /// Inserts when the player has no row in this version; otherwise updates
    /// in place only when the new score strictly improves on the stored one
    /// under the board's sort order. Resubmitting an equal or worse score is
    /// a no-op that still reports the standing score and rank. The read, the
    /// conditional write, and the rank count all run in one transaction on
    /// the single-writer pool.
    pub async fn submit_score(
        &self,
        leaderboard: &Leaderboard,
        player_guid: &str,
        player_name: &str,
        score: f64,
        metadata: Option<&serde_json::Value>,
    ) -> Result<SubmitOutcome> {
        let metadata_json = metadata.map(serde_json::Value::to_string);
        let mut tx = self.write_pool.begin().await?;

        let existing = sqlx::query(
            r#"
            SELECT id, score FROM score
            WHERE leaderboard_id = ?1 AND version = ?2 AND player_guid = ?3
            "#,
        )
        .bind(leaderboard.id)
        .bind(leaderboard.current_version)
        .bind(player_guid)
        .fetch_optional(&mut *tx)
        .await?;

        let (id, final_score, is_new_high_score) = match existing {
            None => {
                let id: i64 = sqlx::query_scalar(
                    r#"
                    INSERT INTO score (
                        leaderboard_id, version, player_guid, player_name, score, metadata
                    )
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                    RETURNING id
                    "#,
                )
                .bind(leaderboard.id)
                .bind(leaderboard.current_version)
                .bind(player_guid)
                .bind(player_name)
                .bind(score)
                .bind(&metadata_json)
                .fetch_one(&mut *tx)
                .await?;
                (id, score, true)
            }
            Some(row) => {
                let id: i64 = row.try_get("id")?;
                let stored: f64 = row.try_get("score")?;
                if leaderboard.sort_order.is_improvement(score, stored) {
                    sqlx::query(
                        r#"
                        UPDATE score
                        SET score = ?1, player_name = ?2, metadata = ?3,
                            updated_at = unixepoch('subsec') * 1000
                        WHERE id = ?4
                        "#,
                    )
                    .bind(score)
                    .bind(player_name)
                    .bind(&metadata_json)
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                    (id, score, true)
                } else {
                    (id, stored, false)
                }
            }
        };

        // Rank is 1 plus the number of strictly better rows in this version;
        // ties share a rank.
        let rank_sql = format!(
            "SELECT COUNT(*) FROM score \
             WHERE leaderboard_id = ?1 AND version = ?2 AND score {} ?3",
            better_than(leaderboard.sort_order)
        );
        let better: i64 = sqlx::query_scalar(&rank_sql)
            .bind(leaderboard.id)
            .bind(leaderboard.current_version)
            .bind(final_score)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;

        if is_new_high_score {
            crate::metrics::SCORE_SUBMISSIONS.inc();
        }

        Ok(SubmitOutcome {
            id,
            final_score,
            rank: better + 1,
            is_new_high_score,
        })
    }

    /// Returns one page of the leaderboard's current version ordered
    /// best-first, plus the total row count for that version. Equal scores
    /// order by earliest achievement.
    pub async fn list_scores(
        &self,
        leaderboard: &Leaderboard,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Score>, i64)> {
        let direction = match leaderboard.sort_order {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };
        let sql = format!(
            r#"
            SELECT {SCORE_COLUMNS}
            FROM score
            WHERE leaderboard_id = ?1 AND version = ?2
            ORDER BY score {direction}, updated_at, id
            LIMIT ?3 OFFSET ?4
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(leaderboard.id)
            .bind(leaderboard.current_version)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.read_pool)
            .await?;

        let total_count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM score WHERE leaderboard_id = ?1 AND version = ?2",
        )
        .bind(leaderboard.id)
        .bind(leaderboard.current_version)
        .fetch_one(&self.read_pool)
        .await?;

        let scores = rows.iter().map(row_to_score).collect::<Result<Vec<_>>>()?;
        Ok((scores, total_count))
    }

    /// Point lookup of one player's standing in the leaderboard's current
    /// version: their score row and per-player rank (1 plus strictly better
    /// rows). `None` when the player has no row in this version.
    pub async fn player_rank(
        &self,
        leaderboard: &Leaderboard,
        player_guid: &str,
    ) -> Result<Option<(Score, i64)>> {
        let sql = format!(
            r#"
            SELECT {SCORE_COLUMNS}
            FROM score
            WHERE leaderboard_id = ?1 AND version = ?2 AND player_guid = ?3
            "#
        );
        let row = sqlx::query(&sql)
            .bind(leaderboard.id)
            .bind(leaderboard.current_version)
            .bind(player_guid)
            .fetch_optional(&self.read_pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let score = row_to_score(&row)?;

        let rank_sql = format!(
            "SELECT COUNT(*) FROM score \
             WHERE leaderboard_id = ?1 AND version = ?2 AND score {} ?3",
            better_than(leaderboard.sort_order)
        );
        let better: i64 = sqlx::query_scalar(&rank_sql)
            .bind(leaderboard.id)
            .bind(leaderboard.current_version)
            .bind(score.score)
            .fetch_one(&self.read_pool)
            .await?;

        Ok(Some((score, better + 1)))
    }

    /// Deletes archived score rows older than the schedule's retention
    /// window. Returns how many rows were removed. Schedules that never roll
    /// over retain everything.
    pub async fn prune_versions(
        &self,
        leaderboard_id: i64,
        schedule: crate::db::models::ResetSchedule,
        current_version: i64,
    ) -> Result<u64> {
        let Some(retained) = schedule.retained_versions() else {
            return Ok(0);
        };

        let cutoff = current_version - retained;
        if cutoff < 1 {
            return Ok(0);
        }

        let result = sqlx::query("DELETE FROM score WHERE leaderboard_id = ?1 AND version <= ?2")
            .bind(leaderboard_id)
            .bind(cutoff)
            .execute(&self.write_pool)
            .await?;

        let deleted = result.rows_affected();
        if deleted > 0 {
            info!(
                "pruned {} score row(s) from leaderboard {} (versions <= {})",
                deleted, leaderboard_id, cutoff
            );
        }
        Ok(deleted)
    }
}
