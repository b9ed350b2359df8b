// src/db/leaderboard.rs
//! Leaderboard records and the lazy reset rollover that runs inline during
//! resolution.

use crate::db::models::{Leaderboard, ResetSchedule, SortOrder};
use crate::db::{LeaderboardDB, Result};
use crate::errors::Error;
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::{debug, info};

fn align_to_hour(t: DateTime<Utc>, hour: u8) -> DateTime<Utc> {
    t.date_naive()
        .and_hms_opt(hour as u32, 0, 0)
        .unwrap()
        .and_utc()
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .unwrap()
        .pred_opt()
        .unwrap()
        .day()
}

fn add_one_month_clamped(date: NaiveDate) -> NaiveDate {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    let day = date.day().min(days_in_month(year, month));
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

/// The boundary that ends the period starting at `start`. `None` for
/// leaderboards that never reset.
///
/// Daily boundaries land on `reset_hour` UTC each day; weekly ones keep the
/// period start's weekday; monthly ones keep its day-of-month, clamped to the
/// last day of shorter months.
pub fn next_period_boundary(
    start: DateTime<Utc>,
    schedule: ResetSchedule,
    reset_hour: u8,
) -> Option<DateTime<Utc>> {
    let anchor = align_to_hour(start, reset_hour);
    match schedule {
        ResetSchedule::None => None,
        ResetSchedule::Daily => Some(if anchor > start {
            anchor
        } else {
            anchor + Duration::days(1)
        }),
        ResetSchedule::Weekly => Some(if anchor > start {
            anchor
        } else {
            anchor + Duration::days(7)
        }),
        ResetSchedule::Monthly => Some(if anchor > start {
            anchor
        } else {
            add_one_month_clamped(anchor.date_naive())
                .and_hms_opt(reset_hour as u32, 0, 0)
                .unwrap()
                .and_utc()
        }),
    }
}

/// Walks the period start forward across every boundary that has already
/// passed, so a service dormant for several periods catches up in one call.
/// Returns the new period start and the number of periods crossed, or `None`
/// when the current period is still active.
pub fn advance_period(
    start: DateTime<Utc>,
    schedule: ResetSchedule,
    reset_hour: u8,
    now: DateTime<Utc>,
) -> Option<(DateTime<Utc>, i64)> {
    let mut current = start;
    let mut periods = 0i64;

    while let Some(next) = next_period_boundary(current, schedule, reset_hour) {
        if now < next {
            break;
        }
        current = next;
        periods += 1;
    }

    if periods == 0 {
        None
    } else {
        Some((current, periods))
    }
}

pub(crate) fn row_to_leaderboard(row: &SqliteRow) -> Result<Leaderboard> {
    let sort_order: String = row.try_get("sort_order")?;
    let reset_schedule: String = row.try_get("reset_schedule")?;
    let reset_hour: i64 = row.try_get("reset_hour")?;
    let reset_hour = u8::try_from(reset_hour)
        .ok()
        .filter(|h| *h <= 23)
        .ok_or_else(|| Error::Parse(format!("reset_hour out of range: {reset_hour}")))?;
    Ok(Leaderboard {
        id: row.try_get("id")?,
        game_id: row.try_get("game_id")?,
        environment_id: row.try_get("environment_id")?,
        name: row.try_get("name")?,
        slug: row.try_get("slug")?,
        sort_order: sort_order.parse::<SortOrder>().map_err(Error::Parse)?,
        reset_schedule: reset_schedule
            .parse::<ResetSchedule>()
            .map_err(Error::Parse)?,
        reset_hour,
        current_version: row.try_get("current_version")?,
        current_period_start: DateTime::<Utc>::from_timestamp_millis(
            row.try_get("current_period_start")?,
        )
        .ok_or_else(|| Error::Parse("current_period_start out of range".to_string()))?,
        created_at: DateTime::<Utc>::from_timestamp_millis(row.try_get("created_at")?)
            .ok_or_else(|| Error::Parse("created_at out of range".to_string()))?,
    })
}

const LEADERBOARD_COLUMNS: &str = "id, game_id, environment_id, name, slug, sort_order, \
     reset_schedule, reset_hour, current_version, current_period_start, created_at";

impl LeaderboardDB {
    #[allow(clippy::too_many_arguments)]
    pub async fn create_leaderboard(
        &self,
        game_id: i64,
        environment_id: i64,
        name: &str,
        slug: Option<&str>,
        sort_order: SortOrder,
        reset_schedule: ResetSchedule,
        reset_hour: u8,
    ) -> Result<Leaderboard> {
        if reset_hour > 23 {
            return Err(Error::InvalidRequest(format!(
                "reset_hour must be 0-23, got {reset_hour}"
            )));
        }

        let period_start = Utc::now().timestamp_millis();
        let sql = format!(
            r#"
            INSERT INTO leaderboard (
                game_id, environment_id, name, slug,
                sort_order, reset_schedule, reset_hour, current_period_start
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            RETURNING {LEADERBOARD_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(game_id)
            .bind(environment_id)
            .bind(name)
            .bind(slug)
            .bind(sort_order.to_string())
            .bind(reset_schedule.to_string())
            .bind(reset_hour as i64)
            .bind(period_start)
            .fetch_one(&self.write_pool)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(d) if d.is_unique_violation() => {
                    Error::AlreadyExists(format!("leaderboard '{}'", slug.unwrap_or(name)))
                }
                _ => Error::Database(e),
            })?;

        row_to_leaderboard(&row)
    }

    pub async fn get_leaderboard(&self, id: i64) -> Result<Leaderboard> {
        let sql = format!("SELECT {LEADERBOARD_COLUMNS} FROM leaderboard WHERE id = ?1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.read_pool)
            .await?;

        let row = row.ok_or_else(|| Error::NotFound(format!("leaderboard {id}")))?;
        row_to_leaderboard(&row)
    }

    /// Finds the target leaderboard for a scope. With an identifier this is a
    /// slug match or a case-insensitive name match (slug wins when both hit);
    /// without one the earliest-created leaderboard in the scope is the
    /// implicit default.
    pub async fn find_leaderboard(
        &self,
        game_id: i64,
        environment_id: i64,
        identifier: Option<&str>,
    ) -> Result<Leaderboard> {
        let row = match identifier {
            Some(ident) => {
                let sql = format!(
                    r#"
                    SELECT {LEADERBOARD_COLUMNS}
                    FROM leaderboard
                    WHERE game_id = ?1 AND environment_id = ?2
                      AND (slug = ?3 OR name = ?3 COLLATE NOCASE)
                    ORDER BY (slug = ?3) DESC, created_at
                    LIMIT 1
                    "#
                );
                sqlx::query(&sql)
                    .bind(game_id)
                    .bind(environment_id)
                    .bind(ident)
                    .fetch_optional(&self.read_pool)
                    .await?
                    .ok_or_else(|| Error::NotFound(format!("leaderboard '{ident}'")))?
            }
            None => {
                let sql = format!(
                    r#"
                    SELECT {LEADERBOARD_COLUMNS}
                    FROM leaderboard
                    WHERE game_id = ?1 AND environment_id = ?2
                    ORDER BY created_at, id
                    LIMIT 1
                    "#
                );
                sqlx::query(&sql)
                    .bind(game_id)
                    .bind(environment_id)
                    .fetch_optional(&self.read_pool)
                    .await?
                    .ok_or_else(|| Error::NotFound("leaderboard".to_string()))?
            }
        };

        row_to_leaderboard(&row)
    }

    /// Resolves a leaderboard and performs any due reset rollover inline.
    /// Returns the up-to-date record plus whether a rollover happened, so the
    /// caller can fire the retention pruner.
    ///
    /// The persisted advance is a single conditional write guarded by the
    /// pre-read version: when concurrent resolvers race over the same
    /// boundary only one write lands, the losers re-read and converge on the
    /// winner's state instead of double-incrementing.
    pub async fn resolve_leaderboard(
        &self,
        game_id: i64,
        environment_id: i64,
        identifier: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(Leaderboard, bool)> {
        let mut lb = self
            .find_leaderboard(game_id, environment_id, identifier)
            .await?;
        let mut rolled = false;

        loop {
            let Some((new_start, periods)) = advance_period(
                lb.current_period_start,
                lb.reset_schedule,
                lb.reset_hour,
                now,
            ) else {
                break;
            };

            let new_version = lb.current_version + periods;
            let result = sqlx::query(
                r#"
                UPDATE leaderboard
                SET current_version = ?1, current_period_start = ?2
                WHERE id = ?3 AND current_version = ?4
                "#,
            )
            .bind(new_version)
            .bind(new_start.timestamp_millis())
            .bind(lb.id)
            .bind(lb.current_version)
            .execute(&self.write_pool)
            .await?;

            if result.rows_affected() == 1 {
                info!(
                    "leaderboard {} rolled over to version {} ({} period(s) elapsed)",
                    lb.id, new_version, periods
                );
                crate::metrics::VERSION_ROLLOVERS.inc_by(periods as f64);
                lb.current_version = new_version;
                lb.current_period_start = new_start;
                rolled = true;
                break;
            }

            // Lost the race to a concurrent resolver; re-read and retry.
            debug!("leaderboard {} rollover contended, re-reading", lb.id);
            lb = self.get_leaderboard(lb.id).await?;
        }

        Ok((lb, rolled))
    }

    pub async fn list_leaderboards(
        &self,
        game_id: i64,
        environment_id: i64,
    ) -> Result<Vec<Leaderboard>> {
        let sql = format!(
            r#"
            SELECT {LEADERBOARD_COLUMNS}
            FROM leaderboard
            WHERE game_id = ?1 AND environment_id = ?2
            ORDER BY created_at, id
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(game_id)
            .bind(environment_id)
            .fetch_all(&self.read_pool)
            .await?;

        rows.iter().map(row_to_leaderboard).collect()
    }

    /// Deletes a leaderboard; its scores cascade.
    pub async fn delete_leaderboard(&self, id: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM leaderboard WHERE id = ?1")
            .bind(id)
            .execute(&self.write_pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("leaderboard {id}")));
        }
        Ok(())
    }

    /// Rewinds a leaderboard's period start, bypassing the rollover guard.
    #[cfg(test)]
    pub async fn set_period_start(&self, id: i64, start: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE leaderboard SET current_period_start = ?1 WHERE id = ?2")
            .bind(start.timestamp_millis())
            .bind(id)
            .execute(&self.write_pool)
            .await?;
        Ok(())
    }
}
