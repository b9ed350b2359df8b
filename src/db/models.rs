// src/db/models.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Game {
    pub id: i64,
    pub owner: String,
    pub name: String,
    pub slug: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Environment {
    pub id: i64,
    pub game_id: i64,
    pub name: String,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
}

/// A stored credential. Only the SHA-256 hash and a display prefix are
/// persisted; the raw key is returned once at creation and never again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: i64,
    pub game_id: i64,
    pub environment_id: i64,
    pub key_prefix: String,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Leaderboard {
    pub id: i64,
    pub game_id: i64,
    pub environment_id: i64,
    pub name: String,
    pub slug: Option<String>,
    pub sort_order: SortOrder,
    pub reset_schedule: ResetSchedule,
    pub reset_hour: u8,
    pub current_version: i64,
    pub current_period_start: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Score {
    pub id: i64,
    pub leaderboard_id: i64,
    pub version: i64,
    pub player_guid: Option<String>,
    pub player_name: String,
    pub score: f64,
    pub metadata: Option<serde_json::Value>,
    pub is_migrated: bool,
    pub migrated_from: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Lower scores rank better.
    Asc,
    /// Higher scores rank better.
    Desc,
}

impl SortOrder {
    /// Whether `candidate` strictly improves on `existing` under this order.
    pub fn is_improvement(&self, candidate: f64, existing: f64) -> bool {
        match self {
            SortOrder::Asc => candidate < existing,
            SortOrder::Desc => candidate > existing,
        }
    }
}

impl std::fmt::Display for SortOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SortOrder::Asc => write!(f, "asc"),
            SortOrder::Desc => write!(f, "desc"),
        }
    }
}

impl std::str::FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            _ => Err(format!("Unknown sort order: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResetSchedule {
    None,
    Daily,
    Weekly,
    Monthly,
}

impl ResetSchedule {
    /// How many versions back archived scores are kept before pruning.
    /// `None` leaderboards never roll over, so there is nothing to prune.
    pub fn retained_versions(&self) -> Option<i64> {
        match self {
            ResetSchedule::None => None,
            ResetSchedule::Daily => Some(crate::constants::DAILY_RETAINED_VERSIONS),
            ResetSchedule::Weekly => Some(crate::constants::WEEKLY_RETAINED_VERSIONS),
            ResetSchedule::Monthly => Some(crate::constants::MONTHLY_RETAINED_VERSIONS),
        }
    }
}

impl std::fmt::Display for ResetSchedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResetSchedule::None => write!(f, "none"),
            ResetSchedule::Daily => write!(f, "daily"),
            ResetSchedule::Weekly => write!(f, "weekly"),
            ResetSchedule::Monthly => write!(f, "monthly"),
        }
    }
}

impl std::str::FromStr for ResetSchedule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(ResetSchedule::None),
            "daily" => Ok(ResetSchedule::Daily),
            "weekly" => Ok(ResetSchedule::Weekly),
            "monthly" => Ok(ResetSchedule::Monthly),
            _ => Err(format!("Unknown reset schedule: {}", s)),
        }
    }
}
