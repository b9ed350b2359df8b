//! Common constants shared by the rate limiter, resolver, and REST layer.
pub const RATE_LIMIT_WINDOW_MS: i64 = 60_000;
pub const RATE_LIMIT_MAX_REQUESTS: u32 = 60;

pub const API_KEY_PREFIX: &str = "tld_";

pub const DEFAULT_PAGE_SIZE: i64 = 10;
pub const MAX_PAGE_SIZE: i64 = 100;

pub const DAILY_RETAINED_VERSIONS: i64 = 30;
pub const WEEKLY_RETAINED_VERSIONS: i64 = 12;
pub const MONTHLY_RETAINED_VERSIONS: i64 = 12;
