// SPDX-License-Identifier: MIT
//! Bearer API key validation for the score endpoints, including the
//! per-key rate limit check.

use crate::constants::API_KEY_PREFIX;
use crate::db::LeaderboardDB;
use crate::errors::{Error, Result};
use crate::ratelimit::{RateLimitDecision, RateLimiter};
use std::sync::Arc;
use tracing::debug;

/// Everything a handler needs once a request is admitted: the scope the key
/// grants and the rate decision that produced the response headers.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub game_id: i64,
    pub environment_id: i64,
    pub environment: String,
    pub rate: RateLimitDecision,
}

pub struct Authenticator {
    db: Arc<LeaderboardDB>,
    pub limiter: RateLimiter,
}

impl Authenticator {
    pub fn new(db: Arc<LeaderboardDB>, limiter: RateLimiter) -> Self {
        Self { db, limiter }
    }

    /// Validates the `Authorization` header value. Checks run in a fixed
    /// order: header present, `Bearer tld_...` shape, rate limit, then hash
    /// lookup — so a flooding client is rejected before the database is
    /// touched, and a missing key is never reported as rate limited.
    pub async fn validate(&self, header: Option<&str>) -> Result<AuthContext> {
        let header = header.ok_or(Error::MissingCredential)?;
        let raw = header
            .strip_prefix("Bearer ")
            .ok_or(Error::MalformedCredential)?
            .trim();
        if !raw.starts_with(API_KEY_PREFIX) {
            return Err(Error::MalformedCredential);
        }

        let rate = self.limiter.check(raw).await;
        if !rate.allowed {
            crate::metrics::RATE_LIMITED.inc();
            return Err(Error::RateLimited {
                limit: rate.limit,
                reset_at_ms: rate.reset_at_ms,
            });
        }

        let scope = self
            .db
            .lookup_api_key(raw)
            .await?
            .ok_or(Error::InvalidCredential)?;

        // last_used_at is advisory; update it off the request path and only
        // log when it fails.
        let db = Arc::clone(&self.db);
        let key_id = scope.key_id;
        tokio::spawn(async move {
            if let Err(e) = db.touch_api_key(key_id).await {
                debug!("failed to update last_used_at for key {key_id}: {e}");
            }
        });

        Ok(AuthContext {
            game_id: scope.game_id,
            environment_id: scope.environment_id,
            environment: scope.environment,
            rate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::{setup_db, setup_test_scope};
    use std::time::Duration;

    async fn authenticator() -> (Authenticator, String) {
        let db = Arc::new(setup_db().await);
        let (game, env, _) = setup_test_scope(&db).await;
        let raw = db.create_api_key(game.id, env.id).await.unwrap();
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        (Authenticator::new(db, limiter), raw)
    }

    #[tokio::test]
    async fn rejects_missing_and_malformed_headers() {
        let (auth, raw) = authenticator().await;

        assert!(matches!(
            auth.validate(None).await.unwrap_err(),
            Error::MissingCredential
        ));
        assert!(matches!(
            auth.validate(Some(&raw)).await.unwrap_err(),
            Error::MalformedCredential
        ));
        assert!(matches!(
            auth.validate(Some("Bearer wrong_prefix_key")).await.unwrap_err(),
            Error::MalformedCredential
        ));
    }

    #[tokio::test]
    async fn rejects_unknown_key() {
        let (auth, _) = authenticator().await;
        let err = auth
            .validate(Some("Bearer tld_00000000000000000000000000000000"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidCredential));
    }

    #[tokio::test]
    async fn valid_key_yields_scope_and_rate_state() {
        let (auth, raw) = authenticator().await;
        let header = format!("Bearer {raw}");

        let ctx = auth.validate(Some(&header)).await.unwrap();
        assert_eq!(ctx.environment, "production");
        assert_eq!(ctx.rate.limit, 3);
        assert_eq!(ctx.rate.remaining, 2);
    }

    #[tokio::test]
    async fn rate_limit_applies_before_lookup() {
        let (auth, raw) = authenticator().await;
        let header = format!("Bearer {raw}");

        for _ in 0..3 {
            auth.validate(Some(&header)).await.unwrap();
        }
        let err = auth.validate(Some(&header)).await.unwrap_err();
        assert!(matches!(err, Error::RateLimited { limit: 3, .. }));

        // An unknown key burns budget the same way and reports the limit,
        // not the bad credential, once exhausted.
        let bogus = "Bearer tld_ffffffffffffffffffffffffffffffff";
        for _ in 0..3 {
            assert!(matches!(
                auth.validate(Some(bogus)).await.unwrap_err(),
                Error::InvalidCredential
            ));
        }
        assert!(matches!(
            auth.validate(Some(bogus)).await.unwrap_err(),
            Error::RateLimited { .. }
        ));
    }
}
