// SPDX-License-Identifier: MIT
use crate::db::*;
use crate::errors::Error;
use chrono::{Duration, Utc};
use uuid::Uuid;

pub async fn setup_db() -> LeaderboardDB {
    let test_id = Uuid::new_v4();
    let path = format!("/tmp/tallyd-test-{test_id}.db");
    LeaderboardDB::new(&path).await.unwrap()
}

impl Drop for LeaderboardDB {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Creates a game with its default environment and one descending,
/// never-resetting leaderboard.
pub async fn setup_test_scope(db: &LeaderboardDB) -> (Game, Environment, Leaderboard) {
    let slug = format!("test-game-{}", Uuid::new_v4());
    let game = db.create_game("studio-1", "Test Game", &slug).await.unwrap();
    let env = db
        .create_environment(game.id, "production", false)
        .await
        .unwrap();
    let lb = db
        .create_leaderboard(
            game.id,
            env.id,
            "High Scores",
            Some("high-scores"),
            SortOrder::Desc,
            ResetSchedule::None,
            0,
        )
        .await
        .unwrap();
    (game, env, lb)
}

#[tokio::test]
async fn test_game_slug_conflict() {
    let db = setup_db().await;
    let slug = format!("dup-{}", Uuid::new_v4());
    db.create_game("studio-1", "First", &slug).await.unwrap();

    let err = db.create_game("studio-2", "Second", &slug).await.unwrap_err();
    assert!(matches!(err, Error::AlreadyExists(_)));
}

#[tokio::test]
async fn test_first_environment_becomes_default() {
    let db = setup_db().await;
    let game = db
        .create_game("studio-1", "Game", &format!("g-{}", Uuid::new_v4()))
        .await
        .unwrap();

    let prod = db.create_environment(game.id, "production", false).await.unwrap();
    assert!(prod.is_default);

    let staging = db.create_environment(game.id, "staging", false).await.unwrap();
    assert!(!staging.is_default);

    // Promoting a later environment moves the flag.
    let canary = db.create_environment(game.id, "canary", true).await.unwrap();
    assert!(canary.is_default);
    let envs = db.list_environments(game.id).await.unwrap();
    let defaults: Vec<_> = envs.iter().filter(|e| e.is_default).collect();
    assert_eq!(defaults.len(), 1);
    assert_eq!(defaults[0].name, "canary");
}

#[tokio::test]
async fn test_default_environment_cannot_be_deleted() {
    let db = setup_db().await;
    let game = db
        .create_game("studio-1", "Game", &format!("g-{}", Uuid::new_v4()))
        .await
        .unwrap();
    let prod = db.create_environment(game.id, "production", false).await.unwrap();
    let staging = db.create_environment(game.id, "staging", false).await.unwrap();

    let err = db.delete_environment(prod.id).await.unwrap_err();
    assert!(matches!(err, Error::InvalidRequest(_)));

    db.delete_environment(staging.id).await.unwrap();
}

#[tokio::test]
async fn test_api_key_roundtrip() {
    let db = setup_db().await;
    let (game, env, _) = setup_test_scope(&db).await;

    let raw = db.create_api_key(game.id, env.id).await.unwrap();
    assert!(raw.starts_with("tld_"));

    let scope = db.lookup_api_key(&raw).await.unwrap().unwrap();
    assert_eq!(scope.game_id, game.id);
    assert_eq!(scope.environment_id, env.id);
    assert_eq!(scope.environment, "production");

    assert!(db.lookup_api_key("tld_not_a_real_key").await.unwrap().is_none());

    let keys = db.list_api_keys(game.id).await.unwrap();
    assert_eq!(keys.len(), 1);
    // Stored records never contain the raw key.
    assert!(raw.starts_with(&keys[0].key_prefix));
    assert!(keys[0].key_prefix.len() < raw.len());

    db.revoke_api_key(keys[0].id).await.unwrap();
    assert!(db.lookup_api_key(&raw).await.unwrap().is_none());
}

#[tokio::test]
async fn test_resolver_matches_slug_and_name() {
    let db = setup_db().await;
    let (game, env, lb) = setup_test_scope(&db).await;

    let (by_slug, _) = db
        .resolve_leaderboard(game.id, env.id, Some("high-scores"), Utc::now())
        .await
        .unwrap();
    assert_eq!(by_slug.id, lb.id);

    // Name matching is case-insensitive.
    let (by_name, _) = db
        .resolve_leaderboard(game.id, env.id, Some("HIGH scores"), Utc::now())
        .await
        .unwrap();
    assert_eq!(by_name.id, lb.id);

    let err = db
        .resolve_leaderboard(game.id, env.id, Some("no-such-board"), Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn test_resolver_implicit_default_is_earliest() {
    let db = setup_db().await;
    let (game, env, first) = setup_test_scope(&db).await;
    db.create_leaderboard(
        game.id,
        env.id,
        "Speedruns",
        Some("speedruns"),
        SortOrder::Asc,
        ResetSchedule::None,
        0,
    )
    .await
    .unwrap();

    let (resolved, _) = db
        .resolve_leaderboard(game.id, env.id, None, Utc::now())
        .await
        .unwrap();
    assert_eq!(resolved.id, first.id);
}

#[tokio::test]
async fn test_submit_scenario_descending() {
    let db = setup_db().await;
    let (_, _, lb) = setup_test_scope(&db).await;

    // p1 posts 100: new entry at rank 1.
    let r1 = db.submit_score(&lb, "p1", "Alice", 100.0, None).await.unwrap();
    assert!(r1.is_new_high_score);
    assert_eq!(r1.final_score, 100.0);
    assert_eq!(r1.rank, 1);

    // p1 posts a worse 50: standing score unchanged.
    let r2 = db.submit_score(&lb, "p1", "Alice", 50.0, None).await.unwrap();
    assert!(!r2.is_new_high_score);
    assert_eq!(r2.final_score, 100.0);
    assert_eq!(r2.rank, 1);
    assert_eq!(r2.id, r1.id);

    // p2 posts 150 and takes rank 1; p1 drops to rank 2.
    let r3 = db.submit_score(&lb, "p2", "Bob", 150.0, None).await.unwrap();
    assert!(r3.is_new_high_score);
    assert_eq!(r3.rank, 1);

    let (_, p1_rank) = db.player_rank(&lb, "p1").await.unwrap().unwrap();
    assert_eq!(p1_rank, 2);
}

#[tokio::test]
async fn test_submit_same_score_is_noop() {
    let db = setup_db().await;
    let (_, _, lb) = setup_test_scope(&db).await;

    let first = db.submit_score(&lb, "p1", "Alice", 100.0, None).await.unwrap();
    let again = db.submit_score(&lb, "p1", "Alice", 100.0, None).await.unwrap();
    assert!(!again.is_new_high_score);
    assert_eq!(again.id, first.id);
    assert_eq!(again.final_score, 100.0);

    let (scores, total) = db.list_scores(&lb, 10, 0).await.unwrap();
    assert_eq!(total, 1);
    assert_eq!(scores.len(), 1);
}

#[tokio::test]
async fn test_ascending_board_lower_is_better() {
    let db = setup_db().await;
    let (game, env, _) = setup_test_scope(&db).await;
    let lb = db
        .create_leaderboard(
            game.id,
            env.id,
            "Lap Times",
            Some("lap-times"),
            SortOrder::Asc,
            ResetSchedule::None,
            0,
        )
        .await
        .unwrap();

    db.submit_score(&lb, "p1", "Alice", 62.5, None).await.unwrap();
    let worse = db.submit_score(&lb, "p1", "Alice", 70.0, None).await.unwrap();
    assert!(!worse.is_new_high_score);
    assert_eq!(worse.final_score, 62.5);

    let better = db.submit_score(&lb, "p1", "Alice", 59.9, None).await.unwrap();
    assert!(better.is_new_high_score);
    assert_eq!(better.final_score, 59.9);
    assert_eq!(better.rank, 1);
}

#[tokio::test]
async fn test_list_pagination_and_order() {
    let db = setup_db().await;
    let (_, _, lb) = setup_test_scope(&db).await;

    for i in 0..5 {
        let guid = format!("p{i}");
        let name = format!("Player {i}");
        db.submit_score(&lb, &guid, &name, (i as f64) * 10.0, None)
            .await
            .unwrap();
    }

    let (page, total) = db.list_scores(&lb, 2, 0).await.unwrap();
    assert_eq!(total, 5);
    assert_eq!(page.len(), 2);
    assert_eq!(page[0].score, 40.0);
    assert_eq!(page[1].score, 30.0);

    let (page, _) = db.list_scores(&lb, 2, 4).await.unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].score, 0.0);
}

#[tokio::test]
async fn test_metadata_roundtrip() {
    let db = setup_db().await;
    let (_, _, lb) = setup_test_scope(&db).await;

    let meta = serde_json::json!({"character": "mage", "combo": 12});
    db.submit_score(&lb, "p1", "Alice", 100.0, Some(&meta))
        .await
        .unwrap();

    let (scores, _) = db.list_scores(&lb, 10, 0).await.unwrap();
    assert_eq!(scores[0].metadata.as_ref().unwrap(), &meta);
}

#[tokio::test]
async fn test_daily_rollover_catches_up_missed_periods() {
    use chrono::Timelike;

    let db = setup_db().await;
    let (game, env, _) = setup_test_scope(&db).await;
    // Put the reset hour half a day away from the current hour so the
    // three-day rewind below crosses exactly three boundaries regardless of
    // when the test runs.
    let reset_hour = ((Utc::now().hour() + 12) % 24) as u8;
    let lb = db
        .create_leaderboard(
            game.id,
            env.id,
            "Daily",
            Some("daily"),
            SortOrder::Desc,
            ResetSchedule::Daily,
            reset_hour,
        )
        .await
        .unwrap();
    assert_eq!(lb.current_version, 1);

    db.submit_score(&lb, "p1", "Alice", 100.0, None).await.unwrap();

    // Pretend the service slept through three resets.
    let rewound = Utc::now() - Duration::days(3) - Duration::hours(1);
    db.set_period_start(lb.id, rewound).await.unwrap();

    let now = Utc::now();
    let (rolled, did_roll) = db
        .resolve_leaderboard(game.id, env.id, Some("daily"), now)
        .await
        .unwrap();
    assert!(did_roll);
    assert_eq!(rolled.current_version, lb.current_version + 3);
    // The new period start lands on the reset hour, not on `now`.
    assert_eq!(rolled.current_period_start.hour(), reset_hour as u32);
    assert_eq!(rolled.current_period_start.format("%M:%S").to_string(), "00:00");
    assert!(rolled.current_period_start <= now);

    // The fresh version starts empty; the old rows are archived, not gone.
    let (scores, total) = db.list_scores(&rolled, 10, 0).await.unwrap();
    assert!(scores.is_empty());
    assert_eq!(total, 0);

    // Resolving again within the same period is a no-op.
    let (again, did_roll) = db
        .resolve_leaderboard(game.id, env.id, Some("daily"), now)
        .await
        .unwrap();
    assert!(!did_roll);
    assert_eq!(again.current_version, rolled.current_version);
}

#[tokio::test]
async fn test_concurrent_rollover_converges() {
    let db = setup_db().await;
    let (game, env, _) = setup_test_scope(&db).await;
    let lb = db
        .create_leaderboard(
            game.id,
            env.id,
            "Weekly",
            Some("weekly"),
            SortOrder::Desc,
            ResetSchedule::Weekly,
            0,
        )
        .await
        .unwrap();

    let rewound = Utc::now() - Duration::days(8);
    db.set_period_start(lb.id, rewound).await.unwrap();

    let now = Utc::now();
    let (a, b) = tokio::join!(
        db.resolve_leaderboard(game.id, env.id, Some("weekly"), now),
        db.resolve_leaderboard(game.id, env.id, Some("weekly"), now),
    );
    let (a, _) = a.unwrap();
    let (b, _) = b.unwrap();

    // Both resolvers land on the same state; the version advanced exactly
    // once per missed period, not once per caller.
    assert_eq!(a.current_version, b.current_version);
    assert_eq!(a.current_version, lb.current_version + 1);
}

#[tokio::test]
async fn test_prune_removes_only_expired_versions() {
    let db = setup_db().await;
    let (_, _, lb) = setup_test_scope(&db).await;

    // Rows land in version 1.
    db.submit_score(&lb, "p1", "Alice", 100.0, None).await.unwrap();
    db.submit_score(&lb, "p2", "Bob", 90.0, None).await.unwrap();

    // Within the retention window nothing is deleted.
    let deleted = db
        .prune_versions(lb.id, ResetSchedule::Daily, 10)
        .await
        .unwrap();
    assert_eq!(deleted, 0);

    // Version 1 falls out once current - 30 reaches it.
    let deleted = db
        .prune_versions(lb.id, ResetSchedule::Daily, 31)
        .await
        .unwrap();
    assert_eq!(deleted, 2);

    // Never-resetting boards retain everything.
    let deleted = db
        .prune_versions(lb.id, ResetSchedule::None, 1000)
        .await
        .unwrap();
    assert_eq!(deleted, 0);
}

#[tokio::test]
async fn test_reset_hour_validation() {
    let db = setup_db().await;
    let (game, env, _) = setup_test_scope(&db).await;

    let err = db
        .create_leaderboard(
            game.id,
            env.id,
            "Bad",
            None,
            SortOrder::Desc,
            ResetSchedule::Daily,
            24,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidRequest(_)));
}

#[tokio::test]
async fn test_out_of_range_reset_hour_fails_on_read() {
    let db = setup_db().await;
    let (_, _, lb) = setup_test_scope(&db).await;

    // A corrupted row must surface as an error, not wrap around or panic.
    sqlx::query("UPDATE leaderboard SET reset_hour = 99 WHERE id = ?1")
        .bind(lb.id)
        .execute(&db.write_pool)
        .await
        .unwrap();

    let err = db.get_leaderboard(lb.id).await.unwrap_err();
    assert!(matches!(err, Error::Parse(_)));
}

#[tokio::test]
async fn test_game_cascade_delete() {
    let db = setup_db().await;
    let (game, env, lb) = setup_test_scope(&db).await;
    let raw = db.create_api_key(game.id, env.id).await.unwrap();
    db.submit_score(&lb, "p1", "Alice", 100.0, None).await.unwrap();

    db.delete_game(game.id).await.unwrap();

    assert!(db.lookup_api_key(&raw).await.unwrap().is_none());
    let err = db.get_leaderboard(lb.id).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}
