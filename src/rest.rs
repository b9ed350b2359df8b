// SPDX-License-Identifier: MIT
//! REST API for score submission, leaderboard reads, and the token-guarded
//! admin surface, implemented with `axum`.

use crate::auth::{AuthContext, Authenticator};
use crate::db::models::{Leaderboard, ResetSchedule, SortOrder};
use crate::db::LeaderboardDB;
use crate::errors::Error;
use axum::{
    extract::rejection::JsonRejection,
    extract::{Path, Request, State},
    http::{header, HeaderMap, HeaderName, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use axum_extra::extract::{Query, QueryRejection};
use chrono::Utc;
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::error;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<LeaderboardDB>,
    pub auth: Arc<Authenticator>,
    pub admin_token: String,
}

#[derive(Serialize, Deserialize)]
struct ErrorResponse {
    error: String,
    code: String,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            Error::InvalidRequest(m) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST", m.clone()),
            Error::MissingCredential | Error::MalformedCredential | Error::InvalidCredential => (
                StatusCode::UNAUTHORIZED,
                "INVALID_API_KEY",
                self.to_string(),
            ),
            Error::RateLimited { .. } => (
                StatusCode::TOO_MANY_REQUESTS,
                "RATE_LIMITED",
                self.to_string(),
            ),
            Error::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND", self.to_string()),
            Error::AlreadyExists(_) => (StatusCode::CONFLICT, "CONFLICT", self.to_string()),
            other => {
                // Backend details stay in the log, not in the response body.
                error!("internal error handling request: {other}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "internal error".to_string(),
                )
            }
        };

        let mut response = (
            status,
            Json(ErrorResponse {
                error: message,
                code: code.to_string(),
            }),
        )
            .into_response();

        if let Error::RateLimited { limit, reset_at_ms } = self {
            let retry_secs = (reset_at_ms - Utc::now().timestamp_millis()).max(0) / 1000 + 1;
            let headers = response.headers_mut();
            insert_header(headers, "x-ratelimit-limit", &limit.to_string());
            insert_header(headers, "x-ratelimit-remaining", "0");
            insert_header(headers, "x-ratelimit-reset", &(reset_at_ms / 1000).to_string());
            insert_header(headers, "retry-after", &retry_secs.to_string());
        }

        response
    }
}

fn insert_header(headers: &mut HeaderMap, name: &'static str, value: &str) {
    if let Ok(value) = value.parse() {
        headers.insert(HeaderName::from_static(name), value);
    }
}

fn auth_header(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
}

/// Stamps the rate-limit state onto an authenticated response, success or
/// failure alike.
fn with_rate_headers(mut response: Response, ctx: &AuthContext) -> Response {
    let headers = response.headers_mut();
    insert_header(headers, "x-ratelimit-limit", &ctx.rate.limit.to_string());
    insert_header(headers, "x-ratelimit-remaining", &ctx.rate.remaining.to_string());
    insert_header(headers, "x-ratelimit-reset", &(ctx.rate.reset_at_ms / 1000).to_string());
    response
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}

pub fn rest_endpoint_router(state: AppState) -> Router {
    let api_router = Router::new().route(
        "/scores",
        post(submit_score_handler)
            .get(list_scores_handler)
            .options(preflight_handler),
    );

    let admin_router = Router::new()
        .route("/games", post(create_game_handler))
        .route("/games/{slug}", delete(delete_game_handler))
        .route(
            "/games/{slug}/environments",
            post(create_environment_handler),
        )
        .route(
            "/games/{slug}/environments/{env}",
            delete(delete_environment_handler),
        )
        .route(
            "/games/{slug}/environments/{env}/leaderboards",
            post(create_leaderboard_handler),
        )
        .route("/games/{slug}/environments/{env}/keys", post(create_key_handler));

    Router::new()
        .route("/metrics", get(metrics_handler))
        .nest("/api/v1", api_router)
        .nest("/admin/v1", admin_router)
        .layer(cors_layer())
        .layer(middleware::from_fn(preflight_status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// The CORS layer answers preflights itself with 200; rewrite those to the
/// no-content status the API promises. Runs outside the CORS layer.
async fn preflight_status(request: Request, next: Next) -> Response {
    let is_preflight = request.method() == Method::OPTIONS
        && request
            .headers()
            .contains_key(header::ACCESS_CONTROL_REQUEST_METHOD);
    let mut response = next.run(request).await;
    if is_preflight && response.status() == StatusCode::OK {
        *response.status_mut() = StatusCode::NO_CONTENT;
    }
    response
}

async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    match encoder.encode_to_string(&metric_families) {
        Ok(metrics_text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, encoder.format_type())],
            metrics_text,
        )
            .into_response(),
        Err(e) => {
            error!("Error encoding metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
        }
    }
}

async fn preflight_handler() -> StatusCode {
    StatusCode::NO_CONTENT
}

// ---- score endpoints ------------------------------------------------------

#[derive(Deserialize)]
struct ScoresQuery {
    leaderboard: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
    player_guid: Option<String>,
}

#[derive(Deserialize)]
struct SubmitScoreBody {
    player_guid: String,
    player_name: String,
    score: f64,
    #[serde(default)]
    metadata: Option<serde_json::Value>,
}

#[derive(Serialize, Deserialize)]
struct SubmitScoreResponse {
    id: i64,
    player_guid: String,
    player_name: String,
    score: f64,
    rank: i64,
    is_new_high_score: bool,
}

#[derive(Serialize, Deserialize)]
struct ScoreEntry {
    rank: i64,
    player_guid: Option<String>,
    player_name: String,
    score: f64,
}

#[derive(Serialize, Deserialize)]
struct ListScoresResponse {
    entries: Vec<ScoreEntry>,
    total_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    player: Option<ScoreEntry>,
}

/// Resolves the scope's leaderboard and fires the retention pruner when the
/// resolution crossed a reset boundary.
async fn resolve_with_pruning(
    state: &AppState,
    ctx: &AuthContext,
    identifier: Option<&str>,
) -> Result<Leaderboard, Error> {
    let (leaderboard, rolled) = state
        .db
        .resolve_leaderboard(ctx.game_id, ctx.environment_id, identifier, Utc::now())
        .await?;

    if rolled {
        let db = Arc::clone(&state.db);
        let id = leaderboard.id;
        let schedule = leaderboard.reset_schedule;
        let version = leaderboard.current_version;
        tokio::spawn(async move {
            if let Err(e) = db.prune_versions(id, schedule, version).await {
                error!("pruning leaderboard {id} failed: {e}");
            }
        });
    }

    Ok(leaderboard)
}

async fn submit_score_handler(
    State(state): State<AppState>,
    query: Result<Query<ScoresQuery>, QueryRejection>,
    headers: HeaderMap,
    body: Result<Json<SubmitScoreBody>, JsonRejection>,
) -> Response {
    crate::metrics::INBOUND_REST.inc();

    // Authenticate before looking at the query or body, so a flooding client
    // with a bad payload still burns rate budget.
    let ctx = match state.auth.validate(auth_header(&headers)).await {
        Ok(ctx) => ctx,
        Err(e) => return e.into_response(),
    };

    let query = match query {
        Ok(Query(query)) => query,
        Err(rej) => {
            let err = Error::InvalidRequest(rej.to_string());
            return with_rate_headers(err.into_response(), &ctx);
        }
    };

    let response = match submit_score(&state, &ctx, &query, body).await {
        Ok(r) => r.into_response(),
        Err(e) => e.into_response(),
    };
    with_rate_headers(response, &ctx)
}

async fn submit_score(
    state: &AppState,
    ctx: &AuthContext,
    query: &ScoresQuery,
    body: Result<Json<SubmitScoreBody>, JsonRejection>,
) -> Result<Json<SubmitScoreResponse>, Error> {
    let Json(body) = body.map_err(|rej| Error::InvalidRequest(rej.body_text()))?;

    if body.player_guid.trim().is_empty() {
        return Err(Error::InvalidRequest("player_guid must not be empty".into()));
    }
    if body.player_name.trim().is_empty() {
        return Err(Error::InvalidRequest("player_name must not be empty".into()));
    }
    if !body.score.is_finite() {
        return Err(Error::InvalidRequest("score must be a finite number".into()));
    }

    let leaderboard = resolve_with_pruning(state, ctx, query.leaderboard.as_deref()).await?;

    let _timer = crate::metrics::SUBMIT_DURATION.start_timer();
    let outcome = state
        .db
        .submit_score(
            &leaderboard,
            &body.player_guid,
            &body.player_name,
            body.score,
            body.metadata.as_ref(),
        )
        .await?;

    Ok(Json(SubmitScoreResponse {
        id: outcome.id,
        player_guid: body.player_guid,
        player_name: body.player_name,
        score: outcome.final_score,
        rank: outcome.rank,
        is_new_high_score: outcome.is_new_high_score,
    }))
}

async fn list_scores_handler(
    State(state): State<AppState>,
    query: Result<Query<ScoresQuery>, QueryRejection>,
    headers: HeaderMap,
) -> Response {
    crate::metrics::INBOUND_REST.inc();

    let ctx = match state.auth.validate(auth_header(&headers)).await {
        Ok(ctx) => ctx,
        Err(e) => return e.into_response(),
    };

    let query = match query {
        Ok(Query(query)) => query,
        Err(rej) => {
            let err = Error::InvalidRequest(rej.to_string());
            return with_rate_headers(err.into_response(), &ctx);
        }
    };

    let response = match list_scores(&state, &ctx, &query).await {
        Ok(r) => r.into_response(),
        Err(e) => e.into_response(),
    };
    with_rate_headers(response, &ctx)
}

async fn list_scores(
    state: &AppState,
    ctx: &AuthContext,
    query: &ScoresQuery,
) -> Result<Json<ListScoresResponse>, Error> {
    let limit = query.limit.unwrap_or(crate::constants::DEFAULT_PAGE_SIZE);
    if limit < 1 {
        return Err(Error::InvalidRequest("limit must be at least 1".into()));
    }
    let limit = limit.min(crate::constants::MAX_PAGE_SIZE);

    let offset = query.offset.unwrap_or(0);
    if offset < 0 {
        return Err(Error::InvalidRequest("offset must not be negative".into()));
    }

    let leaderboard = resolve_with_pruning(state, ctx, query.leaderboard.as_deref()).await?;
    let (scores, total_count) = state.db.list_scores(&leaderboard, limit, offset).await?;

    // List ranks are positional within the ordered page; the submit response
    // ranks by strictly-better count. The two disagree on ties.
    let entries = scores
        .into_iter()
        .enumerate()
        .map(|(i, s)| ScoreEntry {
            rank: offset + i as i64 + 1,
            player_guid: s.player_guid,
            player_name: s.player_name,
            score: s.score,
        })
        .collect();

    let player = match &query.player_guid {
        Some(guid) => state
            .db
            .player_rank(&leaderboard, guid)
            .await?
            .map(|(s, rank)| ScoreEntry {
                rank,
                player_guid: s.player_guid,
                player_name: s.player_name,
                score: s.score,
            }),
        None => None,
    };

    Ok(Json(ListScoresResponse {
        entries,
        total_count,
        player,
    }))
}

// ---- admin endpoints ------------------------------------------------------

fn check_admin(headers: &HeaderMap, state: &AppState) -> Result<(), Error> {
    let token = auth_header(headers)
        .ok_or(Error::MissingCredential)?
        .strip_prefix("Bearer ")
        .ok_or(Error::MalformedCredential)?;
    if token != state.admin_token {
        return Err(Error::InvalidCredential);
    }
    Ok(())
}

#[derive(Deserialize)]
struct CreateGameBody {
    owner: String,
    name: String,
    slug: String,
}

async fn create_game_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateGameBody>,
) -> Result<Response, Error> {
    check_admin(&headers, &state)?;
    let game = state
        .db
        .create_game(&body.owner, &body.name, &body.slug)
        .await?;
    Ok((StatusCode::CREATED, Json(game)).into_response())
}

async fn delete_game_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(slug): Path<String>,
) -> Result<StatusCode, Error> {
    check_admin(&headers, &state)?;
    let game = state.db.get_game_by_slug(&slug).await?;
    state.db.delete_game(game.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct CreateEnvironmentBody {
    name: String,
    #[serde(default)]
    is_default: bool,
}

async fn create_environment_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(slug): Path<String>,
    Json(body): Json<CreateEnvironmentBody>,
) -> Result<Response, Error> {
    check_admin(&headers, &state)?;
    let game = state.db.get_game_by_slug(&slug).await?;
    let env = state
        .db
        .create_environment(game.id, &body.name, body.is_default)
        .await?;
    Ok((StatusCode::CREATED, Json(env)).into_response())
}

async fn delete_environment_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((slug, env_name)): Path<(String, String)>,
) -> Result<StatusCode, Error> {
    check_admin(&headers, &state)?;
    let game = state.db.get_game_by_slug(&slug).await?;
    let env = state.db.get_environment(game.id, &env_name).await?;
    state.db.delete_environment(env.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct CreateLeaderboardBody {
    name: String,
    slug: Option<String>,
    #[serde(default = "default_sort_order")]
    sort_order: SortOrder,
    #[serde(default = "default_reset_schedule")]
    reset_schedule: ResetSchedule,
    #[serde(default)]
    reset_hour: u8,
}

fn default_sort_order() -> SortOrder {
    SortOrder::Desc
}

fn default_reset_schedule() -> ResetSchedule {
    ResetSchedule::None
}

async fn create_leaderboard_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((slug, env_name)): Path<(String, String)>,
    Json(body): Json<CreateLeaderboardBody>,
) -> Result<Response, Error> {
    check_admin(&headers, &state)?;
    let game = state.db.get_game_by_slug(&slug).await?;
    let env = state.db.get_environment(game.id, &env_name).await?;
    let leaderboard = state
        .db
        .create_leaderboard(
            game.id,
            env.id,
            &body.name,
            body.slug.as_deref(),
            body.sort_order,
            body.reset_schedule,
            body.reset_hour,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(leaderboard)).into_response())
}

#[derive(Serialize, Deserialize)]
struct CreateKeyResponse {
    api_key: String,
}

async fn create_key_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((slug, env_name)): Path<(String, String)>,
) -> Result<Response, Error> {
    check_admin(&headers, &state)?;
    let game = state.db.get_game_by_slug(&slug).await?;
    let env = state.db.get_environment(game.id, &env_name).await?;
    let api_key = state.db.create_api_key(game.id, env.id).await?;
    Ok((StatusCode::CREATED, Json(CreateKeyResponse { api_key })).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::{setup_db, setup_test_scope};
    use crate::ratelimit::RateLimiter;
    use axum::body::Body;
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    async fn setup_app() -> (Router, String) {
        let db = Arc::new(setup_db().await);
        let (game, env, _) = setup_test_scope(&db).await;
        let raw = db.create_api_key(game.id, env.id).await.unwrap();

        let auth = Arc::new(Authenticator::new(
            Arc::clone(&db),
            RateLimiter::new(60, Duration::from_secs(60)),
        ));
        let state = AppState {
            db,
            auth,
            admin_token: "test-admin".to_string(),
        };
        (rest_endpoint_router(state), raw)
    }

    async fn body_json<T: serde::de::DeserializeOwned>(response: Response) -> T {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn submit_request(key: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/v1/scores?leaderboard=high-scores")
            .header("authorization", format!("Bearer {key}"))
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn submit_and_list_flow() {
        let (app, key) = setup_app().await;

        let response = app
            .clone()
            .oneshot(submit_request(
                &key,
                r#"{"player_guid":"p1","player_name":"Alice","score":100.0}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("x-ratelimit-limit").unwrap(),
            "60"
        );
        let submitted: SubmitScoreResponse = body_json(response).await;
        assert_eq!(submitted.rank, 1);
        assert!(submitted.is_new_high_score);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/scores?leaderboard=high-scores&limit=10")
                    .header("authorization", format!("Bearer {key}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let listed: ListScoresResponse = body_json(response).await;
        assert_eq!(listed.total_count, 1);
        assert_eq!(listed.entries[0].player_name, "Alice");
        assert_eq!(listed.entries[0].rank, 1);
    }

    #[tokio::test]
    async fn missing_key_is_unauthorized() {
        let (app, _) = setup_app().await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/scores")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let err: ErrorResponse = body_json(response).await;
        assert_eq!(err.code, "INVALID_API_KEY");
    }

    #[tokio::test]
    async fn malformed_body_is_invalid_request() {
        let (app, key) = setup_app().await;

        let response = app
            .oneshot(submit_request(&key, r#"{"player_guid":"p1"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let err: ErrorResponse = body_json(response).await;
        assert_eq!(err.code, "INVALID_REQUEST");
    }

    #[tokio::test]
    async fn malformed_query_is_invalid_request() {
        let (app, key) = setup_app().await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/scores?leaderboard=high-scores&limit=abc")
                    .header("authorization", format!("Bearer {key}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        // The structured error body, not the extractor's plain-text 400.
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/json"
        );
        let err: ErrorResponse = body_json(response).await;
        assert_eq!(err.code, "INVALID_REQUEST");
    }

    #[tokio::test]
    async fn unknown_leaderboard_is_not_found() {
        let (app, key) = setup_app().await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/scores?leaderboard=nope")
                    .header("authorization", format!("Bearer {key}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let err: ErrorResponse = body_json(response).await;
        assert_eq!(err.code, "NOT_FOUND");
    }

    #[tokio::test]
    async fn cors_preflight_is_allowed() {
        let (app, _) = setup_app().await;

        let response = app
            .oneshot(
                Request::builder()
                    .method("OPTIONS")
                    .uri("/api/v1/scores")
                    .header("origin", "https://game.example")
                    .header("access-control-request-method", "POST")
                    .header("access-control-request-headers", "authorization")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(
            response
                .headers()
                .get("access-control-allow-origin")
                .unwrap(),
            "*"
        );
    }

    #[tokio::test]
    async fn admin_surface_requires_token() {
        let (app, _) = setup_app().await;
        let body = r#"{"owner":"studio-2","name":"Other","slug":"other-game"}"#;

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/admin/v1/games")
                    .header("authorization", "Bearer wrong-token")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/admin/v1/games")
                    .header("authorization", "Bearer test-admin")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        // Duplicate slug conflicts.
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/admin/v1/games")
                    .header("authorization", "Bearer test-admin")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let err: ErrorResponse = body_json(response).await;
        assert_eq!(err.code, "CONFLICT");
    }
}
