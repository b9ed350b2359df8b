// SPDX-License-Identifier: MIT
pub mod auth;
pub mod config;
pub mod constants;
pub mod db;
pub mod errors;
pub mod metrics;
pub mod ratelimit;
pub mod rest;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use futures::future::try_join_all;
use tracing::{debug, error, info};

use crate::auth::Authenticator;
use crate::config::Config;
use crate::db::LeaderboardDB;
use crate::errors::{Error, Result};
use crate::ratelimit::RateLimiter;
use crate::rest::{rest_endpoint_router, AppState};

pub async fn start_server(config: Config) -> Result<()> {
    metrics::init_metrics();

    let db = Arc::new(LeaderboardDB::with_config(&config).await?);

    let limiter = RateLimiter::new(
        config.rate_limit.max_requests,
        config
            .get_rate_limit_window()
            .map_err(|e| Error::Config(e.to_string()))?,
    );
    let auth = Arc::new(Authenticator::new(db.clone(), limiter));

    // Periodic eviction keeps the limiter map bounded to active keys.
    let sweep_interval = config
        .get_sweep_interval()
        .map_err(|e| Error::Config(e.to_string()))?;
    let auth_sweep = auth.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(sweep_interval).await;
            let evicted = auth_sweep.limiter.sweep().await;
            if evicted > 0 {
                debug!("evicted {evicted} expired rate limit window(s)");
            }
        }
    });

    // Startup catch-up: leaderboards that crossed reset boundaries while the
    // service was down may hold archives past retention. Resolution prunes
    // lazily from then on.
    let db_prune = db.clone();
    tokio::spawn(async move {
        if let Err(e) = prune_all_leaderboards(&db_prune).await {
            error!("startup retention pruning failed: {e}");
        }
    });

    let state = AppState {
        db,
        auth,
        admin_token: config.server.admin_token.clone(),
    };

    let mut server_futures = Vec::new();
    for addr in &config.server.listen {
        let app = rest_endpoint_router(state.clone());
        let addr = *addr;
        let tls_config = config.server.tls.clone();
        server_futures.push(serve_with_optional_tls(addr, app, tls_config));
    }

    try_join_all(server_futures).await?;

    Ok(())
}

async fn prune_all_leaderboards(db: &LeaderboardDB) -> Result<()> {
    let leaderboards: Vec<(i64, String, i64)> = sqlx::query_as(
        "SELECT id, reset_schedule, current_version FROM leaderboard",
    )
    .fetch_all(&db.read_pool)
    .await?;

    for (id, schedule, version) in leaderboards {
        let schedule = schedule
            .parse::<crate::db::models::ResetSchedule>()
            .map_err(Error::Parse)?;
        db.prune_versions(id, schedule, version).await?;
    }
    Ok(())
}

async fn serve_with_optional_tls(
    addr: SocketAddr,
    app: Router,
    tls_config: crate::config::TlsConfig,
) -> Result<()> {
    if tls_config.enable {
        let cert_path = tls_config
            .cert_file
            .ok_or_else(|| Error::Config("TLS enabled but cert_file missing".to_string()))?;
        let key_path = tls_config
            .key_file
            .ok_or_else(|| Error::Config("TLS enabled but key_file missing".to_string()))?;
        let config = RustlsConfig::from_pem_file(cert_path, key_path)
            .await
            .map_err(|e| Error::Config(format!("Failed to load TLS config: {e}")))?;
        info!("axum server with tls starting: https://{}", addr);
        axum_server::bind_rustls(addr, config)
            .serve(app.into_make_service())
            .await
            .map_err(|e| Error::Config(format!("axum serve error: {e}")))?;
    } else {
        info!("axum server starting: http://{}", addr);
        axum_server::bind(addr).serve(app.into_make_service()).await?
    }
    Ok(())
}
