//! TenantGuard reference service composition root.

#![forbid(unsafe_code)]

mod api_config;
mod api_router;
mod handlers;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use tenantguard_application::{
    BruteForceService, KeyValueStore, RateLimiter, ReplayGuard, StoreTokenBucketLimiter,
    TokenBucketLimiter,
};
use tenantguard_core::AppError;
use tenantguard_infrastructure::{InMemoryKeyValueStore, RedisKeyValueStore};
use tracing::{info, warn};

use crate::api_config::{ApiConfig, init_tracing};
use crate::api_router::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = ApiConfig::load()?;

    let store: Arc<dyn KeyValueStore> = match config.redis_url.as_deref() {
        Some(redis_url) => Arc::new(
            RedisKeyValueStore::connect(redis_url, config.store_operation_timeout).await?,
        ),
        None => {
            warn!("REDIS_URL is not set, guard state is kept in process memory");
            Arc::new(InMemoryKeyValueStore::new())
        }
    };

    // Buckets live in the shared store when one is configured, otherwise in
    // a swept in-process table that is stopped after the server exits.
    let local_limiter = config
        .redis_url
        .is_none()
        .then(|| Arc::new(TokenBucketLimiter::start(config.rate_limit)));
    let rate_limiter: Arc<dyn RateLimiter> = match &local_limiter {
        Some(limiter) => Arc::clone(limiter) as Arc<dyn RateLimiter>,
        None => Arc::new(StoreTokenBucketLimiter::new(
            store.clone(),
            config.rate_limit,
            "ratelimit",
        )?),
    };

    let app_state = AppState {
        lockouts: BruteForceService::new(store.clone(), config.lockout.clone()),
        replay_guard: ReplayGuard::new(store, config.replay.clone()),
    };

    let app = build_router(app_state, rate_limiter, config.context.clone());
    let address = config.socket_address()?;
    let listener = tokio::net::TcpListener::bind(address)
        .await
        .map_err(|error| AppError::Internal(format!("failed to bind listener: {error}")))?;

    info!(%address, "tenantguard-api listening");

    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|error| AppError::Internal(format!("api server error: {error}")));

    if let Some(limiter) = local_limiter {
        limiter.shutdown().await;
    }

    served
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(error = %error, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }

    info!("shutdown signal received");
}
