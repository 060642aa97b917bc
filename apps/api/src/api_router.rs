use std::sync::Arc;

use axum::Router;
use axum::middleware::from_fn_with_state;
use axum::routing::{delete, get, post};
use tenantguard_application::RateLimiter;
use tenantguard_http::{
    ContextConfig, RateLimitGuard, ReplayProtection, attach_request_context, enforce_rate_limit,
    enforce_replay_protection,
};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

pub fn build_router(
    app_state: AppState,
    rate_limiter: Arc<dyn RateLimiter>,
    context_config: ContextConfig,
) -> Router {
    let submission_routes = Router::new()
        .route("/api/orders", post(handlers::orders::submit_order_handler))
        .route_layer(from_fn_with_state(
            ReplayProtection::nonce(app_state.replay_guard.clone()),
            enforce_replay_protection,
        ))
        .route_layer(from_fn_with_state(
            RateLimitGuard::per_tenant(Arc::clone(&rate_limiter)),
            enforce_rate_limit,
        ));

    let admin_routes = Router::new()
        .route(
            "/api/admin/lockouts",
            delete(handlers::lockouts::flush_lockouts_handler),
        )
        .route(
            "/api/admin/lockouts/{identifier}",
            get(handlers::lockouts::lockout_status_handler)
                .delete(handlers::lockouts::reset_lockout_handler),
        )
        .route(
            "/api/admin/replay-records",
            delete(handlers::lockouts::flush_replay_records_handler),
        )
        .route_layer(from_fn_with_state(
            RateLimitGuard::per_user(rate_limiter),
            enforce_rate_limit,
        ));

    Router::new()
        .route("/health", get(handlers::health::health_handler))
        .merge(submission_routes)
        .merge(admin_routes)
        .layer(from_fn_with_state(context_config, attach_request_context))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}
