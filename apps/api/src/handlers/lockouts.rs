use axum::Json;
use axum::extract::{Path, State};
use serde::Serialize;
use tenantguard_core::AppError;
use tenantguard_domain::{Identifier, RequestContext};
use tenantguard_http::{ApiResult, CurrentContext, ResponseEnvelope};
use tracing::info;

use crate::state::AppState;

/// Role required for the lockout administration endpoints.
pub const SECURITY_ADMIN_ROLE: &str = "security_admin";

#[derive(Debug, Serialize)]
pub struct LockoutStatusResponse {
    pub identifier: String,
    pub locked: bool,
    pub attempts: u32,
    pub remaining_attempts: u32,
    pub ttl_seconds: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct FlushResponse {
    pub removed: u64,
}

pub async fn lockout_status_handler(
    State(state): State<AppState>,
    CurrentContext(context): CurrentContext,
    Path(identifier): Path<String>,
) -> ApiResult<Json<ResponseEnvelope<LockoutStatusResponse>>> {
    require_security_admin(&context)?;
    let identifier = Identifier::parse(identifier.as_str())?;
    let status = state.lockouts.status(&identifier).await?;

    Ok(Json(ResponseEnvelope::ok(
        LockoutStatusResponse {
            identifier: identifier.to_string(),
            locked: status.locked,
            attempts: status.attempts,
            remaining_attempts: state.lockouts.remaining_attempts(status.attempts),
            ttl_seconds: status.ttl.map(|ttl| ttl.as_secs()),
        },
        context.correlation_id(),
    )))
}

pub async fn reset_lockout_handler(
    State(state): State<AppState>,
    CurrentContext(context): CurrentContext,
    Path(identifier): Path<String>,
) -> ApiResult<Json<ResponseEnvelope<LockoutStatusResponse>>> {
    require_security_admin(&context)?;
    let identifier = Identifier::parse(identifier.as_str())?;
    state.lockouts.reset(&identifier).await?;
    info!(
        identifier = %identifier,
        correlation_id = %context.correlation_id(),
        "lockout reset by administrator"
    );

    Ok(Json(ResponseEnvelope::ok(
        LockoutStatusResponse {
            identifier: identifier.to_string(),
            locked: false,
            attempts: 0,
            remaining_attempts: state.lockouts.policy().max_attempts(),
            ttl_seconds: None,
        },
        context.correlation_id(),
    )))
}

pub async fn flush_lockouts_handler(
    State(state): State<AppState>,
    CurrentContext(context): CurrentContext,
) -> ApiResult<Json<ResponseEnvelope<FlushResponse>>> {
    require_security_admin(&context)?;
    let removed = state.lockouts.flush_all().await?;

    Ok(Json(ResponseEnvelope::ok(
        FlushResponse { removed },
        context.correlation_id(),
    )))
}

pub async fn flush_replay_records_handler(
    State(state): State<AppState>,
    CurrentContext(context): CurrentContext,
) -> ApiResult<Json<ResponseEnvelope<FlushResponse>>> {
    require_security_admin(&context)?;
    let removed = state.replay_guard.flush_all().await?;
    info!(removed, correlation_id = %context.correlation_id(), "replay records flushed");

    Ok(Json(ResponseEnvelope::ok(
        FlushResponse { removed },
        context.correlation_id(),
    )))
}

fn require_security_admin(context: &RequestContext) -> Result<(), AppError> {
    if context.has_role(SECURITY_ADMIN_ROLE) {
        return Ok(());
    }

    Err(AppError::Forbidden(format!(
        "role '{SECURITY_ADMIN_ROLE}' is required"
    )))
}
