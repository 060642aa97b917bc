use axum::Json;
use serde::Serialize;
use serde_json::Value;
use tenantguard_http::{ApiResult, CurrentContext, ResponseEnvelope};

#[derive(Debug, Serialize)]
pub struct AcceptedSubmission {
    pub tenant_id: Option<String>,
    pub tenant_domain: Option<String>,
    pub payload: Value,
}

/// Accepts a replay-protected submission and echoes it back.
pub async fn submit_order_handler(
    CurrentContext(context): CurrentContext,
    Json(payload): Json<Value>,
) -> ApiResult<Json<ResponseEnvelope<AcceptedSubmission>>> {
    Ok(Json(ResponseEnvelope::ok(
        AcceptedSubmission {
            tenant_id: context.tenant_id().map(ToOwned::to_owned),
            tenant_domain: context.tenant_domain().map(ToOwned::to_owned),
            payload,
        },
        context.correlation_id(),
    )))
}
