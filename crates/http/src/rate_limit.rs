//! Token-bucket admission middleware.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use tenantguard_application::RateLimiter;
use tenantguard_domain::GuardRejection;
use tracing::{debug, error};

use crate::context::current_context;
use crate::error::ApiResult;
use crate::identifier::IdentifierExtractor;

/// State for [`enforce_rate_limit`]: a caller-owned limiter and how to key requests.
///
/// The limiter is shared, not owned: whoever built it keeps the handle to
/// stop its sweep.
#[derive(Clone)]
pub struct RateLimitGuard {
    limiter: Arc<dyn RateLimiter>,
    extractor: Arc<IdentifierExtractor>,
}

impl RateLimitGuard {
    /// Limits per client address.
    #[must_use]
    pub fn per_ip(limiter: Arc<dyn RateLimiter>) -> Self {
        Self::per_key(limiter, IdentifierExtractor::client_ip())
    }

    /// Limits per authenticated user, falling back to client address.
    #[must_use]
    pub fn per_user(limiter: Arc<dyn RateLimiter>) -> Self {
        Self::per_key(limiter, IdentifierExtractor::user())
    }

    /// Limits per tenant, falling back to client address.
    #[must_use]
    pub fn per_tenant(limiter: Arc<dyn RateLimiter>) -> Self {
        Self::per_key(limiter, IdentifierExtractor::tenant())
    }

    /// Limits per identifier produced by a custom extractor.
    #[must_use]
    pub fn per_key(limiter: Arc<dyn RateLimiter>, extractor: IdentifierExtractor) -> Self {
        Self {
            limiter,
            extractor: Arc::new(extractor),
        }
    }
}

/// Rejects requests whose identifier has no token left.
///
/// A limiter that cannot reach its store refuses the request.
pub async fn enforce_rate_limit(
    State(guard): State<RateLimitGuard>,
    request: Request,
    next: Next,
) -> ApiResult<Response> {
    let (request, identifier) = guard.extractor.extract(request).await?;

    match guard.limiter.allow(&identifier).await {
        Ok(true) => Ok(next.run(request).await),
        Ok(false) => {
            debug!(identifier = %identifier, "rate limit exceeded");
            Err(GuardRejection::RateLimitExceeded.into())
        }
        Err(failure) => {
            let correlation_id = current_context(request.extensions())
                .map(|context| context.correlation_id().to_string())
                .unwrap_or_default();
            error!(
                error = %failure,
                identifier = %identifier,
                correlation_id,
                "rate limit check failed, rejecting request"
            );
            Err(GuardRejection::RateLimitCheckFailed.into())
        }
    }
}
