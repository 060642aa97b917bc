//! Brute-force lockout middleware and the handler-side attempt signal.

use std::sync::Arc;

use axum::extract::{FromRequestParts, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use http::request::Parts;
use tenantguard_application::{BruteForceService, LockoutDecision};
use tenantguard_core::AppError;
use tenantguard_domain::{GuardRejection, Identifier};
use tracing::{debug, error, warn};

use crate::context::current_context;
use crate::error::{ApiError, ApiResult};
use crate::identifier::IdentifierExtractor;

/// State for [`enforce_lockout`].
#[derive(Clone)]
pub struct BruteForceProtection {
    service: BruteForceService,
    extractor: Arc<IdentifierExtractor>,
}

impl BruteForceProtection {
    /// Protects a route keyed by `extractor`, e.g. the submitted username.
    #[must_use]
    pub fn new(service: BruteForceService, extractor: IdentifierExtractor) -> Self {
        Self {
            service,
            extractor: Arc::new(extractor),
        }
    }
}

/// Refuses locked identifiers before the handler runs.
///
/// Admitted requests carry a [`BruteForceAttempt`] the handler uses to
/// report the outcome. A store failure refuses the request.
pub async fn enforce_lockout(
    State(protection): State<BruteForceProtection>,
    request: Request,
    next: Next,
) -> ApiResult<Response> {
    let (mut request, identifier) = protection.extractor.extract(request).await?;

    match protection.service.pre_check(&identifier).await {
        Ok(LockoutDecision::Allowed { attempts }) => {
            request.extensions_mut().insert(BruteForceAttempt {
                service: protection.service.clone(),
                identifier,
                attempts,
            });
            Ok(next.run(request).await)
        }
        Ok(LockoutDecision::Locked {
            retry_after_seconds,
        }) => {
            debug!(identifier = %identifier, retry_after_seconds, "locked identifier refused");
            Err(GuardRejection::AccountLocked {
                retry_after_seconds,
            }
            .into())
        }
        Err(failure) => {
            let correlation_id = current_context(request.extensions())
                .map(|context| context.correlation_id().to_string())
                .unwrap_or_default();
            error!(
                error = %failure,
                identifier = %identifier,
                correlation_id,
                "lockout check failed, rejecting request"
            );
            Err(GuardRejection::LockoutCheckFailed.into())
        }
    }
}

/// Handle for reporting whether the protected attempt succeeded.
///
/// Reporting never fails the response; store errors are logged because they
/// weaken the lockout.
#[derive(Clone)]
pub struct BruteForceAttempt {
    service: BruteForceService,
    identifier: Identifier,
    attempts: u32,
}

impl BruteForceAttempt {
    /// Identifier the attempt is counted against.
    #[must_use]
    pub fn identifier(&self) -> &Identifier {
        &self.identifier
    }

    /// Failures already counted when the request was admitted.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Attempts left before this one is reported.
    #[must_use]
    pub fn remaining_attempts(&self) -> u32 {
        self.service.remaining_attempts(self.attempts)
    }

    /// Counts a failure and returns the attempts left before lockout.
    pub async fn record_failure(&self) -> u32 {
        let attempts = match self.service.record_failure(&self.identifier).await {
            Ok(attempts) => attempts,
            Err(failure) => {
                warn!(
                    error = %failure,
                    identifier = %self.identifier,
                    "failed to record failed attempt"
                );
                self.attempts.saturating_add(1)
            }
        };

        self.service.remaining_attempts(attempts)
    }

    /// Clears the failure counter.
    pub async fn record_success(&self) {
        if let Err(failure) = self.service.record_success(&self.identifier).await {
            warn!(
                error = %failure,
                identifier = %self.identifier,
                "failed to clear attempt counter"
            );
        }
    }
}

impl<S> FromRequestParts<S> for BruteForceAttempt
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<Self>().cloned().ok_or_else(|| {
            AppError::Internal("brute-force protection middleware is not installed".to_owned())
                .into()
        })
    }
}
