use async_trait::async_trait;
use tenantguard_core::AppResult;
use tenantguard_domain::Identifier;

/// Admission port shared by the in-process and store-backed limiters.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Returns whether one more request for the identifier is admitted.
    ///
    /// Errors only come from store-backed implementations; callers must
    /// treat them as a refusal.
    async fn allow(&self, identifier: &Identifier) -> AppResult<bool>;
}
