use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tenantguard_core::{AppError, AppResult};
use tenantguard_domain::{Identifier, TokenBucketPolicy};

use super::ports::RateLimiter;
use crate::store_ports::{KeyValueStore, StoreScript};

/// Store-backed token bucket shared by every replica using the same store.
///
/// Each decision is one atomic refill-and-consume script on the store; the
/// bucket expires after it could have refilled completely plus the idle
/// threshold.
#[derive(Clone)]
pub struct StoreTokenBucketLimiter {
    store: Arc<dyn KeyValueStore>,
    policy: TokenBucketPolicy,
    key_prefix: String,
}

impl StoreTokenBucketLimiter {
    /// Creates a limiter storing buckets under `key_prefix`.
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        policy: TokenBucketPolicy,
        key_prefix: impl Into<String>,
    ) -> AppResult<Self> {
        let key_prefix = key_prefix.into();
        if key_prefix.trim().is_empty() {
            return Err(AppError::Validation(
                "rate limit key prefix must not be empty".to_owned(),
            ));
        }

        Ok(Self {
            store,
            policy,
            key_prefix,
        })
    }

    fn key_for(&self, identifier: &Identifier) -> String {
        format!("{}:{identifier}", self.key_prefix)
    }

    fn idle_ttl(&self) -> Duration {
        self.policy
            .full_refill_time()
            .saturating_add(self.policy.idle_threshold())
    }
}

#[async_trait]
impl RateLimiter for StoreTokenBucketLimiter {
    async fn allow(&self, identifier: &Identifier) -> AppResult<bool> {
        let taken = self
            .store
            .eval(
                self.key_for(identifier).as_str(),
                &StoreScript::TokenBucketTake {
                    rate_per_second: self.policy.rate_per_second(),
                    burst: self.policy.burst(),
                    idle_ttl: self.idle_ttl(),
                },
            )
            .await?;

        Ok(taken == 1)
    }
}
