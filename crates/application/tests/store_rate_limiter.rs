//! Store-backed token buckets shared across limiter handles.

use std::sync::Arc;
use std::time::Duration;

use tenantguard_application::{RateLimiter, StoreTokenBucketLimiter};
use tenantguard_core::{AppError, AppResult};
use tenantguard_domain::{Identifier, TokenBucketPolicy};

mod support;

use support::FlakyStore;

fn policy(rate: f64, burst: u32) -> AppResult<TokenBucketPolicy> {
    TokenBucketPolicy::new(rate, burst)?.with_idle_threshold(Duration::from_secs(600))
}

#[tokio::test(start_paused = true)]
async fn store_backed_limiter_enforces_burst_across_handles() -> AppResult<()> {
    let store = Arc::new(FlakyStore::default());
    let first = StoreTokenBucketLimiter::new(store.clone(), policy(10.0, 10)?, "ratelimit")?;
    let second = first.clone();
    let client = Identifier::client_ip("1.2.3.4");

    let mut admitted = 0;
    for index in 0..12 {
        let limiter = if index % 2 == 0 { &first } else { &second };
        if limiter.allow(&client).await? {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 10);

    tokio::time::advance(Duration::from_secs(1)).await;
    assert!(first.allow(&client).await?);
    Ok(())
}

#[tokio::test]
async fn store_backed_limiter_surfaces_store_failures() -> AppResult<()> {
    let store = Arc::new(FlakyStore::default());
    store.fail_all(true);
    let limiter = StoreTokenBucketLimiter::new(store, policy(10.0, 10)?, "ratelimit")?;

    let result = limiter.allow(&Identifier::client_ip("1.2.3.4")).await;

    assert!(matches!(result, Err(AppError::Dependency(_))));
    Ok(())
}

#[test]
fn store_backed_limiter_requires_prefix() -> AppResult<()> {
    let store = Arc::new(FlakyStore::default());
    let result = StoreTokenBucketLimiter::new(store, policy(10.0, 10)?, " ");
    assert!(result.is_err());
    Ok(())
}
