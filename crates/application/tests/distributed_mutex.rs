//! Lease semantics of the store-backed mutex.

use std::sync::Arc;
use std::time::Duration;

use tenantguard_application::DistributedMutex;
use tenantguard_core::AppResult;

mod support;

use support::FlakyStore;

const TTL: Duration = Duration::from_secs(30);

fn mutex() -> AppResult<DistributedMutex> {
    DistributedMutex::new(Arc::new(FlakyStore::default()), "mutex")
}

#[tokio::test(start_paused = true)]
async fn second_acquire_waits_for_release() -> AppResult<()> {
    let mutex = mutex()?;

    let Some(lease) = mutex.try_acquire("sweep", TTL).await? else {
        panic!("first acquire should succeed");
    };
    assert_eq!(lease.key(), "mutex:sweep");
    assert!(mutex.try_acquire("sweep", TTL).await?.is_none());

    assert!(mutex.release(&lease).await?);
    assert!(mutex.try_acquire("sweep", TTL).await?.is_some());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn stale_lease_cannot_release_new_holder() -> AppResult<()> {
    let mutex = mutex()?;

    let Some(stale) = mutex.try_acquire("sweep", TTL).await? else {
        panic!("first acquire should succeed");
    };
    tokio::time::advance(TTL).await;

    let Some(current) = mutex.try_acquire("sweep", TTL).await? else {
        panic!("expired lock should be free");
    };
    assert_ne!(stale.token(), current.token());
    assert!(!mutex.release(&stale).await?);
    assert!(!mutex.extend(&stale, TTL).await?);
    assert!(mutex.try_acquire("sweep", TTL).await?.is_none());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn extend_keeps_lock_alive() -> AppResult<()> {
    let mutex = mutex()?;

    let Some(lease) = mutex.try_acquire("sweep", TTL).await? else {
        panic!("first acquire should succeed");
    };
    tokio::time::advance(Duration::from_secs(20)).await;
    assert!(mutex.extend(&lease, TTL).await?);

    tokio::time::advance(Duration::from_secs(20)).await;
    assert!(mutex.try_acquire("sweep", TTL).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn rejects_empty_names_and_zero_ttl() -> AppResult<()> {
    let mutex = mutex()?;

    assert!(mutex.try_acquire(" ", TTL).await.is_err());
    assert!(mutex.try_acquire("sweep", Duration::ZERO).await.is_err());
    assert!(DistributedMutex::new(Arc::new(FlakyStore::default()), "").is_err());
    Ok(())
}
