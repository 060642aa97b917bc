//! Shared store wiring for the application integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tenantguard_application::{KeyValueStore, ScanPage, StoreScript};
use tenantguard_core::{AppError, AppResult};
use tenantguard_infrastructure::InMemoryKeyValueStore;

/// The in-memory adapter behind a switch that turns every call into a
/// dependency error, the way an unreachable Redis surfaces.
#[derive(Default)]
pub struct FlakyStore {
    inner: InMemoryKeyValueStore,
    failing: AtomicBool,
}

impl FlakyStore {
    pub fn fail_all(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.inner.len().await
    }

    fn check_available(&self) -> AppResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::Dependency("store unavailable".to_owned()));
        }

        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for FlakyStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> AppResult<bool> {
        self.check_available()?;
        self.inner.set_if_absent(key, value, ttl).await
    }

    async fn increment(&self, key: &str) -> AppResult<i64> {
        self.check_available()?;
        self.inner.increment(key).await
    }

    async fn set_ttl(&self, key: &str, ttl: Duration) -> AppResult<bool> {
        self.check_available()?;
        self.inner.set_ttl(key, ttl).await
    }

    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        self.check_available()?;
        self.inner.get(key).await
    }

    async fn delete(&self, keys: &[String]) -> AppResult<u64> {
        self.check_available()?;
        self.inner.delete(keys).await
    }

    async fn ttl(&self, key: &str) -> AppResult<Option<Duration>> {
        self.check_available()?;
        self.inner.ttl(key).await
    }

    async fn scan(&self, pattern: &str, cursor: u64, batch_size: usize) -> AppResult<ScanPage> {
        self.check_available()?;
        self.inner.scan(pattern, cursor, batch_size).await
    }

    async fn eval(&self, key: &str, script: &StoreScript) -> AppResult<i64> {
        self.check_available()?;
        self.inner.eval(key, script).await
    }
}
