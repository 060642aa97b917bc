//! Store-backed mutual exclusion across processes.

use std::sync::Arc;
use std::time::Duration;

use tenantguard_core::{AppError, AppResult};
use tracing::debug;

use crate::store_ports::{KeyValueStore, StoreScript};

/// Proof of ownership for one acquired mutex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutexLease {
    key: String,
    token: String,
}

impl MutexLease {
    /// Store key holding the lock.
    #[must_use]
    pub fn key(&self) -> &str {
        self.key.as_str()
    }

    /// Random token identifying this holder.
    #[must_use]
    pub fn token(&self) -> &str {
        self.token.as_str()
    }
}

/// Named mutexes with TTL, safe to release only by their holder.
#[derive(Clone)]
pub struct DistributedMutex {
    store: Arc<dyn KeyValueStore>,
    key_prefix: String,
}

impl DistributedMutex {
    /// Creates a mutex family under `key_prefix`.
    pub fn new(store: Arc<dyn KeyValueStore>, key_prefix: impl Into<String>) -> AppResult<Self> {
        let key_prefix = key_prefix.into();
        if key_prefix.trim().is_empty() {
            return Err(AppError::Validation(
                "mutex key prefix must not be empty".to_owned(),
            ));
        }

        Ok(Self { store, key_prefix })
    }

    /// Tries to take the named lock for `ttl`. Returns `None` when it is held.
    pub async fn try_acquire(&self, name: &str, ttl: Duration) -> AppResult<Option<MutexLease>> {
        if name.trim().is_empty() {
            return Err(AppError::Validation(
                "mutex name must not be empty".to_owned(),
            ));
        }

        if ttl.is_zero() {
            return Err(AppError::Validation(
                "mutex ttl must be greater than zero".to_owned(),
            ));
        }

        let key = format!("{}:{name}", self.key_prefix);
        let token = uuid::Uuid::new_v4().simple().to_string();

        if !self
            .store
            .set_if_absent(key.as_str(), token.as_str(), ttl)
            .await?
        {
            debug!(mutex = %key, "mutex already held");
            return Ok(None);
        }

        Ok(Some(MutexLease { key, token }))
    }

    /// Releases the lock if the lease still owns it. Returns whether it did.
    pub async fn release(&self, lease: &MutexLease) -> AppResult<bool> {
        let released = self
            .store
            .eval(
                lease.key.as_str(),
                &StoreScript::CompareAndDelete {
                    expected: lease.token.clone(),
                },
            )
            .await?;

        Ok(released > 0)
    }

    /// Extends the lock to `ttl` from now if the lease still owns it.
    pub async fn extend(&self, lease: &MutexLease, ttl: Duration) -> AppResult<bool> {
        if ttl.is_zero() {
            return Err(AppError::Validation(
                "mutex ttl must be greater than zero".to_owned(),
            ));
        }

        let extended = self
            .store
            .eval(
                lease.key.as_str(),
                &StoreScript::CompareAndExpire {
                    expected: lease.token.clone(),
                    ttl,
                },
            )
            .await?;

        Ok(extended > 0)
    }
}
