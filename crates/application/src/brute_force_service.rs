//! Brute-force lockout controller.
//!
//! Per identifier the store holds `<prefix>:attempts:<id>` (a counter whose
//! TTL starts at the first failure) and `<prefix>:lock:<id>` (a marker whose
//! TTL is the lockout). The controller is a stateless client of the store.

use std::sync::Arc;
use std::time::Duration;

use tenantguard_core::{AppError, AppResult};
use tenantguard_domain::{Identifier, LockoutPolicy};
use tracing::{info, warn};

use crate::store_ports::{KeyValueStore, delete_matching};

const FLUSH_BATCH_SIZE: usize = 500;

/// Outcome of the pre-check performed before the protected handler runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockoutDecision {
    /// Handler may run. Carries the failures recorded so far in the window.
    Allowed {
        /// Failed attempts currently counted.
        attempts: u32,
    },
    /// Identifier is locked.
    Locked {
        /// Seconds until the lock expires.
        retry_after_seconds: u64,
    },
}

/// Read-only view of an identifier's lockout state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutStatus {
    /// Whether a lock is installed.
    pub locked: bool,
    /// Failed attempts currently counted.
    pub attempts: u32,
    /// Remaining lifetime of the lock, or of the attempt window when unlocked.
    pub ttl: Option<Duration>,
}

/// Application service counting failures and installing timed lockouts.
#[derive(Clone)]
pub struct BruteForceService {
    store: Arc<dyn KeyValueStore>,
    policy: LockoutPolicy,
}

impl BruteForceService {
    /// Creates a brute-force controller.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, policy: LockoutPolicy) -> Self {
        Self { store, policy }
    }

    /// Policy the controller enforces.
    #[must_use]
    pub fn policy(&self) -> &LockoutPolicy {
        &self.policy
    }

    /// Attempts left before the next pre-check locks the identifier.
    #[must_use]
    pub fn remaining_attempts(&self, attempts: u32) -> u32 {
        self.policy.max_attempts().saturating_sub(attempts)
    }

    /// Decides whether the protected handler may run for the identifier.
    ///
    /// Installs the lock when the counter has reached the threshold. Store
    /// errors are returned to the caller, which must refuse the request.
    pub async fn pre_check(&self, identifier: &Identifier) -> AppResult<LockoutDecision> {
        let lock_key = self.lock_key(identifier);

        if self.store.get(lock_key.as_str()).await?.is_some() {
            let retry_after_seconds = self.retry_after(lock_key.as_str()).await?;
            return Ok(LockoutDecision::Locked {
                retry_after_seconds,
            });
        }

        let attempts_key = self.attempts_key(identifier);
        let attempts = self.read_attempts(attempts_key.as_str()).await?;

        if attempts < u64::from(self.policy.max_attempts()) {
            return Ok(LockoutDecision::Allowed {
                attempts: u32::try_from(attempts).unwrap_or(u32::MAX),
            });
        }

        let lockout = self.policy.lockout_for(attempts);
        let installed = self
            .store
            .set_if_absent(lock_key.as_str(), "1", lockout)
            .await?;
        self.store.delete(&[attempts_key]).await?;

        let retry_after_seconds = if installed {
            info!(
                identifier = %identifier,
                attempts,
                lockout_secs = lockout.as_secs(),
                "identifier locked after repeated failures"
            );
            ceil_seconds(lockout)
        } else {
            self.retry_after(lock_key.as_str()).await?
        };

        Ok(LockoutDecision::Locked {
            retry_after_seconds,
        })
    }

    /// Counts one failure and returns the new attempt count.
    ///
    /// The attempt window starts at the first failure; later increments do
    /// not extend it.
    pub async fn record_failure(&self, identifier: &Identifier) -> AppResult<u32> {
        let attempts_key = self.attempts_key(identifier);
        let attempts = self.store.increment(attempts_key.as_str()).await?;

        if attempts == 1 {
            self.store
                .set_ttl(attempts_key.as_str(), self.policy.attempt_window())
                .await?;
        }

        Ok(u32::try_from(attempts.max(0)).unwrap_or(u32::MAX))
    }

    /// Clears the attempt counter after a successful attempt.
    pub async fn record_success(&self, identifier: &Identifier) -> AppResult<()> {
        self.store.delete(&[self.attempts_key(identifier)]).await?;
        Ok(())
    }

    /// Removes both the lock and the attempt counter in one batch.
    pub async fn reset(&self, identifier: &Identifier) -> AppResult<()> {
        let removed = self
            .store
            .delete(&[self.lock_key(identifier), self.attempts_key(identifier)])
            .await?;

        if removed > 0 {
            info!(identifier = %identifier, "lockout state reset");
        }

        Ok(())
    }

    /// Reads the lockout state without modifying it.
    pub async fn status(&self, identifier: &Identifier) -> AppResult<LockoutStatus> {
        let lock_key = self.lock_key(identifier);
        let attempts_key = self.attempts_key(identifier);

        let locked = self.store.get(lock_key.as_str()).await?.is_some();
        let attempts = self.read_attempts(attempts_key.as_str()).await?;
        let ttl = if locked {
            self.store.ttl(lock_key.as_str()).await?
        } else {
            self.store.ttl(attempts_key.as_str()).await?
        };

        Ok(LockoutStatus {
            locked,
            attempts: u32::try_from(attempts).unwrap_or(u32::MAX),
            ttl,
        })
    }

    /// Removes every lock and counter under the controller's prefix.
    pub async fn flush_all(&self) -> AppResult<u64> {
        let pattern = format!("{}:*", self.policy.key_prefix());
        let removed =
            delete_matching(self.store.as_ref(), pattern.as_str(), FLUSH_BATCH_SIZE).await?;
        warn!(removed, "all lockout state flushed");
        Ok(removed)
    }

    fn attempts_key(&self, identifier: &Identifier) -> String {
        format!("{}:attempts:{identifier}", self.policy.key_prefix())
    }

    fn lock_key(&self, identifier: &Identifier) -> String {
        format!("{}:lock:{identifier}", self.policy.key_prefix())
    }

    async fn read_attempts(&self, attempts_key: &str) -> AppResult<u64> {
        let Some(value) = self.store.get(attempts_key).await? else {
            return Ok(0);
        };

        let attempts = value.trim().parse::<i64>().map_err(|error| {
            AppError::Dependency(format!(
                "attempt counter holds a non-integer value '{value}': {error}"
            ))
        })?;

        Ok(u64::try_from(attempts).unwrap_or(0))
    }

    async fn retry_after(&self, lock_key: &str) -> AppResult<u64> {
        let remaining = self
            .store
            .ttl(lock_key)
            .await?
            .unwrap_or_else(|| self.policy.lockout_duration());

        Ok(ceil_seconds(remaining).max(1))
    }
}

fn ceil_seconds(duration: Duration) -> u64 {
    let whole = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        whole.saturating_add(1)
    } else {
        whole
    }
}
