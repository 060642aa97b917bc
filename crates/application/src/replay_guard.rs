//! Replay protection for mutation endpoints.
//!
//! A request is accepted at most once per freshness window. Uniqueness is
//! delegated to the store's atomic set-if-absent; the record's TTL is the
//! window itself and is never extended.

use std::fmt::Write;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use sha2::{Digest, Sha256};
use tenantguard_core::AppResult;
use tenantguard_domain::{GuardRejection, ReplayPolicy};
use tracing::{debug, error};

use crate::store_ports::{KeyValueStore, delete_matching};

const ANONYMOUS_SEGMENT: &str = "_";
const FLUSH_BATCH_SIZE: usize = 500;

/// Request attributes hashed in idempotency mode.
#[derive(Debug, Clone, Copy)]
pub struct RequestFingerprint<'a> {
    /// HTTP method.
    pub method: &'a str,
    /// Request path, including the query string when it is significant.
    pub path: &'a str,
    /// Authenticated user, if any.
    pub user_id: Option<&'a str>,
    /// Buffered request body, when the caller opted to include it.
    pub body: Option<&'a [u8]>,
}

impl RequestFingerprint<'_> {
    fn digest_hex(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.method.as_bytes());
        hasher.update(b"|");
        hasher.update(self.path.as_bytes());
        hasher.update(b"|");
        hasher.update(self.user_id.unwrap_or_default().as_bytes());
        hasher.update(b"|");
        if let Some(body) = self.body {
            hasher.update(body);
        }

        hasher
            .finalize()
            .iter()
            .fold(String::with_capacity(64), |mut acc, byte| {
                let _ = write!(acc, "{byte:02x}");
                acc
            })
    }
}

/// Application service enforcing at-most-once acceptance of requests.
#[derive(Clone)]
pub struct ReplayGuard {
    store: Arc<dyn KeyValueStore>,
    policy: ReplayPolicy,
}

impl ReplayGuard {
    /// Creates a replay guard.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, policy: ReplayPolicy) -> Self {
        Self { store, policy }
    }

    /// Policy the guard enforces.
    #[must_use]
    pub fn policy(&self) -> &ReplayPolicy {
        &self.policy
    }

    /// Checks a nonce and Unix-seconds timestamp against the current clock.
    pub async fn check_nonce(
        &self,
        user_id: Option<&str>,
        nonce: Option<&str>,
        timestamp: Option<&str>,
    ) -> Result<(), GuardRejection> {
        self.check_nonce_at(user_id, nonce, timestamp, Utc::now())
            .await
    }

    /// Checks a nonce and timestamp against an explicit clock reading.
    pub async fn check_nonce_at(
        &self,
        user_id: Option<&str>,
        nonce: Option<&str>,
        timestamp: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), GuardRejection> {
        let nonce = nonce
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or(GuardRejection::MissingNonce)?;
        let timestamp = timestamp
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or(GuardRejection::MissingTimestamp)?;
        let issued_at = timestamp
            .parse::<i64>()
            .map_err(|_| GuardRejection::InvalidTimestamp)?;

        let issued =
            DateTime::from_timestamp(issued_at, 0).ok_or(GuardRejection::InvalidTimestamp)?;
        let age = now.signed_duration_since(issued);
        if age < TimeDelta::zero() {
            return Err(GuardRejection::FutureTimestamp);
        }

        // Unrounded: the record claimed below expires one window after `now`.
        let window = TimeDelta::from_std(self.policy.window()).unwrap_or(TimeDelta::MAX);
        if age > window {
            return Err(GuardRejection::ExpiredRequest);
        }

        let key = format!(
            "{}:{}:{issued_at}:{nonce}",
            self.policy.key_prefix(),
            user_segment(user_id),
        );
        self.claim(key.as_str()).await
    }

    /// Checks a request hash for idempotency enforcement without client nonces.
    pub async fn check_request_hash(
        &self,
        fingerprint: &RequestFingerprint<'_>,
    ) -> Result<(), GuardRejection> {
        let key = format!(
            "{}:hash:{}",
            self.policy.key_prefix(),
            fingerprint.digest_hex()
        );
        self.claim(key.as_str()).await
    }

    /// Removes every record under the guard's prefix.
    pub async fn flush_all(&self) -> AppResult<u64> {
        let pattern = format!("{}:*", self.policy.key_prefix());
        delete_matching(self.store.as_ref(), pattern.as_str(), FLUSH_BATCH_SIZE).await
    }

    async fn claim(&self, key: &str) -> Result<(), GuardRejection> {
        match self
            .store
            .set_if_absent(key, "1", self.policy.window())
            .await
        {
            Ok(true) => Ok(()),
            Ok(false) => {
                debug!("replayed request rejected");
                Err(GuardRejection::ReplayDetected)
            }
            Err(error) => {
                error!(error = %error, "replay check failed, rejecting request");
                Err(GuardRejection::ReplayCheckFailed)
            }
        }
    }
}

/// Key segment for the user scope of a nonce record.
///
/// `%`, `:` and `_` are percent-encoded so a user id can neither shift the
/// segment boundaries nor collide with the anonymous marker.
fn user_segment(user_id: Option<&str>) -> String {
    let Some(user_id) = user_id.filter(|value| !value.is_empty()) else {
        return ANONYMOUS_SEGMENT.to_owned();
    };

    let mut segment = String::with_capacity(user_id.len());
    for character in user_id.chars() {
        match character {
            '%' => segment.push_str("%25"),
            ':' => segment.push_str("%3A"),
            '_' => segment.push_str("%5F"),
            other => segment.push(other),
        }
    }
    segment
}
