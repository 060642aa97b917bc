//! In-memory key-value store for single-process deployments and tests.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tenantguard_application::{KeyValueStore, ScanPage, StoreScript, scan_in_hash_order};
use tenantguard_core::{AppError, AppResult};
use tokio::sync::RwLock;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
struct BucketState {
    tokens: f64,
    refilled_at: Instant,
}

#[derive(Debug, Clone)]
enum StoredValue {
    Text(String),
    Bucket(BucketState),
}

#[derive(Debug, Clone)]
struct StoreEntry {
    value: StoredValue,
    expires_at: Option<Instant>,
}

impl StoreEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|expires_at| expires_at > now)
    }

    fn text(&self, key: &str) -> AppResult<&str> {
        match &self.value {
            StoredValue::Text(value) => Ok(value.as_str()),
            StoredValue::Bucket(_) => Err(wrong_type(key)),
        }
    }
}

/// Store adapter keeping every key in process memory.
///
/// Expired keys are dropped lazily on access and by [`Self::purge_expired`].
#[derive(Default)]
pub struct InMemoryKeyValueStore {
    entries: RwLock<HashMap<String, StoreEntry>>,
}

impl InMemoryKeyValueStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every expired key and returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        before - entries.len()
    }

    /// Number of live keys.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|entry| entry.is_live(now))
            .count()
    }

    /// Returns whether no live keys are held.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn live_entry<T>(
        &self,
        key: &str,
        read: impl FnOnce(&StoreEntry, Instant) -> AppResult<T>,
    ) -> AppResult<Option<T>> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => read(entry, now).map(Some),
            _ => Ok(None),
        }
    }
}

fn wrong_type(key: &str) -> AppError {
    AppError::Dependency(format!(
        "key '{key}' holds a value of the wrong type for this operation"
    ))
}

/// Expiry instant for a TTL, rejecting TTLs the monotonic clock cannot represent.
fn expiry(now: Instant, ttl: Duration) -> AppResult<Instant> {
    now.checked_add(ttl)
        .ok_or_else(|| AppError::Validation(format!("ttl of {ttl:?} is out of range")))
}

fn drop_if_expired(entries: &mut HashMap<String, StoreEntry>, key: &str, now: Instant) {
    if entries.get(key).is_some_and(|entry| !entry.is_live(now)) {
        entries.remove(key);
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKeyValueStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> AppResult<bool> {
        let now = Instant::now();
        let expires_at = expiry(now, ttl)?;
        let mut entries = self.entries.write().await;
        drop_if_expired(&mut entries, key, now);

        if entries.contains_key(key) {
            return Ok(false);
        }

        entries.insert(
            key.to_owned(),
            StoreEntry {
                value: StoredValue::Text(value.to_owned()),
                expires_at: Some(expires_at),
            },
        );

        Ok(true)
    }

    async fn increment(&self, key: &str) -> AppResult<i64> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        drop_if_expired(&mut entries, key, now);

        let entry = entries.entry(key.to_owned()).or_insert_with(|| StoreEntry {
            value: StoredValue::Text("0".to_owned()),
            expires_at: None,
        });

        let current = entry.text(key)?.parse::<i64>().map_err(|error| {
            AppError::Dependency(format!("key '{key}' does not hold an integer: {error}"))
        })?;
        let next = current.checked_add(1).ok_or_else(|| {
            AppError::Dependency(format!("increment of key '{key}' would overflow"))
        })?;

        entry.value = StoredValue::Text(next.to_string());
        Ok(next)
    }

    async fn set_ttl(&self, key: &str, ttl: Duration) -> AppResult<bool> {
        let now = Instant::now();
        let expires_at = expiry(now, ttl)?;
        let mut entries = self.entries.write().await;
        drop_if_expired(&mut entries, key, now);

        match entries.get_mut(key) {
            Some(entry) => {
                entry.expires_at = Some(expires_at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        self.live_entry(key, |entry, _| entry.text(key).map(str::to_owned))
            .await
    }

    async fn delete(&self, keys: &[String]) -> AppResult<u64> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;

        Ok(keys
            .iter()
            .filter_map(|key| entries.remove(key))
            .filter(|entry| entry.is_live(now))
            .count() as u64)
    }

    async fn ttl(&self, key: &str) -> AppResult<Option<Duration>> {
        Ok(self
            .live_entry(key, |entry, now| {
                Ok(entry
                    .expires_at
                    .map(|expires_at| expires_at.saturating_duration_since(now)))
            })
            .await?
            .flatten())
    }

    async fn scan(&self, pattern: &str, cursor: u64, batch_size: usize) -> AppResult<ScanPage> {
        if batch_size == 0 {
            return Err(AppError::Validation(
                "scan batch size must be greater than zero".to_owned(),
            ));
        }

        let now = Instant::now();
        let entries = self.entries.read().await;
        let live = entries
            .iter()
            .filter(|(_, entry)| entry.is_live(now))
            .map(|(key, _)| key);

        Ok(scan_in_hash_order(live, pattern, cursor, batch_size))
    }

    async fn eval(&self, key: &str, script: &StoreScript) -> AppResult<i64> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        drop_if_expired(&mut entries, key, now);

        match script {
            StoreScript::CompareAndDelete { expected } => {
                let Some(entry) = entries.get(key) else {
                    return Ok(0);
                };
                if entry.text(key)? != expected.as_str() {
                    return Ok(0);
                }

                entries.remove(key);
                Ok(1)
            }
            StoreScript::CompareAndExpire { expected, ttl } => {
                let Some(entry) = entries.get_mut(key) else {
                    return Ok(0);
                };
                if entry.text(key)? != expected.as_str() {
                    return Ok(0);
                }

                entry.expires_at = Some(expiry(now, *ttl)?);
                Ok(1)
            }
            StoreScript::TokenBucketTake {
                rate_per_second,
                burst,
                idle_ttl,
            } => {
                let expires_at = expiry(now, *idle_ttl)?;
                let capacity = f64::from(*burst);
                let mut state = match entries.get(key).map(|entry| &entry.value) {
                    Some(StoredValue::Bucket(state)) => *state,
                    Some(StoredValue::Text(_)) => return Err(wrong_type(key)),
                    None => BucketState {
                        tokens: capacity,
                        refilled_at: now,
                    },
                };

                let elapsed = now.saturating_duration_since(state.refilled_at);
                state.tokens =
                    (state.tokens + elapsed.as_secs_f64() * rate_per_second).min(capacity);
                state.refilled_at = now;

                let taken = if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    1
                } else {
                    0
                };

                entries.insert(
                    key.to_owned(),
                    StoreEntry {
                        value: StoredValue::Bucket(state),
                        expires_at: Some(expires_at),
                    },
                );

                Ok(taken)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use std::time::Duration;

    use tenantguard_application::{
        BruteForceService, DistributedMutex, KeyValueStore, LockoutDecision, RateLimiter,
        StoreScript, StoreTokenBucketLimiter, delete_matching,
    };
    use tenantguard_core::{AppError, AppResult};
    use tenantguard_domain::{Identifier, LockoutPolicy, TokenBucketPolicy};

    use super::InMemoryKeyValueStore;

    const WINDOW: Duration = Duration::from_secs(300);

    #[tokio::test(start_paused = true)]
    async fn set_if_absent_claims_once_until_expiry() -> AppResult<()> {
        let store = InMemoryKeyValueStore::new();

        assert!(store.set_if_absent("replay:_:1:n", "1", WINDOW).await?);
        assert!(!store.set_if_absent("replay:_:1:n", "1", WINDOW).await?);

        tokio::time::advance(WINDOW).await;
        assert_eq!(store.get("replay:_:1:n").await?, None);
        assert!(store.set_if_absent("replay:_:1:n", "1", WINDOW).await?);
        Ok(())
    }

    #[tokio::test]
    async fn unrepresentable_ttls_are_errors() -> AppResult<()> {
        let store = InMemoryKeyValueStore::new();
        let forever = Duration::from_secs(u64::MAX);

        let claimed = store.set_if_absent("replay:_:1:n", "1", forever).await;
        assert!(matches!(claimed, Err(AppError::Validation(_))));
        assert!(store.is_empty().await);

        assert!(store.set_if_absent("mutex:sweep", "token", WINDOW).await?);
        assert!(store.set_ttl("mutex:sweep", forever).await.is_err());
        let extended = store
            .eval(
                "mutex:sweep",
                &StoreScript::CompareAndExpire {
                    expected: "token".to_owned(),
                    ttl: forever,
                },
            )
            .await;
        assert!(extended.is_err());
        assert!(store.ttl("mutex:sweep").await?.is_some_and(|ttl| ttl <= WINDOW));

        let taken = store
            .eval(
                "ratelimit:ip:1.2.3.4",
                &StoreScript::TokenBucketTake {
                    rate_per_second: 1.0,
                    burst: 1,
                    idle_ttl: forever,
                },
            )
            .await;
        assert!(taken.is_err());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn increment_preserves_ttl() -> AppResult<()> {
        let store = InMemoryKeyValueStore::new();

        assert_eq!(store.increment("counter").await?, 1);
        assert_eq!(store.ttl("counter").await?, None);
        assert!(store.set_ttl("counter", WINDOW).await?);

        tokio::time::advance(Duration::from_secs(100)).await;
        assert_eq!(store.increment("counter").await?, 2);
        assert_eq!(store.ttl("counter").await?, Some(Duration::from_secs(200)));

        assert!(!store.set_ttl("missing", WINDOW).await?);
        Ok(())
    }

    #[tokio::test]
    async fn increment_rejects_non_integer_values() -> AppResult<()> {
        let store = InMemoryKeyValueStore::new();
        store.set_if_absent("counter", "many", WINDOW).await?;

        let result = store.increment("counter").await;

        assert!(matches!(result, Err(AppError::Dependency(_))));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn delete_counts_only_live_keys() -> AppResult<()> {
        let store = InMemoryKeyValueStore::new();
        store.set_if_absent("a", "1", Duration::from_secs(1)).await?;
        store.set_if_absent("b", "1", WINDOW).await?;

        tokio::time::advance(Duration::from_secs(2)).await;
        let removed = store
            .delete(&["a".to_owned(), "b".to_owned(), "c".to_owned()])
            .await?;

        assert_eq!(removed, 1);
        assert!(store.is_empty().await);
        Ok(())
    }

    #[tokio::test]
    async fn scan_pages_cover_every_match_while_deleting() -> AppResult<()> {
        let store = InMemoryKeyValueStore::new();
        for index in 0..50 {
            store
                .set_if_absent(&format!("replay:_:{index}:n"), "1", WINDOW)
                .await?;
        }
        store.set_if_absent("bruteforce:lock:user:a", "1", WINDOW).await?;

        let mut seen = BTreeSet::new();
        let mut cursor = 0;
        loop {
            let page = store.scan("replay:*", cursor, 7).await?;
            assert!(page.keys.len() <= 7);
            seen.extend(page.keys);
            match page.next_cursor {
                Some(next) => cursor = next,
                None => break,
            }
        }
        assert_eq!(seen.len(), 50);

        assert_eq!(delete_matching(&store, "replay:*", 7).await?, 50);
        assert_eq!(store.len().await, 1);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn purge_drops_expired_keys() -> AppResult<()> {
        let store = InMemoryKeyValueStore::new();
        store.set_if_absent("short", "1", Duration::from_secs(1)).await?;
        store.set_if_absent("long", "1", WINDOW).await?;

        tokio::time::advance(Duration::from_secs(1)).await;

        assert_eq!(store.purge_expired().await, 1);
        assert_eq!(store.len().await, 1);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn token_bucket_script_refills_on_store_clock() -> AppResult<()> {
        let store = Arc::new(InMemoryKeyValueStore::new());
        let policy = TokenBucketPolicy::new(10.0, 10)?;
        let limiter = StoreTokenBucketLimiter::new(store.clone(), policy, "ratelimit")?;
        let client = Identifier::client_ip("1.2.3.4");

        let mut admitted = 0;
        for _ in 0..12 {
            if limiter.allow(&client).await? {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 10);

        tokio::time::advance(Duration::from_millis(500)).await;
        let mut refilled = 0;
        for _ in 0..7 {
            if limiter.allow(&client).await? {
                refilled += 1;
            }
        }
        assert_eq!(refilled, 5);
        Ok(())
    }

    #[tokio::test]
    async fn scripts_reject_keys_of_the_wrong_type() -> AppResult<()> {
        let store = InMemoryKeyValueStore::new();
        store.set_if_absent("plain", "1", WINDOW).await?;
        let take = StoreScript::TokenBucketTake {
            rate_per_second: 1.0,
            burst: 1,
            idle_ttl: WINDOW,
        };
        store.eval("bucket", &take).await?;

        assert!(store.eval("plain", &take).await.is_err());
        assert!(store.get("bucket").await.is_err());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn mutex_and_lockout_run_against_the_store() -> AppResult<()> {
        let store = Arc::new(InMemoryKeyValueStore::new());

        let mutex = DistributedMutex::new(store.clone(), "mutex")?;
        let Some(lease) = mutex.try_acquire("flush", WINDOW).await? else {
            panic!("mutex should be free");
        };
        assert!(mutex.try_acquire("flush", WINDOW).await?.is_none());
        assert!(mutex.release(&lease).await?);

        let lockout = BruteForceService::new(store, LockoutPolicy::new(2, WINDOW, WINDOW)?);
        let alice = Identifier::new("user", "alice")?;
        lockout.record_failure(&alice).await?;
        lockout.record_failure(&alice).await?;
        assert_eq!(
            lockout.pre_check(&alice).await?,
            LockoutDecision::Locked {
                retry_after_seconds: 300
            }
        );
        Ok(())
    }
}
