//! Key-value store port consumed by the protection services.
//!
//! Every operation is a single atomic round-trip at the store. Adapters are
//! expected to bound each call with a timeout; dropping the returned future
//! cancels the operation.

use std::time::Duration;

use async_trait::async_trait;
use tenantguard_core::{AppError, AppResult};

/// One page of a cursor-based key scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
    /// Keys matched in this page. May be empty even when more pages follow.
    pub keys: Vec<String>,
    /// Cursor for the next page, or `None` when the scan is complete.
    pub next_cursor: Option<u64>,
}

/// Server-side atomic scripts the store must be able to run.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreScript {
    /// Deletes the key only if its value equals `expected`. Returns 1 when deleted.
    CompareAndDelete {
        /// Value the key must hold.
        expected: String,
    },
    /// Re-applies `ttl` only if the key's value equals `expected`. Returns 1 when applied.
    CompareAndExpire {
        /// Value the key must hold.
        expected: String,
        /// New time to live.
        ttl: Duration,
    },
    /// Refills and consumes one token from a bucket stored under the key,
    /// using the store's own clock. Returns 1 when a token was taken.
    TokenBucketTake {
        /// Tokens regenerated per second.
        rate_per_second: f64,
        /// Bucket capacity.
        burst: u32,
        /// Lifetime of an untouched bucket.
        idle_ttl: Duration,
    },
}

/// Repository port for the shared key-value store.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Sets the key iff it is absent, applying `ttl` on insert.
    ///
    /// Returns whether this call created the key.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> AppResult<bool>;

    /// Increments a counter, creating it at 1 when absent. Does not touch the TTL.
    async fn increment(&self, key: &str) -> AppResult<i64>;

    /// Applies a TTL to an existing key. Returns false when the key is absent.
    async fn set_ttl(&self, key: &str, ttl: Duration) -> AppResult<bool>;

    /// Reads a key.
    async fn get(&self, key: &str) -> AppResult<Option<String>>;

    /// Removes keys in one batch and returns how many existed.
    async fn delete(&self, keys: &[String]) -> AppResult<u64>;

    /// Remaining TTL, or `None` when the key is absent or has no expiry.
    async fn ttl(&self, key: &str) -> AppResult<Option<Duration>>;

    /// Returns one page of keys matching a glob `pattern`, starting at `cursor` (0 to begin).
    async fn scan(&self, pattern: &str, cursor: u64, batch_size: usize) -> AppResult<ScanPage>;

    /// Runs a server-side atomic script against one key.
    async fn eval(&self, key: &str, script: &StoreScript) -> AppResult<i64>;
}

/// Deletes every key matching `pattern`, one scan page at a time.
///
/// Never enumerates the whole keyspace in a single call. Returns the number
/// of keys removed.
pub async fn delete_matching(
    store: &dyn KeyValueStore,
    pattern: &str,
    batch_size: usize,
) -> AppResult<u64> {
    if batch_size == 0 {
        return Err(AppError::Validation(
            "scan batch size must be greater than zero".to_owned(),
        ));
    }

    let mut cursor = 0;
    let mut deleted = 0_u64;

    loop {
        let page = store.scan(pattern, cursor, batch_size).await?;
        if !page.keys.is_empty() {
            deleted = deleted.saturating_add(store.delete(&page.keys).await?);
        }

        match page.next_cursor {
            Some(next_cursor) => cursor = next_cursor,
            None => return Ok(deleted),
        }
    }
}

/// Matches a key against a Redis-style glob supporting `*` and `?`.
#[must_use]
pub fn matches_key_pattern(pattern: &str, key: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let key: Vec<char> = key.chars().collect();

    let (mut pattern_index, mut key_index) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while key_index < key.len() {
        match pattern.get(pattern_index) {
            Some('*') => {
                backtrack = Some((pattern_index, key_index));
                pattern_index += 1;
            }
            Some(&expected) if expected == '?' || expected == key[key_index] => {
                pattern_index += 1;
                key_index += 1;
            }
            _ => match backtrack {
                Some((star_index, star_key_index)) => {
                    pattern_index = star_index + 1;
                    key_index = star_key_index + 1;
                    backtrack = Some((star_index, star_key_index + 1));
                }
                None => return false,
            },
        }
    }

    pattern[pattern_index..].iter().all(|character| *character == '*')
}

/// Pages through `keys` in hash order for in-process stores.
///
/// The cursor is the next hash value to include, so keys deleted between
/// pages never shift the position of the remaining ones.
#[must_use]
pub fn scan_in_hash_order<'a, I>(keys: I, pattern: &str, cursor: u64, batch_size: usize) -> ScanPage
where
    I: IntoIterator<Item = &'a String>,
{
    use std::hash::{DefaultHasher, Hash, Hasher};

    let mut candidates: Vec<(u64, &String)> = keys
        .into_iter()
        .filter(|key| matches_key_pattern(pattern, key))
        .map(|key| {
            let mut hasher = DefaultHasher::new();
            key.hash(&mut hasher);
            (hasher.finish(), key)
        })
        .filter(|(hash, _)| *hash >= cursor)
        .collect();
    candidates.sort_unstable();

    let batch_size = batch_size.max(1);
    let next_cursor = if candidates.len() > batch_size {
        candidates
            .get(batch_size - 1)
            .and_then(|(hash, _)| hash.checked_add(1))
    } else {
        None
    };

    ScanPage {
        keys: candidates
            .into_iter()
            .take(batch_size)
            .map(|(_, key)| key.clone())
            .collect(),
        next_cursor,
    }
}

#[cfg(test)]
mod tests {
    use super::matches_key_pattern;

    #[test]
    fn key_patterns_follow_glob_rules() {
        assert!(matches_key_pattern("replay:*", "replay:_:1700000000:abc"));
        assert!(matches_key_pattern("*:lock:*", "bruteforce:lock:user:alice"));
        assert!(matches_key_pattern("user:?ob", "user:bob"));
        assert!(matches_key_pattern("*", ""));
        assert!(!matches_key_pattern("replay:*", "bruteforce:attempts:ip:1.2.3.4"));
        assert!(!matches_key_pattern("user:?", "user:bob"));
    }
}
