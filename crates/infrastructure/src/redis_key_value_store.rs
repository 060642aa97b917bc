//! Redis-backed key-value store.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::Script;
use redis::aio::ConnectionManager;
use tenantguard_application::{KeyValueStore, ScanPage, StoreScript};
use tenantguard_core::{AppError, AppResult};
use tracing::warn;

/// Default upper bound on a single store round-trip.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_millis(500);

const COMPARE_AND_DELETE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('DEL', KEYS[1])
else
  return 0
end
"#;

const COMPARE_AND_EXPIRE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('PEXPIRE', KEYS[1], ARGV[2])
else
  return 0
end
"#;

const TOKEN_BUCKET_TAKE_SCRIPT: &str = r#"
local key = KEYS[1]
local rate = tonumber(ARGV[1])
local burst = tonumber(ARGV[2])
local idle_ttl_ms = tonumber(ARGV[3])

local clock = redis.call('TIME')
local now_ms = tonumber(clock[1]) * 1000 + math.floor(tonumber(clock[2]) / 1000)

local state = redis.call('HMGET', key, 'tokens', 'refilled_at')
local tokens = tonumber(state[1])
local refilled_at = tonumber(state[2])
if tokens == nil or refilled_at == nil then
  tokens = burst
  refilled_at = now_ms
end

local elapsed_ms = math.max(0, now_ms - refilled_at)
tokens = math.min(burst, tokens + (elapsed_ms / 1000) * rate)

local taken = 0
if tokens >= 1 then
  tokens = tokens - 1
  taken = 1
end

redis.call('HSET', key, 'tokens', tostring(tokens), 'refilled_at', now_ms)
redis.call('PEXPIRE', key, idle_ttl_ms)
return taken
"#;

/// Redis implementation of the key-value store port.
///
/// Every command runs under `operation_timeout`; an elapsed deadline is
/// reported as a dependency failure and the in-flight command is dropped.
#[derive(Clone)]
pub struct RedisKeyValueStore {
    connection: ConnectionManager,
    operation_timeout: Duration,
}

impl RedisKeyValueStore {
    /// Opens a managed connection to the Redis server at `redis_url`.
    pub async fn connect(redis_url: &str, operation_timeout: Duration) -> AppResult<Self> {
        if operation_timeout.is_zero() {
            return Err(AppError::Validation(
                "store operation timeout must be greater than zero".to_owned(),
            ));
        }

        let client = redis::Client::open(redis_url)
            .map_err(|error| AppError::Validation(format!("invalid REDIS_URL: {error}")))?;

        let connection = tokio::time::timeout(operation_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| AppError::Dependency("timed out connecting to redis".to_owned()))?
            .map_err(|error| {
                AppError::Dependency(format!("failed to connect to redis: {error}"))
            })?;

        Ok(Self::new(connection, operation_timeout))
    }

    /// Wraps an existing managed connection.
    #[must_use]
    pub fn new(connection: ConnectionManager, operation_timeout: Duration) -> Self {
        Self {
            connection,
            operation_timeout,
        }
    }

    async fn run<T, F>(&self, operation: &'static str, command: F) -> AppResult<T>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.operation_timeout, command).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(error)) => Err(AppError::Dependency(format!(
                "failed to {operation}: {error}"
            ))),
            Err(_) => {
                warn!(
                    operation,
                    timeout_ms = self.operation_timeout.as_millis(),
                    "redis operation timed out"
                );
                Err(AppError::Dependency(format!("timed out trying to {operation}")))
            }
        }
    }
}

/// TTL as Redis milliseconds. Sub-millisecond TTLs round up so a key is
/// never written without an expiry.
fn ttl_millis(ttl: Duration) -> AppResult<u64> {
    u64::try_from(ttl.as_millis())
        .ok()
        .filter(|millis| i64::try_from(*millis).is_ok())
        .map(|millis| millis.max(1))
        .ok_or_else(|| AppError::Validation(format!("ttl of {ttl:?} is out of range")))
}

fn set_if_absent_command(key: &str, value: &str, ttl: Duration) -> AppResult<redis::Cmd> {
    let mut command = redis::cmd("SET");
    command
        .arg(key)
        .arg(value)
        .arg("NX")
        .arg("PX")
        .arg(ttl_millis(ttl)?);
    Ok(command)
}

fn set_ttl_command(key: &str, ttl: Duration) -> AppResult<redis::Cmd> {
    let mut command = redis::cmd("PEXPIRE");
    command.arg(key).arg(ttl_millis(ttl)?);
    Ok(command)
}

fn scan_command(pattern: &str, cursor: u64, batch_size: usize) -> redis::Cmd {
    let mut command = redis::cmd("SCAN");
    command
        .arg(cursor)
        .arg("MATCH")
        .arg(pattern)
        .arg("COUNT")
        .arg(batch_size.max(1));
    command
}

/// Decodes a `PTTL` reply: -2 means absent, -1 means no expiry.
fn remaining_ttl(pttl_ms: i64) -> Option<Duration> {
    u64::try_from(pttl_ms).ok().map(Duration::from_millis)
}

fn scan_page(next_cursor: u64, keys: Vec<String>) -> ScanPage {
    ScanPage {
        keys,
        next_cursor: (next_cursor != 0).then_some(next_cursor),
    }
}

/// Lua source and `ARGV` for one store script; `KEYS[1]` is always the key.
#[derive(Debug)]
struct ScriptCall {
    operation: &'static str,
    source: &'static str,
    args: Vec<String>,
}

impl ScriptCall {
    fn for_script(script: &StoreScript) -> AppResult<Self> {
        Ok(match script {
            StoreScript::CompareAndDelete { expected } => Self {
                operation: "compare and delete key",
                source: COMPARE_AND_DELETE_SCRIPT,
                args: vec![expected.clone()],
            },
            StoreScript::CompareAndExpire { expected, ttl } => Self {
                operation: "compare and expire key",
                source: COMPARE_AND_EXPIRE_SCRIPT,
                args: vec![expected.clone(), ttl_millis(*ttl)?.to_string()],
            },
            StoreScript::TokenBucketTake {
                rate_per_second,
                burst,
                idle_ttl,
            } => Self {
                operation: "take token bucket token",
                source: TOKEN_BUCKET_TAKE_SCRIPT,
                args: vec![
                    rate_per_second.to_string(),
                    burst.to_string(),
                    ttl_millis(*idle_ttl)?.to_string(),
                ],
            },
        })
    }
}

#[async_trait]
impl KeyValueStore for RedisKeyValueStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> AppResult<bool> {
        let command = set_if_absent_command(key, value, ttl)?;
        let mut connection = self.connection.clone();
        let reply: Option<String> = self
            .run("set key if absent", command.query_async(&mut connection))
            .await?;

        Ok(reply.is_some())
    }

    async fn increment(&self, key: &str) -> AppResult<i64> {
        let mut connection = self.connection.clone();
        self.run(
            "increment counter",
            redis::cmd("INCR").arg(key).query_async(&mut connection),
        )
        .await
    }

    async fn set_ttl(&self, key: &str, ttl: Duration) -> AppResult<bool> {
        let command = set_ttl_command(key, ttl)?;
        let mut connection = self.connection.clone();
        let applied: i64 = self
            .run("set key ttl", command.query_async(&mut connection))
            .await?;

        Ok(applied == 1)
    }

    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let mut connection = self.connection.clone();
        self.run(
            "read key",
            redis::cmd("GET").arg(key).query_async(&mut connection),
        )
        .await
    }

    async fn delete(&self, keys: &[String]) -> AppResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }

        let mut connection = self.connection.clone();
        self.run(
            "delete keys",
            redis::cmd("DEL").arg(keys).query_async(&mut connection),
        )
        .await
    }

    async fn ttl(&self, key: &str) -> AppResult<Option<Duration>> {
        let mut connection = self.connection.clone();
        let remaining_ms: i64 = self
            .run(
                "read key ttl",
                redis::cmd("PTTL").arg(key).query_async(&mut connection),
            )
            .await?;

        Ok(remaining_ttl(remaining_ms))
    }

    async fn scan(&self, pattern: &str, cursor: u64, batch_size: usize) -> AppResult<ScanPage> {
        let command = scan_command(pattern, cursor, batch_size);
        let mut connection = self.connection.clone();
        let (next_cursor, keys): (u64, Vec<String>) = self
            .run("scan keys", command.query_async(&mut connection))
            .await?;

        Ok(scan_page(next_cursor, keys))
    }

    async fn eval(&self, key: &str, script: &StoreScript) -> AppResult<i64> {
        let call = ScriptCall::for_script(script)?;
        let script = Script::new(call.source);
        let mut invocation = script.key(key);
        for arg in &call.args {
            invocation.arg(arg.as_str());
        }

        let mut connection = self.connection.clone();
        self.run(
            call.operation,
            invocation.invoke_async::<i64>(&mut connection),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tenantguard_application::StoreScript;
    use tenantguard_core::AppError;

    use super::{
        COMPARE_AND_DELETE_SCRIPT, COMPARE_AND_EXPIRE_SCRIPT, RedisKeyValueStore, ScriptCall,
        TOKEN_BUCKET_TAKE_SCRIPT, remaining_ttl, scan_command, scan_page, set_if_absent_command,
        set_ttl_command, ttl_millis,
    };

    /// RESP array of bulk strings, as the server receives a command.
    fn resp(parts: &[&str]) -> Vec<u8> {
        let mut packed = format!("*{}\r\n", parts.len()).into_bytes();
        for part in parts {
            packed.extend_from_slice(format!("${}\r\n{part}\r\n", part.len()).as_bytes());
        }
        packed
    }

    fn highest_argv(source: &str) -> usize {
        source
            .split("ARGV[")
            .skip(1)
            .filter_map(|rest| rest.split(']').next()?.parse::<usize>().ok())
            .max()
            .unwrap_or(0)
    }

    #[test]
    fn ttls_are_sent_as_positive_milliseconds() {
        assert!(matches!(ttl_millis(Duration::from_secs(300)), Ok(300_000)));
        assert!(matches!(ttl_millis(Duration::from_micros(10)), Ok(1)));
        assert!(matches!(ttl_millis(Duration::ZERO), Ok(1)));
        assert!(matches!(
            ttl_millis(Duration::from_secs(u64::MAX)),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn set_if_absent_is_a_single_set_nx_px() {
        let key = "replay:_:1700000000:abc";
        let Ok(command) = set_if_absent_command(key, "1", Duration::from_secs(300)) else {
            panic!("command should build");
        };

        assert_eq!(
            command.get_packed_command(),
            resp(&["SET", key, "1", "NX", "PX", "300000"])
        );
        assert!(set_if_absent_command("k", "1", Duration::from_secs(u64::MAX)).is_err());
    }

    #[test]
    fn ttl_and_scan_commands_carry_their_arguments() {
        let Ok(expire) = set_ttl_command("bruteforce:lock:user:alice", Duration::from_millis(1500))
        else {
            panic!("command should build");
        };

        assert_eq!(
            expire.get_packed_command(),
            resp(&["PEXPIRE", "bruteforce:lock:user:alice", "1500"])
        );
        assert_eq!(
            scan_command("replay:*", 42, 0).get_packed_command(),
            resp(&["SCAN", "42", "MATCH", "replay:*", "COUNT", "1"])
        );
    }

    #[test]
    fn replies_decode_into_port_values() {
        assert_eq!(remaining_ttl(-2), None);
        assert_eq!(remaining_ttl(-1), None);
        assert_eq!(remaining_ttl(1500), Some(Duration::from_millis(1500)));

        let last = scan_page(0, vec!["replay:a".to_owned()]);
        assert_eq!(last.next_cursor, None);
        assert_eq!(last.keys, ["replay:a"]);
        assert_eq!(scan_page(17, Vec::new()).next_cursor, Some(17));
    }

    #[test]
    fn script_calls_pass_every_argument_their_source_reads() {
        let calls = [
            StoreScript::CompareAndDelete {
                expected: "token".to_owned(),
            },
            StoreScript::CompareAndExpire {
                expected: "token".to_owned(),
                ttl: Duration::from_secs(30),
            },
            StoreScript::TokenBucketTake {
                rate_per_second: 2.5,
                burst: 10,
                idle_ttl: Duration::from_secs(600),
            },
        ];

        for script in &calls {
            let Ok(call) = ScriptCall::for_script(script) else {
                panic!("script call should build");
            };
            assert_eq!(highest_argv(call.source), call.args.len(), "{script:?}");
        }

        let Ok(bucket) = ScriptCall::for_script(&calls[2]) else {
            panic!("script call should build");
        };
        assert_eq!(bucket.source, TOKEN_BUCKET_TAKE_SCRIPT);
        assert_eq!(bucket.args, ["2.5", "10", "600000"]);
    }

    #[test]
    fn scripts_keep_their_atomic_shape() {
        assert!(COMPARE_AND_DELETE_SCRIPT.contains("redis.call('GET', KEYS[1]) == ARGV[1]"));
        assert!(COMPARE_AND_DELETE_SCRIPT.contains("redis.call('DEL', KEYS[1])"));
        assert!(COMPARE_AND_EXPIRE_SCRIPT.contains("redis.call('PEXPIRE', KEYS[1], ARGV[2])"));
        // Refill runs on the server clock, not the caller's.
        assert!(TOKEN_BUCKET_TAKE_SCRIPT.contains("redis.call('TIME')"));
        assert!(TOKEN_BUCKET_TAKE_SCRIPT.contains("redis.call('PEXPIRE', key, idle_ttl_ms)"));
    }

    #[test]
    fn unrepresentable_script_ttls_are_rejected() {
        let result = ScriptCall::for_script(&StoreScript::CompareAndExpire {
            expected: "token".to_owned(),
            ttl: Duration::from_secs(u64::MAX),
        });
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn connect_rejects_bad_settings_before_dialing() {
        let zero_timeout =
            RedisKeyValueStore::connect("redis://127.0.0.1:6379", Duration::ZERO).await;
        let bad_url = RedisKeyValueStore::connect("not a url", Duration::from_millis(100)).await;

        assert!(matches!(zero_timeout, Err(AppError::Validation(_))));
        assert!(matches!(bad_url, Err(AppError::Validation(_))));
    }
}
