use std::env;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use axum::http::HeaderName;
use tenantguard_core::{AppError, AppResult};
use tenantguard_domain::{LockoutPolicy, ReplayPolicy, TokenBucketPolicy};
use tenantguard_http::ContextConfig;
use tenantguard_infrastructure::DEFAULT_OPERATION_TIMEOUT;
use tracing_subscriber::EnvFilter;

const LOCKOUT_BACKOFF_MULTIPLIER: f64 = 2.0;
const LOCKOUT_BACKOFF_CAP: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub redis_url: Option<String>,
    pub api_host: String,
    pub api_port: u16,
    pub store_operation_timeout: Duration,
    pub rate_limit: TokenBucketPolicy,
    pub replay: ReplayPolicy,
    pub lockout: LockoutPolicy,
    pub context: ContextConfig,
}

impl ApiConfig {
    pub fn load() -> AppResult<Self> {
        let redis_url = env::var("REDIS_URL")
            .ok()
            .filter(|value| !value.trim().is_empty());

        let api_host = env::var("API_HOST").unwrap_or_else(|_| "127.0.0.1".to_owned());
        let api_port = parsed_env("API_PORT")?.unwrap_or(3001);

        let store_operation_timeout = parsed_env::<u64>("STORE_OPERATION_TIMEOUT_MS")?
            .map_or(DEFAULT_OPERATION_TIMEOUT, Duration::from_millis);
        if store_operation_timeout.is_zero() {
            return Err(AppError::Validation(
                "STORE_OPERATION_TIMEOUT_MS must be greater than zero".to_owned(),
            ));
        }

        let rate_limit = TokenBucketPolicy::new(
            parsed_env("RATE_LIMIT_PER_SECOND")?.unwrap_or(10.0),
            parsed_env("RATE_LIMIT_BURST")?.unwrap_or(20),
        )?;

        let replay = match parsed_env::<u64>("REPLAY_WINDOW_SECONDS")? {
            Some(seconds) => ReplayPolicy::new(Duration::from_secs(seconds))?,
            None => ReplayPolicy::default(),
        };

        let lockout_defaults = LockoutPolicy::default();
        let mut lockout = LockoutPolicy::new(
            parsed_env("LOCKOUT_MAX_ATTEMPTS")?.unwrap_or(lockout_defaults.max_attempts()),
            parsed_env::<u64>("LOCKOUT_WINDOW_SECONDS")?
                .map_or(lockout_defaults.attempt_window(), Duration::from_secs),
            parsed_env::<u64>("LOCKOUT_DURATION_SECONDS")?
                .map_or(lockout_defaults.lockout_duration(), Duration::from_secs),
        )?;
        if parsed_env::<bool>("LOCKOUT_EXPONENTIAL_BACKOFF")?.unwrap_or(false) {
            lockout =
                lockout.with_exponential_backoff(LOCKOUT_BACKOFF_MULTIPLIER, LOCKOUT_BACKOFF_CAP)?;
        }

        let context_defaults = ContextConfig::default();
        let context = ContextConfig::new(
            header_env("CORRELATION_ID_HEADER")?
                .unwrap_or_else(|| context_defaults.correlation_header().clone()),
            header_env("TENANT_HEADER")?
                .unwrap_or_else(|| context_defaults.tenant_header().clone()),
        );

        Ok(Self {
            redis_url,
            api_host,
            api_port,
            store_operation_timeout,
            rate_limit,
            replay,
            lockout,
            context,
        })
    }

    pub fn socket_address(&self) -> AppResult<SocketAddr> {
        let host = IpAddr::from_str(&self.api_host).map_err(|error| {
            AppError::Validation(format!("invalid API_HOST '{}': {error}", self.api_host))
        })?;
        Ok(SocketAddr::from((host, self.api_port)))
    }
}

pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

fn parsed_env<T>(name: &str) -> AppResult<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Ok(value) = env::var(name) else {
        return Ok(None);
    };
    if value.trim().is_empty() {
        return Ok(None);
    }

    value
        .trim()
        .parse::<T>()
        .map(Some)
        .map_err(|error| AppError::Validation(format!("invalid {name} '{value}': {error}")))
}

fn header_env(name: &str) -> AppResult<Option<HeaderName>> {
    parsed_env::<HeaderName>(name)
}
