use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use tenantguard_core::AppResult;
use tenantguard_domain::{Identifier, TokenBucketPolicy};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use super::ports::RateLimiter;
use super::token_bucket::TokenBucket;

/// Bucket map shared between the request path and the sweep task.
///
/// Writers are bucket creation and eviction only; the request path takes a
/// shared hold and updates the bucket under its own mutex.
struct BucketTable {
    policy: TokenBucketPolicy,
    buckets: RwLock<HashMap<Identifier, Arc<Mutex<TokenBucket>>>>,
}

impl BucketTable {
    fn try_acquire(&self, identifier: &Identifier, now: Instant) -> bool {
        {
            let buckets = self.buckets.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(bucket) = buckets.get(identifier) {
                return bucket
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .try_take(&self.policy, now);
            }
        }

        let bucket = {
            let mut buckets = self.buckets.write().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(
                buckets
                    .entry(identifier.clone())
                    .or_insert_with(|| Arc::new(Mutex::new(TokenBucket::full(&self.policy, now)))),
            )
        };

        bucket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .try_take(&self.policy, now)
    }

    fn evict_idle(&self, now: Instant) -> usize {
        let mut buckets = self.buckets.write().unwrap_or_else(PoisonError::into_inner);
        let before = buckets.len();
        buckets.retain(|_, bucket| {
            !bucket
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .is_idle(&self.policy, now)
        });
        before - buckets.len()
    }

    fn clear(&self) {
        self.buckets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn len(&self) -> usize {
        self.buckets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn contains(&self, identifier: &Identifier) -> bool {
        self.buckets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(identifier)
    }
}

struct SweepHandle {
    shutdown: watch::Sender<bool>,
    supervisor: JoinHandle<()>,
}

/// In-process token-bucket limiter with per-identifier isolation.
///
/// Buckets are created lazily and evicted once idle for longer than the
/// policy's idle threshold. The owner is responsible for calling
/// [`TokenBucketLimiter::stop`] (or dropping the limiter) to cancel the sweep.
pub struct TokenBucketLimiter {
    table: Arc<BucketTable>,
    sweep: Mutex<Option<SweepHandle>>,
}

impl TokenBucketLimiter {
    /// Creates a limiter without a background sweep.
    ///
    /// Idle buckets are only removed by explicit [`TokenBucketLimiter::sweep_idle`] calls.
    #[must_use]
    pub fn new(policy: TokenBucketPolicy) -> Self {
        Self {
            table: Arc::new(BucketTable {
                policy,
                buckets: RwLock::new(HashMap::new()),
            }),
            sweep: Mutex::new(None),
        }
    }

    /// Creates a limiter and spawns its eviction sweep on the current tokio runtime.
    #[must_use]
    pub fn start(policy: TokenBucketPolicy) -> Self {
        let limiter = Self::new(policy);
        let (shutdown, shutdown_signal) = watch::channel(false);
        let supervisor = tokio::spawn(supervise_sweep(
            Arc::clone(&limiter.table),
            shutdown_signal,
        ));

        info!(
            rate_per_second = policy.rate_per_second(),
            burst = policy.burst(),
            sweep_interval_secs = policy.sweep_interval().as_secs(),
            "token bucket limiter started"
        );

        *limiter.sweep.lock().unwrap_or_else(PoisonError::into_inner) = Some(SweepHandle {
            shutdown,
            supervisor,
        });
        limiter
    }

    /// Admits or refuses one request for the identifier. Never blocks on I/O.
    #[must_use]
    pub fn try_acquire(&self, identifier: &Identifier) -> bool {
        self.table.try_acquire(identifier, Instant::now())
    }

    /// Evicts buckets idle for longer than the threshold and returns how many were removed.
    pub fn sweep_idle(&self) -> usize {
        self.table.evict_idle(Instant::now())
    }

    /// Number of identifiers currently holding a bucket.
    #[must_use]
    pub fn tracked_identifiers(&self) -> usize {
        self.table.len()
    }

    /// Returns whether the identifier currently holds a bucket.
    #[must_use]
    pub fn is_tracking(&self, identifier: &Identifier) -> bool {
        self.table.contains(identifier)
    }

    /// Returns whether the background sweep is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.sweep
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.supervisor.is_finished())
    }

    /// Policy the limiter enforces.
    #[must_use]
    pub fn policy(&self) -> &TokenBucketPolicy {
        &self.table.policy
    }

    /// Signals the sweep to stop and releases bucket storage. Idempotent.
    pub fn stop(&self) {
        let handle = self
            .sweep
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(handle) = handle {
            let _ = handle.shutdown.send(true);
            info!("token bucket limiter stopped");
        }

        self.table.clear();
    }

    /// Stops the limiter and waits for the sweep task to exit.
    pub async fn shutdown(&self) {
        let handle = self
            .sweep
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(handle) = handle {
            let _ = handle.shutdown.send(true);
            if let Err(error) = handle.supervisor.await {
                error!(error = %error, "token bucket sweep supervisor ended abnormally");
            }
            info!("token bucket limiter stopped");
        }

        self.table.clear();
    }
}

impl Drop for TokenBucketLimiter {
    fn drop(&mut self) {
        let handle = self
            .sweep
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(handle) = handle {
            let _ = handle.shutdown.send(true);
        }
    }
}

#[async_trait]
impl RateLimiter for TokenBucketLimiter {
    async fn allow(&self, identifier: &Identifier) -> AppResult<bool> {
        Ok(self.try_acquire(identifier))
    }
}

/// Restarts the sweep if it panics so eviction never silently stops.
async fn supervise_sweep(table: Arc<BucketTable>, shutdown: watch::Receiver<bool>) {
    loop {
        let worker = tokio::spawn(run_sweep(Arc::clone(&table), shutdown.clone()));

        match worker.await {
            Ok(()) => return,
            Err(error) if error.is_panic() => {
                error!(error = %error, "token bucket sweep panicked, restarting");
            }
            Err(error) => {
                error!(error = %error, "token bucket sweep cancelled");
                return;
            }
        }
    }
}

async fn run_sweep(table: Arc<BucketTable>, mut shutdown: watch::Receiver<bool>) {
    let interval = table.policy.sweep_interval();
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if *shutdown.borrow_and_update() {
            return;
        }

        tokio::select! {
            _ = ticker.tick() => {
                let evicted = table.evict_idle(Instant::now());
                if evicted > 0 {
                    debug!(evicted, remaining = table.len(), "evicted idle token buckets");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }
    }
}
