use tenantguard_domain::TokenBucketPolicy;
use tokio::time::Instant;

/// Per-identifier bucket state.
///
/// Invariant: `0 <= tokens <= burst` after every call.
#[derive(Debug, Clone, Copy)]
pub(super) struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
    last_access: Instant,
}

impl TokenBucket {
    /// New buckets start full.
    pub(super) fn full(policy: &TokenBucketPolicy, now: Instant) -> Self {
        Self {
            tokens: f64::from(policy.burst()),
            last_refill: now,
            last_access: now,
        }
    }

    /// Refills for elapsed time, records the access, and takes one token if available.
    pub(super) fn try_take(&mut self, policy: &TokenBucketPolicy, now: Instant) -> bool {
        self.refill(policy, now);
        self.last_access = self.last_access.max(now);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            return true;
        }

        false
    }

    pub(super) fn is_idle(&self, policy: &TokenBucketPolicy, now: Instant) -> bool {
        now.saturating_duration_since(self.last_access) > policy.idle_threshold()
    }

    #[cfg(test)]
    pub(super) fn tokens(&self) -> f64 {
        self.tokens
    }

    fn refill(&mut self, policy: &TokenBucketPolicy, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        if elapsed.is_zero() {
            return;
        }

        let burst = f64::from(policy.burst());
        self.tokens = (self.tokens + elapsed.as_secs_f64() * policy.rate_per_second()).min(burst);
        self.last_refill = now;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use proptest::prelude::*;
    use tenantguard_domain::TokenBucketPolicy;
    use tokio::time::Instant;

    use super::TokenBucket;

    proptest! {
        #[test]
        fn admissions_never_exceed_burst_plus_refill(
            rate in 0.5_f64..50.0,
            burst in 1_u32..40,
            gaps_ms in proptest::collection::vec(0_u64..400, 1..200),
        ) {
            let policy = TokenBucketPolicy::new(rate, burst);
            prop_assume!(policy.is_ok());
            let Ok(policy) = policy else { unreachable!() };

            let start = Instant::now();
            let mut bucket = TokenBucket::full(&policy, start);
            let mut now = start;
            let mut admitted = 0_u64;

            for gap in gaps_ms {
                now += Duration::from_millis(gap);
                if bucket.try_take(&policy, now) {
                    admitted += 1;
                }
                prop_assert!(bucket.tokens() >= 0.0);
                prop_assert!(bucket.tokens() <= f64::from(burst));
            }

            let elapsed = now.saturating_duration_since(start).as_secs_f64();
            let bound = u64::from(burst) + (rate * elapsed).ceil() as u64;
            prop_assert!(admitted <= bound, "admitted {admitted} > bound {bound}");
        }
    }

    #[test]
    fn denied_requests_still_touch_last_access() {
        let Ok(policy) = TokenBucketPolicy::new(1.0, 1) else {
            panic!("policy should be valid");
        };
        let start = Instant::now();
        let mut bucket = TokenBucket::full(&policy, start);

        assert!(bucket.try_take(&policy, start));
        assert!(!bucket.try_take(&policy, start + Duration::from_millis(100)));

        let later = start + Duration::from_millis(100) + policy.idle_threshold();
        assert!(!bucket.is_idle(&policy, later));
        assert!(bucket.is_idle(&policy, later + Duration::from_millis(1)));
    }
}
