//! Application services and ports for request protection.

#![forbid(unsafe_code)]

mod brute_force_service;
mod distributed_mutex;
mod rate_limit_service;
mod replay_guard;
mod store_ports;

pub use brute_force_service::{BruteForceService, LockoutDecision, LockoutStatus};
pub use distributed_mutex::{DistributedMutex, MutexLease};
pub use rate_limit_service::{RateLimiter, StoreTokenBucketLimiter, TokenBucketLimiter};
pub use replay_guard::{ReplayGuard, RequestFingerprint};
pub use store_ports::{
    KeyValueStore, ScanPage, StoreScript, delete_matching, matches_key_pattern, scan_in_hash_order,
};
