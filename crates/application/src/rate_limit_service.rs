//! Token-bucket rate limiting.
//!
//! The default limiter keeps one bucket per identifier in process memory and
//! evicts idle buckets from a supervised background sweep. A store-backed
//! variant implements the same port for limits shared across replicas.

mod distributed;
mod local;
mod ports;
mod token_bucket;


pub use distributed::StoreTokenBucketLimiter;
pub use local::TokenBucketLimiter;
pub use ports::RateLimiter;
