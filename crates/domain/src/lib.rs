//! Domain values and invariants for request protection.

#![forbid(unsafe_code)]

mod context;
mod identifier;
mod policy;
mod rejection;

pub use context::{CorrelationId, RequestContext};
pub use identifier::{
    Identifier, NAMESPACE_APP, NAMESPACE_EMAIL, NAMESPACE_HEADER, NAMESPACE_IP, NAMESPACE_TENANT,
    NAMESPACE_USER,
};
pub use policy::{LockoutPolicy, MAX_POLICY_DURATION, ReplayPolicy, TokenBucketPolicy};
pub use rejection::GuardRejection;
