//! axum middleware for rate limiting, replay protection, and brute-force lockout.
//!
//! Each guard is installed with `axum::middleware::from_fn_with_state` and
//! short-circuits with the error envelope before the handler runs.

#![forbid(unsafe_code)]

mod body;
mod brute_force;
mod context;
mod error;
mod identifier;
mod rate_limit;
mod replay;

pub use brute_force::{BruteForceAttempt, BruteForceProtection, enforce_lockout};
pub use context::{
    ContextConfig, CurrentContext, attach_context, attach_request_context, current_context,
};
pub use error::{ApiError, ApiResult, ErrorBody, ResponseEnvelope};
pub use identifier::{
    ContextField, CustomIdentifierFn, IdentifierExtractor, IdentifierStrategy, client_ip,
};
pub use rate_limit::{RateLimitGuard, enforce_rate_limit};
pub use replay::{ReplayMode, ReplayProtection, enforce_replay_protection};
