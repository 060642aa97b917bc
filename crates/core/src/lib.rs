//! Shared primitives for all tenantguard crates.

#![forbid(unsafe_code)]

/// Authentication primitives shared across services.
pub mod auth;

use thiserror::Error;

pub use auth::PrincipalClaims;

/// Result type used across tenantguard crates.
pub type AppResult<T> = Result<T, AppError>;

/// Coarse error classification used for logging and response policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or malformed request input. Rendered as 4xx, never logged as an error.
    ClientMisuse,
    /// Request refused by a protection policy (rate limit, replay, lockout).
    PolicyRejection,
    /// A backing dependency failed. Admission decisions fail closed.
    Dependency,
}

/// Common application error categories.
#[derive(Debug, Error)]
pub enum AppError {
    /// Invalid input, configuration, or violated invariant.
    #[error("validation error: {0}")]
    Validation(String),

    /// Caller is not authenticated.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Caller is authenticated but blocked by authorization policy.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Caller exceeded an admission policy.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// A backing store or remote dependency failed or timed out.
    #[error("dependency failure: {0}")]
    Dependency(String),

    /// Internal unexpected error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Returns the error classification.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::ClientMisuse,
            Self::Unauthorized(_) | Self::Forbidden(_) | Self::RateLimited(_) => {
                ErrorKind::PolicyRejection
            }
            Self::Dependency(_) | Self::Internal(_) => ErrorKind::Dependency,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{AppError, ErrorKind};

    #[test]
    fn internal_errors_are_treated_as_dependency_failures() {
        assert_eq!(
            AppError::Internal("boom".to_owned()).kind(),
            ErrorKind::Dependency
        );
        assert_eq!(
            AppError::RateLimited("slow down".to_owned()).kind(),
            ErrorKind::PolicyRejection
        );
        assert_eq!(
            AppError::Validation("bad".to_owned()).kind(),
            ErrorKind::ClientMisuse
        );
    }
}
