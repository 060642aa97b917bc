use tenantguard_core::ErrorKind;
use thiserror::Error;

/// Structured outcome of a protection component refusing a request.
///
/// The error code is the stable contract; messages may change.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuardRejection {
    /// Token bucket for the identifier is empty.
    #[error("too many requests, please try again later")]
    RateLimitExceeded,

    /// Nonce header is absent.
    #[error("request nonce header is required")]
    MissingNonce,

    /// Timestamp header is absent.
    #[error("request timestamp header is required")]
    MissingTimestamp,

    /// Timestamp header is not a Unix-seconds integer.
    #[error("request timestamp must be an integer number of Unix seconds")]
    InvalidTimestamp,

    /// Timestamp lies in the future.
    #[error("request timestamp is in the future")]
    FutureTimestamp,

    /// Timestamp is older than the freshness window.
    #[error("request timestamp is outside the accepted window")]
    ExpiredRequest,

    /// Nonce or request hash was already seen inside the window.
    #[error("request has already been processed")]
    ReplayDetected,

    /// Identifier is locked out after too many failures.
    #[error("too many failed attempts, try again in {retry_after_seconds} seconds")]
    AccountLocked {
        /// Seconds until the lock expires, derived from the store TTL.
        retry_after_seconds: u64,
    },

    /// Request body exceeds what the guard is willing to buffer.
    #[error("request body is too large")]
    PayloadTooLarge,

    /// Request body stream failed before the guard could buffer it.
    #[error("request body could not be read")]
    UnreadableBody,

    /// Distributed rate limiter could not reach its store.
    #[error("rate limit check failed")]
    RateLimitCheckFailed,

    /// Replay gate could not reach its store.
    #[error("replay check failed")]
    ReplayCheckFailed,

    /// Lockout pre-check could not reach its store.
    #[error("lockout check failed")]
    LockoutCheckFailed,
}

impl GuardRejection {
    /// Stable machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            Self::MissingNonce => "MISSING_NONCE",
            Self::MissingTimestamp => "MISSING_TIMESTAMP",
            Self::InvalidTimestamp => "INVALID_TIMESTAMP",
            Self::FutureTimestamp => "FUTURE_TIMESTAMP",
            Self::ExpiredRequest => "EXPIRED_REQUEST",
            Self::ReplayDetected => "REPLAY_DETECTED",
            Self::AccountLocked { .. } => "ACCOUNT_LOCKED",
            Self::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            Self::UnreadableBody => "UNREADABLE_BODY",
            Self::RateLimitCheckFailed => "RATE_LIMIT_CHECK_FAILED",
            Self::ReplayCheckFailed => "REPLAY_CHECK_FAILED",
            Self::LockoutCheckFailed => "LOCKOUT_CHECK_FAILED",
        }
    }

    /// HTTP status code for the rejection.
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            Self::RateLimitExceeded | Self::AccountLocked { .. } => 429,
            Self::PayloadTooLarge => 413,
            Self::RateLimitCheckFailed | Self::ReplayCheckFailed | Self::LockoutCheckFailed => 500,
            Self::MissingNonce
            | Self::MissingTimestamp
            | Self::InvalidTimestamp
            | Self::FutureTimestamp
            | Self::ExpiredRequest
            | Self::ReplayDetected
            | Self::UnreadableBody => 400,
        }
    }

    /// Error classification for logging and metrics.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingNonce
            | Self::MissingTimestamp
            | Self::InvalidTimestamp
            | Self::PayloadTooLarge
            | Self::UnreadableBody => ErrorKind::ClientMisuse,
            Self::RateLimitExceeded
            | Self::FutureTimestamp
            | Self::ExpiredRequest
            | Self::ReplayDetected
            | Self::AccountLocked { .. } => ErrorKind::PolicyRejection,
            Self::RateLimitCheckFailed | Self::ReplayCheckFailed | Self::LockoutCheckFailed => {
                ErrorKind::Dependency
            }
        }
    }

    /// Seconds the caller should wait, when the rejection carries one.
    #[must_use]
    pub fn retry_after_seconds(&self) -> Option<u64> {
        match self {
            Self::AccountLocked {
                retry_after_seconds,
            } => Some(*retry_after_seconds),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use tenantguard_core::ErrorKind;

    use super::GuardRejection;

    #[test]
    fn lockout_carries_retry_after() {
        let rejection = GuardRejection::AccountLocked {
            retry_after_seconds: 120,
        };

        assert_eq!(rejection.code(), "ACCOUNT_LOCKED");
        assert_eq!(rejection.status(), 429);
        assert_eq!(rejection.retry_after_seconds(), Some(120));
        assert_eq!(rejection.kind(), ErrorKind::PolicyRejection);
    }

    #[test]
    fn store_failures_are_server_errors() {
        for rejection in [
            GuardRejection::RateLimitCheckFailed,
            GuardRejection::ReplayCheckFailed,
            GuardRejection::LockoutCheckFailed,
        ] {
            assert_eq!(rejection.status(), 500);
            assert_eq!(rejection.kind(), ErrorKind::Dependency);
            assert!(rejection.code().ends_with("_CHECK_FAILED"));
        }
    }

    #[test]
    fn replay_rejections_are_bad_requests() {
        assert_eq!(GuardRejection::ReplayDetected.status(), 400);
        assert_eq!(GuardRejection::ExpiredRequest.code(), "EXPIRED_REQUEST");
        assert_eq!(GuardRejection::MissingNonce.kind(), ErrorKind::ClientMisuse);
    }

    #[test]
    fn only_oversized_bodies_are_payload_too_large() {
        assert_eq!(GuardRejection::PayloadTooLarge.status(), 413);
        assert_eq!(GuardRejection::UnreadableBody.status(), 400);
        assert_eq!(GuardRejection::UnreadableBody.code(), "UNREADABLE_BODY");
        assert_eq!(GuardRejection::UnreadableBody.kind(), ErrorKind::ClientMisuse);
    }
}
