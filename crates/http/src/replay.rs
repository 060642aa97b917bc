//! Replay-protection middleware.

use axum::body::Body;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use http::HeaderName;
use tenantguard_application::{ReplayGuard, RequestFingerprint};
use tracing::debug;

use crate::body::buffer_body;
use crate::context::current_context;
use crate::error::ApiResult;

const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

/// What makes two requests the same request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayMode {
    /// Client-supplied nonce and Unix-seconds timestamp headers.
    Nonce,
    /// Hash of method, path, user, and optionally the body.
    RequestHash {
        /// Buffer the body and fold it into the hash.
        include_body: bool,
    },
}

/// State for [`enforce_replay_protection`].
#[derive(Clone)]
pub struct ReplayProtection {
    guard: ReplayGuard,
    mode: ReplayMode,
    nonce_header: HeaderName,
    timestamp_header: HeaderName,
    max_body_bytes: usize,
}

impl ReplayProtection {
    /// Nonce mode with the default `X-Request-Nonce` / `X-Request-Timestamp` headers.
    #[must_use]
    pub fn nonce(guard: ReplayGuard) -> Self {
        Self::with_mode(guard, ReplayMode::Nonce)
    }

    /// Request-hash mode for idempotency without client nonces.
    #[must_use]
    pub fn request_hash(guard: ReplayGuard, include_body: bool) -> Self {
        Self::with_mode(guard, ReplayMode::RequestHash { include_body })
    }

    fn with_mode(guard: ReplayGuard, mode: ReplayMode) -> Self {
        Self {
            guard,
            mode,
            nonce_header: HeaderName::from_static("x-request-nonce"),
            timestamp_header: HeaderName::from_static("x-request-timestamp"),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    /// Overrides the nonce and timestamp header names.
    #[must_use]
    pub fn with_headers(mut self, nonce_header: HeaderName, timestamp_header: HeaderName) -> Self {
        self.nonce_header = nonce_header;
        self.timestamp_header = timestamp_header;
        self
    }

    /// Caps the body buffered in hash mode. Larger bodies are refused.
    #[must_use]
    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    /// Configured mode.
    #[must_use]
    pub fn mode(&self) -> ReplayMode {
        self.mode
    }
}

/// Accepts each request at most once within the freshness window.
pub async fn enforce_replay_protection(
    State(protection): State<ReplayProtection>,
    request: Request,
    next: Next,
) -> ApiResult<Response> {
    let context = current_context(request.extensions());
    let user_id = context.as_deref().and_then(|context| context.user_id());

    let request = match protection.mode {
        ReplayMode::Nonce => {
            let nonce = header_string(&request, &protection.nonce_header);
            let timestamp = header_string(&request, &protection.timestamp_header);
            protection
                .guard
                .check_nonce(user_id, nonce.as_deref(), timestamp.as_deref())
                .await
                .inspect_err(|rejection| debug!(code = rejection.code(), "replay gate rejected"))?;
            request
        }
        ReplayMode::RequestHash { include_body } => {
            let (parts, body) = request.into_parts();
            let (body, buffered) = if include_body {
                let bytes = buffer_body(body, protection.max_body_bytes).await?;
                (Body::from(bytes.clone()), Some(bytes))
            } else {
                (body, None)
            };
            let path = parts
                .uri
                .path_and_query()
                .map_or_else(|| parts.uri.path(), |path| path.as_str());

            protection
                .guard
                .check_request_hash(&RequestFingerprint {
                    method: parts.method.as_str(),
                    path,
                    user_id,
                    body: buffered.as_deref(),
                })
                .await
                .inspect_err(|rejection| debug!(code = rejection.code(), "replay gate rejected"))?;

            Request::from_parts(parts, body)
        }
    };

    Ok(next.run(request).await)
}

fn header_string(request: &Request, name: &HeaderName) -> Option<String> {
    request
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(ToOwned::to_owned)
}
