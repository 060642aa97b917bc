//! Bounded request-body buffering for guards that must read the body.

use axum::body::{Body, Bytes, to_bytes};
use http_body_util::LengthLimitError;
use tenantguard_domain::GuardRejection;
use tracing::debug;

/// Buffers at most `limit` bytes of `body`.
///
/// Only an exceeded limit is `PayloadTooLarge`; a body stream that fails
/// mid-read (client reset, transport error) is `UnreadableBody`.
pub(crate) async fn buffer_body(body: Body, limit: usize) -> Result<Bytes, GuardRejection> {
    to_bytes(body, limit).await.map_err(|error| {
        let inner = error.into_inner();
        if inner.is::<LengthLimitError>() {
            GuardRejection::PayloadTooLarge
        } else {
            debug!(error = %inner, "request body stream failed");
            GuardRejection::UnreadableBody
        }
    })
}
