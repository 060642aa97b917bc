//! Request-context and correlation-id middleware.

use std::sync::Arc;

use axum::extract::{FromRequestParts, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use http::header::HOST;
use http::request::Parts;
use http::{Extensions, HeaderName, HeaderValue};
use tenantguard_core::{AppError, PrincipalClaims};
use tenantguard_domain::{CorrelationId, RequestContext};
use tracing::Instrument;

use crate::error::{ApiError, UncorrelatedError};

/// Header names read by [`attach_request_context`].
#[derive(Debug, Clone)]
pub struct ContextConfig {
    correlation_header: HeaderName,
    tenant_header: HeaderName,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            correlation_header: HeaderName::from_static("x-correlation-id"),
            tenant_header: HeaderName::from_static("x-tenant-id"),
        }
    }
}

impl ContextConfig {
    /// Uses custom header names.
    #[must_use]
    pub fn new(correlation_header: HeaderName, tenant_header: HeaderName) -> Self {
        Self {
            correlation_header,
            tenant_header,
        }
    }

    /// Header carrying the correlation id in both directions.
    #[must_use]
    pub fn correlation_header(&self) -> &HeaderName {
        &self.correlation_header
    }

    /// Header carrying the tenant id.
    #[must_use]
    pub fn tenant_header(&self) -> &HeaderName {
        &self.tenant_header
    }

    fn build_context(&self, parts: &Parts) -> RequestContext {
        let correlation_id = header_str(parts, &self.correlation_header)
            .and_then(CorrelationId::from_client)
            .unwrap_or_else(CorrelationId::generate);

        let mut context = RequestContext::new(correlation_id);
        if let Some(tenant_id) = header_str(parts, &self.tenant_header) {
            context = context.with_tenant_id(tenant_id);
        }
        if let Some(host) = header_str(parts, &HOST) {
            let domain = host.split(':').next().unwrap_or(host);
            context = context.with_tenant_domain(domain.to_ascii_lowercase());
        }
        if let Some(claims) = parts.extensions.get::<PrincipalClaims>() {
            context = context.with_claims(claims);
        }

        context
    }
}

fn header_str<'a>(parts: &'a Parts, name: &HeaderName) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// Builds the request context once and shares it for the rest of the chain.
///
/// Upstream authentication may leave [`PrincipalClaims`] in the request
/// extensions. The correlation id is echoed on the response and written into
/// error envelopes produced further down.
pub async fn attach_request_context(
    State(config): State<ContextConfig>,
    request: Request,
    next: Next,
) -> Response {
    let (parts, body) = request.into_parts();
    let context = config.build_context(&parts);
    let mut request = Request::from_parts(parts, body);
    let context = attach_context(request.extensions_mut(), context);
    let correlation_id = context.correlation_id().clone();

    let span = tracing::info_span!(
        "request",
        correlation_id = %correlation_id,
        method = %request.method(),
        path = %request.uri().path(),
    );
    let mut response = next.run(request).instrument(span).await;

    if let Some(UncorrelatedError(error)) = response.extensions_mut().remove::<UncorrelatedError>()
    {
        response = error
            .with_correlation_id(correlation_id.clone())
            .into_response();
    }

    if let Ok(value) = HeaderValue::from_str(correlation_id.as_str()) {
        response
            .headers_mut()
            .insert(config.correlation_header.clone(), value);
    }

    response
}

/// Stores the context under a single extension key and returns the shared handle.
pub fn attach_context(extensions: &mut Extensions, context: RequestContext) -> Arc<RequestContext> {
    let context = Arc::new(context);
    extensions.insert(Arc::clone(&context));
    context
}

/// Returns the attached context, if any.
#[must_use]
pub fn current_context(extensions: &Extensions) -> Option<Arc<RequestContext>> {
    extensions.get::<Arc<RequestContext>>().cloned()
}

/// Handler extractor for the attached request context.
#[derive(Debug, Clone)]
pub struct CurrentContext(pub Arc<RequestContext>);

impl<S> FromRequestParts<S> for CurrentContext
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        current_context(&parts.extensions).map(Self).ok_or_else(|| {
            AppError::Internal("request context middleware is not installed".to_owned()).into()
        })
    }
}
