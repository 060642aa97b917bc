//! Request to identifier mapping.
//!
//! Strategies are tried in order and the first one producing a key wins.
//! When none does, the client address is used, so extraction never fails.

use std::fmt::{Debug, Formatter};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, Request};
use http::header::{CONTENT_TYPE, HOST};
use http::request::Parts;
use http::{HeaderMap, HeaderName};
use tenantguard_domain::{
    GuardRejection, Identifier, NAMESPACE_APP, NAMESPACE_EMAIL, NAMESPACE_HEADER, NAMESPACE_TENANT,
    NAMESPACE_USER, RequestContext,
};
use url::form_urlencoded;

use crate::body::buffer_body;

const RESERVED_SUBDOMAINS: [&str; 2] = ["www", "api"];
const DEFAULT_MAX_FORM_BYTES: usize = 64 * 1024;
const UNKNOWN_CLIENT: &str = "unknown";

/// Request-context field usable as an identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextField {
    /// Authenticated user id, namespaced `user`.
    UserId,
    /// Tenant id, namespaced `tenant`.
    TenantId,
    /// Application id, namespaced `app`.
    AppId,
    /// Email, namespaced `email`.
    Email,
}

/// Caller-supplied identifier function.
pub type CustomIdentifierFn = Arc<dyn Fn(&Parts) -> Option<Identifier> + Send + Sync>;

/// One way of deriving an identifier from a request.
#[derive(Clone)]
pub enum IdentifierStrategy {
    /// Client network address as `ip:<addr>`.
    ClientIp,
    /// Non-empty header value as `hdr:<value>`.
    Header(HeaderName),
    /// Field of a form-encoded body as `<namespace>:<value>`.
    FormField {
        /// Form field name.
        name: String,
        /// Namespace of the produced identifier, usually `user` or `email`.
        namespace: String,
    },
    /// Query parameter as `<namespace>:<value>`.
    QueryParam {
        /// Parameter name.
        name: String,
        /// Namespace of the produced identifier.
        namespace: String,
    },
    /// First host label as `tenant:<label>`.
    Subdomain,
    /// Value already present on the request context.
    ContextField(ContextField),
    /// Arbitrary closure over the request head.
    Custom(CustomIdentifierFn),
}

impl Debug for IdentifierStrategy {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ClientIp => formatter.write_str("ClientIp"),
            Self::Header(name) => formatter.debug_tuple("Header").field(name).finish(),
            Self::FormField { name, namespace } => formatter
                .debug_struct("FormField")
                .field("name", name)
                .field("namespace", namespace)
                .finish(),
            Self::QueryParam { name, namespace } => formatter
                .debug_struct("QueryParam")
                .field("name", name)
                .field("namespace", namespace)
                .finish(),
            Self::Subdomain => formatter.write_str("Subdomain"),
            Self::ContextField(field) => formatter.debug_tuple("ContextField").field(field).finish(),
            Self::Custom(_) => formatter.write_str("Custom"),
        }
    }
}

/// Ordered list of strategies with a client-address fallback.
#[derive(Debug, Clone)]
pub struct IdentifierExtractor {
    strategies: Vec<IdentifierStrategy>,
    max_form_bytes: usize,
}

impl Default for IdentifierExtractor {
    fn default() -> Self {
        Self::client_ip()
    }
}

impl IdentifierExtractor {
    /// Creates an extractor trying `strategies` in order.
    #[must_use]
    pub fn new(strategies: Vec<IdentifierStrategy>) -> Self {
        Self {
            strategies,
            max_form_bytes: DEFAULT_MAX_FORM_BYTES,
        }
    }

    /// Keys requests by client address.
    #[must_use]
    pub fn client_ip() -> Self {
        Self::new(vec![IdentifierStrategy::ClientIp])
    }

    /// Keys requests by authenticated user, falling back to client address.
    #[must_use]
    pub fn user() -> Self {
        Self::new(vec![IdentifierStrategy::ContextField(ContextField::UserId)])
    }

    /// Keys requests by tenant from the context, then the subdomain.
    #[must_use]
    pub fn tenant() -> Self {
        Self::new(vec![
            IdentifierStrategy::ContextField(ContextField::TenantId),
            IdentifierStrategy::Subdomain,
        ])
    }

    /// Keys login attempts by a submitted form field, e.g. `username` as `user`.
    #[must_use]
    pub fn form_field(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self::new(vec![IdentifierStrategy::FormField {
            name: name.into(),
            namespace: namespace.into(),
        }])
    }

    /// Caps how much of a form body is buffered for field lookup.
    #[must_use]
    pub fn with_max_form_bytes(mut self, max_form_bytes: usize) -> Self {
        self.max_form_bytes = max_form_bytes;
        self
    }

    /// Derives the identifier, buffering a form body only when a form
    /// strategy needs it. The returned request carries the same body.
    pub async fn extract(&self, request: Request) -> Result<(Request, Identifier), GuardRejection> {
        let (parts, body) = request.into_parts();

        if !self.reads_form() || !is_form_encoded(&parts.headers) {
            let identifier = self.identify(&parts, None);
            return Ok((Request::from_parts(parts, body), identifier));
        }

        let bytes = buffer_body(body, self.max_form_bytes).await?;
        let form: Vec<(String, String)> = form_urlencoded::parse(&bytes).into_owned().collect();
        let identifier = self.identify(&parts, Some(form.as_slice()));

        Ok((Request::from_parts(parts, Body::from(bytes)), identifier))
    }

    /// Derives the identifier from the request head and an already parsed form.
    #[must_use]
    pub fn identify(&self, parts: &Parts, form: Option<&[(String, String)]>) -> Identifier {
        self.strategies
            .iter()
            .find_map(|strategy| apply_strategy(strategy, parts, form))
            .unwrap_or_else(|| client_ip(parts))
    }

    fn reads_form(&self) -> bool {
        self.strategies
            .iter()
            .any(|strategy| matches!(strategy, IdentifierStrategy::FormField { .. }))
    }
}

fn apply_strategy(
    strategy: &IdentifierStrategy,
    parts: &Parts,
    form: Option<&[(String, String)]>,
) -> Option<Identifier> {
    match strategy {
        IdentifierStrategy::ClientIp => Some(client_ip(parts)),
        IdentifierStrategy::Header(name) => header_value(&parts.headers, name)
            .and_then(|value| Identifier::new(NAMESPACE_HEADER, value).ok()),
        IdentifierStrategy::FormField { name, namespace } => form?
            .iter()
            .find(|(field, _)| field == name)
            .and_then(|(_, value)| namespaced(namespace, value)),
        IdentifierStrategy::QueryParam { name, namespace } => {
            let query = parts.uri.query()?;
            form_urlencoded::parse(query.as_bytes())
                .find(|(param, _)| param == name.as_str())
                .and_then(|(_, value)| namespaced(namespace, value.as_ref()))
        }
        IdentifierStrategy::Subdomain => tenant_subdomain(&parts.headers)
            .and_then(|label| Identifier::new(NAMESPACE_TENANT, label).ok()),
        IdentifierStrategy::ContextField(field) => {
            let context = parts.extensions.get::<Arc<RequestContext>>()?;
            let (namespace, value) = match field {
                ContextField::UserId => (NAMESPACE_USER, context.user_id()?),
                ContextField::TenantId => (NAMESPACE_TENANT, context.tenant_id()?),
                ContextField::AppId => (NAMESPACE_APP, context.app_id()?),
                ContextField::Email => (NAMESPACE_EMAIL, context.email()?),
            };
            namespaced(namespace, value)
        }
        IdentifierStrategy::Custom(identify) => identify(parts),
    }
}

/// Emails are case-insensitive, so they are keyed in lowercase.
fn namespaced(namespace: &str, value: &str) -> Option<Identifier> {
    if namespace == NAMESPACE_EMAIL {
        return Identifier::new(namespace, value.to_lowercase().as_str()).ok();
    }

    Identifier::new(namespace, value).ok()
}

/// Client address from `X-Forwarded-For`, `X-Real-IP`, then the socket peer.
#[must_use]
pub fn client_ip(parts: &Parts) -> Identifier {
    let forwarded = header_value(&parts.headers, &HeaderName::from_static("x-forwarded-for"))
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned);
    let real_ip = || {
        header_value(&parts.headers, &HeaderName::from_static("x-real-ip")).map(ToOwned::to_owned)
    };
    let peer = || {
        parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(address)| address.ip().to_string())
    };

    let address = forwarded
        .or_else(real_ip)
        .or_else(peer)
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_owned());

    Identifier::client_ip(address.as_str())
}

fn header_value<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn is_form_encoded(headers: &HeaderMap) -> bool {
    header_value(headers, &CONTENT_TYPE).is_some_and(|value| {
        value
            .to_ascii_lowercase()
            .starts_with("application/x-www-form-urlencoded")
    })
}

/// First host label when the host has at least three labels and the label
/// is not reserved.
fn tenant_subdomain(headers: &HeaderMap) -> Option<&str> {
    let host = header_value(headers, &HOST)?;
    let host = host.split(':').next().unwrap_or(host);

    // Dotted-quad hosts have no tenant label.
    if host.matches('.').count() < 2 || host.parse::<IpAddr>().is_ok() {
        return None;
    }

    host.split('.')
        .next()
        .filter(|label| !label.is_empty())
        .filter(|label| {
            !RESERVED_SUBDOMAINS
                .iter()
                .any(|reserved| label.eq_ignore_ascii_case(reserved))
        })
}
