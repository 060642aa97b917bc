//! Per-request context bag.

use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use tenantguard_core::PrincipalClaims;
use uuid::Uuid;

const CORRELATION_ID_MAX_LENGTH: usize = 128;

/// Correlation identifier echoed on every response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Generates a random 128-bit correlation id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Accepts a client-supplied correlation id.
    ///
    /// Returns `None` for empty, oversized, or non-printable values so the
    /// caller can generate a fresh one instead.
    #[must_use]
    pub fn from_client(value: &str) -> Option<Self> {
        let value = value.trim();
        let acceptable = !value.is_empty()
            && value.len() <= CORRELATION_ID_MAX_LENGTH
            && value.bytes().all(|byte| byte.is_ascii_graphic());

        acceptable.then(|| Self(value.to_owned()))
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Display for CorrelationId {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.0.as_str())
    }
}

/// Immutable per-request state propagated through the handler chain.
///
/// Built once at request entry and shared behind an `Arc`; there are no
/// mutating accessors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    correlation_id: CorrelationId,
    user_id: Option<String>,
    tenant_id: Option<String>,
    app_id: Option<String>,
    email: Option<String>,
    tenant_domain: Option<String>,
    roles: BTreeSet<String>,
    permissions: BTreeSet<String>,
}

impl RequestContext {
    /// Creates an anonymous context carrying only a correlation id.
    #[must_use]
    pub fn new(correlation_id: CorrelationId) -> Self {
        Self {
            correlation_id,
            user_id: None,
            tenant_id: None,
            app_id: None,
            email: None,
            tenant_domain: None,
            roles: BTreeSet::new(),
            permissions: BTreeSet::new(),
        }
    }

    /// Folds authenticated principal claims into the context.
    ///
    /// A tenant claim takes precedence over any tenant set earlier.
    #[must_use]
    pub fn with_claims(mut self, claims: &PrincipalClaims) -> Self {
        self.user_id = Some(claims.subject().to_owned());
        self.email = claims.email().map(ToOwned::to_owned).or(self.email);
        self.tenant_id = claims.tenant_id().map(ToOwned::to_owned).or(self.tenant_id);
        self.app_id = claims.app_id().map(ToOwned::to_owned).or(self.app_id);
        self.roles.extend(claims.roles().iter().cloned());
        self.permissions
            .extend(claims.permissions().iter().cloned());
        self
    }

    /// Sets the user id.
    #[must_use]
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Sets the tenant id.
    #[must_use]
    pub fn with_tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    /// Sets the application id.
    #[must_use]
    pub fn with_app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = Some(app_id.into());
        self
    }

    /// Sets the email.
    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Sets the tenant domain (request host).
    #[must_use]
    pub fn with_tenant_domain(mut self, tenant_domain: impl Into<String>) -> Self {
        self.tenant_domain = Some(tenant_domain.into());
        self
    }

    /// Returns the correlation id.
    #[must_use]
    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    /// Returns the user id, if authenticated.
    #[must_use]
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// Returns the tenant id, if known.
    #[must_use]
    pub fn tenant_id(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }

    /// Returns the application id, if known.
    #[must_use]
    pub fn app_id(&self) -> Option<&str> {
        self.app_id.as_deref()
    }

    /// Returns the email, if known.
    #[must_use]
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    /// Returns the tenant domain, if known.
    #[must_use]
    pub fn tenant_domain(&self) -> Option<&str> {
        self.tenant_domain.as_deref()
    }

    /// Returns role names.
    #[must_use]
    pub fn roles(&self) -> &BTreeSet<String> {
        &self.roles
    }

    /// Returns permission names.
    #[must_use]
    pub fn permissions(&self) -> &BTreeSet<String> {
        &self.permissions
    }

    /// Returns whether the context carries the role.
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    /// Returns whether the context carries the permission.
    #[must_use]
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }
}

#[cfg(test)]
mod tests {
    use tenantguard_core::PrincipalClaims;

    use super::{CorrelationId, RequestContext};

    #[test]
    fn generated_correlation_ids_are_128_bit_hex() {
        let id = CorrelationId::generate();
        assert_eq!(id.as_str().len(), 32);
        assert!(id.as_str().bytes().all(|byte| byte.is_ascii_hexdigit()));
        assert_ne!(id, CorrelationId::generate());
    }

    #[test]
    fn client_correlation_ids_are_filtered() {
        assert!(CorrelationId::from_client("req-42").is_some());
        assert!(CorrelationId::from_client("  ").is_none());
        assert!(CorrelationId::from_client("has space").is_none());
        assert!(CorrelationId::from_client(&"x".repeat(129)).is_none());
    }

    #[test]
    fn claims_override_header_tenant() {
        let claims = PrincipalClaims::new("alice")
            .with_tenant_id("t-claims")
            .with_permissions(["orders.write"]);

        let context = RequestContext::new(CorrelationId::generate())
            .with_tenant_id("t-header")
            .with_tenant_domain("acme.example.com")
            .with_claims(&claims);

        assert_eq!(context.user_id(), Some("alice"));
        assert_eq!(context.tenant_id(), Some("t-claims"));
        assert_eq!(context.tenant_domain(), Some("acme.example.com"));
        assert!(context.has_permission("orders.write"));
        assert!(!context.has_role("admin"));
    }

    #[test]
    fn claims_without_tenant_keep_header_tenant() {
        let context = RequestContext::new(CorrelationId::generate())
            .with_tenant_id("t-header")
            .with_claims(&PrincipalClaims::new("bob"));

        assert_eq!(context.tenant_id(), Some("t-header"));
        assert_eq!(context.email(), None);
    }
}
