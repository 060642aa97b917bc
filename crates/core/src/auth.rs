use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Principal claims produced by an upstream authentication layer.
///
/// The claims are inserted into request extensions by whatever verifies the
/// caller (session, bearer token, mTLS) and are folded into the request
/// context by the HTTP layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrincipalClaims {
    subject: String,
    email: Option<String>,
    tenant_id: Option<String>,
    app_id: Option<String>,
    roles: BTreeSet<String>,
    permissions: BTreeSet<String>,
}

impl PrincipalClaims {
    /// Creates claims for one authenticated subject.
    #[must_use]
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            ..Self::default()
        }
    }

    /// Sets the email claim.
    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Sets the tenant claim.
    #[must_use]
    pub fn with_tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    /// Sets the application claim.
    #[must_use]
    pub fn with_app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = Some(app_id.into());
        self
    }

    /// Adds role names.
    #[must_use]
    pub fn with_roles<I, R>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<String>,
    {
        self.roles.extend(roles.into_iter().map(Into::into));
        self
    }

    /// Adds permission names.
    #[must_use]
    pub fn with_permissions<I, P>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        self.permissions
            .extend(permissions.into_iter().map(Into::into));
        self
    }

    /// Returns the stable subject claim.
    #[must_use]
    pub fn subject(&self) -> &str {
        self.subject.as_str()
    }

    /// Returns the email, if the provider returned one.
    #[must_use]
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    /// Returns the tenant claim, if any.
    #[must_use]
    pub fn tenant_id(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }

    /// Returns the application claim, if any.
    #[must_use]
    pub fn app_id(&self) -> Option<&str> {
        self.app_id.as_deref()
    }

    /// Returns granted role names.
    #[must_use]
    pub fn roles(&self) -> &BTreeSet<String> {
        &self.roles
    }

    /// Returns granted permission names.
    #[must_use]
    pub fn permissions(&self) -> &BTreeSet<String> {
        &self.permissions
    }
}

#[cfg(test)]
mod tests {
    use super::PrincipalClaims;

    #[test]
    fn claims_round_trip_through_json() {
        let claims = PrincipalClaims::new("alice")
            .with_tenant_id("t1")
            .with_roles(["admin", "admin", "viewer"]);

        let encoded = serde_json::to_string(&claims);
        assert!(encoded.is_ok());

        let decoded = encoded
            .ok()
            .and_then(|value| serde_json::from_str::<PrincipalClaims>(&value).ok());
        assert_eq!(decoded.as_ref().map(|claims| claims.roles().len()), Some(2));
        assert_eq!(decoded, Some(claims));
    }
}
