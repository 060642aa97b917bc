//! Namespaced principal identifiers.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use tenantguard_core::{AppError, AppResult};

/// Namespace for client network addresses.
pub const NAMESPACE_IP: &str = "ip";
/// Namespace for authenticated or submitted user names.
pub const NAMESPACE_USER: &str = "user";
/// Namespace for email addresses.
pub const NAMESPACE_EMAIL: &str = "email";
/// Namespace for tenant identifiers.
pub const NAMESPACE_TENANT: &str = "tenant";
/// Namespace for application identifiers.
pub const NAMESPACE_APP: &str = "app";
/// Namespace for raw header values.
pub const NAMESPACE_HEADER: &str = "hdr";

/// Opaque per-principal key in the form `namespace:value`.
///
/// Two identifiers are the same bucket, nonce scope, and attempt counter if
/// and only if their rendered strings are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identifier(String);

impl Identifier {
    /// Creates an identifier from a namespace and a principal value.
    ///
    /// Both parts are trimmed; the namespace must not contain `:`.
    pub fn new(namespace: &str, value: &str) -> AppResult<Self> {
        let namespace = namespace.trim();
        let value = value.trim();

        if namespace.is_empty() || namespace.contains(':') {
            return Err(AppError::Validation(format!(
                "identifier namespace '{namespace}' must be non-empty and must not contain ':'"
            )));
        }

        if value.is_empty() {
            return Err(AppError::Validation(format!(
                "identifier value for namespace '{namespace}' must not be empty"
            )));
        }

        Ok(Self(format!("{namespace}:{value}")))
    }

    /// Parses an already rendered `namespace:value` identifier.
    pub fn parse(rendered: &str) -> AppResult<Self> {
        let (namespace, value) = rendered.split_once(':').ok_or_else(|| {
            AppError::Validation(format!(
                "identifier '{rendered}' must have the form namespace:value"
            ))
        })?;

        Self::new(namespace, value)
    }

    /// Identifier for a client network address. Never fails.
    #[must_use]
    pub fn client_ip(address: &str) -> Self {
        let address = address.trim();
        if address.is_empty() {
            return Self(format!("{NAMESPACE_IP}:unknown"));
        }

        Self(format!("{NAMESPACE_IP}:{address}"))
    }

    /// Returns the namespace part.
    #[must_use]
    pub fn namespace(&self) -> &str {
        self.0.split_once(':').map_or("", |(namespace, _)| namespace)
    }

    /// Returns the principal value part.
    #[must_use]
    pub fn value(&self) -> &str {
        self.0.split_once(':').map_or("", |(_, value)| value)
    }

    /// Returns the rendered identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl TryFrom<String> for Identifier {
    type Error = AppError;

    fn try_from(rendered: String) -> AppResult<Self> {
        Self::parse(rendered.as_str())
    }
}

impl From<Identifier> for String {
    fn from(identifier: Identifier) -> Self {
        identifier.0
    }
}

impl Display for Identifier {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.0.as_str())
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::{Identifier, NAMESPACE_IP};

    #[test]
    fn identifier_renders_namespace_and_value() {
        let identifier = Identifier::new("user", " alice ");
        assert_eq!(
            identifier.as_ref().map(Identifier::as_str).ok(),
            Some("user:alice")
        );
    }

    #[test]
    fn identifier_rejects_empty_parts() {
        assert!(Identifier::new("", "alice").is_err());
        assert!(Identifier::new("user", "   ").is_err());
        assert!(Identifier::new("us:er", "alice").is_err());
    }

    #[test]
    fn ipv6_addresses_keep_their_colons_in_the_value() {
        let identifier = Identifier::client_ip("::1");
        assert_eq!(identifier.namespace(), NAMESPACE_IP);
        assert_eq!(identifier.value(), "::1");
    }

    #[test]
    fn deserialization_applies_the_same_validation() {
        let parsed: Result<Identifier, _> = serde_json::from_str(r#""user: alice""#);
        assert_eq!(parsed.ok().as_ref().map(Identifier::as_str), Some("user:alice"));

        for rejected in [r#""""#, r#""alice""#, r#"":alice""#, r#""user:  ""#] {
            let result: Result<Identifier, _> = serde_json::from_str(rejected);
            assert!(result.is_err(), "{rejected} should be rejected");
        }

        let rendered = serde_json::to_string(&Identifier::client_ip("::1")).ok();
        assert_eq!(rendered.as_deref(), Some(r#""ip:::1""#));
    }

    #[test]
    fn empty_client_ip_falls_back_to_unknown() {
        assert_eq!(Identifier::client_ip(" ").as_str(), "ip:unknown");
    }

    proptest! {
        #[test]
        fn distinct_principals_never_share_identifiers(
            left in "[a-z0-9@.]{1,16}",
            right in "[a-z0-9@.]{1,16}",
        ) {
            prop_assume!(left != right);
            let left = Identifier::new("user", &left);
            let right = Identifier::new("user", &right);
            prop_assert!(left.is_ok() && right.is_ok());
            prop_assert_ne!(left.ok(), right.ok());
        }

        #[test]
        fn parse_accepts_rendered_identifiers(value in "[a-z0-9.:]{1,24}") {
            prop_assume!(!value.starts_with(':') && !value.trim().is_empty());
            let rendered = Identifier::new("hdr", &value).map(|identifier| identifier.to_string());
            let reparsed = rendered.as_deref().ok().map(Identifier::parse);
            prop_assert!(matches!(reparsed, Some(Ok(_))));
        }
    }
}
