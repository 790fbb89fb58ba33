//! Identity assertions carried by tickets and the services they are scoped to.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Outcome of a successful login: the principal and its released attributes.
///
/// The engine treats this as an opaque payload; it is established by the
/// authentication layer and handed back unchanged on ticket validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Authentication {
    /// Authenticated principal identifier.
    pub principal: String,
    /// Principal attributes released to applications.
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
    /// Name of the mechanism that established the identity.
    #[serde(default)]
    pub method: Option<String>,
    /// When the authentication happened.
    pub authenticated_at: DateTime<Utc>,
}

impl Authentication {
    /// Creates an authentication for `principal` at the current time.
    pub fn new(principal: impl Into<String>) -> Self {
        Self::at(principal, Utc::now())
    }

    /// Creates an authentication for `principal` at a given time.
    pub fn at(principal: impl Into<String>, authenticated_at: DateTime<Utc>) -> Self {
        Self {
            principal: principal.into(),
            attributes: BTreeMap::new(),
            method: None,
            authenticated_at,
        }
    }

    /// Adds a principal attribute.
    #[must_use]
    pub fn with_attribute(
        mut self,
        name: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Records the authentication mechanism.
    #[must_use]
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }
}

/// Identifier (usually a URL) of an application tickets can be issued for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Service(String);

impl Service {
    /// Wraps a service identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Exact comparison used when validating a ticket.
    ///
    /// No normalisation is applied: `https://app.example/` and
    /// `https://app.example` are different services.
    #[must_use]
    pub fn matches(&self, presented: &Service) -> bool {
        self.0 == presented.0
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Service {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for Service {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authentication_builder() {
        let auth = Authentication::new("alice")
            .with_attribute("mail", "alice@example.org")
            .with_method("password");

        assert_eq!(auth.principal, "alice");
        assert_eq!(
            auth.attributes.get("mail"),
            Some(&serde_json::Value::from("alice@example.org"))
        );
        assert_eq!(auth.method.as_deref(), Some("password"));
    }

    #[test]
    fn test_service_match_is_exact() {
        let service = Service::from("https://app.example/");
        assert!(service.matches(&Service::from("https://app.example/")));
        assert!(!service.matches(&Service::from("https://app.example")));
        assert!(!service.matches(&Service::from("HTTPS://APP.EXAMPLE/")));
    }
}
