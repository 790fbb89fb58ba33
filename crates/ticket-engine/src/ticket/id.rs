//! Ticket identifiers and ticket kinds.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Opaque ticket identifier.
///
/// Identifiers are produced by a [`crate::TicketIdGenerator`] and only ever
/// contain URL-safe characters, so they can be embedded in query strings and
/// headers as-is.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketId(String);

impl TicketId {
    /// Wraps an identifier string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the ticket kind encoded in the identifier prefix, if recognised.
    #[must_use]
    pub fn ticket_type(&self) -> Option<TicketType> {
        self.0
            .split_once('-')
            .and_then(|(prefix, _)| TicketType::from_prefix(prefix))
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TicketId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for TicketId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl Borrow<str> for TicketId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for TicketId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Kinds of tickets managed by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketType {
    /// Long-lived SSO session credential.
    TicketGranting,
    /// Ticket-granting ticket minted for a proxying service.
    ProxyGranting,
    /// Single-use credential for one application.
    Service,
    /// Service ticket issued from a proxy-granting ticket.
    Proxy,
}

impl TicketType {
    /// Identifier prefix for this kind.
    #[must_use]
    pub fn prefix(&self) -> &'static str {
        match self {
            TicketType::TicketGranting => "TGT",
            TicketType::ProxyGranting => "PGT",
            TicketType::Service => "ST",
            TicketType::Proxy => "PT",
        }
    }

    /// Resolves a kind from an identifier prefix.
    #[must_use]
    pub fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "TGT" => Some(TicketType::TicketGranting),
            "PGT" => Some(TicketType::ProxyGranting),
            "ST" => Some(TicketType::Service),
            "PT" => Some(TicketType::Proxy),
            _ => None,
        }
    }

    /// Returns true for the ticket-granting kinds (TGT and PGT).
    #[must_use]
    pub fn is_granting(&self) -> bool {
        matches!(self, TicketType::TicketGranting | TicketType::ProxyGranting)
    }

    /// Returns true if a ticket of this kind satisfies a lookup for `expected`.
    ///
    /// A proxy-granting ticket is a ticket-granting ticket and a proxy ticket
    /// is a service ticket; the converse does not hold.
    #[must_use]
    pub fn satisfies(&self, expected: TicketType) -> bool {
        match expected {
            TicketType::TicketGranting => self.is_granting(),
            TicketType::Service => matches!(self, TicketType::Service | TicketType::Proxy),
            other => *self == other,
        }
    }
}

impl fmt::Display for TicketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}
