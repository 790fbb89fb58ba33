//! Error types for ticket lifecycle operations.

use thiserror::Error;

use crate::ticket::{TicketId, TicketType};

/// Result type for ticket lifecycle operations.
pub type TicketResult<T> = std::result::Result<T, TicketError>;

/// Errors surfaced by the ticket engine.
///
/// Logical ticket errors (everything except [`TicketError::StorageUnavailable`]
/// and [`TicketError::Serialization`]) describe the state of a ticket and are
/// translated by the protocol layer into user-facing responses. Storage
/// failures are never retried by the engine itself.
#[derive(Error, Debug)]
pub enum TicketError {
    /// No ticket is registered under the identifier.
    #[error("Ticket not found: {0}")]
    NotFound(TicketId),

    /// The ticket was found but its expiration policy deems it expired.
    /// The ticket has been removed as part of the same operation.
    #[error("Ticket expired: {0}")]
    Expired(TicketId),

    /// The service ticket has already been validated once.
    #[error("Ticket already consumed: {0}")]
    AlreadyConsumed(TicketId),

    /// A ticket with the same identifier is already registered.
    #[error("Ticket already exists: {0}")]
    AlreadyExists(TicketId),

    /// The stored ticket is not of the requested kind.
    #[error("Invalid ticket type for {id}: expected {expected}, found {found}")]
    InvalidType {
        /// Identifier of the offending ticket.
        id: TicketId,
        /// Kind the caller asked for.
        expected: TicketType,
        /// Kind actually stored.
        found: TicketType,
    },

    /// The service presented at validation differs from the one the ticket
    /// was issued for.
    #[error("Service mismatch for {id}: issued for {issued_for}, presented by {presented}")]
    ServiceMismatch {
        /// Identifier of the service ticket.
        id: TicketId,
        /// Service the ticket was issued for.
        issued_for: String,
        /// Service presented during validation.
        presented: String,
    },

    /// The ticket request is malformed (missing parent, proxy chain too deep, ...).
    #[error("Invalid ticket request: {0}")]
    InvalidRequest(String),

    /// A throttled ticket was used again before its minimum interval elapsed.
    #[error("Ticket use throttled: {0}")]
    Throttled(TicketId),

    /// The ticket was modified by another operation since it was read.
    #[error("Concurrent modification of ticket: {0}")]
    ConcurrentModification(TicketId),

    /// The storage backend could not be reached or failed the operation.
    #[error("Ticket storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A persisted ticket could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The engine configuration is invalid.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The secure random source failed.
    #[error("Cryptographic error: {0}")]
    Crypto(String),
}

impl TicketError {
    /// Returns true for backend failures as opposed to logical ticket errors.
    #[must_use]
    pub fn is_storage_failure(&self) -> bool {
        matches!(
            self,
            TicketError::StorageUnavailable(_) | TicketError::Serialization(_)
        )
    }

    /// Returns the identifier of the ticket the error refers to, if any.
    #[must_use]
    pub fn ticket_id(&self) -> Option<&TicketId> {
        match self {
            TicketError::NotFound(id)
            | TicketError::Expired(id)
            | TicketError::AlreadyConsumed(id)
            | TicketError::AlreadyExists(id)
            | TicketError::Throttled(id)
            | TicketError::ConcurrentModification(id) => Some(id),
            TicketError::InvalidType { id, .. } | TicketError::ServiceMismatch { id, .. } => {
                Some(id)
            }
            _ => None,
        }
    }
}

impl From<serde_json::Error> for TicketError {
    fn from(err: serde_json::Error) -> Self {
        TicketError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for TicketError {
    fn from(err: toml::de::Error) -> Self {
        TicketError::Configuration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let id = TicketId::from("ST-1-abc");
        let err = TicketError::AlreadyConsumed(id.clone());
        assert!(err.to_string().contains("ST-1-abc"));
        assert_eq!(err.ticket_id(), Some(&id));
    }

    #[test]
    fn test_invalid_type_message() {
        let err = TicketError::InvalidType {
            id: TicketId::from("TGT-1-abc"),
            expected: TicketType::Service,
            found: TicketType::TicketGranting,
        };
        let msg = err.to_string();
        assert!(msg.contains("ST"));
        assert!(msg.contains("TGT"));
    }

    #[test]
    fn test_storage_failure_classification() {
        assert!(TicketError::StorageUnavailable("down".to_string()).is_storage_failure());
        assert!(!TicketError::NotFound(TicketId::from("ST-1-x")).is_storage_failure());
        assert!(!TicketError::InvalidRequest("no parent".to_string()).is_storage_failure());
    }

    #[test]
    fn test_from_serde_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: TicketError = json_err.into();
        assert!(matches!(err, TicketError::Serialization(_)));
    }
}
