//! Unique ticket identifier generation.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use ring::rand::{SecureRandom, SystemRandom};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{TicketError, TicketResult};
use crate::ticket::{TicketId, TicketType};

/// Minimum number of random bytes in an identifier (128 bits).
pub const MIN_RANDOM_LENGTH: usize = 16;

/// Default number of random bytes in an identifier.
pub const DEFAULT_RANDOM_LENGTH: usize = 36;

/// Produces identifiers for newly minted tickets.
pub trait TicketIdGenerator: Send + Sync + fmt::Debug {
    /// Returns a fresh identifier for a ticket of the given kind.
    fn new_ticket_id(&self, ticket_type: TicketType) -> TicketResult<TicketId>;
}

/// Default generator: `{PREFIX}-{counter}-{random}[-{suffix}]`.
///
/// The random part is drawn from the operating system CSPRNG and encoded as
/// unpadded URL-safe base64. The counter only disambiguates identifiers minted
/// by this process and carries no security weight; the optional suffix names
/// the node when several servers share one registry.
pub struct UniqueTicketIdGenerator {
    rng: SystemRandom,
    random_length: usize,
    suffix: Option<String>,
    counter: AtomicU64,
}

impl UniqueTicketIdGenerator {
    /// Creates a generator.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `random_length` is below
    /// [`MIN_RANDOM_LENGTH`] or the suffix contains characters that are not
    /// safe in a URL.
    pub fn new(random_length: usize, suffix: Option<String>) -> TicketResult<Self> {
        if random_length < MIN_RANDOM_LENGTH {
            return Err(TicketError::Configuration(format!(
                "ticket id random length must be at least {MIN_RANDOM_LENGTH} bytes, got {random_length}"
            )));
        }
        if let Some(suffix) = suffix.as_deref() {
            validate_suffix(suffix)?;
        }

        Ok(Self {
            rng: SystemRandom::new(),
            random_length,
            suffix: suffix.filter(|s| !s.is_empty()),
            counter: AtomicU64::new(0),
        })
    }

    /// Generator with the default random length and no node suffix.
    pub fn with_defaults() -> TicketResult<Self> {
        Self::new(DEFAULT_RANDOM_LENGTH, None)
    }

    fn random_part(&self) -> TicketResult<String> {
        let mut bytes = vec![0u8; self.random_length];
        self.rng
            .fill(&mut bytes)
            .map_err(|_| TicketError::Crypto("failed to generate random bytes".to_string()))?;
        Ok(URL_SAFE_NO_PAD.encode(bytes))
    }
}

impl fmt::Debug for UniqueTicketIdGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UniqueTicketIdGenerator")
            .field("random_length", &self.random_length)
            .field("suffix", &self.suffix)
            .finish_non_exhaustive()
    }
}

impl TicketIdGenerator for UniqueTicketIdGenerator {
    fn new_ticket_id(&self, ticket_type: TicketType) -> TicketResult<TicketId> {
        let sequence = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let random = self.random_part()?;

        let id = match &self.suffix {
            Some(suffix) => format!("{}-{sequence}-{random}-{suffix}", ticket_type.prefix()),
            None => format!("{}-{sequence}-{random}", ticket_type.prefix()),
        };
        Ok(TicketId::new(id))
    }
}

pub(crate) fn validate_suffix(suffix: &str) -> TicketResult<()> {
    if suffix
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        Ok(())
    } else {
        Err(TicketError::Configuration(format!(
            "node suffix '{suffix}' may only contain ASCII letters, digits, '-', '_' and '.'"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_id_shape() {
        let generator = UniqueTicketIdGenerator::new(16, Some("node-a".to_string())).unwrap();
        let id = generator.new_ticket_id(TicketType::Service).unwrap();

        let parts: Vec<&str> = id.as_str().splitn(3, '-').collect();
        assert_eq!(parts[0], "ST");
        assert_eq!(parts[1], "1");
        assert!(id.as_str().ends_with("-node-a"));
        assert_eq!(id.ticket_type(), Some(TicketType::Service));
    }

    #[test]
    fn test_random_part_has_requested_entropy() {
        let generator = UniqueTicketIdGenerator::new(32, None).unwrap();
        let id = generator.new_ticket_id(TicketType::TicketGranting).unwrap();

        // The random part may itself contain '-', so take everything after the counter
        let tail = id.as_str().splitn(3, '-').nth(2).unwrap();
        let decoded = URL_SAFE_NO_PAD.decode(tail).unwrap();
        assert_eq!(decoded.len(), 32);
    }

    #[test]
    fn test_ids_are_url_safe() {
        let generator = UniqueTicketIdGenerator::with_defaults().unwrap();
        for _ in 0..100 {
            let id = generator.new_ticket_id(TicketType::ProxyGranting).unwrap();
            assert!(id
                .as_str()
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        }
    }

    #[test]
    fn test_ids_are_unique() {
        let generator = UniqueTicketIdGenerator::with_defaults().unwrap();
        let ids: HashSet<TicketId> = (0..1_000)
            .map(|_| generator.new_ticket_id(TicketType::Service).unwrap())
            .collect();
        assert_eq!(ids.len(), 1_000);
    }

    #[test]
    fn test_rejects_short_random_length() {
        let result = UniqueTicketIdGenerator::new(8, None);
        assert!(matches!(result, Err(TicketError::Configuration(_))));
    }

    #[test]
    fn test_rejects_unsafe_suffix() {
        let result = UniqueTicketIdGenerator::new(16, Some("node/a?x".to_string()));
        assert!(matches!(result, Err(TicketError::Configuration(_))));
    }
}
