//! Engine configuration.
//!
//! Loaded once at startup from TOML; every section falls back to its
//! defaults when omitted.
//!
//! ```toml
//! max_proxy_depth = 2
//! node_suffix = "sso-1"
//!
//! [expiration.ticket_granting_ticket]
//! type = "ticket_granting"
//! max_lifetime_secs = 28800
//! idle_timeout_secs = 7200
//!
//! [sweeper]
//! interval_secs = 60
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{TicketError, TicketResult};
use crate::expiration::ExpirationPolicy;
use crate::id_generator::{validate_suffix, DEFAULT_RANDOM_LENGTH, MIN_RANDOM_LENGTH};

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TicketEngineConfig {
    /// Expiration policy per ticket kind.
    pub expiration: ExpirationPolicies,
    /// Maximum number of proxy hops below a root session (0 disables proxying).
    pub max_proxy_depth: usize,
    /// Node name appended to ticket identifiers.
    pub node_suffix: Option<String>,
    /// Random bytes per ticket identifier.
    pub id_random_length: usize,
    /// Background sweeper settings.
    pub sweeper: SweeperSettings,
    /// Minimum log level for the binary.
    pub log_level: String,
}

impl Default for TicketEngineConfig {
    fn default() -> Self {
        Self {
            expiration: ExpirationPolicies::default(),
            max_proxy_depth: 1,
            node_suffix: None,
            id_random_length: DEFAULT_RANDOM_LENGTH,
            sweeper: SweeperSettings::default(),
            log_level: "info".to_string(),
        }
    }
}

/// Expiration policies attached by the ticket factory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpirationPolicies {
    /// Policy for ticket-granting tickets.
    pub ticket_granting_ticket: ExpirationPolicy,
    /// Policy for proxy-granting tickets.
    pub proxy_granting_ticket: ExpirationPolicy,
    /// Policy for service tickets.
    pub service_ticket: ExpirationPolicy,
    /// Policy for proxy tickets.
    pub proxy_ticket: ExpirationPolicy,
}

impl Default for ExpirationPolicies {
    fn default() -> Self {
        Self {
            ticket_granting_ticket: ExpirationPolicy::default_ticket_granting(),
            proxy_granting_ticket: ExpirationPolicy::default_ticket_granting(),
            service_ticket: ExpirationPolicy::default_service(),
            proxy_ticket: ExpirationPolicy::default_service(),
        }
    }
}

/// Sweeper settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweeperSettings {
    /// Whether the binary starts the sweeper.
    pub enabled: bool,
    /// Seconds between sweeps.
    pub interval_secs: u64,
    /// Seconds to wait before the first sweep.
    pub start_delay_secs: u64,
}

impl Default for SweeperSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 120,
            start_delay_secs: 15,
        }
    }
}

impl SweeperSettings {
    /// Interval between sweeps, never shorter than one second.
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    /// Delay before the first sweep.
    #[must_use]
    pub fn start_delay(&self) -> Duration {
        Duration::from_secs(self.start_delay_secs)
    }
}

impl TicketEngineConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(content: &str) -> TicketResult<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a TOML file.
    pub fn load_from_file(path: impl AsRef<Path>) -> TicketResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            TicketError::Configuration(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Checks every setting.
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::Configuration`] naming the first invalid setting.
    pub fn validate(&self) -> TicketResult<()> {
        let policies = [
            ("ticket_granting_ticket", &self.expiration.ticket_granting_ticket),
            ("proxy_granting_ticket", &self.expiration.proxy_granting_ticket),
            ("service_ticket", &self.expiration.service_ticket),
            ("proxy_ticket", &self.expiration.proxy_ticket),
        ];
        for (name, policy) in policies {
            policy.validate().map_err(|reason| {
                TicketError::Configuration(format!("expiration.{name}: {reason}"))
            })?;
        }

        if self.id_random_length < MIN_RANDOM_LENGTH {
            return Err(TicketError::Configuration(format!(
                "id_random_length must be at least {MIN_RANDOM_LENGTH}, got {}",
                self.id_random_length
            )));
        }

        if let Some(suffix) = self.node_suffix.as_deref() {
            validate_suffix(suffix)?;
        }

        if self.sweeper.interval_secs == 0 {
            return Err(TicketError::Configuration(
                "sweeper.interval_secs must be positive".to_string(),
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.as_str()) {
            return Err(TicketError::Configuration(format!(
                "invalid log level '{}', must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            )));
        }

        Ok(())
    }
}
