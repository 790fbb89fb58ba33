//! Tracing initialization for the ticket engine binary.

use std::sync::atomic::{AtomicBool, Ordering};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{TicketError, TicketResult};

static TRACING_INITIALIZED: AtomicBool = AtomicBool::new(false);

const VALID_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Installs a formatted stdout subscriber filtered at `log_level`.
///
/// `RUST_LOG` takes precedence over `log_level` when set.
///
/// # Errors
///
/// Returns a configuration error for an unknown level or when tracing has
/// already been initialized in this process.
pub fn init_tracing(log_level: &str) -> TicketResult<()> {
    if !VALID_LEVELS.contains(&log_level) {
        return Err(TicketError::Configuration(format!(
            "invalid log level '{log_level}', must be one of: {}",
            VALID_LEVELS.join(", ")
        )));
    }

    if TRACING_INITIALIZED.swap(true, Ordering::SeqCst) {
        return Err(TicketError::Configuration(
            "tracing has already been initialized".to_string(),
        ));
    }

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(true),
        )
        .try_init()
        .map_err(|e| TicketError::Configuration(format!("failed to initialize tracing: {e}")))
}
