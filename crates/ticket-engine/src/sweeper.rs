//! Background removal of expired and consumed tickets.
//!
//! The sweeper goes through the public registry contract only. It never
//! holds a lock across tickets, so a validation racing a sweep sees either
//! the ticket as it was or no ticket at all.

use chrono::{DateTime, Utc};
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::SweeperSettings;
use crate::registry::TicketRegistry;
use crate::ticket::TicketId;

/// Outcome of one sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepStats {
    /// Tickets looked at.
    pub inspected: usize,
    /// Tickets found expired or consumed.
    pub expired: usize,
    /// Tickets removed, cascaded descendants included.
    pub removed: usize,
    /// Registry errors hit during the sweep.
    pub errors: usize,
    /// Wall time spent sweeping.
    pub duration: Duration,
    /// When the sweep finished.
    pub completed_at: DateTime<Utc>,
}

/// Periodically deletes tickets that can no longer be used.
#[derive(Clone)]
pub struct TicketSweeper {
    registry: Arc<dyn TicketRegistry>,
    clock: Arc<dyn Clock>,
    settings: SweeperSettings,
    last_stats: Arc<RwLock<Option<SweepStats>>>,
}

impl TicketSweeper {
    /// Creates a sweeper; nothing runs until [`TicketSweeper::start`].
    pub fn new(
        registry: Arc<dyn TicketRegistry>,
        clock: Arc<dyn Clock>,
        settings: SweeperSettings,
    ) -> Self {
        Self {
            registry,
            clock,
            settings,
            last_stats: Arc::new(RwLock::new(None)),
        }
    }

    /// Statistics of the most recent sweep.
    pub fn last_stats(&self) -> Option<SweepStats> {
        self.last_stats.read().clone()
    }

    /// Runs a single sweep.
    pub async fn sweep_once(&self) -> SweepStats {
        let started = Instant::now();
        let now = self.clock.now();
        let mut inspected = 0;
        let mut errors = 0;
        let mut candidates: Vec<TicketId> = Vec::new();

        let mut tickets = self.registry.get_tickets();
        while let Some(item) = tickets.next().await {
            match item {
                Ok(ticket) => {
                    inspected += 1;
                    if ticket.state(now).is_terminal() {
                        candidates.push(ticket.id().clone());
                    }
                }
                Err(e) => {
                    errors += 1;
                    warn!(error = %e, "Failed to read ticket during sweep");
                }
            }
        }
        drop(tickets);

        let mut removed = 0;
        for id in &candidates {
            match self.registry.delete_ticket(id).await {
                Ok(count) => removed += count,
                Err(e) => {
                    errors += 1;
                    warn!(ticket_id = %id, error = %e, "Failed to remove expired ticket");
                }
            }
        }

        let stats = SweepStats {
            inspected,
            expired: candidates.len(),
            removed,
            errors,
            duration: started.elapsed(),
            completed_at: self.clock.now(),
        };

        if stats.removed > 0 || stats.errors > 0 {
            info!(
                inspected = stats.inspected,
                expired = stats.expired,
                removed = stats.removed,
                errors = stats.errors,
                duration_ms = stats.duration.as_millis() as u64,
                "Ticket sweep completed"
            );
        } else {
            debug!(inspected = stats.inspected, "Ticket sweep found nothing to remove");
        }

        *self.last_stats.write() = Some(stats.clone());
        stats
    }

    /// Spawns the periodic sweep on the current Tokio runtime.
    pub fn start(&self) -> TicketSweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let running = Arc::new(AtomicBool::new(true));
        let sweeper = self.clone();
        let task_running = running.clone();

        info!(
            interval_secs = self.settings.interval_secs,
            start_delay_secs = self.settings.start_delay_secs,
            "Starting ticket sweeper"
        );

        let task = tokio::spawn(async move {
            tokio::select! {
                _ = sleep(sweeper.settings.start_delay()) => {}
                _ = shutdown_rx.changed() => {
                    task_running.store(false, Ordering::SeqCst);
                    return;
                }
            }

            let mut ticker = interval(sweeper.settings.interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        sweeper.sweep_once().await;
                    }
                    _ = shutdown_rx.changed() => {
                        debug!("Ticket sweeper shutting down");
                        break;
                    }
                }
            }
            task_running.store(false, Ordering::SeqCst);
        });

        TicketSweeperHandle {
            shutdown: shutdown_tx,
            task: Mutex::new(Some(task)),
            running,
        }
    }
}

impl std::fmt::Debug for TicketSweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TicketSweeper")
            .field("settings", &self.settings)
            .field("last_stats", &self.last_stats())
            .finish_non_exhaustive()
    }
}

/// Handle to a running sweeper task.
#[derive(Debug)]
pub struct TicketSweeperHandle {
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
    running: Arc<AtomicBool>,
}

impl TicketSweeperHandle {
    /// Returns true until the sweeper task has exited.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Signals the sweeper to stop and waits for an in-flight sweep to finish.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!(error = %e, "Ticket sweeper task failed");
            }
        }
        self.running.store(false, Ordering::SeqCst);
    }
}
