//! Ticket registry: the single owner of ticket storage.
//!
//! Every backend honours the same contract:
//!
//! - reads that discover an expired ticket delete it (and everything it
//!   issued) before returning [`TicketError::Expired`], so later reads see
//!   [`TicketError::NotFound`];
//! - consuming a service ticket and recording a use of a granting ticket are
//!   atomic per ticket identifier, never across identifiers;
//! - [`TicketRegistry::update_ticket`] is the durability boundary and refuses
//!   stale copies with [`TicketError::ConcurrentModification`].
//!
//! A consumed service ticket is kept until it is swept or cascaded away, so
//! replaying it reports [`TicketError::AlreadyConsumed`] rather than
//! [`TicketError::NotFound`].

mod document;
mod memory;

pub use document::{
    DocumentStore, DocumentTicketRegistry, InMemoryDocumentStore, SwapOutcome, VersionedDocument,
};
pub use memory::DefaultTicketRegistry;

use async_trait::async_trait;
use futures::future;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};

use crate::error::{TicketError, TicketResult};
use crate::ticket::{ServiceTicket, Ticket, TicketGrantingTicket, TicketId, TicketType};

/// Lazy sequence over the current ticket population.
pub type TicketStream<'a> = BoxStream<'a, TicketResult<Ticket>>;

/// Filter applied by [`TicketRegistry::get_tickets_matching`].
pub type TicketPredicate<'a> = Box<dyn Fn(&Ticket) -> bool + Send + Sync + 'a>;

/// Consistency offered by a registry backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsistencyModel {
    /// Per-ticket operations are linearizable; single use is strict.
    Linearizable,
    /// Replicas may briefly disagree; single use is best effort.
    Eventual,
}

/// Storage contract for tickets.
#[async_trait]
pub trait TicketRegistry: Send + Sync {
    /// Stores a new ticket.
    ///
    /// Fails with [`TicketError::AlreadyExists`] on an identifier collision.
    async fn add_ticket(&self, ticket: Ticket) -> TicketResult<()>;

    /// Looks a ticket up, optionally requiring a kind.
    ///
    /// A `TicketGranting` expectation also accepts proxy-granting tickets and
    /// a `Service` expectation also accepts proxy tickets.
    async fn get_ticket(&self, id: &TicketId, expected: Option<TicketType>)
        -> TicketResult<Ticket>;

    /// Persists a modified copy and returns it with its new version.
    async fn update_ticket(&self, ticket: &Ticket) -> TicketResult<Ticket>;

    /// Deletes a ticket and, for granting tickets, everything it issued.
    ///
    /// Returns the number of tickets removed; zero when nothing was stored.
    async fn delete_ticket(&self, id: &TicketId) -> TicketResult<usize>;

    /// Removes every ticket.
    async fn delete_all(&self) -> TicketResult<usize>;

    /// Streams every stored ticket, expired ones included.
    fn get_tickets(&self) -> TicketStream<'_>;

    /// Marks a service ticket as validated, exactly once.
    async fn consume_service_ticket(&self, id: &TicketId) -> TicketResult<ServiceTicket>;

    /// Records a use of a granting ticket, optionally registering a child.
    async fn record_ticket_granting_use(
        &self,
        id: &TicketId,
        child: Option<&TicketId>,
    ) -> TicketResult<TicketGrantingTicket>;

    /// Consistency offered by this backend.
    fn consistency(&self) -> ConsistencyModel {
        ConsistencyModel::Linearizable
    }

    /// Streams the tickets accepted by `predicate`.
    fn get_tickets_matching<'a>(&'a self, predicate: TicketPredicate<'a>) -> TicketStream<'a> {
        self.get_tickets()
            .try_filter(move |ticket| future::ready(predicate(ticket)))
            .boxed()
    }

    /// Looks up a ticket-granting or proxy-granting ticket.
    async fn get_granting_ticket(&self, id: &TicketId) -> TicketResult<TicketGrantingTicket> {
        let ticket = self
            .get_ticket(id, Some(TicketType::TicketGranting))
            .await?;
        let found = ticket.ticket_type();
        ticket.into_granting().ok_or_else(|| TicketError::InvalidType {
            id: id.clone(),
            expected: TicketType::TicketGranting,
            found,
        })
    }

    /// Looks up a service or proxy ticket.
    async fn get_service_ticket(&self, id: &TicketId) -> TicketResult<ServiceTicket> {
        let ticket = self.get_ticket(id, Some(TicketType::Service)).await?;
        let found = ticket.ticket_type();
        ticket.into_service().ok_or_else(|| TicketError::InvalidType {
            id: id.clone(),
            expected: TicketType::Service,
            found,
        })
    }

    /// Number of stored tickets.
    async fn ticket_count(&self) -> TicketResult<usize> {
        count(self.get_tickets()).await
    }

    /// Number of stored root ticket-granting tickets.
    async fn session_count(&self) -> TicketResult<usize> {
        count(self.get_tickets_matching(Box::new(|ticket: &Ticket| {
            ticket.ticket_type() == TicketType::TicketGranting
        })))
        .await
    }

    /// Number of stored service and proxy tickets.
    async fn service_ticket_count(&self) -> TicketResult<usize> {
        count(self.get_tickets_matching(Box::new(|ticket: &Ticket| {
            ticket.ticket_type().satisfies(TicketType::Service)
        })))
        .await
    }

    /// Root ticket-granting tickets belonging to `principal`.
    async fn get_sessions_for_principal(
        &self,
        principal: &str,
    ) -> TicketResult<Vec<TicketGrantingTicket>> {
        self.get_tickets_matching(Box::new(move |ticket: &Ticket| {
            ticket.ticket_type() == TicketType::TicketGranting && ticket.principal() == principal
        }))
        .try_filter_map(|ticket| future::ready(Ok(ticket.into_granting())))
        .try_collect()
        .await
    }
}

async fn count(stream: TicketStream<'_>) -> TicketResult<usize> {
    stream.try_fold(0, |n, _| future::ready(Ok(n + 1))).await
}

/// Fails with [`TicketError::InvalidType`] unless `ticket` satisfies `expected`.
pub(crate) fn ensure_type(ticket: &Ticket, expected: Option<TicketType>) -> TicketResult<()> {
    match expected {
        Some(expected) if !ticket.ticket_type().satisfies(expected) => {
            Err(TicketError::InvalidType {
                id: ticket.id().clone(),
                expected,
                found: ticket.ticket_type(),
            })
        }
        _ => Ok(()),
    }
}

/// Returns true if a read at `now` must delete the ticket.
///
/// Consumed service tickets are left in place so a replay is reported as
/// already consumed.
pub(crate) fn expires_on_read(ticket: &Ticket, now: chrono::DateTime<chrono::Utc>) -> bool {
    !ticket.is_consumed() && ticket.is_expired(now)
}
