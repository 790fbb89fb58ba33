//! In-process registry backed by a sharded concurrent map.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use super::{ensure_type, expires_on_read, TicketRegistry, TicketStream};
use crate::clock::Clock;
use crate::error::{TicketError, TicketResult};
use crate::ticket::{ServiceTicket, Ticket, TicketGrantingTicket, TicketId, TicketType};

/// Default registry holding every ticket in memory.
///
/// Per-ticket atomicity comes from the shard lock of the map entry; tickets
/// in different shards never contend. No shard lock is held while another
/// key is touched.
#[derive(Debug)]
pub struct DefaultTicketRegistry {
    tickets: DashMap<TicketId, Ticket>,
    clock: Arc<dyn Clock>,
}

impl DefaultTicketRegistry {
    /// Creates an empty registry.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            tickets: DashMap::new(),
            clock,
        }
    }

    /// Removes `root` and every ticket it transitively issued.
    fn remove_cascading(&self, root: &TicketId) -> usize {
        let mut removed = 0;
        let mut visited = HashSet::new();
        let mut pending = vec![root.clone()];

        while let Some(id) = pending.pop() {
            if !visited.insert(id.clone()) {
                continue;
            }
            if let Some((_, ticket)) = self.tickets.remove(&id) {
                removed += 1;
                if let Ticket::Granting(granting) = ticket {
                    // Reversed so children are visited in issue order
                    pending.extend(granting.child_tickets().iter().rev().cloned());
                }
            }
        }
        removed
    }

    fn expire(&self, id: &TicketId) -> TicketError {
        let removed = self.remove_cascading(id);
        debug!(ticket_id = %id, removed, "Removed expired ticket on read");
        TicketError::Expired(id.clone())
    }
}

#[async_trait]
impl TicketRegistry for DefaultTicketRegistry {
    async fn add_ticket(&self, mut ticket: Ticket) -> TicketResult<()> {
        match self.tickets.entry(ticket.id().clone()) {
            Entry::Occupied(entry) => Err(TicketError::AlreadyExists(entry.key().clone())),
            Entry::Vacant(entry) => {
                ticket.metadata_mut().set_version(1);
                debug!(ticket_id = %entry.key(), ticket_type = %ticket.ticket_type(), "Added ticket");
                entry.insert(ticket);
                Ok(())
            }
        }
    }

    async fn get_ticket(
        &self,
        id: &TicketId,
        expected: Option<TicketType>,
    ) -> TicketResult<Ticket> {
        let ticket = self
            .tickets
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TicketError::NotFound(id.clone()))?;

        ensure_type(&ticket, expected)?;

        if expires_on_read(&ticket, self.clock.now()) {
            return Err(self.expire(id));
        }
        Ok(ticket)
    }

    async fn update_ticket(&self, ticket: &Ticket) -> TicketResult<Ticket> {
        let mut entry = self
            .tickets
            .get_mut(ticket.id())
            .ok_or_else(|| TicketError::NotFound(ticket.id().clone()))?;

        if entry.version() != ticket.version() {
            return Err(TicketError::ConcurrentModification(ticket.id().clone()));
        }

        let mut updated = ticket.clone();
        updated.metadata_mut().set_version(ticket.version() + 1);
        *entry = updated.clone();
        Ok(updated)
    }

    async fn delete_ticket(&self, id: &TicketId) -> TicketResult<usize> {
        let removed = self.remove_cascading(id);
        if removed > 0 {
            debug!(ticket_id = %id, removed, "Deleted ticket");
        }
        Ok(removed)
    }

    async fn delete_all(&self) -> TicketResult<usize> {
        let removed = self.tickets.len();
        self.tickets.clear();
        Ok(removed)
    }

    fn get_tickets(&self) -> TicketStream<'_> {
        // Snapshot the keys only; each ticket is cloned when the stream reaches it
        let ids: Vec<TicketId> = self.tickets.iter().map(|entry| entry.key().clone()).collect();
        stream::iter(ids)
            .filter_map(move |id| {
                future::ready(
                    self.tickets
                        .get(&id)
                        .map(|entry| Ok::<_, TicketError>(entry.value().clone())),
                )
            })
            .boxed()
    }

    async fn consume_service_ticket(&self, id: &TicketId) -> TicketResult<ServiceTicket> {
        let now = self.clock.now();
        let mut entry = self
            .tickets
            .get_mut(id)
            .ok_or_else(|| TicketError::NotFound(id.clone()))?;

        let found = entry.ticket_type();
        let Ticket::Service(service_ticket) = entry.value_mut() else {
            return Err(TicketError::InvalidType {
                id: id.clone(),
                expected: TicketType::Service,
                found,
            });
        };

        if service_ticket.is_consumed() {
            return Err(TicketError::AlreadyConsumed(id.clone()));
        }
        if service_ticket.is_expired(now) {
            drop(entry);
            return Err(self.expire(id));
        }

        service_ticket.consume(now);
        let version = service_ticket.metadata().version() + 1;
        service_ticket.metadata_mut().set_version(version);
        Ok(service_ticket.clone())
    }

    async fn record_ticket_granting_use(
        &self,
        id: &TicketId,
        child: Option<&TicketId>,
    ) -> TicketResult<TicketGrantingTicket> {
        let now = self.clock.now();
        let mut entry = self
            .tickets
            .get_mut(id)
            .ok_or_else(|| TicketError::NotFound(id.clone()))?;

        let found = entry.ticket_type();
        let Ticket::Granting(granting) = entry.value_mut() else {
            return Err(TicketError::InvalidType {
                id: id.clone(),
                expected: TicketType::TicketGranting,
                found,
            });
        };

        if granting.is_expired(now) {
            drop(entry);
            return Err(self.expire(id));
        }
        if granting.metadata().is_throttled(now) {
            return Err(TicketError::Throttled(id.clone()));
        }

        granting.metadata_mut().record_use(now);
        if let Some(child) = child {
            granting.add_child(child.clone());
        }
        let version = granting.metadata().version() + 1;
        granting.metadata_mut().set_version(version);
        Ok(granting.clone())
    }

    async fn ticket_count(&self) -> TicketResult<usize> {
        Ok(self.tickets.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::expiration::ExpirationPolicy;
    use crate::ticket::{Authentication, Service};
    use futures::TryStreamExt;

    fn create_test_registry() -> (DefaultTicketRegistry, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        (DefaultTicketRegistry::new(clock.clone()), clock)
    }

    fn granting(id: &str, clock: &ManualClock, policy: ExpirationPolicy) -> TicketGrantingTicket {
        TicketGrantingTicket::new(
            TicketId::from(id),
            Authentication::at("alice", clock.now()),
            policy,
            clock.now(),
        )
    }

    fn service(id: &str, parent: &TicketGrantingTicket, clock: &ManualClock) -> ServiceTicket {
        ServiceTicket::new(
            TicketId::from(id),
            parent,
            Service::from("https://app.example/"),
            ExpirationPolicy::default_service(),
            clock.now(),
        )
    }

    #[tokio::test]
    async fn test_add_and_get() {
        let (registry, clock) = create_test_registry();
        let tgt = granting("TGT-1", &clock, ExpirationPolicy::default_ticket_granting());
        registry.add_ticket(tgt.into()).await.unwrap();

        let stored = registry
            .get_ticket(&TicketId::from("TGT-1"), Some(TicketType::TicketGranting))
            .await
            .unwrap();
        assert_eq!(stored.version(), 1);
        assert_eq!(stored.principal(), "alice");
    }

    #[tokio::test]
    async fn test_duplicate_id_is_rejected() {
        let (registry, clock) = create_test_registry();
        let tgt = granting("TGT-1", &clock, ExpirationPolicy::default_ticket_granting());
        registry.add_ticket(tgt.clone().into()).await.unwrap();

        let result = registry.add_ticket(tgt.into()).await;
        assert!(matches!(result, Err(TicketError::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn test_cascade_skips_cycles() {
        let (registry, clock) = create_test_registry();
        let mut root = granting("TGT-1", &clock, ExpirationPolicy::default_ticket_granting());
        root.add_child(TicketId::from("TGT-1"));
        root.add_child(TicketId::from("ST-2"));
        let st = service("ST-2", &root, &clock);
        registry.add_ticket(root.into()).await.unwrap();
        registry.add_ticket(st.into()).await.unwrap();

        assert_eq!(registry.delete_ticket(&TicketId::from("TGT-1")).await.unwrap(), 2);
        assert_eq!(registry.ticket_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_consumed_ticket_survives_reads() {
        let (registry, clock) = create_test_registry();
        let root = granting("TGT-1", &clock, ExpirationPolicy::default_ticket_granting());
        let st = service("ST-2", &root, &clock);
        registry.add_ticket(root.into()).await.unwrap();
        registry.add_ticket(st.into()).await.unwrap();

        let id = TicketId::from("ST-2");
        let consumed = registry.consume_service_ticket(&id).await.unwrap();
        assert!(consumed.is_consumed());
        assert_eq!(consumed.metadata().version(), 2);

        let stored = registry.get_ticket(&id, None).await.unwrap();
        assert!(stored.is_consumed());
        assert!(matches!(
            registry.consume_service_ticket(&id).await,
            Err(TicketError::AlreadyConsumed(_))
        ));
    }

    #[tokio::test]
    async fn test_throttled_granting_ticket() {
        let (registry, clock) = create_test_registry();
        let policy = ExpirationPolicy::ThrottledUseAndTimeout {
            max_lifetime_secs: 3600,
            min_interval_between_uses_secs: 5,
            max_uses: None,
        };
        registry
            .add_ticket(granting("TGT-1", &clock, policy).into())
            .await
            .unwrap();
        let id = TicketId::from("TGT-1");

        registry.record_ticket_granting_use(&id, None).await.unwrap();
        clock.advance_secs(1);
        assert!(matches!(
            registry.record_ticket_granting_use(&id, None).await,
            Err(TicketError::Throttled(_))
        ));

        clock.advance_secs(5);
        let used = registry.record_ticket_granting_use(&id, None).await.unwrap();
        assert_eq!(used.metadata().count_of_uses(), 2);
    }

    #[tokio::test]
    async fn test_stream_is_restartable() {
        let (registry, clock) = create_test_registry();
        for n in 0..3 {
            let id = format!("TGT-{n}");
            registry
                .add_ticket(granting(&id, &clock, ExpirationPolicy::NeverExpires).into())
                .await
                .unwrap();
        }

        let first: Vec<Ticket> = registry.get_tickets().try_collect().await.unwrap();
        let second: Vec<Ticket> = registry.get_tickets().try_collect().await.unwrap();
        assert_eq!(first.len(), 3);
        assert_eq!(second.len(), 3);
    }
}
