//! Registry over a versioned document store.
//!
//! Tickets are persisted as JSON documents. Every mutation goes through the
//! store's compare-and-swap, so two validators racing on the same service
//! ticket cannot both win: the loser re-reads, finds the ticket consumed and
//! reports it.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use super::{ensure_type, expires_on_read, ConsistencyModel, TicketRegistry, TicketStream};
use crate::clock::Clock;
use crate::error::{TicketError, TicketResult};
use crate::ticket::{ServiceTicket, Ticket, TicketGrantingTicket, TicketId, TicketType};

/// Attempts at a read-modify-swap cycle before giving up.
const MAX_SWAP_ATTEMPTS: usize = 16;

/// Stored document and its version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedDocument {
    /// Incremented by every successful write, starting at 1.
    pub version: u64,
    /// Serialized ticket.
    pub body: String,
}

/// Result of a compare-and-swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapOutcome {
    /// Written; carries the new version.
    Swapped(u64),
    /// The stored version differs from the expected one.
    VersionMismatch,
    /// No document under the key.
    Missing,
}

/// Versioned key-value driver.
///
/// Implementations report I/O failures as [`TicketError::StorageUnavailable`]
/// and do not retry them.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Reads a document.
    async fn get(&self, key: &str) -> TicketResult<Option<VersionedDocument>>;

    /// Inserts a document if the key is free; returns false if it was taken.
    async fn insert(&self, key: &str, body: String) -> TicketResult<bool>;

    /// Replaces a document if its version still equals `expected_version`.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected_version: u64,
        body: String,
    ) -> TicketResult<SwapOutcome>;

    /// Removes a document, returning it if it existed.
    async fn remove(&self, key: &str) -> TicketResult<Option<VersionedDocument>>;

    /// Lists every key.
    async fn keys(&self) -> TicketResult<Vec<String>>;

    /// Removes every document, returning how many there were.
    async fn clear(&self) -> TicketResult<usize>;

    /// Consistency offered by the store.
    fn consistency(&self) -> ConsistencyModel {
        ConsistencyModel::Linearizable
    }
}

/// Document store kept in process memory.
///
/// Can be switched offline to exercise storage failure handling.
#[derive(Debug)]
pub struct InMemoryDocumentStore {
    documents: DashMap<String, VersionedDocument>,
    available: AtomicBool,
    consistency: ConsistencyModel,
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDocumentStore {
    /// Creates an empty, available, linearizable store.
    pub fn new() -> Self {
        Self::with_consistency(ConsistencyModel::Linearizable)
    }

    /// Creates an empty store advertising `consistency`.
    pub fn with_consistency(consistency: ConsistencyModel) -> Self {
        Self {
            documents: DashMap::new(),
            available: AtomicBool::new(true),
            consistency,
        }
    }

    /// Brings the store online or takes it offline.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of stored documents, ignoring availability.
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Returns true if no documents are stored.
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    fn check_available(&self) -> TicketResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TicketError::StorageUnavailable(
                "document store is offline".to_string(),
            ))
        }
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn get(&self, key: &str) -> TicketResult<Option<VersionedDocument>> {
        self.check_available()?;
        Ok(self.documents.get(key).map(|entry| entry.value().clone()))
    }

    async fn insert(&self, key: &str, body: String) -> TicketResult<bool> {
        self.check_available()?;
        match self.documents.entry(key.to_string()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(entry) => {
                entry.insert(VersionedDocument { version: 1, body });
                Ok(true)
            }
        }
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected_version: u64,
        body: String,
    ) -> TicketResult<SwapOutcome> {
        self.check_available()?;
        let Some(mut entry) = self.documents.get_mut(key) else {
            return Ok(SwapOutcome::Missing);
        };
        if entry.version != expected_version {
            return Ok(SwapOutcome::VersionMismatch);
        }
        entry.version += 1;
        entry.body = body;
        Ok(SwapOutcome::Swapped(entry.version))
    }

    async fn remove(&self, key: &str) -> TicketResult<Option<VersionedDocument>> {
        self.check_available()?;
        Ok(self.documents.remove(key).map(|(_, document)| document))
    }

    async fn keys(&self) -> TicketResult<Vec<String>> {
        self.check_available()?;
        Ok(self
            .documents
            .iter()
            .map(|entry| entry.key().clone())
            .collect())
    }

    async fn clear(&self) -> TicketResult<usize> {
        self.check_available()?;
        let removed = self.documents.len();
        self.documents.clear();
        Ok(removed)
    }

    fn consistency(&self) -> ConsistencyModel {
        self.consistency
    }
}

/// Ticket registry persisting JSON documents through a [`DocumentStore`].
pub struct DocumentTicketRegistry<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl<S: DocumentStore> DocumentTicketRegistry<S> {
    /// Creates a registry over `store`.
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        if store.consistency() == ConsistencyModel::Eventual {
            warn!("Document store is eventually consistent; single-use service tickets are best effort");
        }
        Self { store, clock }
    }

    /// Underlying store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    fn encode(ticket: &Ticket) -> TicketResult<String> {
        Ok(serde_json::to_string(ticket)?)
    }

    fn decode(document: &VersionedDocument) -> TicketResult<Ticket> {
        let mut ticket: Ticket = serde_json::from_str(&document.body)?;
        ticket.metadata_mut().set_version(document.version);
        Ok(ticket)
    }

    async fn load(&self, id: &TicketId) -> TicketResult<Option<Ticket>> {
        match self.store.get(id.as_str()).await? {
            Some(document) => Self::decode(&document).map(Some),
            None => Ok(None),
        }
    }

    async fn load_key(&self, key: String) -> TicketResult<Option<Ticket>> {
        self.load(&TicketId::new(key)).await
    }

    /// Lists `root` and everything it transitively issued, each ticket ahead
    /// of the granting ticket that issued it and `root` last. Nothing is
    /// removed, so an interrupted cascade can always be resumed from `root`.
    async fn collect_cascade(
        &self,
        root: &TicketId,
        visited: &mut HashSet<TicketId>,
    ) -> TicketResult<Vec<TicketId>> {
        let mut order = Vec::new();
        let mut pending = vec![(root.clone(), false)];

        while let Some((id, expanded)) = pending.pop() {
            if expanded {
                order.push(id);
                continue;
            }
            if !visited.insert(id.clone()) {
                continue;
            }
            let Some(document) = self.store.get(id.as_str()).await? else {
                continue;
            };
            let children = match Self::decode(&document) {
                Ok(Ticket::Granting(granting)) => granting.child_tickets().to_vec(),
                Ok(Ticket::Service(_)) => Vec::new(),
                Err(e) => {
                    warn!(ticket_id = %id, error = %e, "Undecodable ticket; its children are left for the sweeper");
                    Vec::new()
                }
            };
            pending.push((id, true));
            // Reversed so children are visited in issue order
            pending.extend(children.into_iter().rev().map(|child| (child, false)));
        }
        Ok(order)
    }

    async fn remove_cascading(&self, root: &TicketId) -> TicketResult<usize> {
        let mut visited = HashSet::new();
        let mut order = self.collect_cascade(root, &mut visited).await?;
        let mut removed = 0;
        let mut next = 0;

        while next < order.len() {
            let id = order[next].clone();
            next += 1;
            let Some(document) = self.store.remove(id.as_str()).await? else {
                continue;
            };
            removed += 1;

            // Children registered after the walk
            if let Ok(Ticket::Granting(granting)) = Self::decode(&document) {
                for child in granting.child_tickets() {
                    if !visited.contains(child) {
                        let late = self.collect_cascade(child, &mut visited).await?;
                        order.extend(late);
                    }
                }
            }
        }
        Ok(removed)
    }

    async fn expire(&self, id: &TicketId) -> TicketError {
        match self.remove_cascading(id).await {
            Ok(removed) => {
                debug!(ticket_id = %id, removed, "Removed expired ticket on read");
                TicketError::Expired(id.clone())
            }
            Err(e) => e,
        }
    }

    async fn swap(&self, ticket: &Ticket) -> TicketResult<SwapOutcome> {
        let body = Self::encode(ticket)?;
        self.store
            .compare_and_swap(ticket.id().as_str(), ticket.version(), body)
            .await
    }
}

impl<S> std::fmt::Debug for DocumentTicketRegistry<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentTicketRegistry")
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<S: DocumentStore + 'static> TicketRegistry for DocumentTicketRegistry<S> {
    async fn add_ticket(&self, ticket: Ticket) -> TicketResult<()> {
        let body = Self::encode(&ticket)?;
        if !self.store.insert(ticket.id().as_str(), body).await? {
            return Err(TicketError::AlreadyExists(ticket.id().clone()));
        }
        debug!(ticket_id = %ticket.id(), ticket_type = %ticket.ticket_type(), "Added ticket");
        Ok(())
    }

    async fn get_ticket(
        &self,
        id: &TicketId,
        expected: Option<TicketType>,
    ) -> TicketResult<Ticket> {
        let ticket = self
            .load(id)
            .await?
            .ok_or_else(|| TicketError::NotFound(id.clone()))?;

        ensure_type(&ticket, expected)?;

        if expires_on_read(&ticket, self.clock.now()) {
            return Err(self.expire(id).await);
        }
        Ok(ticket)
    }

    async fn update_ticket(&self, ticket: &Ticket) -> TicketResult<Ticket> {
        match self.swap(ticket).await? {
            SwapOutcome::Swapped(version) => {
                let mut updated = ticket.clone();
                updated.metadata_mut().set_version(version);
                Ok(updated)
            }
            SwapOutcome::VersionMismatch => {
                Err(TicketError::ConcurrentModification(ticket.id().clone()))
            }
            SwapOutcome::Missing => Err(TicketError::NotFound(ticket.id().clone())),
        }
    }

    async fn delete_ticket(&self, id: &TicketId) -> TicketResult<usize> {
        let removed = self.remove_cascading(id).await?;
        if removed > 0 {
            debug!(ticket_id = %id, removed, "Deleted ticket");
        }
        Ok(removed)
    }

    async fn delete_all(&self) -> TicketResult<usize> {
        self.store.clear().await
    }

    fn get_tickets(&self) -> TicketStream<'_> {
        stream::once(self.store.keys())
            .map(move |keys| match keys {
                Ok(keys) => stream::iter(keys)
                    .then(move |key| self.load_key(key))
                    .try_filter_map(|ticket| future::ready(Ok(ticket)))
                    .boxed(),
                Err(e) => stream::once(future::ready(Err(e))).boxed(),
            })
            .flatten()
            .boxed()
    }

    async fn consume_service_ticket(&self, id: &TicketId) -> TicketResult<ServiceTicket> {
        for _ in 0..MAX_SWAP_ATTEMPTS {
            let now = self.clock.now();
            let ticket = self
                .load(id)
                .await?
                .ok_or_else(|| TicketError::NotFound(id.clone()))?;

            let found = ticket.ticket_type();
            let Ticket::Service(mut service_ticket) = ticket else {
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
                return Err(self.expire(id).await);
            }

            service_ticket.consume(now);
            match self.swap(&Ticket::Service(service_ticket.clone())).await? {
                SwapOutcome::Swapped(version) => {
                    service_ticket.metadata_mut().set_version(version);
                    return Ok(service_ticket);
                }
                SwapOutcome::VersionMismatch => {
                    debug!(ticket_id = %id, "Lost compare-and-swap race, retrying");
                }
                SwapOutcome::Missing => return Err(TicketError::NotFound(id.clone())),
            }
        }
        Err(TicketError::ConcurrentModification(id.clone()))
    }

    async fn record_ticket_granting_use(
        &self,
        id: &TicketId,
        child: Option<&TicketId>,
    ) -> TicketResult<TicketGrantingTicket> {
        for _ in 0..MAX_SWAP_ATTEMPTS {
            let now = self.clock.now();
            let ticket = self
                .load(id)
                .await?
                .ok_or_else(|| TicketError::NotFound(id.clone()))?;

            let found = ticket.ticket_type();
            let Ticket::Granting(mut granting) = ticket else {
                return Err(TicketError::InvalidType {
                    id: id.clone(),
                    expected: TicketType::TicketGranting,
                    found,
                });
            };

            if granting.is_expired(now) {
                return Err(self.expire(id).await);
            }
            if granting.metadata().is_throttled(now) {
                return Err(TicketError::Throttled(id.clone()));
            }

            granting.metadata_mut().record_use(now);
            if let Some(child) = child {
                granting.add_child(child.clone());
            }
            match self.swap(&Ticket::Granting(granting.clone())).await? {
                SwapOutcome::Swapped(version) => {
                    granting.metadata_mut().set_version(version);
                    return Ok(granting);
                }
                SwapOutcome::VersionMismatch => {
                    debug!(ticket_id = %id, "Lost compare-and-swap race, retrying");
                }
                SwapOutcome::Missing => return Err(TicketError::NotFound(id.clone())),
            }
        }
        Err(TicketError::ConcurrentModification(id.clone()))
    }

    fn consistency(&self) -> ConsistencyModel {
        self.store.consistency()
    }
}
