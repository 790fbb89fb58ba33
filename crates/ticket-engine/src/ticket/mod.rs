//! Ticket model.
//!
//! Tickets reference each other only by [`TicketId`]: a granting ticket lists
//! the identifiers of the tickets it issued, and a service ticket records the
//! identifier of the granting ticket it came from. The registry is the only
//! owner of ticket storage, so there are no reference cycles to manage.

mod authentication;
mod id;

pub use authentication::{Authentication, Service};
pub use id::{TicketId, TicketType};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::expiration::{ExpirationPolicy, TicketUsage};

/// Observable lifecycle state of a stored ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketState {
    /// Usable.
    Valid,
    /// Service ticket that has already been validated.
    Consumed,
    /// Rejected by its expiration policy; awaiting removal.
    Expired,
}

impl TicketState {
    /// Returns true if the ticket can no longer be used.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TicketState::Valid)
    }
}

/// Fields shared by every ticket kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketMetadata {
    id: TicketId,
    created_at: DateTime<Utc>,
    last_used_at: DateTime<Utc>,
    #[serde(default)]
    previous_used_at: Option<DateTime<Utc>>,
    count_of_uses: u64,
    expiration_policy: ExpirationPolicy,
    /// Optimistic concurrency version, owned by the registry.
    #[serde(skip)]
    version: u64,
}

impl TicketMetadata {
    pub(crate) fn new(id: TicketId, policy: ExpirationPolicy, now: DateTime<Utc>) -> Self {
        Self {
            id,
            created_at: now,
            last_used_at: now,
            previous_used_at: None,
            count_of_uses: 0,
            expiration_policy: policy,
            version: 0,
        }
    }

    /// Ticket identifier.
    #[must_use]
    pub fn id(&self) -> &TicketId {
        &self.id
    }

    /// Creation time.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Time of the last successful use.
    #[must_use]
    pub fn last_used_at(&self) -> DateTime<Utc> {
        self.last_used_at
    }

    /// Time of the use before the last one.
    #[must_use]
    pub fn previous_used_at(&self) -> Option<DateTime<Utc>> {
        self.previous_used_at
    }

    /// Number of successful uses.
    #[must_use]
    pub fn count_of_uses(&self) -> u64 {
        self.count_of_uses
    }

    /// Policy attached at creation.
    #[must_use]
    pub fn expiration_policy(&self) -> &ExpirationPolicy {
        &self.expiration_policy
    }

    /// Registry version of this copy.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Usage counters for policy evaluation.
    #[must_use]
    pub fn usage(&self) -> TicketUsage {
        TicketUsage {
            created_at: self.created_at,
            last_used_at: self.last_used_at,
            count_of_uses: self.count_of_uses,
        }
    }

    /// Evaluates the expiration policy at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration_policy.is_expired(&self.usage(), now)
    }

    /// Evaluates the throttle of the expiration policy at `now`.
    #[must_use]
    pub fn is_throttled(&self, now: DateTime<Utc>) -> bool {
        self.expiration_policy.is_throttled(&self.usage(), now)
    }

    pub(crate) fn record_use(&mut self, now: DateTime<Utc>) {
        self.previous_used_at = Some(self.last_used_at);
        self.last_used_at = now;
        self.count_of_uses += 1;
    }

    pub(crate) fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}

/// Long-lived credential representing an SSO session, or a proxy-granting
/// ticket when minted on behalf of a proxying service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketGrantingTicket {
    metadata: TicketMetadata,
    authentication: Authentication,
    /// Identifiers of every ticket issued from this one, in issue order.
    #[serde(default)]
    child_tickets: Vec<TicketId>,
    /// Granting ticket this proxy-granting ticket was chained from.
    #[serde(default)]
    parent: Option<TicketId>,
    /// Proxy services from the root session down to this ticket.
    #[serde(default)]
    proxy_chain: Vec<Service>,
}

impl TicketGrantingTicket {
    pub(crate) fn new(
        id: TicketId,
        authentication: Authentication,
        policy: ExpirationPolicy,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            metadata: TicketMetadata::new(id, policy, now),
            authentication,
            child_tickets: Vec::new(),
            parent: None,
            proxy_chain: Vec::new(),
        }
    }

    pub(crate) fn new_proxy(
        id: TicketId,
        parent: &TicketGrantingTicket,
        proxied_by: Service,
        policy: ExpirationPolicy,
        now: DateTime<Utc>,
    ) -> Self {
        let mut proxy_chain = parent.proxy_chain.clone();
        proxy_chain.push(proxied_by);
        Self {
            metadata: TicketMetadata::new(id, policy, now),
            authentication: parent.authentication.clone(),
            child_tickets: Vec::new(),
            parent: Some(parent.id().clone()),
            proxy_chain,
        }
    }

    /// Shared ticket fields.
    #[must_use]
    pub fn metadata(&self) -> &TicketMetadata {
        &self.metadata
    }

    /// Ticket identifier.
    #[must_use]
    pub fn id(&self) -> &TicketId {
        self.metadata.id()
    }

    /// TGT or PGT.
    #[must_use]
    pub fn ticket_type(&self) -> TicketType {
        if self.proxy_chain.is_empty() {
            TicketType::TicketGranting
        } else {
            TicketType::ProxyGranting
        }
    }

    /// Authentication of the session this ticket belongs to.
    #[must_use]
    pub fn authentication(&self) -> &Authentication {
        &self.authentication
    }

    /// Identifiers of the tickets issued from this one.
    #[must_use]
    pub fn child_tickets(&self) -> &[TicketId] {
        &self.child_tickets
    }

    /// Granting ticket this one was chained from, for proxy-granting tickets.
    #[must_use]
    pub fn parent(&self) -> Option<&TicketId> {
        self.parent.as_ref()
    }

    /// The proxying service this ticket was minted for.
    #[must_use]
    pub fn proxied_by(&self) -> Option<&Service> {
        self.proxy_chain.last()
    }

    /// Proxy services from the root session down to this ticket.
    #[must_use]
    pub fn proxy_chain(&self) -> &[Service] {
        &self.proxy_chain
    }

    /// Number of proxy hops between the root session and this ticket.
    #[must_use]
    pub fn proxy_depth(&self) -> usize {
        self.proxy_chain.len()
    }

    /// Returns true if this ticket has never been used to issue another one.
    #[must_use]
    pub fn is_fresh(&self) -> bool {
        self.metadata.count_of_uses() == 0
    }

    /// Evaluates the expiration policy at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.metadata.is_expired(now)
    }

    pub(crate) fn add_child(&mut self, child: TicketId) {
        if !self.child_tickets.contains(&child) {
            self.child_tickets.push(child);
        }
    }

    pub(crate) fn metadata_mut(&mut self) -> &mut TicketMetadata {
        &mut self.metadata
    }
}

/// Single-use credential scoped to one service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceTicket {
    metadata: TicketMetadata,
    service: Service,
    granting_ticket: TicketId,
    #[serde(default)]
    consumed: bool,
    from_new_login: bool,
    /// Root session authentication as it stood when the ticket was issued.
    authentication: Authentication,
    #[serde(default)]
    proxy_chain: Vec<Service>,
}

impl ServiceTicket {
    pub(crate) fn new(
        id: TicketId,
        parent: &TicketGrantingTicket,
        service: Service,
        policy: ExpirationPolicy,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            metadata: TicketMetadata::new(id, policy, now),
            service,
            granting_ticket: parent.id().clone(),
            consumed: false,
            from_new_login: parent.is_fresh(),
            authentication: parent.authentication().clone(),
            proxy_chain: parent.proxy_chain().to_vec(),
        }
    }

    /// Shared ticket fields.
    #[must_use]
    pub fn metadata(&self) -> &TicketMetadata {
        &self.metadata
    }

    /// Ticket identifier.
    #[must_use]
    pub fn id(&self) -> &TicketId {
        self.metadata.id()
    }

    /// ST or PT.
    #[must_use]
    pub fn ticket_type(&self) -> TicketType {
        if self.proxy_chain.is_empty() {
            TicketType::Service
        } else {
            TicketType::Proxy
        }
    }

    /// Service the ticket was issued for.
    #[must_use]
    pub fn service(&self) -> &Service {
        &self.service
    }

    /// Granting ticket that issued this one.
    #[must_use]
    pub fn granting_ticket(&self) -> &TicketId {
        &self.granting_ticket
    }

    /// Returns true once the ticket has been validated.
    #[must_use]
    pub fn is_consumed(&self) -> bool {
        self.consumed
    }

    /// Returns true if this was the first ticket issued by its granting ticket.
    #[must_use]
    pub fn is_from_new_login(&self) -> bool {
        self.from_new_login
    }

    /// Root session authentication.
    #[must_use]
    pub fn authentication(&self) -> &Authentication {
        &self.authentication
    }

    /// Proxy services the ticket was obtained through.
    #[must_use]
    pub fn proxy_chain(&self) -> &[Service] {
        &self.proxy_chain
    }

    /// Evaluates the expiration policy at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.metadata.is_expired(now)
    }

    pub(crate) fn set_from_new_login(&mut self, from_new_login: bool) {
        self.from_new_login = from_new_login;
    }

    pub(crate) fn consume(&mut self, now: DateTime<Utc>) {
        self.metadata.record_use(now);
        self.consumed = true;
    }

    pub(crate) fn metadata_mut(&mut self) -> &mut TicketMetadata {
        &mut self.metadata
    }
}

/// Any ticket held by a registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Ticket {
    /// TGT or PGT.
    Granting(TicketGrantingTicket),
    /// ST or PT.
    Service(ServiceTicket),
}

impl Ticket {
    /// Shared ticket fields.
    #[must_use]
    pub fn metadata(&self) -> &TicketMetadata {
        match self {
            Ticket::Granting(ticket) => ticket.metadata(),
            Ticket::Service(ticket) => ticket.metadata(),
        }
    }

    pub(crate) fn metadata_mut(&mut self) -> &mut TicketMetadata {
        match self {
            Ticket::Granting(ticket) => &mut ticket.metadata,
            Ticket::Service(ticket) => &mut ticket.metadata,
        }
    }

    /// Ticket identifier.
    #[must_use]
    pub fn id(&self) -> &TicketId {
        self.metadata().id()
    }

    /// Concrete kind of the ticket.
    #[must_use]
    pub fn ticket_type(&self) -> TicketType {
        match self {
            Ticket::Granting(ticket) => ticket.ticket_type(),
            Ticket::Service(ticket) => ticket.ticket_type(),
        }
    }

    /// Registry version of this copy.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.metadata().version()
    }

    /// Evaluates the expiration policy at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.metadata().is_expired(now)
    }

    /// Returns true for a service ticket that has already been validated.
    #[must_use]
    pub fn is_consumed(&self) -> bool {
        matches!(self, Ticket::Service(ticket) if ticket.is_consumed())
    }

    /// Lifecycle state at `now`.
    #[must_use]
    pub fn state(&self, now: DateTime<Utc>) -> TicketState {
        match self {
            Ticket::Service(ticket) if ticket.is_consumed() => TicketState::Consumed,
            _ if self.is_expired(now) => TicketState::Expired,
            _ => TicketState::Valid,
        }
    }

    /// Borrows the ticket as a granting ticket.
    #[must_use]
    pub fn as_granting(&self) -> Option<&TicketGrantingTicket> {
        match self {
            Ticket::Granting(ticket) => Some(ticket),
            Ticket::Service(_) => None,
        }
    }

    /// Borrows the ticket as a service ticket.
    #[must_use]
    pub fn as_service(&self) -> Option<&ServiceTicket> {
        match self {
            Ticket::Service(ticket) => Some(ticket),
            Ticket::Granting(_) => None,
        }
    }

    /// Converts into a granting ticket.
    #[must_use]
    pub fn into_granting(self) -> Option<TicketGrantingTicket> {
        match self {
            Ticket::Granting(ticket) => Some(ticket),
            Ticket::Service(_) => None,
        }
    }

    /// Converts into a service ticket.
    #[must_use]
    pub fn into_service(self) -> Option<ServiceTicket> {
        match self {
            Ticket::Service(ticket) => Some(ticket),
            Ticket::Granting(_) => None,
        }
    }

    /// Principal of the session the ticket belongs to.
    #[must_use]
    pub fn principal(&self) -> &str {
        match self {
            Ticket::Granting(ticket) => &ticket.authentication().principal,
            Ticket::Service(ticket) => &ticket.authentication().principal,
        }
    }
}

impl From<TicketGrantingTicket> for Ticket {
    fn from(ticket: TicketGrantingTicket) -> Self {
        Ticket::Granting(ticket)
    }
}

impl From<ServiceTicket> for Ticket {
    fn from(ticket: ServiceTicket) -> Self {
        Ticket::Service(ticket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn tgt(now: DateTime<Utc>) -> TicketGrantingTicket {
        TicketGrantingTicket::new(
            TicketId::from("TGT-1-root"),
            Authentication::at("alice", now),
            ExpirationPolicy::default_ticket_granting(),
            now,
        )
    }

    #[test]
    fn test_granting_ticket_children_are_an_ordered_set() {
        let mut ticket = tgt(Utc::now());
        ticket.add_child(TicketId::from("ST-2-a"));
        ticket.add_child(TicketId::from("ST-3-b"));
        ticket.add_child(TicketId::from("ST-2-a"));

        assert_eq!(
            ticket.child_tickets(),
            &[TicketId::from("ST-2-a"), TicketId::from("ST-3-b")]
        );
    }

    #[test]
    fn test_proxy_granting_ticket_chain() {
        let now = Utc::now();
        let root = tgt(now);
        let pgt = TicketGrantingTicket::new_proxy(
            TicketId::from("PGT-2-p"),
            &root,
            Service::from("https://proxy.example/"),
            ExpirationPolicy::default_ticket_granting(),
            now,
        );

        assert_eq!(pgt.ticket_type(), TicketType::ProxyGranting);
        assert_eq!(pgt.parent(), Some(root.id()));
        assert_eq!(pgt.proxy_depth(), 1);
        assert_eq!(pgt.authentication().principal, "alice");
        assert_eq!(
            pgt.proxied_by(),
            Some(&Service::from("https://proxy.example/"))
        );
    }

    #[test]
    fn test_service_ticket_from_new_login() {
        let now = Utc::now();
        let mut root = tgt(now);
        let first = ServiceTicket::new(
            TicketId::from("ST-2-a"),
            &root,
            Service::from("https://app.example/"),
            ExpirationPolicy::default_service(),
            now,
        );
        root.metadata_mut().record_use(now);
        let second = ServiceTicket::new(
            TicketId::from("ST-3-b"),
            &root,
            Service::from("https://app.example/"),
            ExpirationPolicy::default_service(),
            now,
        );

        assert!(first.is_from_new_login());
        assert!(!second.is_from_new_login());
        assert_eq!(first.ticket_type(), TicketType::Service);
    }

    #[test]
    fn test_ticket_state_transitions() {
        let now = Utc::now();
        let root = tgt(now);
        let mut st = ServiceTicket::new(
            TicketId::from("ST-2-a"),
            &root,
            Service::from("https://app.example/"),
            ExpirationPolicy::default_service(),
            now,
        );

        assert_eq!(Ticket::from(st.clone()).state(now), TicketState::Valid);
        assert_eq!(
            Ticket::from(st.clone()).state(now + Duration::seconds(11)),
            TicketState::Expired
        );

        st.consume(now);
        assert_eq!(Ticket::from(st.clone()).state(now), TicketState::Consumed);
        assert_eq!(st.metadata().count_of_uses(), 1);
        assert!(st.is_expired(now));
    }

    #[test]
    fn test_ticket_json_excludes_version() {
        let now = Utc::now();
        let mut ticket = Ticket::from(tgt(now));
        ticket.metadata_mut().set_version(7);

        let json = serde_json::to_string(&ticket).unwrap();
        assert!(json.contains("\"kind\":\"granting\""));
        assert!(!json.contains("version"));

        let back: Ticket = serde_json::from_str(&json).unwrap();
        assert_eq!(back.version(), 0);
        assert_eq!(back.id(), ticket.id());
    }
}
