//! Ticket factory.
//!
//! The only place tickets are constructed. The factory assigns identifiers and
//! expiration policies and checks that the requested chain is allowed; it
//! does not persist anything.

use std::sync::Arc;

use crate::clock::Clock;
use crate::config::{ExpirationPolicies, TicketEngineConfig};
use crate::error::{TicketError, TicketResult};
use crate::id_generator::{TicketIdGenerator, UniqueTicketIdGenerator};
use crate::ticket::{
    Authentication, Service, ServiceTicket, Ticket, TicketGrantingTicket, TicketType,
};

/// Parameters for minting a ticket.
#[derive(Debug, Clone)]
pub struct TicketRequest<'a> {
    /// Kind of ticket to mint.
    pub kind: TicketType,
    /// Granting ticket the new ticket is chained from.
    pub parent: Option<&'a TicketGrantingTicket>,
    /// Target service (ST/PT) or proxying service (PGT).
    pub service: Option<Service>,
    /// Login outcome, for a new session.
    pub authentication: Option<Authentication>,
}

impl<'a> TicketRequest<'a> {
    /// Request for a new SSO session.
    #[must_use]
    pub fn ticket_granting(authentication: Authentication) -> Self {
        Self {
            kind: TicketType::TicketGranting,
            parent: None,
            service: None,
            authentication: Some(authentication),
        }
    }

    /// Request for a proxy-granting ticket on behalf of `proxied_by`.
    #[must_use]
    pub fn proxy_granting(parent: &'a TicketGrantingTicket, proxied_by: Service) -> Self {
        Self {
            kind: TicketType::ProxyGranting,
            parent: Some(parent),
            service: Some(proxied_by),
            authentication: None,
        }
    }

    /// Request for a service ticket (or proxy ticket, when `parent` is a PGT).
    #[must_use]
    pub fn service(parent: &'a TicketGrantingTicket, service: Service) -> Self {
        let kind = match parent.ticket_type() {
            TicketType::ProxyGranting => TicketType::Proxy,
            _ => TicketType::Service,
        };
        Self {
            kind,
            parent: Some(parent),
            service: Some(service),
            authentication: None,
        }
    }
}

/// Builds tickets with identifiers and policies attached.
#[derive(Debug)]
pub struct TicketFactory {
    id_generator: Arc<dyn TicketIdGenerator>,
    policies: ExpirationPolicies,
    max_proxy_depth: usize,
    clock: Arc<dyn Clock>,
}

impl TicketFactory {
    /// Creates a factory using the default identifier generator.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the identifier settings are invalid.
    pub fn new(config: &TicketEngineConfig, clock: Arc<dyn Clock>) -> TicketResult<Self> {
        let id_generator =
            UniqueTicketIdGenerator::new(config.id_random_length, config.node_suffix.clone())?;
        Ok(Self::with_id_generator(config, Arc::new(id_generator), clock))
    }

    /// Creates a factory with a custom identifier generator.
    #[must_use]
    pub fn with_id_generator(
        config: &TicketEngineConfig,
        id_generator: Arc<dyn TicketIdGenerator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            id_generator,
            policies: config.expiration.clone(),
            max_proxy_depth: config.max_proxy_depth,
            clock,
        }
    }

    /// Maximum number of proxy hops below a root session.
    #[must_use]
    pub fn max_proxy_depth(&self) -> usize {
        self.max_proxy_depth
    }

    /// Time source stamped on minted tickets.
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Mints a ticket of any kind.
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::InvalidRequest`] if a required field is missing,
    /// the parent is expired or of the wrong kind, or the proxy chain would
    /// exceed the maximum depth.
    pub fn create(&self, request: TicketRequest<'_>) -> TicketResult<Ticket> {
        match request.kind {
            TicketType::TicketGranting => {
                if request.parent.is_some() {
                    return Err(TicketError::InvalidRequest(
                        "a ticket-granting ticket cannot be chained to a parent".to_string(),
                    ));
                }
                let authentication = request.authentication.ok_or_else(|| {
                    TicketError::InvalidRequest(
                        "a ticket-granting ticket requires an authentication".to_string(),
                    )
                })?;
                self.create_ticket_granting_ticket(authentication)
                    .map(Ticket::from)
            }
            TicketType::ProxyGranting => {
                let parent = require_parent(&request)?;
                let proxied_by = require_service(&request)?;
                self.create_proxy_granting_ticket(parent, proxied_by)
                    .map(Ticket::from)
            }
            TicketType::Service | TicketType::Proxy => {
                let parent = require_parent(&request)?;
                let expected_kind = match parent.ticket_type() {
                    TicketType::ProxyGranting => TicketType::Proxy,
                    _ => TicketType::Service,
                };
                if request.kind != expected_kind {
                    return Err(TicketError::InvalidRequest(format!(
                        "{} tickets cannot be issued from a {} ticket",
                        request.kind,
                        parent.ticket_type()
                    )));
                }
                let service = require_service(&request)?;
                self.create_service_ticket(parent, service).map(Ticket::from)
            }
        }
    }

    /// Mints a ticket-granting ticket for a fresh login.
    pub fn create_ticket_granting_ticket(
        &self,
        authentication: Authentication,
    ) -> TicketResult<TicketGrantingTicket> {
        let id = self.id_generator.new_ticket_id(TicketType::TicketGranting)?;
        Ok(TicketGrantingTicket::new(
            id,
            authentication,
            self.policies.ticket_granting_ticket.clone(),
            self.clock.now(),
        ))
    }

    /// Mints a proxy-granting ticket chained to `parent`.
    pub fn create_proxy_granting_ticket(
        &self,
        parent: &TicketGrantingTicket,
        proxied_by: Service,
    ) -> TicketResult<TicketGrantingTicket> {
        let now = self.clock.now();
        ensure_parent_usable(parent, now)?;

        let depth = parent.proxy_depth() + 1;
        if depth > self.max_proxy_depth {
            return Err(TicketError::InvalidRequest(format!(
                "proxy chain depth {depth} exceeds the maximum of {}",
                self.max_proxy_depth
            )));
        }

        let id = self.id_generator.new_ticket_id(TicketType::ProxyGranting)?;
        Ok(TicketGrantingTicket::new_proxy(
            id,
            parent,
            proxied_by,
            self.policies.proxy_granting_ticket.clone(),
            now,
        ))
    }

    /// Mints a service ticket, or a proxy ticket when `parent` is a PGT.
    pub fn create_service_ticket(
        &self,
        parent: &TicketGrantingTicket,
        service: Service,
    ) -> TicketResult<ServiceTicket> {
        let now = self.clock.now();
        ensure_parent_usable(parent, now)?;

        let (kind, policy) = match parent.ticket_type() {
            TicketType::ProxyGranting => (TicketType::Proxy, &self.policies.proxy_ticket),
            _ => (TicketType::Service, &self.policies.service_ticket),
        };
        let id = self.id_generator.new_ticket_id(kind)?;
        Ok(ServiceTicket::new(id, parent, service, policy.clone(), now))
    }
}

fn require_parent<'a>(request: &TicketRequest<'a>) -> TicketResult<&'a TicketGrantingTicket> {
    request.parent.ok_or_else(|| {
        TicketError::InvalidRequest(format!(
            "{} tickets require a parent ticket-granting ticket",
            request.kind
        ))
    })
}

fn require_service(request: &TicketRequest<'_>) -> TicketResult<Service> {
    request.service.clone().ok_or_else(|| {
        TicketError::InvalidRequest(format!("{} tickets require a service", request.kind))
    })
}

fn ensure_parent_usable(
    parent: &TicketGrantingTicket,
    now: chrono::DateTime<chrono::Utc>,
) -> TicketResult<()> {
    if parent.is_expired(now) {
        return Err(TicketError::InvalidRequest(format!(
            "parent ticket {} is expired",
            parent.id()
        )));
    }
    Ok(())
}
