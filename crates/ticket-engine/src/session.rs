//! SSO session manager.
//!
//! The only surface the protocol layer talks to. It composes the
//! [`TicketFactory`] with a [`TicketRegistry`] and never touches storage
//! directly; every per-ticket atomicity guarantee comes from the registry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{TicketError, TicketResult};
use crate::factory::TicketFactory;
use crate::registry::TicketRegistry;
use crate::ticket::{
    Authentication, Service, ServiceTicket, Ticket, TicketGrantingTicket, TicketId, TicketType,
};

/// Outcome of a successful service ticket validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assertion {
    /// Authentication of the root session.
    pub authentication: Authentication,
    /// Service the ticket was validated for.
    pub service: Service,
    /// True if the ticket was the first one issued by its granting ticket.
    pub from_new_login: bool,
    /// Proxy services the ticket was obtained through, outermost first.
    pub proxy_chain: Vec<Service>,
    /// When validation succeeded.
    pub validated_at: DateTime<Utc>,
}

impl Assertion {
    fn from_ticket(ticket: &ServiceTicket, validated_at: DateTime<Utc>) -> Self {
        Self {
            authentication: ticket.authentication().clone(),
            service: ticket.service().clone(),
            from_new_login: ticket.is_from_new_login(),
            proxy_chain: ticket.proxy_chain().to_vec(),
            validated_at,
        }
    }

    /// Authenticated principal.
    #[must_use]
    pub fn principal(&self) -> &str {
        &self.authentication.principal
    }

    /// Returns true if the ticket was obtained through at least one proxy.
    #[must_use]
    pub fn is_proxied(&self) -> bool {
        !self.proxy_chain.is_empty()
    }
}

/// Outcome of a validation that also granted a proxy-granting ticket.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyValidation {
    /// Assertion for the validated ticket.
    pub assertion: Assertion,
    /// Proxy-granting ticket minted for the proxying service.
    pub proxy_granting_ticket: TicketGrantingTicket,
}

/// Grants, validates and destroys tickets on behalf of the protocol layer.
#[derive(Clone)]
pub struct SsoSessionManager {
    registry: Arc<dyn TicketRegistry>,
    factory: Arc<TicketFactory>,
}

impl SsoSessionManager {
    /// Creates a manager over an injected registry.
    pub fn new(registry: Arc<dyn TicketRegistry>, factory: TicketFactory) -> Self {
        Self {
            registry,
            factory: Arc::new(factory),
        }
    }

    /// Registry backing this manager.
    pub fn registry(&self) -> &Arc<dyn TicketRegistry> {
        &self.registry
    }

    /// Factory used to mint tickets.
    pub fn factory(&self) -> &TicketFactory {
        &self.factory
    }

    /// Establishes an SSO session for a successful login.
    pub async fn grant_ticket_granting_ticket(
        &self,
        authentication: Authentication,
    ) -> TicketResult<TicketGrantingTicket> {
        let ticket = self.factory.create_ticket_granting_ticket(authentication)?;
        self.registry.add_ticket(ticket.clone().into()).await?;

        info!(principal = %ticket.authentication().principal, "SSO session established");
        debug!(ticket_id = %ticket.id(), "Granted ticket-granting ticket");
        Ok(ticket)
    }

    /// Issues a service ticket (or a proxy ticket, for a proxy-granting
    /// ticket) for `service`.
    pub async fn grant_service_ticket(
        &self,
        granting_ticket_id: &TicketId,
        service: Service,
    ) -> TicketResult<ServiceTicket> {
        let granting = self.registry.get_granting_ticket(granting_ticket_id).await?;
        self.ensure_chain_usable(granting.parent().cloned()).await?;
        let mut service_ticket = self.factory.create_service_ticket(&granting, service)?;

        let uses = self
            .register_child(granting_ticket_id, service_ticket.clone().into())
            .await?;
        let from_new_login = uses == 1;
        if service_ticket.is_from_new_login() != from_new_login {
            // Another grant raced this one on the same session
            let mut stored = self
                .registry
                .get_service_ticket(service_ticket.id())
                .await?;
            stored.set_from_new_login(from_new_login);
            let updated = self
                .registry
                .update_ticket(&Ticket::Service(stored))
                .await?;
            service_ticket = updated.into_service().ok_or_else(|| {
                TicketError::InvalidRequest("service ticket changed kind on update".to_string())
            })?;
        }

        debug!(
            ticket_id = %service_ticket.id(),
            granting_ticket_id = %granting_ticket_id,
            service = %service_ticket.service(),
            "Granted service ticket"
        );
        Ok(service_ticket)
    }

    /// Validates a service ticket presented by `service`.
    ///
    /// The ticket is consumed before the service is compared, so a ticket
    /// presented to the wrong service is burned.
    pub async fn validate_service_ticket(
        &self,
        service_ticket_id: &TicketId,
        service: &Service,
    ) -> TicketResult<Assertion> {
        let ticket = self.consume(service_ticket_id, service).await?;
        Ok(Assertion::from_ticket(&ticket, self.factory.clock().now()))
    }

    /// Validates a service ticket and grants a proxy-granting ticket to
    /// `proxy_service`, chained to the ticket's granting ticket.
    ///
    /// Fails with [`TicketError::InvalidRequest`] when the chain would exceed
    /// the configured proxy depth. The service ticket stays consumed in that
    /// case.
    pub async fn validate_service_ticket_for_proxy(
        &self,
        service_ticket_id: &TicketId,
        service: &Service,
        proxy_service: Service,
    ) -> TicketResult<ProxyValidation> {
        let ticket = self.consume(service_ticket_id, service).await?;
        let assertion = Assertion::from_ticket(&ticket, self.factory.clock().now());

        let parent_id = ticket.granting_ticket();
        let parent = self.registry.get_granting_ticket(parent_id).await?;
        let proxy_granting_ticket = self
            .factory
            .create_proxy_granting_ticket(&parent, proxy_service)?;

        self.register_child(parent_id, proxy_granting_ticket.clone().into())
            .await?;

        info!(
            principal = %assertion.principal(),
            proxy_depth = proxy_granting_ticket.proxy_depth(),
            "Granted proxy-granting ticket"
        );
        Ok(ProxyValidation {
            assertion,
            proxy_granting_ticket,
        })
    }

    /// Logs a session out, removing the granting ticket and everything it
    /// issued. Returns the number of tickets removed.
    ///
    /// Destroying an unknown or already expired session is not an error. A
    /// session found expired is removed by the lookup itself, together with
    /// everything it issued, and reported as zero removals.
    pub async fn destroy_ticket_granting_ticket(
        &self,
        granting_ticket_id: &TicketId,
    ) -> TicketResult<usize> {
        match self
            .registry
            .get_ticket(granting_ticket_id, Some(TicketType::TicketGranting))
            .await
        {
            Ok(_) => {}
            Err(TicketError::NotFound(_)) => return Ok(0),
            Err(TicketError::Expired(_)) => {
                debug!(ticket_id = %granting_ticket_id, "Session had already expired");
                return Ok(0);
            }
            Err(e) => return Err(e),
        }

        let removed = self.registry.delete_ticket(granting_ticket_id).await?;
        info!(removed, "SSO session destroyed");
        Ok(removed)
    }

    /// Live root sessions of `principal`.
    pub async fn get_sessions_for_principal(
        &self,
        principal: &str,
    ) -> TicketResult<Vec<TicketGrantingTicket>> {
        let now = self.factory.clock().now();
        let sessions = self.registry.get_sessions_for_principal(principal).await?;
        Ok(sessions
            .into_iter()
            .filter(|session| !session.is_expired(now))
            .collect())
    }

    /// Logs `principal` out everywhere. Returns the number of tickets removed.
    pub async fn destroy_sessions_for_principal(&self, principal: &str) -> TicketResult<usize> {
        let sessions = self.registry.get_sessions_for_principal(principal).await?;
        let mut removed = 0;
        for session in &sessions {
            removed += self.destroy_ticket_granting_ticket(session.id()).await?;
        }
        info!(principal, sessions = sessions.len(), removed, "Destroyed all sessions");
        Ok(removed)
    }

    async fn consume(
        &self,
        service_ticket_id: &TicketId,
        service: &Service,
    ) -> TicketResult<ServiceTicket> {
        let ticket = self
            .registry
            .consume_service_ticket(service_ticket_id)
            .await?;

        match self
            .ensure_chain_usable(Some(ticket.granting_ticket().clone()))
            .await
        {
            Ok(()) => {}
            Err(TicketError::Expired(_) | TicketError::NotFound(_)) => {
                // Expiry cascades from the ancestor; a vanished ancestor leaves
                // nothing behind to remove this ticket
                self.registry.delete_ticket(service_ticket_id).await?;
                debug!(ticket_id = %service_ticket_id, "Session behind service ticket is gone");
                return Err(TicketError::Expired(service_ticket_id.clone()));
            }
            Err(e) => return Err(e),
        }

        if !ticket.service().matches(service) {
            warn!(
                issued_for = %ticket.service(),
                presented = %service,
                "Service ticket presented by a different service"
            );
            return Err(TicketError::ServiceMismatch {
                id: service_ticket_id.clone(),
                issued_for: ticket.service().to_string(),
                presented: service.to_string(),
            });
        }
        Ok(ticket)
    }

    /// Checks every granting ticket from `next` up to the root session.
    async fn ensure_chain_usable(&self, mut next: Option<TicketId>) -> TicketResult<()> {
        while let Some(id) = next {
            next = self.registry.get_granting_ticket(&id).await?.parent().cloned();
        }
        Ok(())
    }

    /// Stores `child` and records it on its granting ticket, returning the
    /// granting ticket's use count after this use. The child is removed again
    /// if the granting ticket refuses the use.
    async fn register_child(&self, parent_id: &TicketId, child: Ticket) -> TicketResult<u64> {
        let child_id = child.id().clone();
        self.registry.add_ticket(child).await?;

        match self
            .registry
            .record_ticket_granting_use(parent_id, Some(&child_id))
            .await
        {
            Ok(parent) => Ok(parent.metadata().count_of_uses()),
            Err(e) => {
                if let Err(cleanup) = self.registry.delete_ticket(&child_id).await {
                    warn!(ticket_id = %child_id, error = %cleanup, "Failed to remove orphaned ticket");
                }
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for SsoSessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SsoSessionManager")
            .field("factory", &self.factory)
            .field("consistency", &self.registry.consistency())
            .finish()
    }
}
