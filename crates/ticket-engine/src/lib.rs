//! Single sign-on ticket lifecycle engine
//!
//! This crate manages the credentials behind an SSO server:
//! - Ticket-granting tickets representing authenticated sessions
//! - Single-use service tickets scoped to one application
//! - Proxy-granting and proxy tickets for delegated access
//! - Expiration policies evaluated against an injected clock
//! - Pluggable registries with per-ticket atomicity and cascading revocation
//! - A background sweeper removing tickets that can no longer be used
//!
//! The protocol layer talks to [`SsoSessionManager`] only.

#![warn(missing_docs)]

pub mod clock;
pub mod config;
pub mod error;
pub mod expiration;
pub mod factory;
pub mod id_generator;
pub mod registry;
pub mod session;
pub mod sweeper;
pub mod telemetry;
pub mod ticket;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ExpirationPolicies, SweeperSettings, TicketEngineConfig};
pub use error::{TicketError, TicketResult};
pub use expiration::{ExpirationPolicy, TicketUsage};
pub use factory::{TicketFactory, TicketRequest};
pub use id_generator::{TicketIdGenerator, UniqueTicketIdGenerator};
pub use registry::{
    ConsistencyModel, DefaultTicketRegistry, DocumentStore, DocumentTicketRegistry,
    InMemoryDocumentStore, TicketRegistry,
};
pub use session::{Assertion, ProxyValidation, SsoSessionManager};
pub use sweeper::{SweepStats, TicketSweeper, TicketSweeperHandle};
pub use ticket::{
    Authentication, Service, ServiceTicket, Ticket, TicketGrantingTicket, TicketId, TicketState,
    TicketType,
};
