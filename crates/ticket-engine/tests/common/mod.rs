//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use horizon_ticket_engine::{
    Clock, DefaultTicketRegistry, DocumentTicketRegistry, InMemoryDocumentStore, ManualClock,
    SsoSessionManager, TicketEngineConfig, TicketFactory, TicketIdGenerator, TicketRegistry,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Memory,
    Document,
}

pub const BACKENDS: [Backend; 2] = [Backend::Memory, Backend::Document];

pub struct Harness {
    pub backend: Backend,
    pub manager: SsoSessionManager,
    pub registry: Arc<dyn TicketRegistry>,
    pub clock: Arc<ManualClock>,
    pub store: Option<Arc<InMemoryDocumentStore>>,
}

fn registry_for(
    backend: Backend,
    clock: Arc<dyn Clock>,
) -> (Arc<dyn TicketRegistry>, Option<Arc<InMemoryDocumentStore>>) {
    match backend {
        Backend::Memory => (Arc::new(DefaultTicketRegistry::new(clock)), None),
        Backend::Document => {
            let store = Arc::new(InMemoryDocumentStore::new());
            (
                Arc::new(DocumentTicketRegistry::new(store.clone(), clock)),
                Some(store),
            )
        }
    }
}

pub fn harness(backend: Backend) -> Harness {
    harness_with_config(backend, TicketEngineConfig::default())
}

pub fn harness_with_config(backend: Backend, config: TicketEngineConfig) -> Harness {
    let clock = Arc::new(ManualClock::starting_now());
    let (registry, store) = registry_for(backend, clock.clone());
    let factory = TicketFactory::new(&config, clock.clone()).expect("valid test config");
    Harness {
        backend,
        manager: SsoSessionManager::new(registry.clone(), factory),
        registry,
        clock,
        store,
    }
}

pub fn harness_with_generator(
    backend: Backend,
    generator: Arc<dyn TicketIdGenerator>,
) -> Harness {
    let clock = Arc::new(ManualClock::starting_now());
    let (registry, store) = registry_for(backend, clock.clone());
    let factory =
        TicketFactory::with_id_generator(&TicketEngineConfig::default(), generator, clock.clone());
    Harness {
        backend,
        manager: SsoSessionManager::new(registry.clone(), factory),
        registry,
        clock,
        store,
    }
}
