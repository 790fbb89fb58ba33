use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use horizon_ticket_engine::{
    Authentication, Clock, DefaultTicketRegistry, DocumentTicketRegistry, ExpirationPolicy,
    InMemoryDocumentStore, Service, SsoSessionManager, SweeperSettings, SystemClock,
    TicketEngineConfig, TicketFactory, TicketIdGenerator, TicketRegistry, TicketSweeper,
    TicketType, TicketUsage, UniqueTicketIdGenerator,
};
use std::sync::Arc;
use tokio::runtime::Runtime;

fn create_manager(registry: Arc<dyn TicketRegistry>, clock: Arc<dyn Clock>) -> SsoSessionManager {
    let factory = TicketFactory::new(&TicketEngineConfig::default(), clock).unwrap();
    SsoSessionManager::new(registry, factory)
}

fn bench_id_generation(c: &mut Criterion) {
    let generator = UniqueTicketIdGenerator::with_defaults().unwrap();

    c.bench_function("ticket_id_generation", |b| {
        b.iter(|| black_box(generator.new_ticket_id(black_box(TicketType::Service))))
    });
}

fn bench_expiration_policies(c: &mut Criterion) {
    let now = Utc::now();
    let usage = TicketUsage::fresh(now);
    let policy = ExpirationPolicy::AnyOf {
        policies: vec![
            ExpirationPolicy::default_ticket_granting(),
            ExpirationPolicy::ThrottledUseAndTimeout {
                max_lifetime_secs: 3600,
                min_interval_between_uses_secs: 1,
                max_uses: Some(100),
            },
        ],
    };

    c.bench_function("expiration_policy_evaluation", |b| {
        b.iter(|| black_box(policy.is_expired(black_box(&usage), black_box(now))))
    });
}

fn bench_session_operations(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let app = Service::from("https://app.example/");

    c.bench_function("grant_and_validate_memory", |b| {
        let registry: Arc<dyn TicketRegistry> = Arc::new(DefaultTicketRegistry::new(clock.clone()));
        let manager = create_manager(registry, clock.clone());
        let tgt = rt
            .block_on(manager.grant_ticket_granting_ticket(Authentication::new("alice")))
            .unwrap();

        b.iter(|| {
            rt.block_on(async {
                let st = manager
                    .grant_service_ticket(tgt.id(), app.clone())
                    .await
                    .unwrap();
                black_box(manager.validate_service_ticket(st.id(), &app).await)
            })
        });
    });

    c.bench_function("grant_and_validate_document", |b| {
        let store = Arc::new(InMemoryDocumentStore::new());
        let registry: Arc<dyn TicketRegistry> =
            Arc::new(DocumentTicketRegistry::new(store, clock.clone()));
        let manager = create_manager(registry, clock.clone());
        let tgt = rt
            .block_on(manager.grant_ticket_granting_ticket(Authentication::new("alice")))
            .unwrap();

        b.iter(|| {
            rt.block_on(async {
                let st = manager
                    .grant_service_ticket(tgt.id(), app.clone())
                    .await
                    .unwrap();
                black_box(manager.validate_service_ticket(st.id(), &app).await)
            })
        });
    });
}

fn bench_sweeper(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    c.bench_function("sweep_1000_live_sessions", |b| {
        let registry: Arc<dyn TicketRegistry> = Arc::new(DefaultTicketRegistry::new(clock.clone()));
        let manager = create_manager(registry.clone(), clock.clone());
        rt.block_on(async {
            for n in 0..1_000 {
                manager
                    .grant_ticket_granting_ticket(Authentication::new(format!("user-{n}")))
                    .await
                    .unwrap();
            }
        });
        let sweeper = TicketSweeper::new(registry, clock.clone(), SweeperSettings::default());

        b.iter(|| black_box(rt.block_on(sweeper.sweep_once())));
    });
}

criterion_group!(
    benches,
    bench_id_generation,
    bench_expiration_policies,
    bench_session_operations,
    bench_sweeper
);
criterion_main!(benches);
