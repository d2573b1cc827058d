//! Infrastructure wiring for the HTTP surface.
//!
//! Dev/test wiring: in-memory event store + bus, in-memory processor and
//! catalog. A production deployment swaps the store for
//! `PostgresEventStore` and the processor factory for a real per-tenant
//! client factory; the handlers don't change.

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use coursepay_billing::EnrollmentId;
use coursepay_catalog::InMemoryPlanCatalog;
use coursepay_core::{Aggregate, AggregateId, DomainError, TenantId};
use coursepay_events::{EventBus, EventEnvelope, InMemoryEventBus};
use coursepay_infra::billing_ops::{ChargeOrchestrator, PlanSelectionCoordinator};
use coursepay_infra::command_dispatcher::{CommandDispatcher, DispatchError};
use coursepay_infra::event_store::{InMemoryEventStore, StoredEvent};
use coursepay_infra::projections::{
    EnrollmentLedger, EnrollmentLedgerProjection, PaymentRecord, PaymentScheduleProjection,
    PaymentsProjection, ScheduleEntry, ScheduleEntryKey,
};
use coursepay_infra::read_model::InMemoryTenantStore;
use coursepay_processor::{InMemoryProcessor, StaticProcessorFactory};

use super::AppConfig;

type JsonEnvelope = EventEnvelope<JsonValue>;

pub type InMemoryDispatcher =
    CommandDispatcher<Arc<InMemoryEventStore>, Arc<InMemoryEventBus<JsonEnvelope>>>;

pub type ScheduleProjectionHandle =
    Arc<PaymentScheduleProjection<Arc<InMemoryTenantStore<ScheduleEntryKey, ScheduleEntry>>>>;
pub type LedgerProjectionHandle =
    Arc<EnrollmentLedgerProjection<Arc<InMemoryTenantStore<EnrollmentId, EnrollmentLedger>>>>;
pub type PaymentsProjectionHandle =
    Arc<PaymentsProjection<Arc<InMemoryTenantStore<Uuid, PaymentRecord>>>>;

pub struct AppServices {
    dispatcher: Arc<InMemoryDispatcher>,
    pub orchestrator:
        ChargeOrchestrator<Arc<InMemoryEventStore>, Arc<InMemoryEventBus<JsonEnvelope>>>,
    pub coordinator:
        PlanSelectionCoordinator<Arc<InMemoryEventStore>, Arc<InMemoryEventBus<JsonEnvelope>>>,
    pub catalog: Arc<InMemoryPlanCatalog>,
    pub processor: Arc<InMemoryProcessor>,
    pub schedule_projection: ScheduleProjectionHandle,
    pub ledger_projection: LedgerProjectionHandle,
    pub payments_projection: PaymentsProjectionHandle,
    /// HS256 secret for enrollment checkout tokens.
    pub token_secret: Vec<u8>,
    /// Shared secret for webhook callers.
    pub webhook_secret: String,
}

impl AppServices {
    /// Dispatch a command on the shared pipeline.
    pub fn dispatch<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: A::Command,
        make_aggregate: impl FnOnce(TenantId, AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: coursepay_events::Event + Serialize + DeserializeOwned,
    {
        self.dispatcher
            .dispatch(tenant_id, aggregate_id, aggregate_type, command, make_aggregate)
    }

    /// Load and rehydrate an aggregate (read-only).
    pub fn load<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        make_aggregate: impl FnOnce(TenantId, AggregateId) -> A,
    ) -> Result<A, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: DeserializeOwned,
    {
        self.dispatcher.load(tenant_id, aggregate_id, make_aggregate)
    }
}

pub fn build_services(config: &AppConfig) -> AppServices {
    let store = Arc::new(InMemoryEventStore::new());
    let bus: Arc<InMemoryEventBus<JsonEnvelope>> = Arc::new(InMemoryEventBus::new());
    let dispatcher = Arc::new(CommandDispatcher::new(store.clone(), bus.clone()));

    let schedule_projection: ScheduleProjectionHandle = Arc::new(
        PaymentScheduleProjection::new(Arc::new(InMemoryTenantStore::new())),
    );
    let ledger_projection: LedgerProjectionHandle = Arc::new(EnrollmentLedgerProjection::new(
        Arc::new(InMemoryTenantStore::new()),
    ));
    let payments_projection: PaymentsProjectionHandle =
        Arc::new(PaymentsProjection::new(Arc::new(InMemoryTenantStore::new())));

    // Background subscriber: bus -> read models. At-least-once; each
    // projection is cursor-guarded.
    {
        let sub = bus.subscribe();
        let schedule_projection = schedule_projection.clone();
        let ledger_projection = ledger_projection.clone();
        let payments_projection = payments_projection.clone();
        tokio::task::spawn_blocking(move || {
            loop {
                match sub.recv() {
                    Ok(envelope) => {
                        if let Err(e) = schedule_projection.apply_envelope(&envelope) {
                            tracing::warn!("schedule projection apply failed: {e}");
                        }
                        if let Err(e) = ledger_projection.apply_envelope(&envelope) {
                            tracing::warn!("ledger projection apply failed: {e}");
                        }
                        if let Err(e) = payments_projection.apply_envelope(&envelope) {
                            tracing::warn!("payments projection apply failed: {e}");
                        }
                    }
                    Err(_) => break,
                }
            }
        });
    }

    let processor = Arc::new(InMemoryProcessor::new());
    let factory = Arc::new(StaticProcessorFactory::new(processor.clone()));
    let catalog = Arc::new(InMemoryPlanCatalog::new());

    let orchestrator = ChargeOrchestrator::new(dispatcher.clone(), factory.clone());
    let coordinator = PlanSelectionCoordinator::new(dispatcher.clone(), factory, catalog.clone());

    AppServices {
        dispatcher,
        orchestrator,
        coordinator,
        catalog,
        processor,
        schedule_projection,
        ledger_projection,
        payments_projection,
        token_secret: config.jwt_secret.clone().into_bytes(),
        webhook_secret: config.webhook_secret.clone(),
    }
}
