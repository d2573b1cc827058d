//! Command execution pipeline (application-level orchestration).
//!
//! One consistent lifecycle for every enrollment command:
//!
//! ```text
//! Command
//!   ↓
//! 1. Load events from store (tenant-scoped)
//!   ↓
//! 2. Rehydrate aggregate (apply history)
//!   ↓
//! 3. Handle command (pure decision logic → events)
//!   ↓
//! 4. Append to store (optimistic concurrency check)
//!   ↓
//! 5. Publish committed events to the bus (projections)
//! ```
//!
//! Events are persisted before publication; a publish failure after a
//! successful append is surfaced (at-least-once; subscribers are
//! idempotent). Tenant isolation and the expected-version check are
//! enforced here so domain code stays pure.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use coursepay_core::{Aggregate, AggregateId, DomainError, ExpectedVersion, TenantId};
use coursepay_events::{EventBus, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug)]
pub enum DispatchError {
    /// Optimistic concurrency failure (stale aggregate version).
    Concurrency(String),
    /// Tenant isolation violation (cross-tenant or cross-aggregate stream mixing).
    TenantIsolation(String),
    /// Domain validation failure (deterministic).
    Validation(String),
    /// Domain invariant failure (deterministic).
    InvariantViolation(String),
    /// Domain authorization failure.
    Unauthorized,
    /// Domain-level not found.
    NotFound,
    /// Failed to deserialize historical event payloads into the aggregate event type.
    Deserialize(String),
    /// Persisting to the event store failed.
    Store(EventStoreError),
    /// Publication failed after a successful append (at-least-once; retry may duplicate).
    Publish(String),
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match &value {
            EventStoreError::Concurrency(msg) => DispatchError::Concurrency(msg.clone()),
            EventStoreError::TenantIsolation(msg) => DispatchError::TenantIsolation(msg.clone()),
            _ => DispatchError::Store(value),
        }
    }
}

impl From<DomainError> for DispatchError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => DispatchError::Validation(msg),
            DomainError::InvariantViolation(msg) => DispatchError::InvariantViolation(msg),
            DomainError::Conflict(msg) => DispatchError::Concurrency(msg),
            DomainError::Unauthorized => DispatchError::Unauthorized,
            DomainError::NotFound => DispatchError::NotFound,
            DomainError::InvalidId(msg) => DispatchError::Validation(msg),
        }
    }
}

/// Reusable command execution engine for event-sourced aggregates.
///
/// Generic over store and bus so tests run on the in-memory pair and
/// production swaps in Postgres without touching domain code.
#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }

    pub fn into_parts(self) -> (S, B) {
        (self.store, self.bus)
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Load and rehydrate an aggregate without dispatching anything.
    ///
    /// Application services use this for read-before-act guards (idempotency
    /// check, linked-enrollment guard) before talking to the processor.
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
        let history = self.store.load_stream(tenant_id, aggregate_id)?;
        validate_loaded_stream(tenant_id, aggregate_id, &history)?;

        let mut aggregate = make_aggregate(tenant_id, aggregate_id);
        apply_history::<A>(&mut aggregate, &history)?;
        Ok(aggregate)
    }

    /// Dispatch a command through the full pipeline.
    ///
    /// Uses `ExpectedVersion::Exact(loaded_version)` on append: if anything
    /// else touched the stream between load and append, the command fails
    /// with `Concurrency` and the caller decides whether to reload and
    /// retry. This is the per-enrollment mutual exclusion guarantee.
    pub fn dispatch<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        command: A::Command,
        make_aggregate: impl FnOnce(TenantId, AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: coursepay_events::Event + Serialize + DeserializeOwned,
    {
        // 1) Load history (tenant-scoped)
        let history = self.store.load_stream(tenant_id, aggregate_id)?;
        validate_loaded_stream(tenant_id, aggregate_id, &history)?;
        let expected = ExpectedVersion::Exact(stream_version(&history));

        // 2) Rehydrate aggregate
        let mut aggregate = make_aggregate(tenant_id, aggregate_id);
        apply_history::<A>(&mut aggregate, &history)?;

        // 3) Decide events (no mutation)
        let decided = aggregate.handle(&command).map_err(DispatchError::from)?;
        if decided.is_empty() {
            return Ok(vec![]);
        }

        // 4) Persist (append-only, optimistic)
        let aggregate_type = aggregate_type.into();
        let uncommitted = decided
            .iter()
            .map(|ev| {
                UncommittedEvent::from_typed(
                    tenant_id,
                    aggregate_id,
                    aggregate_type.clone(),
                    Uuid::now_v7(),
                    ev,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        let committed = self.store.append(uncommitted, expected)?;

        // 5) Publish committed events (after append)
        for stored in &committed {
            self.bus
                .publish(stored.to_envelope())
                .map_err(|e| DispatchError::Publish(format!("{e:?}")))?;
        }

        Ok(committed)
    }
}

fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.sequence_number).unwrap_or(0)
}

fn validate_loaded_stream(
    tenant_id: TenantId,
    aggregate_id: AggregateId,
    stream: &[StoredEvent],
) -> Result<(), DispatchError> {
    // Enforce tenant isolation even if a buggy backend returns cross-tenant
    // data, and require monotonically increasing sequence numbers.
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.tenant_id != tenant_id {
            return Err(DispatchError::TenantIsolation(format!(
                "loaded stream contains wrong tenant_id at index {idx}"
            )));
        }
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::TenantIsolation(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            )));
        }
        if e.sequence_number <= last {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                e.sequence_number
            ))));
        }
        last = e.sequence_number;
    }
    Ok(())
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> Result<(), DispatchError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    // Ensure deterministic ordering.
    let mut sorted = history.to_vec();
    sorted.sort_by_key(|e| e.sequence_number);

    for stored in sorted {
        let ev: A::Event = serde_json::from_value(stored.payload)
            .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
        aggregate.apply(&ev);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use coursepay_billing::{Enrollment, EnrollmentCommand, EnrollmentId, OpenEnrollment};
    use coursepay_catalog::ProductId;
    use coursepay_core::Currency;
    use coursepay_events::InMemoryEventBus;

    use crate::event_store::InMemoryEventStore;
    use std::sync::Arc;

    fn dispatcher() -> CommandDispatcher<
        Arc<InMemoryEventStore>,
        Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>,
    > {
        CommandDispatcher::new(
            Arc::new(InMemoryEventStore::new()),
            Arc::new(InMemoryEventBus::new()),
        )
    }

    fn open_cmd(tenant_id: TenantId, enrollment_id: EnrollmentId) -> EnrollmentCommand {
        EnrollmentCommand::OpenEnrollment(OpenEnrollment {
            tenant_id,
            enrollment_id,
            product_id: ProductId::new(),
            total_amount: 10000,
            currency: Currency::usd(),
            anchor_date: None,
            linked_parent: false,
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn dispatch_persists_and_publishes() {
        let d = dispatcher();
        let tenant_id = TenantId::new();
        let aggregate_id = AggregateId::new();
        let enrollment_id = EnrollmentId::new(aggregate_id);

        let sub = d.bus.subscribe();

        let committed = d
            .dispatch::<Enrollment>(
                tenant_id,
                aggregate_id,
                "billing.enrollment",
                open_cmd(tenant_id, enrollment_id),
                |_t, id| Enrollment::empty(EnrollmentId::new(id)),
            )
            .unwrap();

        assert_eq!(committed.len(), 1);
        assert_eq!(committed[0].sequence_number, 1);
        assert_eq!(committed[0].event_type, "billing.enrollment.opened");

        let published = sub.try_recv().unwrap();
        assert_eq!(published.sequence_number(), 1);
        assert_eq!(published.aggregate_type(), "billing.enrollment");
    }

    #[test]
    fn duplicate_open_is_rejected_after_rehydration() {
        let d = dispatcher();
        let tenant_id = TenantId::new();
        let aggregate_id = AggregateId::new();
        let enrollment_id = EnrollmentId::new(aggregate_id);

        d.dispatch::<Enrollment>(
            tenant_id,
            aggregate_id,
            "billing.enrollment",
            open_cmd(tenant_id, enrollment_id),
            |_t, id| Enrollment::empty(EnrollmentId::new(id)),
        )
        .unwrap();

        let err = d
            .dispatch::<Enrollment>(
                tenant_id,
                aggregate_id,
                "billing.enrollment",
                open_cmd(tenant_id, enrollment_id),
                |_t, id| Enrollment::empty(EnrollmentId::new(id)),
            )
            .unwrap_err();

        assert!(matches!(err, DispatchError::Concurrency(_)));
    }

    #[test]
    fn load_rehydrates_current_state() {
        let d = dispatcher();
        let tenant_id = TenantId::new();
        let aggregate_id = AggregateId::new();
        let enrollment_id = EnrollmentId::new(aggregate_id);

        d.dispatch::<Enrollment>(
            tenant_id,
            aggregate_id,
            "billing.enrollment",
            open_cmd(tenant_id, enrollment_id),
            |_t, id| Enrollment::empty(EnrollmentId::new(id)),
        )
        .unwrap();

        let enrollment = d
            .load::<Enrollment>(tenant_id, aggregate_id, |_t, id| {
                Enrollment::empty(EnrollmentId::new(id))
            })
            .unwrap();

        assert!(enrollment.exists());
        assert_eq!(enrollment.total_amount(), 10000);
    }
}
