//! Payment schedule projection.
//!
//! One row per obligation, across all of a tenant's enrollments. This is
//! the read model behind the overdue sweep and the "upcoming payments"
//! admin views. Rebuildable from enrollment events; tenant-isolated.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;

use coursepay_billing::{EnrollmentEvent, EnrollmentId, ObligationStatus, PaymentObligation};
use coursepay_billing::schedule::PaymentType;
use coursepay_core::{Currency, TenantId};
use coursepay_events::EventEnvelope;

use crate::projections::cursor_store::{
    CursorAdvance, CursorTracker, InMemoryCursorStore, ProjectionCursorStore,
};
use crate::read_model::TenantStore;

/// Read-model key: one obligation of one enrollment.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ScheduleEntryKey {
    pub enrollment_id: EnrollmentId,
    pub payment_number: u32,
}

/// Read model: one schedule row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleEntry {
    pub enrollment_id: EnrollmentId,
    pub payment_number: u32,
    pub payment_type: PaymentType,
    pub amount: u64,
    pub currency: Currency,
    pub scheduled_date: DateTime<Utc>,
    pub paid_date: Option<DateTime<Utc>>,
    pub status: ObligationStatus,
}

impl ScheduleEntry {
    fn from_obligation(enrollment_id: EnrollmentId, o: &PaymentObligation) -> Self {
        Self {
            enrollment_id,
            payment_number: o.payment_number,
            payment_type: o.payment_type,
            amount: o.amount,
            currency: o.currency.clone(),
            scheduled_date: o.scheduled_date,
            paid_date: o.paid_date,
            status: o.status,
        }
    }

    fn key(&self) -> ScheduleEntryKey {
        ScheduleEntryKey {
            enrollment_id: self.enrollment_id,
            payment_number: self.payment_number,
        }
    }
}

#[derive(Debug, Error)]
pub enum ScheduleProjectionError {
    #[error("failed to deserialize enrollment event: {0}")]
    Deserialize(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("sequence gap (last={last}, found={found}); rebuild required")]
    SequenceGap { last: u64, found: u64 },
}

/// Schedule projection over a tenant store.
pub struct PaymentScheduleProjection<S, C = InMemoryCursorStore>
where
    S: TenantStore<ScheduleEntryKey, ScheduleEntry>,
{
    store: S,
    cursors: CursorTracker<C>,
}

impl<S> PaymentScheduleProjection<S>
where
    S: TenantStore<ScheduleEntryKey, ScheduleEntry>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: CursorTracker::new("billing.schedule"),
        }
    }
}

impl<S, C> PaymentScheduleProjection<S, C>
where
    S: TenantStore<ScheduleEntryKey, ScheduleEntry>,
    C: ProjectionCursorStore + 'static,
{
    pub fn with_persistent_cursors(store: S, cursor_store: Arc<C>) -> Self {
        Self {
            store,
            cursors: CursorTracker::with_store("billing.schedule", cursor_store),
        }
    }

    /// All rows for one enrollment, in payment order.
    pub fn list_for_enrollment(
        &self,
        tenant_id: TenantId,
        enrollment_id: EnrollmentId,
    ) -> Vec<ScheduleEntry> {
        let mut entries: Vec<_> = self
            .store
            .list(tenant_id)
            .into_iter()
            .filter(|e| e.enrollment_id == enrollment_id)
            .collect();
        entries.sort_by_key(|e| e.payment_number);
        entries
    }

    /// Overdue view: pending rows scheduled strictly before `now`.
    ///
    /// Never persisted; computed here so a stale stored flag can't survive
    /// a clock skew.
    pub fn list_overdue(&self, tenant_id: TenantId, now: DateTime<Utc>) -> Vec<ScheduleEntry> {
        let mut entries: Vec<_> = self
            .store
            .list(tenant_id)
            .into_iter()
            .filter(|e| e.status == ObligationStatus::Pending && e.scheduled_date < now)
            .collect();
        sort_for_listing(&mut entries);
        entries
    }

    /// Pending rows scheduled within `[now, now + days_ahead]`.
    pub fn list_upcoming(
        &self,
        tenant_id: TenantId,
        now: DateTime<Utc>,
        days_ahead: i64,
    ) -> Vec<ScheduleEntry> {
        let cutoff = now + Duration::days(days_ahead);
        let mut entries: Vec<_> = self
            .store
            .list(tenant_id)
            .into_iter()
            .filter(|e| {
                e.status == ObligationStatus::Pending
                    && e.scheduled_date >= now
                    && e.scheduled_date <= cutoff
            })
            .collect();
        sort_for_listing(&mut entries);
        entries
    }

    /// Apply one envelope into the schedule read model.
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), ScheduleProjectionError> {
        if envelope.aggregate_type() != "billing.enrollment" {
            return Ok(());
        }

        let tenant_id = envelope.tenant_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        match self.cursors.check(tenant_id, aggregate_id, seq) {
            CursorAdvance::Stale => return Ok(()),
            CursorAdvance::Gap { last, found } => {
                return Err(ScheduleProjectionError::SequenceGap { last, found });
            }
            CursorAdvance::Apply => {}
        }

        let ev: EnrollmentEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ScheduleProjectionError::Deserialize(e.to_string()))?;

        let (event_tenant, enrollment_id) = event_scope(&ev);
        if event_tenant != tenant_id {
            return Err(ScheduleProjectionError::TenantIsolation(
                "event tenant_id does not match envelope tenant_id".to_string(),
            ));
        }
        if enrollment_id.0 != aggregate_id {
            return Err(ScheduleProjectionError::TenantIsolation(
                "event enrollment_id does not match envelope aggregate_id".to_string(),
            ));
        }

        match ev {
            EnrollmentEvent::PlanSelected(e) => {
                // Wholesale replacement: the old schedule's rows go away with
                // the old plan.
                for stale in self.list_for_enrollment(tenant_id, e.enrollment_id) {
                    self.store.remove(tenant_id, &stale.key());
                }
                for o in &e.obligations {
                    let entry = ScheduleEntry::from_obligation(e.enrollment_id, o);
                    self.store.upsert(tenant_id, entry.key(), entry);
                }
            }
            EnrollmentEvent::ObligationCharged(e) => {
                let key = ScheduleEntryKey {
                    enrollment_id: e.enrollment_id,
                    payment_number: e.payment_number,
                };
                if let Some(mut entry) = self.store.get(tenant_id, &key) {
                    entry.status = ObligationStatus::Paid;
                    entry.paid_date = Some(e.paid_date);
                    self.store.upsert(tenant_id, key, entry);
                }
            }
            EnrollmentEvent::ObligationCancelled(e) => {
                let key = ScheduleEntryKey {
                    enrollment_id: e.enrollment_id,
                    payment_number: e.payment_number,
                };
                if let Some(mut entry) = self.store.get(tenant_id, &key) {
                    entry.status = ObligationStatus::Cancelled;
                    self.store.upsert(tenant_id, key, entry);
                }
            }
            EnrollmentEvent::ObligationRefunded(e) => {
                let key = ScheduleEntryKey {
                    enrollment_id: e.enrollment_id,
                    payment_number: e.payment_number,
                };
                if let Some(mut entry) = self.store.get(tenant_id, &key) {
                    entry.status = ObligationStatus::Refunded;
                    self.store.upsert(tenant_id, key, entry);
                }
            }
            EnrollmentEvent::SubscriptionPeriodAppended(e) => {
                let entry = ScheduleEntry::from_obligation(e.enrollment_id, &e.obligation);
                self.store.upsert(tenant_id, entry.key(), entry);
            }
            EnrollmentEvent::EnrollmentOpened(_)
            | EnrollmentEvent::ExternalRefsRecorded(_)
            | EnrollmentEvent::AgreementStatusRecorded(_)
            | EnrollmentEvent::EnrollmentActivated(_) => {}
        }

        self.cursors.advance(tenant_id, aggregate_id, seq);
        Ok(())
    }

    /// Rebuild the read model from scratch.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), ScheduleProjectionError> {
        let mut envs: Vec<_> = envelopes.into_iter().collect();

        {
            let mut tenants = envs.iter().map(|e| e.tenant_id()).collect::<Vec<_>>();
            tenants.sort_by_key(|t| *t.as_uuid().as_bytes());
            tenants.dedup();
            for t in tenants {
                self.store.clear_tenant(t);
                self.cursors.clear_tenant(t);
            }
        }

        envs.sort_by_key(|e| {
            (
                *e.tenant_id().as_uuid().as_bytes(),
                *e.aggregate_id().as_uuid().as_bytes(),
                e.sequence_number(),
            )
        });

        for env in &envs {
            self.apply_envelope(env)?;
        }

        Ok(())
    }
}

/// Deterministic listing order: scheduled date, ties broken by payment
/// number; stable for pagination and admin UI.
fn sort_for_listing(entries: &mut [ScheduleEntry]) {
    entries.sort_by(|a, b| {
        a.scheduled_date
            .cmp(&b.scheduled_date)
            .then(a.payment_number.cmp(&b.payment_number))
            .then(a.enrollment_id.0.as_uuid().cmp(b.enrollment_id.0.as_uuid()))
    });
}

fn event_scope(ev: &EnrollmentEvent) -> (TenantId, EnrollmentId) {
    match ev {
        EnrollmentEvent::EnrollmentOpened(e) => (e.tenant_id, e.enrollment_id),
        EnrollmentEvent::PlanSelected(e) => (e.tenant_id, e.enrollment_id),
        EnrollmentEvent::ObligationCharged(e) => (e.tenant_id, e.enrollment_id),
        EnrollmentEvent::ExternalRefsRecorded(e) => (e.tenant_id, e.enrollment_id),
        EnrollmentEvent::ObligationCancelled(e) => (e.tenant_id, e.enrollment_id),
        EnrollmentEvent::ObligationRefunded(e) => (e.tenant_id, e.enrollment_id),
        EnrollmentEvent::AgreementStatusRecorded(e) => (e.tenant_id, e.enrollment_id),
        EnrollmentEvent::EnrollmentActivated(e) => (e.tenant_id, e.enrollment_id),
        EnrollmentEvent::SubscriptionPeriodAppended(e) => (e.tenant_id, e.enrollment_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use coursepay_billing::{LedgerSnapshot, ObligationCharged, PaymentStatus, PlanSelected};
    use coursepay_catalog::PlanTemplateId;
    use coursepay_core::AggregateId;
    use std::sync::Arc;

    use crate::read_model::InMemoryTenantStore;

    fn anchor() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    fn obligation(payment_number: u32, scheduled: DateTime<Utc>) -> PaymentObligation {
        PaymentObligation {
            payment_number,
            payment_type: PaymentType::Installment,
            amount: 5000,
            currency: Currency::usd(),
            scheduled_date: scheduled,
            paid_date: None,
            status: ObligationStatus::Pending,
            processor_charge_id: None,
            processor_invoice_id: None,
        }
    }

    fn make_envelope(
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        seq: u64,
        event: EnrollmentEvent,
    ) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            uuid::Uuid::now_v7(),
            tenant_id,
            aggregate_id,
            "billing.enrollment".to_string(),
            seq,
            serde_json::to_value(&event).unwrap(),
        )
    }

    fn projection() -> PaymentScheduleProjection<
        Arc<InMemoryTenantStore<ScheduleEntryKey, ScheduleEntry>>,
    > {
        PaymentScheduleProjection::new(Arc::new(InMemoryTenantStore::new()))
    }

    fn plan_selected(
        tenant_id: TenantId,
        enrollment_id: EnrollmentId,
        obligations: Vec<PaymentObligation>,
    ) -> EnrollmentEvent {
        let total = obligations.iter().map(|o| o.amount).sum();
        EnrollmentEvent::PlanSelected(PlanSelected {
            tenant_id,
            enrollment_id,
            plan_template_id: PlanTemplateId::new(),
            plan_type: coursepay_catalog::PlanType::DepositInstallments,
            obligations,
            ledger: LedgerSnapshot {
                total_amount: total,
                paid_amount: 0,
                payment_status: PaymentStatus::Unpaid,
                next_payment_date: Some(anchor()),
            },
            occurred_at: anchor(),
        })
    }

    #[test]
    fn overdue_contains_yesterday_pending_but_not_paid() {
        let proj = projection();
        let tenant_id = TenantId::new();
        let aggregate_id = AggregateId::new();
        let enrollment_id = EnrollmentId::new(aggregate_id);
        let now = anchor() + Duration::days(1);

        proj.apply_envelope(&make_envelope(
            tenant_id,
            aggregate_id,
            1,
            plan_selected(tenant_id, enrollment_id, vec![obligation(1, anchor())]),
        ))
        .unwrap();

        let overdue = proj.list_overdue(tenant_id, now);
        assert_eq!(overdue.len(), 1);
        assert_eq!(overdue[0].payment_number, 1);

        // Mark it paid; it must leave the overdue view.
        proj.apply_envelope(&make_envelope(
            tenant_id,
            aggregate_id,
            2,
            EnrollmentEvent::ObligationCharged(ObligationCharged {
                tenant_id,
                enrollment_id,
                payment_number: 1,
                amount: 5000,
                currency: Currency::usd(),
                method_ref: None,
                processor_charge_id: "pi_1".to_string(),
                processor_invoice_id: None,
                paid_date: now,
                ledger: LedgerSnapshot {
                    total_amount: 5000,
                    paid_amount: 5000,
                    payment_status: PaymentStatus::Paid,
                    next_payment_date: None,
                },
                occurred_at: now,
            }),
        ))
        .unwrap();

        assert!(proj.list_overdue(tenant_id, now).is_empty());
    }

    #[test]
    fn upcoming_is_windowed_and_deterministically_ordered() {
        let proj = projection();
        let tenant_id = TenantId::new();
        let aggregate_id = AggregateId::new();
        let enrollment_id = EnrollmentId::new(aggregate_id);
        let now = anchor();

        // Two entries on the same date (tie broken by payment_number) plus
        // one outside the window.
        proj.apply_envelope(&make_envelope(
            tenant_id,
            aggregate_id,
            1,
            plan_selected(
                tenant_id,
                enrollment_id,
                vec![
                    obligation(1, now + Duration::days(3)),
                    obligation(2, now + Duration::days(3)),
                    obligation(3, now + Duration::days(40)),
                ],
            ),
        ))
        .unwrap();

        let upcoming = proj.list_upcoming(tenant_id, now, 7);
        assert_eq!(
            upcoming.iter().map(|e| e.payment_number).collect::<Vec<_>>(),
            vec![1, 2]
        );
    }

    #[test]
    fn reselection_replaces_schedule_rows() {
        let proj = projection();
        let tenant_id = TenantId::new();
        let aggregate_id = AggregateId::new();
        let enrollment_id = EnrollmentId::new(aggregate_id);

        proj.apply_envelope(&make_envelope(
            tenant_id,
            aggregate_id,
            1,
            plan_selected(
                tenant_id,
                enrollment_id,
                vec![obligation(1, anchor()), obligation(2, anchor())],
            ),
        ))
        .unwrap();
        assert_eq!(proj.list_for_enrollment(tenant_id, enrollment_id).len(), 2);

        // New plan with three rows: the old two are gone, not merged.
        proj.apply_envelope(&make_envelope(
            tenant_id,
            aggregate_id,
            2,
            plan_selected(
                tenant_id,
                enrollment_id,
                vec![
                    obligation(1, anchor()),
                    obligation(2, anchor()),
                    obligation(3, anchor()),
                ],
            ),
        ))
        .unwrap();

        let rows = proj.list_for_enrollment(tenant_id, enrollment_id);
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.status == ObligationStatus::Pending));
    }

    #[test]
    fn redelivered_envelopes_are_idempotent() {
        let proj = projection();
        let tenant_id = TenantId::new();
        let aggregate_id = AggregateId::new();
        let enrollment_id = EnrollmentId::new(aggregate_id);

        let env = make_envelope(
            tenant_id,
            aggregate_id,
            1,
            plan_selected(tenant_id, enrollment_id, vec![obligation(1, anchor())]),
        );

        proj.apply_envelope(&env).unwrap();
        proj.apply_envelope(&env).unwrap();

        assert_eq!(proj.list_for_enrollment(tenant_id, enrollment_id).len(), 1);
    }
}
