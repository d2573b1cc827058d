//! Enrollment ledger projection.
//!
//! One row per enrollment with the derived aggregate payment state. The
//! aggregate recomputes the ledger from its obligation set on every event
//! and embeds the snapshot in the event, so this projection only copies -
//! it can never disagree with a from-scratch derivation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;

use coursepay_billing::{
    AgreementStatus, EnrollmentEvent, EnrollmentId, EnrollmentStatus, LedgerSnapshot,
    PaymentStatus,
};
use coursepay_catalog::{PlanTemplateId, ProductId};
use coursepay_core::{Currency, TenantId};
use coursepay_events::EventEnvelope;

use crate::projections::cursor_store::{
    CursorAdvance, CursorTracker, InMemoryCursorStore, ProjectionCursorStore,
};
use crate::read_model::TenantStore;

/// Read model: an enrollment's aggregate payment state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollmentLedger {
    pub enrollment_id: EnrollmentId,
    pub product_id: ProductId,
    pub status: EnrollmentStatus,
    pub linked_parent: bool,
    pub plan_template_id: Option<PlanTemplateId>,
    pub agreement_status: Option<AgreementStatus>,
    pub currency: Currency,
    pub total_amount: u64,
    pub paid_amount: u64,
    pub payment_status: PaymentStatus,
    pub next_payment_date: Option<DateTime<Utc>>,
    pub last_payment_at: Option<DateTime<Utc>>,
}

impl EnrollmentLedger {
    fn apply_snapshot(&mut self, snapshot: &LedgerSnapshot) {
        self.total_amount = snapshot.total_amount;
        self.paid_amount = snapshot.paid_amount;
        self.payment_status = snapshot.payment_status;
        self.next_payment_date = snapshot.next_payment_date;
    }
}

#[derive(Debug, Error)]
pub enum LedgerProjectionError {
    #[error("failed to deserialize enrollment event: {0}")]
    Deserialize(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("sequence gap (last={last}, found={found}); rebuild required")]
    SequenceGap { last: u64, found: u64 },

    #[error("event for unknown enrollment {0}")]
    UnknownEnrollment(EnrollmentId),
}

/// Ledger projection over a tenant store.
pub struct EnrollmentLedgerProjection<S, C = InMemoryCursorStore>
where
    S: TenantStore<EnrollmentId, EnrollmentLedger>,
{
    store: S,
    cursors: CursorTracker<C>,
}

impl<S> EnrollmentLedgerProjection<S>
where
    S: TenantStore<EnrollmentId, EnrollmentLedger>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: CursorTracker::new("billing.ledger"),
        }
    }
}

impl<S, C> EnrollmentLedgerProjection<S, C>
where
    S: TenantStore<EnrollmentId, EnrollmentLedger>,
    C: ProjectionCursorStore + 'static,
{
    pub fn with_persistent_cursors(store: S, cursor_store: Arc<C>) -> Self {
        Self {
            store,
            cursors: CursorTracker::with_store("billing.ledger", cursor_store),
        }
    }

    pub fn get(&self, tenant_id: TenantId, enrollment_id: &EnrollmentId) -> Option<EnrollmentLedger> {
        self.store.get(tenant_id, enrollment_id)
    }

    pub fn list(&self, tenant_id: TenantId) -> Vec<EnrollmentLedger> {
        let mut ledgers = self.store.list(tenant_id);
        ledgers.sort_by_key(|l| *l.enrollment_id.0.as_uuid());
        ledgers
    }

    /// Apply one envelope into the ledger read model.
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), LedgerProjectionError> {
        if envelope.aggregate_type() != "billing.enrollment" {
            return Ok(());
        }

        let tenant_id = envelope.tenant_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        match self.cursors.check(tenant_id, aggregate_id, seq) {
            CursorAdvance::Stale => return Ok(()),
            CursorAdvance::Gap { last, found } => {
                return Err(LedgerProjectionError::SequenceGap { last, found });
            }
            CursorAdvance::Apply => {}
        }

        let ev: EnrollmentEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| LedgerProjectionError::Deserialize(e.to_string()))?;

        match &ev {
            EnrollmentEvent::EnrollmentOpened(e) => {
                if e.tenant_id != tenant_id {
                    return Err(LedgerProjectionError::TenantIsolation(
                        "event tenant_id does not match envelope tenant_id".to_string(),
                    ));
                }
                self.store.upsert(
                    tenant_id,
                    e.enrollment_id,
                    EnrollmentLedger {
                        enrollment_id: e.enrollment_id,
                        product_id: e.product_id,
                        status: EnrollmentStatus::Onboarding,
                        linked_parent: e.linked_parent,
                        plan_template_id: None,
                        agreement_status: None,
                        currency: e.currency.clone(),
                        total_amount: e.total_amount,
                        paid_amount: 0,
                        payment_status: PaymentStatus::Unpaid,
                        next_payment_date: None,
                        last_payment_at: None,
                    },
                );
            }
            other => {
                let (event_tenant, enrollment_id) = scope(other);
                if event_tenant != tenant_id {
                    return Err(LedgerProjectionError::TenantIsolation(
                        "event tenant_id does not match envelope tenant_id".to_string(),
                    ));
                }

                let mut ledger = self
                    .store
                    .get(tenant_id, &enrollment_id)
                    .ok_or(LedgerProjectionError::UnknownEnrollment(enrollment_id))?;

                match other {
                    EnrollmentEvent::PlanSelected(e) => {
                        ledger.plan_template_id = Some(e.plan_template_id);
                        ledger.apply_snapshot(&e.ledger);
                    }
                    EnrollmentEvent::ObligationCharged(e) => {
                        ledger.apply_snapshot(&e.ledger);
                        ledger.last_payment_at = Some(e.paid_date);
                    }
                    EnrollmentEvent::ObligationCancelled(e) => {
                        ledger.apply_snapshot(&e.ledger);
                    }
                    EnrollmentEvent::ObligationRefunded(e) => {
                        ledger.apply_snapshot(&e.ledger);
                    }
                    EnrollmentEvent::ExternalRefsRecorded(_) => {}
                    EnrollmentEvent::AgreementStatusRecorded(e) => {
                        ledger.agreement_status = Some(e.status);
                    }
                    EnrollmentEvent::EnrollmentActivated(_) => {
                        ledger.status = EnrollmentStatus::Active;
                    }
                    EnrollmentEvent::SubscriptionPeriodAppended(e) => {
                        ledger.apply_snapshot(&e.ledger);
                    }
                    EnrollmentEvent::EnrollmentOpened(_) => unreachable!("handled above"),
                }

                self.store.upsert(tenant_id, enrollment_id, ledger);
            }
        }

        self.cursors.advance(tenant_id, aggregate_id, seq);
        Ok(())
    }

    /// Rebuild the read model from scratch.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), LedgerProjectionError> {
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

fn scope(ev: &EnrollmentEvent) -> (TenantId, EnrollmentId) {
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
