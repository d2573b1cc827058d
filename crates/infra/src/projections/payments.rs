//! Payments audit projection.
//!
//! Append-only view of every successful charge: amount, method, processor
//! ids. Keyed by event id, so at-least-once redelivery upserts the same
//! row instead of duplicating the audit trail.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use coursepay_billing::{EnrollmentEvent, EnrollmentId};
use coursepay_core::{Currency, TenantId};
use coursepay_events::EventEnvelope;

use crate::read_model::TenantStore;

/// Read model: one settled payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRecord {
    pub payment_id: Uuid,
    pub enrollment_id: EnrollmentId,
    pub payment_number: u32,
    pub amount: u64,
    pub currency: Currency,
    pub method_ref: Option<String>,
    pub processor_charge_id: String,
    pub processor_invoice_id: Option<String>,
    pub paid_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum PaymentsProjectionError {
    #[error("failed to deserialize enrollment event: {0}")]
    Deserialize(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),
}

/// Payments audit projection over a tenant store.
pub struct PaymentsProjection<S>
where
    S: TenantStore<Uuid, PaymentRecord>,
{
    store: S,
}

impl<S> PaymentsProjection<S>
where
    S: TenantStore<Uuid, PaymentRecord>,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// All payments for a tenant, oldest first.
    pub fn list(&self, tenant_id: TenantId) -> Vec<PaymentRecord> {
        let mut records = self.store.list(tenant_id);
        records.sort_by(|a, b| a.paid_at.cmp(&b.paid_at).then(a.payment_id.cmp(&b.payment_id)));
        records
    }

    /// Payments for one enrollment, in payment order.
    pub fn list_for_enrollment(
        &self,
        tenant_id: TenantId,
        enrollment_id: EnrollmentId,
    ) -> Vec<PaymentRecord> {
        let mut records: Vec<_> = self
            .store
            .list(tenant_id)
            .into_iter()
            .filter(|r| r.enrollment_id == enrollment_id)
            .collect();
        records.sort_by_key(|r| r.payment_number);
        records
    }

    /// Apply one envelope; only `ObligationCharged` contributes.
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), PaymentsProjectionError> {
        if envelope.aggregate_type() != "billing.enrollment" {
            return Ok(());
        }

        let ev: EnrollmentEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| PaymentsProjectionError::Deserialize(e.to_string()))?;

        if let EnrollmentEvent::ObligationCharged(e) = ev {
            if e.tenant_id != envelope.tenant_id() {
                return Err(PaymentsProjectionError::TenantIsolation(
                    "event tenant_id does not match envelope tenant_id".to_string(),
                ));
            }

            let record = PaymentRecord {
                payment_id: envelope.event_id(),
                enrollment_id: e.enrollment_id,
                payment_number: e.payment_number,
                amount: e.amount,
                currency: e.currency,
                method_ref: e.method_ref,
                processor_charge_id: e.processor_charge_id,
                processor_invoice_id: e.processor_invoice_id,
                paid_at: e.paid_date,
            };
            self.store
                .upsert(envelope.tenant_id(), record.payment_id, record);
        }

        Ok(())
    }
}
