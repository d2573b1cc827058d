//! Charge orchestration: drive one obligation through an external charge.
//!
//! Ordering of guards matters and mirrors the money-safety rules:
//! 1. already paid → short-circuit, **zero** processor calls
//! 2. linked/parent enrollment → no-op success
//! 3. agreement gate → state error, no mutation
//! 4. resolve method (default, else first attached)
//! 5. single atomic off-session confirm+execute under a bounded timeout
//! 6. only a terminal success mutates state, via a compare-and-set append
//!
//! Declines and transient errors are classified and surfaced, never
//! retried here; retry is an operator/scheduler decision.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{info, warn};

use coursepay_billing::{
    Enrollment, EnrollmentCommand, EnrollmentId, ObligationStatus, RecordChargeSuccess,
};
use coursepay_core::TenantId;
use coursepay_events::{EventBus, EventEnvelope};
use coursepay_processor::{
    ChargeRef, ChargeRequest, CustomerRef, InvoiceRef, PaymentMethodRef, PaymentProcessor,
    ProcessorError, ProcessorFactory,
};

use crate::billing_ops::ENROLLMENT_AGGREGATE;
use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::EventStore;

/// Result of a charge attempt that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChargeOutcome {
    /// The processor settled the charge and the obligation is now paid.
    Succeeded { charge_id: ChargeRef },
    /// Idempotency short-circuit: the obligation was already paid.
    AlreadyPaid,
    /// Linked/parent enrollments bill through their counterpart; the call
    /// is a no-op success.
    SkippedLinkedEnrollment,
}

/// Classified charge failure. The obligation is left `Pending` (or in its
/// prior state) in every case.
#[derive(Debug, Error)]
pub enum ChargeError {
    #[error("enrollment not found")]
    EnrollmentNotFound,

    #[error("no obligation with payment_number {0}")]
    ObligationNotFound(u32),

    #[error("obligation is {0:?} and cannot be charged")]
    NotChargeable(ObligationStatus),

    #[error("agreement is not completed; charging is blocked")]
    AgreementIncomplete,

    #[error("no payment method on file")]
    NoPaymentMethod,

    /// Bounded timeout hit: the processor outcome is unknown. No state was
    /// mutated; settlement is reconciled via the processor webhook.
    #[error("charge outcome unknown (processor call timed out)")]
    OutcomeUnknown,

    #[error(transparent)]
    Processor(#[from] ProcessorError),

    /// Another mutation (a concurrent charge, a plan re-selection) won the
    /// race for this enrollment stream.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<DispatchError> for ChargeError {
    fn from(value: DispatchError) -> Self {
        match value {
            DispatchError::Concurrency(msg) => ChargeError::Conflict(msg),
            DispatchError::NotFound => ChargeError::EnrollmentNotFound,
            DispatchError::Validation(msg) | DispatchError::InvariantViolation(msg) => {
                ChargeError::Internal(msg)
            }
            other => ChargeError::Internal(format!("{other:?}")),
        }
    }
}

/// Drives obligations through external charges.
pub struct ChargeOrchestrator<S, B> {
    dispatcher: Arc<CommandDispatcher<S, B>>,
    processors: Arc<dyn ProcessorFactory>,
    charge_timeout: Duration,
}

impl<S, B> ChargeOrchestrator<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(
        dispatcher: Arc<CommandDispatcher<S, B>>,
        processors: Arc<dyn ProcessorFactory>,
    ) -> Self {
        Self {
            dispatcher,
            processors,
            charge_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_charge_timeout(mut self, timeout: Duration) -> Self {
        self.charge_timeout = timeout;
        self
    }

    /// Charge one obligation, optionally with an explicit payment method.
    pub async fn charge_obligation(
        &self,
        tenant_id: TenantId,
        enrollment_id: EnrollmentId,
        payment_number: u32,
        method: Option<PaymentMethodRef>,
    ) -> Result<ChargeOutcome, ChargeError> {
        let enrollment = self.load(tenant_id, enrollment_id)?;

        let obligation = enrollment
            .obligation(payment_number)
            .ok_or(ChargeError::ObligationNotFound(payment_number))?;

        // Idempotency guard before anything touches the network.
        match obligation.status {
            ObligationStatus::Paid => return Ok(ChargeOutcome::AlreadyPaid),
            ObligationStatus::Pending => {}
            other => return Err(ChargeError::NotChargeable(other)),
        }

        if enrollment.is_linked_parent() {
            info!(
                tenant_id = %tenant_id,
                enrollment_id = %enrollment_id,
                "skipping charge for linked enrollment"
            );
            return Ok(ChargeOutcome::SkippedLinkedEnrollment);
        }

        if !enrollment.agreement_allows_charge() {
            return Err(ChargeError::AgreementIncomplete);
        }

        let amount = obligation.amount;
        let currency = obligation.currency.clone();

        let processor = self.processors.for_tenant(tenant_id);
        let customer = customer_ref(enrollment_id);

        let method = match method {
            Some(m) => m,
            None => resolve_method(processor.as_ref(), &customer).await?,
        };

        let request = ChargeRequest {
            customer,
            method: method.clone(),
            amount,
            currency,
            off_session: true,
            // One key per obligation: a resubmission after an ambiguous
            // outcome settles on the original charge, not a second one.
            idempotency_key: format!("{enrollment_id}:{payment_number}"),
            description: Some(format!("payment {payment_number}")),
        };

        let receipt =
            match tokio::time::timeout(self.charge_timeout, processor.charge(request)).await {
                Err(_) => {
                    warn!(
                        tenant_id = %tenant_id,
                        enrollment_id = %enrollment_id,
                        payment_number,
                        "processor charge timed out; outcome unknown, awaiting webhook"
                    );
                    return Err(ChargeError::OutcomeUnknown);
                }
                Ok(Err(err)) => return Err(ChargeError::Processor(err)),
                Ok(Ok(receipt)) => receipt,
            };

        // Terminal success → record. The Exact-version append doubles as the
        // compare-and-set against concurrent mutations.
        self.record_success(
            tenant_id,
            enrollment_id,
            payment_number,
            Some(method.as_str().to_string()),
            receipt.charge_id.clone(),
            None,
        )?;

        info!(
            tenant_id = %tenant_id,
            enrollment_id = %enrollment_id,
            payment_number,
            charge_id = %receipt.charge_id,
            amount,
            "obligation charged"
        );

        Ok(ChargeOutcome::Succeeded {
            charge_id: receipt.charge_id,
        })
    }

    /// Settle an obligation from a processor webhook (out-of-band success).
    ///
    /// Idempotent: a redelivered webhook for an already-paid obligation is
    /// an `AlreadyPaid` no-op.
    pub async fn record_external_charge(
        &self,
        tenant_id: TenantId,
        enrollment_id: EnrollmentId,
        payment_number: u32,
        charge_id: ChargeRef,
        invoice_id: Option<InvoiceRef>,
    ) -> Result<ChargeOutcome, ChargeError> {
        let enrollment = self.load(tenant_id, enrollment_id)?;

        let obligation = enrollment
            .obligation(payment_number)
            .ok_or(ChargeError::ObligationNotFound(payment_number))?;

        match obligation.status {
            ObligationStatus::Paid => return Ok(ChargeOutcome::AlreadyPaid),
            ObligationStatus::Pending => {}
            other => return Err(ChargeError::NotChargeable(other)),
        }

        self.record_success(
            tenant_id,
            enrollment_id,
            payment_number,
            None,
            charge_id.clone(),
            invoice_id,
        )?;

        Ok(ChargeOutcome::Succeeded { charge_id })
    }

    fn load(
        &self,
        tenant_id: TenantId,
        enrollment_id: EnrollmentId,
    ) -> Result<Enrollment, ChargeError> {
        let enrollment = self
            .dispatcher
            .load::<Enrollment>(tenant_id, enrollment_id.0, |_t, id| {
                Enrollment::empty(EnrollmentId::new(id))
            })?;

        if !enrollment.exists() {
            return Err(ChargeError::EnrollmentNotFound);
        }
        Ok(enrollment)
    }

    fn record_success(
        &self,
        tenant_id: TenantId,
        enrollment_id: EnrollmentId,
        payment_number: u32,
        method_ref: Option<String>,
        charge_id: ChargeRef,
        invoice_id: Option<InvoiceRef>,
    ) -> Result<(), ChargeError> {
        self.dispatcher
            .dispatch::<Enrollment>(
                tenant_id,
                enrollment_id.0,
                ENROLLMENT_AGGREGATE,
                EnrollmentCommand::RecordChargeSuccess(RecordChargeSuccess {
                    tenant_id,
                    enrollment_id,
                    payment_number,
                    method_ref,
                    processor_charge_id: charge_id.as_str().to_string(),
                    processor_invoice_id: invoice_id.map(|i| i.as_str().to_string()),
                    occurred_at: Utc::now(),
                }),
                |_t, id| Enrollment::empty(EnrollmentId::new(id)),
            )
            .map(|_| ())
            .map_err(ChargeError::from)
    }
}

/// Resolution order when no method is supplied: processor default, else
/// first attached, else fail.
async fn resolve_method(
    processor: &dyn PaymentProcessor,
    customer: &CustomerRef,
) -> Result<PaymentMethodRef, ChargeError> {
    if let Some(method) = processor.default_payment_method(customer).await? {
        return Ok(method);
    }

    processor
        .list_payment_methods(customer)
        .await?
        .into_iter()
        .next()
        .ok_or(ChargeError::NoPaymentMethod)
}

/// The processor customer is keyed by enrollment.
pub(crate) fn customer_ref(enrollment_id: EnrollmentId) -> CustomerRef {
    CustomerRef::new(format!("enr_{enrollment_id}"))
}
