//! Plan (re-)selection: tear down stale external artifacts, regenerate the
//! schedule, replace the obligation set.
//!
//! The ordering is deliberate and must not be shuffled:
//! 1. guards (onboarding only, nothing paid)
//! 2. template validation against the product's allowed alternatives
//!    (client-supplied template ids are never trusted with pricing)
//! 3. best-effort external cleanup; failures are logged and counted,
//!    never fatal; a stale processor artifact is acceptable collateral
//! 4.-6. regenerate from the catalog's authoritative price and replace the
//!    obligation set in one event
//!
//! The whole operation is restartable: cleanup tolerates already-gone
//! artifacts, replacement is wholesale, and the final append is
//! optimistic-concurrency-checked.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{info, warn};

use coursepay_billing::{
    Enrollment, EnrollmentCommand, EnrollmentId, EnrollmentStatus, ObligationStatus,
    PaymentObligation, SelectPlan, generate_schedule,
};
use coursepay_catalog::{PlanCatalog, PlanTemplateId, PlanType};
use coursepay_core::{DomainError, TenantId};
use coursepay_events::{EventBus, EventEnvelope};
use coursepay_processor::{ChargeRef, InvoiceRef, InvoiceState, PaymentProcessor, ProcessorFactory};

use crate::billing_ops::ENROLLMENT_AGGREGATE;
use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::EventStore;

#[derive(Debug, Error)]
pub enum PlanSelectionError {
    #[error("enrollment not found")]
    EnrollmentNotFound,

    #[error("plan can only be selected while the enrollment is onboarding")]
    EnrollmentNotOnboarding(EnrollmentStatus),

    #[error("a paid obligation exists; re-selection is blocked")]
    PaidObligationExists,

    #[error("product not found in catalog")]
    ProductNotFound,

    #[error("plan template not found")]
    TemplateNotFound,

    #[error("plan template is not active")]
    TemplateInactive,

    #[error("plan template is not an allowed alternative for this product")]
    TemplateNotAllowed,

    /// Malformed template or a split the generator rejects.
    #[error("configuration error: {0}")]
    Config(DomainError),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<DispatchError> for PlanSelectionError {
    fn from(value: DispatchError) -> Self {
        match value {
            DispatchError::Concurrency(msg) => PlanSelectionError::Conflict(msg),
            DispatchError::NotFound => PlanSelectionError::EnrollmentNotFound,
            DispatchError::Validation(msg) | DispatchError::InvariantViolation(msg) => {
                PlanSelectionError::Internal(msg)
            }
            other => PlanSelectionError::Internal(format!("{other:?}")),
        }
    }
}

/// What a (re-)selection produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanSelectionReport {
    pub obligations: Vec<PaymentObligation>,
    /// External artifacts that could not be cleaned up (§ best-effort);
    /// observable for operators, not fatal.
    pub cleanup_failures: u32,
}

/// Coordinates plan (re-)selection for onboarding enrollments.
pub struct PlanSelectionCoordinator<S, B> {
    dispatcher: Arc<CommandDispatcher<S, B>>,
    processors: Arc<dyn ProcessorFactory>,
    catalog: Arc<dyn PlanCatalog>,
}

impl<S, B> PlanSelectionCoordinator<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(
        dispatcher: Arc<CommandDispatcher<S, B>>,
        processors: Arc<dyn ProcessorFactory>,
        catalog: Arc<dyn PlanCatalog>,
    ) -> Self {
        Self {
            dispatcher,
            processors,
            catalog,
        }
    }

    pub async fn select_plan(
        &self,
        tenant_id: TenantId,
        enrollment_id: EnrollmentId,
        plan_template_id: PlanTemplateId,
    ) -> Result<PlanSelectionReport, PlanSelectionError> {
        let enrollment = self
            .dispatcher
            .load::<Enrollment>(tenant_id, enrollment_id.0, |_t, id| {
                Enrollment::empty(EnrollmentId::new(id))
            })?;

        if !enrollment.exists() {
            return Err(PlanSelectionError::EnrollmentNotFound);
        }
        if enrollment.status() != EnrollmentStatus::Onboarding {
            return Err(PlanSelectionError::EnrollmentNotOnboarding(enrollment.status()));
        }
        if enrollment.has_paid_obligation() {
            return Err(PlanSelectionError::PaidObligationExists);
        }

        let product_id = enrollment
            .product_id()
            .ok_or_else(|| PlanSelectionError::Internal("enrollment has no product".to_string()))?;
        let product = self
            .catalog
            .product(tenant_id, product_id)
            .ok_or(PlanSelectionError::ProductNotFound)?;
        let template = self
            .catalog
            .template(tenant_id, plan_template_id)
            .ok_or(PlanSelectionError::TemplateNotFound)?;

        if !template.active {
            return Err(PlanSelectionError::TemplateInactive);
        }
        if !product.allows_plan(plan_template_id) {
            return Err(PlanSelectionError::TemplateNotAllowed);
        }
        template.validate().map_err(PlanSelectionError::Config)?;

        // Best-effort teardown of stale external artifacts. Paid obligations
        // are never touched (there are none past the guard above, but the
        // filter stays as the contract).
        let processor = self.processors.for_tenant(tenant_id);
        let mut cleanup_failures = 0u32;
        for obligation in enrollment
            .obligations()
            .iter()
            .filter(|o| o.status != ObligationStatus::Paid)
        {
            cleanup_failures += cleanup_obligation(
                processor.as_ref(),
                tenant_id,
                enrollment_id,
                obligation,
            )
            .await;
        }

        // Regenerate from the authoritative price and the original anchor.
        let anchor = enrollment.anchor_date().unwrap_or_else(Utc::now);
        let specs = generate_schedule(&template, product.price, anchor)
            .map_err(PlanSelectionError::Config)?;

        // Subscription totals cover the materialized window; fixed plans
        // bill the product price exactly.
        let total_amount = match template.plan_type {
            PlanType::Subscription => specs.iter().map(|s| s.amount).sum(),
            _ => product.price,
        };

        let obligations: Vec<PaymentObligation> =
            specs.iter().map(PaymentObligation::from_spec).collect();

        self.dispatcher.dispatch::<Enrollment>(
            tenant_id,
            enrollment_id.0,
            ENROLLMENT_AGGREGATE,
            EnrollmentCommand::SelectPlan(SelectPlan {
                tenant_id,
                enrollment_id,
                plan_template_id,
                plan_type: template.plan_type,
                obligations: specs,
                total_amount,
                occurred_at: Utc::now(),
            }),
            |_t, id| Enrollment::empty(EnrollmentId::new(id)),
        )?;

        info!(
            tenant_id = %tenant_id,
            enrollment_id = %enrollment_id,
            plan_template_id = %plan_template_id,
            obligation_count = obligations.len(),
            cleanup_failures,
            "plan selected"
        );

        Ok(PlanSelectionReport {
            obligations,
            cleanup_failures,
        })
    }
}

/// Cancel the obligation's payment intent and void/delete its invoice.
/// Returns the number of failures (logged, never propagated).
async fn cleanup_obligation(
    processor: &dyn PaymentProcessor,
    tenant_id: TenantId,
    enrollment_id: EnrollmentId,
    obligation: &PaymentObligation,
) -> u32 {
    let mut failures = 0;

    if let Some(charge_id) = &obligation.processor_charge_id {
        if let Err(err) = processor
            .cancel_payment_intent(&ChargeRef::new(charge_id.clone()))
            .await
        {
            failures += 1;
            warn!(
                tenant_id = %tenant_id,
                enrollment_id = %enrollment_id,
                payment_number = obligation.payment_number,
                charge_ref = %charge_id,
                error = %err,
                "failed to cancel external payment intent; continuing"
            );
        }
    }

    if let Some(invoice_id) = &obligation.processor_invoice_id {
        let invoice = InvoiceRef::new(invoice_id.clone());
        let result = match processor.invoice_state(&invoice).await {
            Ok(InvoiceState::Draft) => processor.delete_draft_invoice(&invoice).await,
            Ok(InvoiceState::Open) => processor.void_invoice(&invoice).await,
            // Paid/void invoices are left alone.
            Ok(_) => Ok(()),
            Err(err) => Err(err),
        };

        if let Err(err) = result {
            failures += 1;
            warn!(
                tenant_id = %tenant_id,
                enrollment_id = %enrollment_id,
                payment_number = obligation.payment_number,
                invoice_ref = %invoice_id,
                error = %err,
                "failed to void/delete external invoice; continuing"
            );
        }
    }

    failures
}
