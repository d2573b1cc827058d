use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::Value as JsonValue;

use coursepay_billing::{
    AgreementStatus, Enrollment, EnrollmentCommand, EnrollmentId, ObligationStatus,
    OpenEnrollment, RecordAgreementStatus, RecordExternalRefs,
};
use coursepay_catalog::{
    BillingFrequency, InMemoryPlanCatalog, PlanTemplate, PlanTemplateId, PlanType, Product,
    ProductId,
};
use coursepay_core::{AggregateId, Currency, TenantId};
use coursepay_events::{EventEnvelope, InMemoryEventBus};
use coursepay_processor::{
    ChargeReceipt, ChargeRequest, ChargeRef, CustomerRef, InMemoryProcessor, InvoiceRef,
    InvoiceState, PaymentMethodRef, PaymentProcessor, ProcessorError, ScriptedOutcome,
    StaticProcessorFactory,
};

use crate::billing_ops::charge::{ChargeError, ChargeOrchestrator, ChargeOutcome, customer_ref};
use crate::billing_ops::plan_selection::{PlanSelectionCoordinator, PlanSelectionError};
use crate::billing_ops::ENROLLMENT_AGGREGATE;
use crate::command_dispatcher::CommandDispatcher;
use crate::event_store::InMemoryEventStore;

type Dispatcher =
    CommandDispatcher<Arc<InMemoryEventStore>, Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>>;

struct Harness {
    dispatcher: Arc<Dispatcher>,
    processor: Arc<InMemoryProcessor>,
    catalog: Arc<InMemoryPlanCatalog>,
    orchestrator: ChargeOrchestrator<
        Arc<InMemoryEventStore>,
        Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>,
    >,
    coordinator: PlanSelectionCoordinator<
        Arc<InMemoryEventStore>,
        Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>,
    >,
    tenant_id: TenantId,
}

fn anchor() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
}

fn harness() -> Harness {
    let store = Arc::new(InMemoryEventStore::new());
    let bus: Arc<InMemoryEventBus<EventEnvelope<JsonValue>>> = Arc::new(InMemoryEventBus::new());
    let dispatcher = Arc::new(CommandDispatcher::new(store, bus));

    let processor = Arc::new(InMemoryProcessor::new());
    let factory = Arc::new(StaticProcessorFactory::new(processor.clone()));
    let catalog = Arc::new(InMemoryPlanCatalog::new());

    let orchestrator = ChargeOrchestrator::new(dispatcher.clone(), factory.clone())
        .with_charge_timeout(Duration::from_secs(1));
    let coordinator =
        PlanSelectionCoordinator::new(dispatcher.clone(), factory, catalog.clone());

    Harness {
        dispatcher,
        processor,
        catalog,
        orchestrator,
        coordinator,
        tenant_id: TenantId::new(),
    }
}

impl Harness {
    fn deposit_template(&self, deposit: u64, count: u32) -> PlanTemplate {
        let template = PlanTemplate {
            id: PlanTemplateId::new(),
            name: "Deposit + installments".to_string(),
            plan_type: PlanType::DepositInstallments,
            deposit_amount: Some(deposit),
            installment_count: Some(count),
            frequency: Some(BillingFrequency::Monthly),
            period_amount: None,
            currency: Currency::usd(),
            active: true,
        };
        self.catalog.upsert_template(self.tenant_id, template.clone());
        template
    }

    fn product(&self, price: u64, allowed: Vec<PlanTemplateId>) -> Product {
        let product = Product {
            id: ProductId::new(),
            name: "Course".to_string(),
            price,
            currency: Currency::usd(),
            allowed_plan_ids: allowed,
        };
        self.catalog.upsert_product(self.tenant_id, product.clone());
        product
    }

    fn open_enrollment(&self, product: &Product, linked_parent: bool) -> EnrollmentId {
        let aggregate_id = AggregateId::new();
        let enrollment_id = EnrollmentId::new(aggregate_id);

        self.dispatcher
            .dispatch::<Enrollment>(
                self.tenant_id,
                aggregate_id,
                ENROLLMENT_AGGREGATE,
                EnrollmentCommand::OpenEnrollment(OpenEnrollment {
                    tenant_id: self.tenant_id,
                    enrollment_id,
                    product_id: product.id,
                    total_amount: product.price,
                    currency: product.currency.clone(),
                    anchor_date: Some(anchor()),
                    linked_parent,
                    occurred_at: anchor(),
                }),
                |_t, id| Enrollment::empty(EnrollmentId::new(id)),
            )
            .unwrap();

        enrollment_id
    }

    /// Product + template + enrollment + selected plan, ready to charge.
    async fn enrolled_with_plan(&self) -> EnrollmentId {
        let template = self.deposit_template(5000, 2);
        let product = self.product(25000, vec![template.id]);
        let enrollment_id = self.open_enrollment(&product, false);

        self.coordinator
            .select_plan(self.tenant_id, enrollment_id, template.id)
            .await
            .unwrap();

        enrollment_id
    }

    fn load(&self, enrollment_id: EnrollmentId) -> Enrollment {
        self.dispatcher
            .load::<Enrollment>(self.tenant_id, enrollment_id.0, |_t, id| {
                Enrollment::empty(EnrollmentId::new(id))
            })
            .unwrap()
    }

    fn seed_default_method(&self, enrollment_id: EnrollmentId) {
        self.processor.seed_method(
            &customer_ref(enrollment_id),
            PaymentMethodRef::new("pm_default"),
            true,
        );
    }
}

// ─── Charge orchestration ────────────────────────────────────────────────────

#[tokio::test]
async fn charge_succeeds_and_updates_obligation_and_ledger() {
    let h = harness();
    let enrollment_id = h.enrolled_with_plan().await;
    h.seed_default_method(enrollment_id);

    let outcome = h
        .orchestrator
        .charge_obligation(h.tenant_id, enrollment_id, 1, None)
        .await
        .unwrap();
    assert!(matches!(outcome, ChargeOutcome::Succeeded { .. }));

    let enrollment = h.load(enrollment_id);
    let obligation = enrollment.obligation(1).unwrap();
    assert_eq!(obligation.status, ObligationStatus::Paid);
    assert!(obligation.paid_date.is_some());
    assert!(obligation.processor_charge_id.is_some());
    assert_eq!(enrollment.paid_amount(), 5000);
}

#[tokio::test]
async fn second_charge_is_already_paid_with_zero_processor_calls() {
    let h = harness();
    let enrollment_id = h.enrolled_with_plan().await;
    h.seed_default_method(enrollment_id);

    h.orchestrator
        .charge_obligation(h.tenant_id, enrollment_id, 1, None)
        .await
        .unwrap();
    let calls_after_first = h.processor.charge_call_count();
    assert_eq!(calls_after_first, 1);

    // Both retries short-circuit before the processor.
    for _ in 0..2 {
        let outcome = h
            .orchestrator
            .charge_obligation(h.tenant_id, enrollment_id, 1, None)
            .await
            .unwrap();
        assert_eq!(outcome, ChargeOutcome::AlreadyPaid);
    }
    assert_eq!(h.processor.charge_call_count(), calls_after_first);
}

#[tokio::test]
async fn decline_leaves_obligation_and_ledger_untouched() {
    let h = harness();
    let enrollment_id = h.enrolled_with_plan().await;
    h.seed_default_method(enrollment_id);

    let before = h.load(enrollment_id);

    h.processor
        .script_charge(ScriptedOutcome::Fail(ProcessorError::Declined {
            code: "card_declined".to_string(),
            message: "insufficient funds".to_string(),
        }));

    let err = h
        .orchestrator
        .charge_obligation(h.tenant_id, enrollment_id, 1, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ChargeError::Processor(ProcessorError::Declined { .. })
    ));

    // Byte-for-byte unchanged: status, paid_date, ledger.
    let after = h.load(enrollment_id);
    assert_eq!(before, after);
    assert_eq!(after.obligation(1).unwrap().status, ObligationStatus::Pending);
    assert_eq!(after.paid_amount(), 0);
}

#[tokio::test]
async fn missing_payment_method_is_classified() {
    let h = harness();
    let enrollment_id = h.enrolled_with_plan().await;
    // No method seeded.

    let err = h
        .orchestrator
        .charge_obligation(h.tenant_id, enrollment_id, 1, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ChargeError::NoPaymentMethod));
}

#[tokio::test]
async fn explicit_method_skips_resolution() {
    let h = harness();
    let enrollment_id = h.enrolled_with_plan().await;

    let outcome = h
        .orchestrator
        .charge_obligation(
            h.tenant_id,
            enrollment_id,
            1,
            Some(PaymentMethodRef::new("pm_supplied")),
        )
        .await
        .unwrap();
    assert!(matches!(outcome, ChargeOutcome::Succeeded { .. }));

    // No default/list lookups happened.
    assert!(h.processor.calls().iter().all(|c| {
        !matches!(
            c,
            coursepay_processor::ProcessorCall::DefaultPaymentMethod(_)
                | coursepay_processor::ProcessorCall::ListPaymentMethods(_)
        )
    }));
}

#[tokio::test]
async fn linked_parent_enrollment_is_a_noop_success() {
    let h = harness();
    let template = h.deposit_template(5000, 2);
    let product = h.product(25000, vec![template.id]);
    let enrollment_id = h.open_enrollment(&product, true);
    h.coordinator
        .select_plan(h.tenant_id, enrollment_id, template.id)
        .await
        .unwrap();

    let outcome = h
        .orchestrator
        .charge_obligation(h.tenant_id, enrollment_id, 1, None)
        .await
        .unwrap();
    assert_eq!(outcome, ChargeOutcome::SkippedLinkedEnrollment);
    assert_eq!(h.processor.charge_call_count(), 0);
}

#[tokio::test]
async fn incomplete_agreement_blocks_charging() {
    let h = harness();
    let enrollment_id = h.enrolled_with_plan().await;
    h.seed_default_method(enrollment_id);

    h.dispatcher
        .dispatch::<Enrollment>(
            h.tenant_id,
            enrollment_id.0,
            ENROLLMENT_AGGREGATE,
            EnrollmentCommand::RecordAgreementStatus(RecordAgreementStatus {
                tenant_id: h.tenant_id,
                enrollment_id,
                status: AgreementStatus::Sent,
                occurred_at: Utc::now(),
            }),
            |_t, id| Enrollment::empty(EnrollmentId::new(id)),
        )
        .unwrap();

    let err = h
        .orchestrator
        .charge_obligation(h.tenant_id, enrollment_id, 1, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ChargeError::AgreementIncomplete));
    assert_eq!(h.processor.charge_call_count(), 0);
}

/// A processor that never settles, for timeout tests.
struct HangingProcessor;

#[async_trait]
impl PaymentProcessor for HangingProcessor {
    async fn charge(&self, _request: ChargeRequest) -> Result<ChargeReceipt, ProcessorError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        unreachable!("test timeout fires first")
    }

    async fn cancel_payment_intent(&self, _: &ChargeRef) -> Result<(), ProcessorError> {
        Ok(())
    }

    async fn invoice_state(&self, _: &InvoiceRef) -> Result<InvoiceState, ProcessorError> {
        Ok(InvoiceState::Open)
    }

    async fn void_invoice(&self, _: &InvoiceRef) -> Result<(), ProcessorError> {
        Ok(())
    }

    async fn delete_draft_invoice(&self, _: &InvoiceRef) -> Result<(), ProcessorError> {
        Ok(())
    }

    async fn default_payment_method(
        &self,
        _: &CustomerRef,
    ) -> Result<Option<PaymentMethodRef>, ProcessorError> {
        Ok(Some(PaymentMethodRef::new("pm_slow")))
    }

    async fn list_payment_methods(
        &self,
        _: &CustomerRef,
    ) -> Result<Vec<PaymentMethodRef>, ProcessorError> {
        Ok(vec![])
    }

    async fn attach_payment_method(
        &self,
        _: &CustomerRef,
        _: &PaymentMethodRef,
    ) -> Result<(), ProcessorError> {
        Ok(())
    }
}

#[tokio::test]
async fn timeout_is_surfaced_as_unknown_outcome_without_mutation() {
    let h = harness();
    let enrollment_id = h.enrolled_with_plan().await;

    let orchestrator = ChargeOrchestrator::new(
        h.dispatcher.clone(),
        Arc::new(StaticProcessorFactory::new(Arc::new(HangingProcessor))),
    )
    .with_charge_timeout(Duration::from_millis(100));

    let err = orchestrator
        .charge_obligation(h.tenant_id, enrollment_id, 1, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ChargeError::OutcomeUnknown));

    let enrollment = h.load(enrollment_id);
    assert_eq!(enrollment.obligation(1).unwrap().status, ObligationStatus::Pending);
}

#[tokio::test]
async fn webhook_settlement_is_idempotent() {
    let h = harness();
    let enrollment_id = h.enrolled_with_plan().await;

    let outcome = h
        .orchestrator
        .record_external_charge(
            h.tenant_id,
            enrollment_id,
            1,
            ChargeRef::new("pi_webhook"),
            None,
        )
        .await
        .unwrap();
    assert!(matches!(outcome, ChargeOutcome::Succeeded { .. }));

    let outcome = h
        .orchestrator
        .record_external_charge(
            h.tenant_id,
            enrollment_id,
            1,
            ChargeRef::new("pi_webhook"),
            None,
        )
        .await
        .unwrap();
    assert_eq!(outcome, ChargeOutcome::AlreadyPaid);

    let enrollment = h.load(enrollment_id);
    assert_eq!(
        enrollment.obligation(1).unwrap().processor_charge_id.as_deref(),
        Some("pi_webhook")
    );
}

// ─── Plan selection ──────────────────────────────────────────────────────────

#[tokio::test]
async fn selecting_a_plan_installs_the_generated_schedule() {
    let h = harness();
    let template = h.deposit_template(5000, 2);
    let product = h.product(25000, vec![template.id]);
    let enrollment_id = h.open_enrollment(&product, false);

    let report = h
        .coordinator
        .select_plan(h.tenant_id, enrollment_id, template.id)
        .await
        .unwrap();

    assert_eq!(report.obligations.len(), 3);
    assert_eq!(report.cleanup_failures, 0);
    assert_eq!(
        report.obligations.iter().map(|o| o.amount).sum::<u64>(),
        25000
    );

    let enrollment = h.load(enrollment_id);
    assert_eq!(enrollment.obligations().len(), 3);
    assert_eq!(enrollment.next_payment_date(), Some(anchor()));
}

#[tokio::test]
async fn reselection_replaces_the_schedule_when_nothing_is_paid() {
    let h = harness();
    let first = h.deposit_template(5000, 2);
    let second = h.deposit_template(10000, 4);
    let product = h.product(25000, vec![first.id, second.id]);
    let enrollment_id = h.open_enrollment(&product, false);

    h.coordinator
        .select_plan(h.tenant_id, enrollment_id, first.id)
        .await
        .unwrap();
    let report = h
        .coordinator
        .select_plan(h.tenant_id, enrollment_id, second.id)
        .await
        .unwrap();

    assert_eq!(report.obligations.len(), 5);

    let enrollment = h.load(enrollment_id);
    assert_eq!(enrollment.obligations().len(), 5);
    assert_eq!(enrollment.plan().unwrap().plan_template_id, second.id);
    assert!(enrollment
        .obligations()
        .iter()
        .all(|o| o.status == ObligationStatus::Pending));
}

#[tokio::test]
async fn reselection_never_deletes_a_paid_obligation() {
    let h = harness();
    let first = h.deposit_template(5000, 2);
    let second = h.deposit_template(10000, 4);
    let product = h.product(25000, vec![first.id, second.id]);
    let enrollment_id = h.open_enrollment(&product, false);
    h.coordinator
        .select_plan(h.tenant_id, enrollment_id, first.id)
        .await
        .unwrap();
    h.seed_default_method(enrollment_id);
    h.orchestrator
        .charge_obligation(h.tenant_id, enrollment_id, 1, None)
        .await
        .unwrap();

    let err = h
        .coordinator
        .select_plan(h.tenant_id, enrollment_id, second.id)
        .await
        .unwrap_err();
    assert!(matches!(err, PlanSelectionError::PaidObligationExists));

    let enrollment = h.load(enrollment_id);
    assert_eq!(enrollment.obligation(1).unwrap().status, ObligationStatus::Paid);
    assert_eq!(enrollment.obligations().len(), 3);
}

#[tokio::test]
async fn disallowed_and_inactive_templates_are_rejected() {
    let h = harness();
    let allowed = h.deposit_template(5000, 2);
    let not_allowed = h.deposit_template(1000, 10);
    let product = h.product(25000, vec![allowed.id]);
    let enrollment_id = h.open_enrollment(&product, false);

    let err = h
        .coordinator
        .select_plan(h.tenant_id, enrollment_id, not_allowed.id)
        .await
        .unwrap_err();
    assert!(matches!(err, PlanSelectionError::TemplateNotAllowed));

    let mut inactive = h.deposit_template(5000, 2);
    inactive.active = false;
    h.catalog.upsert_template(h.tenant_id, inactive.clone());
    let product2 = h.product(25000, vec![inactive.id]);
    let enrollment2 = h.open_enrollment(&product2, false);

    let err = h
        .coordinator
        .select_plan(h.tenant_id, enrollment2, inactive.id)
        .await
        .unwrap_err();
    assert!(matches!(err, PlanSelectionError::TemplateInactive));
}

#[tokio::test]
async fn external_cleanup_is_best_effort_and_observable() {
    let h = harness();
    let first = h.deposit_template(5000, 2);
    let second = h.deposit_template(10000, 4);
    let product = h.product(25000, vec![first.id, second.id]);
    let enrollment_id = h.open_enrollment(&product, false);
    h.coordinator
        .select_plan(h.tenant_id, enrollment_id, first.id)
        .await
        .unwrap();

    // The processor mirrored obligation #1 as an intent + open invoice and
    // obligation #2 as a draft invoice.
    h.processor.seed_invoice(InvoiceRef::new("in_open"), InvoiceState::Open);
    h.processor.seed_invoice(InvoiceRef::new("in_draft"), InvoiceState::Draft);
    for (number, charge, invoice) in [
        (1u32, Some("pi_stale"), Some("in_open")),
        (2u32, None, Some("in_draft")),
    ] {
        h.dispatcher
            .dispatch::<Enrollment>(
                h.tenant_id,
                enrollment_id.0,
                ENROLLMENT_AGGREGATE,
                EnrollmentCommand::RecordExternalRefs(RecordExternalRefs {
                    tenant_id: h.tenant_id,
                    enrollment_id,
                    payment_number: number,
                    processor_charge_id: charge.map(str::to_string),
                    processor_invoice_id: invoice.map(str::to_string),
                    occurred_at: Utc::now(),
                }),
                |_t, id| Enrollment::empty(EnrollmentId::new(id)),
            )
            .unwrap();
    }

    let report = h
        .coordinator
        .select_plan(h.tenant_id, enrollment_id, second.id)
        .await
        .unwrap();
    assert_eq!(report.cleanup_failures, 0);

    // Open invoice voided, draft invoice deleted, intent cancelled.
    assert_eq!(
        h.processor.invoice(&InvoiceRef::new("in_open")),
        Some(InvoiceState::Void)
    );
    assert_eq!(h.processor.invoice(&InvoiceRef::new("in_draft")), None);
    assert!(h.processor.calls().iter().any(|c| matches!(
        c,
        coursepay_processor::ProcessorCall::CancelPaymentIntent(r) if r.as_str() == "pi_stale"
    )));
}

#[tokio::test]
async fn cleanup_failures_do_not_block_reselection() {
    let h = harness();
    let first = h.deposit_template(5000, 2);
    let second = h.deposit_template(10000, 4);
    let product = h.product(25000, vec![first.id, second.id]);
    let enrollment_id = h.open_enrollment(&product, false);
    h.coordinator
        .select_plan(h.tenant_id, enrollment_id, first.id)
        .await
        .unwrap();

    h.dispatcher
        .dispatch::<Enrollment>(
            h.tenant_id,
            enrollment_id.0,
            ENROLLMENT_AGGREGATE,
            EnrollmentCommand::RecordExternalRefs(RecordExternalRefs {
                tenant_id: h.tenant_id,
                enrollment_id,
                payment_number: 1,
                processor_charge_id: Some("pi_stale".to_string()),
                processor_invoice_id: None,
                occurred_at: Utc::now(),
            }),
            |_t, id| Enrollment::empty(EnrollmentId::new(id)),
        )
        .unwrap();

    h.processor.fail_cleanup(true);

    let report = h
        .coordinator
        .select_plan(h.tenant_id, enrollment_id, second.id)
        .await
        .unwrap();

    // Stale external artifacts are acceptable collateral; observable, not
    // fatal.
    assert_eq!(report.cleanup_failures, 1);
    assert_eq!(h.load(enrollment_id).obligations().len(), 5);
}
