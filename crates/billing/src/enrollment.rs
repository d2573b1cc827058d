use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use coursepay_catalog::{PlanTemplateId, PlanType, ProductId};
use coursepay_core::{Aggregate, AggregateId, AggregateRoot, Currency, DomainError, TenantId};
use coursepay_events::Event;

use crate::schedule::{ObligationSpec, PaymentType};

/// Enrollment identifier (tenant-scoped via `tenant_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnrollmentId(pub AggregateId);

impl EnrollmentId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for EnrollmentId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl From<EnrollmentId> for AggregateId {
    fn from(value: EnrollmentId) -> Self {
        value.0
    }
}

/// Enrollment lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnrollmentStatus {
    Onboarding,
    Active,
    Completed,
    Cancelled,
}

/// E-signature workflow status, as reported by the agreement collaborator's
/// callback. Read-only input: only `Completed` (or no agreement on file)
/// permits charging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgreementStatus {
    Sent,
    Delivered,
    Completed,
    Declined,
    Voided,
}

/// Aggregate payment state derived from the obligation set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Unpaid,
    Partial,
    Paid,
}

/// Persisted obligation status.
///
/// "Overdue" is deliberately absent: it is a view computed against `now` at
/// query time (`is_overdue`), never stored, so it cannot go stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObligationStatus {
    Pending,
    Paid,
    Refunded,
    Cancelled,
}

/// One concrete expected payment tied to an enrollment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentObligation {
    /// 1-based ordering key, unique and contiguous per enrollment.
    pub payment_number: u32,
    pub payment_type: PaymentType,
    /// Amount in minor units.
    pub amount: u64,
    pub currency: Currency,
    pub scheduled_date: DateTime<Utc>,
    pub paid_date: Option<DateTime<Utc>>,
    pub status: ObligationStatus,
    /// External processor payment-intent/charge reference.
    pub processor_charge_id: Option<String>,
    /// External processor invoice reference.
    pub processor_invoice_id: Option<String>,
}

impl PaymentObligation {
    /// Build a pending obligation from a generated spec.
    pub fn from_spec(spec: &ObligationSpec) -> Self {
        Self {
            payment_number: spec.payment_number,
            payment_type: spec.payment_type,
            amount: spec.amount,
            currency: spec.currency.clone(),
            scheduled_date: spec.scheduled_date,
            paid_date: None,
            status: ObligationStatus::Pending,
            processor_charge_id: None,
            processor_invoice_id: None,
        }
    }

    /// Query-time overdue view: pending and scheduled before `now`.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status == ObligationStatus::Pending && self.scheduled_date < now
    }
}

/// The plan currently selected for an enrollment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSnapshot {
    pub plan_template_id: PlanTemplateId,
    pub plan_type: PlanType,
}

/// Derived ledger fields, always recomputed from the obligation set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub total_amount: u64,
    pub paid_amount: u64,
    pub payment_status: PaymentStatus,
    pub next_payment_date: Option<DateTime<Utc>>,
}

/// Derive the ledger from scratch.
///
/// `paid_amount` is exactly the sum of paid obligations' amounts, clamped
/// to `total_amount`. `next_payment_date` is the scheduled date of the
/// lowest-numbered pending obligation. Every mutator goes through this one
/// function, so the ledger can never drift from its source obligations.
pub fn derive_ledger(total_amount: u64, obligations: &[PaymentObligation]) -> LedgerSnapshot {
    let paid_sum: u128 = obligations
        .iter()
        .filter(|o| o.status == ObligationStatus::Paid)
        .map(|o| o.amount as u128)
        .sum();
    let paid_amount = paid_sum.min(total_amount as u128) as u64;

    let payment_status = if total_amount > 0 && paid_amount >= total_amount {
        PaymentStatus::Paid
    } else if paid_amount > 0 {
        PaymentStatus::Partial
    } else {
        PaymentStatus::Unpaid
    };

    let next_payment_date = obligations
        .iter()
        .filter(|o| o.status == ObligationStatus::Pending)
        .min_by_key(|o| o.payment_number)
        .map(|o| o.scheduled_date);

    LedgerSnapshot {
        total_amount,
        paid_amount,
        payment_status,
        next_payment_date,
    }
}

/// Aggregate root: Enrollment.
///
/// Owns the plan reference, the full ordered obligation set, the agreement
/// status, and the derived payment ledger. All external-processor IO lives
/// in application services; this type is pure decision + evolution logic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enrollment {
    id: EnrollmentId,
    tenant_id: Option<TenantId>,
    product_id: Option<ProductId>,
    status: EnrollmentStatus,
    /// An enrollment standing in for another (multi-child billing). Must
    /// never be charged directly.
    linked_parent: bool,
    agreement_status: Option<AgreementStatus>,
    plan: Option<PlanSnapshot>,
    anchor_date: Option<DateTime<Utc>>,
    currency: Currency,
    obligations: Vec<PaymentObligation>,
    ledger: LedgerSnapshot,
    version: u64,
    created: bool,
}

impl Enrollment {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: EnrollmentId) -> Self {
        Self {
            id,
            tenant_id: None,
            product_id: None,
            status: EnrollmentStatus::Onboarding,
            linked_parent: false,
            agreement_status: None,
            plan: None,
            anchor_date: None,
            currency: Currency::usd(),
            obligations: Vec::new(),
            ledger: LedgerSnapshot {
                total_amount: 0,
                paid_amount: 0,
                payment_status: PaymentStatus::Unpaid,
                next_payment_date: None,
            },
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> EnrollmentId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn product_id(&self) -> Option<ProductId> {
        self.product_id
    }

    pub fn status(&self) -> EnrollmentStatus {
        self.status
    }

    pub fn is_linked_parent(&self) -> bool {
        self.linked_parent
    }

    pub fn agreement_status(&self) -> Option<AgreementStatus> {
        self.agreement_status
    }

    pub fn plan(&self) -> Option<&PlanSnapshot> {
        self.plan.as_ref()
    }

    pub fn anchor_date(&self) -> Option<DateTime<Utc>> {
        self.anchor_date
    }

    pub fn currency(&self) -> &Currency {
        &self.currency
    }

    pub fn obligations(&self) -> &[PaymentObligation] {
        &self.obligations
    }

    pub fn obligation(&self, payment_number: u32) -> Option<&PaymentObligation> {
        self.obligations
            .iter()
            .find(|o| o.payment_number == payment_number)
    }

    /// Lowest-numbered pending obligation, if any.
    pub fn next_pending(&self) -> Option<&PaymentObligation> {
        self.obligations
            .iter()
            .filter(|o| o.status == ObligationStatus::Pending)
            .min_by_key(|o| o.payment_number)
    }

    pub fn ledger(&self) -> &LedgerSnapshot {
        &self.ledger
    }

    pub fn total_amount(&self) -> u64 {
        self.ledger.total_amount
    }

    pub fn paid_amount(&self) -> u64 {
        self.ledger.paid_amount
    }

    pub fn payment_status(&self) -> PaymentStatus {
        self.ledger.payment_status
    }

    pub fn next_payment_date(&self) -> Option<DateTime<Utc>> {
        self.ledger.next_payment_date
    }

    pub fn has_paid_obligation(&self) -> bool {
        self.obligations
            .iter()
            .any(|o| o.status == ObligationStatus::Paid)
    }

    /// Invariant: charging is gated on the agreement. No agreement on file
    /// means the product doesn't require one.
    pub fn agreement_allows_charge(&self) -> bool {
        matches!(self.agreement_status, None | Some(AgreementStatus::Completed))
    }

    pub fn exists(&self) -> bool {
        self.created
    }
}

impl AggregateRoot for Enrollment {
    type Id = EnrollmentId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

/// Command: OpenEnrollment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenEnrollment {
    pub tenant_id: TenantId,
    pub enrollment_id: EnrollmentId,
    pub product_id: ProductId,
    /// Authoritative total from the product catalog, minor units.
    pub total_amount: u64,
    pub currency: Currency,
    pub anchor_date: Option<DateTime<Utc>>,
    pub linked_parent: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SelectPlan.
///
/// Carries the already-generated schedule; the aggregate re-checks the
/// schedule invariants before accepting it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectPlan {
    pub tenant_id: TenantId,
    pub enrollment_id: EnrollmentId,
    pub plan_template_id: PlanTemplateId,
    pub plan_type: PlanType,
    pub obligations: Vec<ObligationSpec>,
    pub total_amount: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordChargeSuccess.
///
/// Issued by the charge orchestrator only after the processor reported a
/// terminal success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordChargeSuccess {
    pub tenant_id: TenantId,
    pub enrollment_id: EnrollmentId,
    pub payment_number: u32,
    pub method_ref: Option<String>,
    pub processor_charge_id: String,
    pub processor_invoice_id: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelObligation (admin action on a pending obligation).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelObligation {
    pub tenant_id: TenantId,
    pub enrollment_id: EnrollmentId,
    pub payment_number: u32,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RefundObligation (paid → refunded).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundObligation {
    pub tenant_id: TenantId,
    pub enrollment_id: EnrollmentId,
    pub payment_number: u32,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordExternalRefs.
///
/// The processor mirrors obligations as payment intents / draft invoices
/// ahead of settlement (checkout sessions, invoice webhooks). Recording the
/// refs on the pending obligation is what lets plan re-selection clean the
/// external artifacts up later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordExternalRefs {
    pub tenant_id: TenantId,
    pub enrollment_id: EnrollmentId,
    pub payment_number: u32,
    pub processor_charge_id: Option<String>,
    pub processor_invoice_id: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordAgreementStatus (e-signature callback).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordAgreementStatus {
    pub tenant_id: TenantId,
    pub enrollment_id: EnrollmentId,
    pub status: AgreementStatus,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ActivateEnrollment (onboarding complete).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivateEnrollment {
    pub tenant_id: TenantId,
    pub enrollment_id: EnrollmentId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AppendSubscriptionPeriod (recurring materialization job).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendSubscriptionPeriod {
    pub tenant_id: TenantId,
    pub enrollment_id: EnrollmentId,
    pub period: ObligationSpec,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnrollmentCommand {
    OpenEnrollment(OpenEnrollment),
    SelectPlan(SelectPlan),
    RecordChargeSuccess(RecordChargeSuccess),
    RecordExternalRefs(RecordExternalRefs),
    CancelObligation(CancelObligation),
    RefundObligation(RefundObligation),
    RecordAgreementStatus(RecordAgreementStatus),
    ActivateEnrollment(ActivateEnrollment),
    AppendSubscriptionPeriod(AppendSubscriptionPeriod),
}

// ─────────────────────────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────────────────────────

/// Event: EnrollmentOpened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollmentOpened {
    pub tenant_id: TenantId,
    pub enrollment_id: EnrollmentId,
    pub product_id: ProductId,
    pub total_amount: u64,
    pub currency: Currency,
    pub anchor_date: Option<DateTime<Utc>>,
    pub linked_parent: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PlanSelected.
///
/// Atomically replaces the enrollment's obligation set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSelected {
    pub tenant_id: TenantId,
    pub enrollment_id: EnrollmentId,
    pub plan_template_id: PlanTemplateId,
    pub plan_type: PlanType,
    pub obligations: Vec<PaymentObligation>,
    pub ledger: LedgerSnapshot,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ObligationCharged.
///
/// Doubles as the audit payment record: amount, method, processor ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObligationCharged {
    pub tenant_id: TenantId,
    pub enrollment_id: EnrollmentId,
    pub payment_number: u32,
    pub amount: u64,
    pub currency: Currency,
    pub method_ref: Option<String>,
    pub processor_charge_id: String,
    pub processor_invoice_id: Option<String>,
    pub paid_date: DateTime<Utc>,
    pub ledger: LedgerSnapshot,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ExternalRefsRecorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalRefsRecorded {
    pub tenant_id: TenantId,
    pub enrollment_id: EnrollmentId,
    pub payment_number: u32,
    pub processor_charge_id: Option<String>,
    pub processor_invoice_id: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ObligationCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObligationCancelled {
    pub tenant_id: TenantId,
    pub enrollment_id: EnrollmentId,
    pub payment_number: u32,
    pub reason: Option<String>,
    pub ledger: LedgerSnapshot,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ObligationRefunded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObligationRefunded {
    pub tenant_id: TenantId,
    pub enrollment_id: EnrollmentId,
    pub payment_number: u32,
    pub amount: u64,
    pub reason: Option<String>,
    pub ledger: LedgerSnapshot,
    pub occurred_at: DateTime<Utc>,
}

/// Event: AgreementStatusRecorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgreementStatusRecorded {
    pub tenant_id: TenantId,
    pub enrollment_id: EnrollmentId,
    pub status: AgreementStatus,
    pub occurred_at: DateTime<Utc>,
}

/// Event: EnrollmentActivated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollmentActivated {
    pub tenant_id: TenantId,
    pub enrollment_id: EnrollmentId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: SubscriptionPeriodAppended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionPeriodAppended {
    pub tenant_id: TenantId,
    pub enrollment_id: EnrollmentId,
    pub obligation: PaymentObligation,
    pub ledger: LedgerSnapshot,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnrollmentEvent {
    EnrollmentOpened(EnrollmentOpened),
    PlanSelected(PlanSelected),
    ObligationCharged(ObligationCharged),
    ExternalRefsRecorded(ExternalRefsRecorded),
    ObligationCancelled(ObligationCancelled),
    ObligationRefunded(ObligationRefunded),
    AgreementStatusRecorded(AgreementStatusRecorded),
    EnrollmentActivated(EnrollmentActivated),
    SubscriptionPeriodAppended(SubscriptionPeriodAppended),
}

impl Event for EnrollmentEvent {
    fn event_type(&self) -> &'static str {
        match self {
            EnrollmentEvent::EnrollmentOpened(_) => "billing.enrollment.opened",
            EnrollmentEvent::PlanSelected(_) => "billing.enrollment.plan_selected",
            EnrollmentEvent::ObligationCharged(_) => "billing.enrollment.obligation_charged",
            EnrollmentEvent::ExternalRefsRecorded(_) => "billing.enrollment.external_refs_recorded",
            EnrollmentEvent::ObligationCancelled(_) => "billing.enrollment.obligation_cancelled",
            EnrollmentEvent::ObligationRefunded(_) => "billing.enrollment.obligation_refunded",
            EnrollmentEvent::AgreementStatusRecorded(_) => "billing.enrollment.agreement_status",
            EnrollmentEvent::EnrollmentActivated(_) => "billing.enrollment.activated",
            EnrollmentEvent::SubscriptionPeriodAppended(_) => {
                "billing.enrollment.subscription_period_appended"
            }
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            EnrollmentEvent::EnrollmentOpened(e) => e.occurred_at,
            EnrollmentEvent::PlanSelected(e) => e.occurred_at,
            EnrollmentEvent::ObligationCharged(e) => e.occurred_at,
            EnrollmentEvent::ExternalRefsRecorded(e) => e.occurred_at,
            EnrollmentEvent::ObligationCancelled(e) => e.occurred_at,
            EnrollmentEvent::ObligationRefunded(e) => e.occurred_at,
            EnrollmentEvent::AgreementStatusRecorded(e) => e.occurred_at,
            EnrollmentEvent::EnrollmentActivated(e) => e.occurred_at,
            EnrollmentEvent::SubscriptionPeriodAppended(e) => e.occurred_at,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Aggregate behavior
// ─────────────────────────────────────────────────────────────────────────────

impl Aggregate for Enrollment {
    type Command = EnrollmentCommand;
    type Event = EnrollmentEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            EnrollmentEvent::EnrollmentOpened(e) => {
                self.id = e.enrollment_id;
                self.tenant_id = Some(e.tenant_id);
                self.product_id = Some(e.product_id);
                self.status = EnrollmentStatus::Onboarding;
                self.linked_parent = e.linked_parent;
                self.anchor_date = e.anchor_date;
                self.currency = e.currency.clone();
                self.obligations = Vec::new();
                self.ledger = derive_ledger(e.total_amount, &self.obligations);
                self.created = true;
            }
            EnrollmentEvent::PlanSelected(e) => {
                self.plan = Some(PlanSnapshot {
                    plan_template_id: e.plan_template_id,
                    plan_type: e.plan_type,
                });
                self.obligations = e.obligations.clone();
                self.ledger = derive_ledger(e.ledger.total_amount, &self.obligations);
            }
            EnrollmentEvent::ObligationCharged(e) => {
                if let Some(o) = self
                    .obligations
                    .iter_mut()
                    .find(|o| o.payment_number == e.payment_number)
                {
                    o.status = ObligationStatus::Paid;
                    o.paid_date = Some(e.paid_date);
                    o.processor_charge_id = Some(e.processor_charge_id.clone());
                    o.processor_invoice_id = e.processor_invoice_id.clone();
                }
                self.ledger = derive_ledger(self.ledger.total_amount, &self.obligations);
            }
            EnrollmentEvent::ExternalRefsRecorded(e) => {
                if let Some(o) = self
                    .obligations
                    .iter_mut()
                    .find(|o| o.payment_number == e.payment_number)
                {
                    if e.processor_charge_id.is_some() {
                        o.processor_charge_id = e.processor_charge_id.clone();
                    }
                    if e.processor_invoice_id.is_some() {
                        o.processor_invoice_id = e.processor_invoice_id.clone();
                    }
                }
            }
            EnrollmentEvent::ObligationCancelled(e) => {
                if let Some(o) = self
                    .obligations
                    .iter_mut()
                    .find(|o| o.payment_number == e.payment_number)
                {
                    o.status = ObligationStatus::Cancelled;
                }
                self.ledger = derive_ledger(self.ledger.total_amount, &self.obligations);
            }
            EnrollmentEvent::ObligationRefunded(e) => {
                if let Some(o) = self
                    .obligations
                    .iter_mut()
                    .find(|o| o.payment_number == e.payment_number)
                {
                    o.status = ObligationStatus::Refunded;
                }
                self.ledger = derive_ledger(self.ledger.total_amount, &self.obligations);
            }
            EnrollmentEvent::AgreementStatusRecorded(e) => {
                self.agreement_status = Some(e.status);
            }
            EnrollmentEvent::EnrollmentActivated(_) => {
                self.status = EnrollmentStatus::Active;
            }
            EnrollmentEvent::SubscriptionPeriodAppended(e) => {
                self.obligations.push(e.obligation.clone());
                self.ledger = derive_ledger(e.ledger.total_amount, &self.obligations);
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            EnrollmentCommand::OpenEnrollment(cmd) => self.handle_open(cmd),
            EnrollmentCommand::SelectPlan(cmd) => self.handle_select_plan(cmd),
            EnrollmentCommand::RecordChargeSuccess(cmd) => self.handle_charge_success(cmd),
            EnrollmentCommand::RecordExternalRefs(cmd) => self.handle_external_refs(cmd),
            EnrollmentCommand::CancelObligation(cmd) => self.handle_cancel(cmd),
            EnrollmentCommand::RefundObligation(cmd) => self.handle_refund(cmd),
            EnrollmentCommand::RecordAgreementStatus(cmd) => self.handle_agreement(cmd),
            EnrollmentCommand::ActivateEnrollment(cmd) => self.handle_activate(cmd),
            EnrollmentCommand::AppendSubscriptionPeriod(cmd) => self.handle_append_period(cmd),
        }
    }
}

impl Enrollment {
    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        Ok(())
    }

    fn ensure_enrollment_id(&self, enrollment_id: EnrollmentId) -> Result<(), DomainError> {
        if self.id != enrollment_id {
            return Err(DomainError::invariant("enrollment_id mismatch"));
        }
        Ok(())
    }

    fn ensure_exists(&self, tenant_id: TenantId, enrollment_id: EnrollmentId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(tenant_id)?;
        self.ensure_enrollment_id(enrollment_id)
    }

    fn handle_open(&self, cmd: &OpenEnrollment) -> Result<Vec<EnrollmentEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("enrollment already exists"));
        }
        if cmd.total_amount == 0 {
            return Err(DomainError::validation("total_amount must be positive"));
        }

        Ok(vec![EnrollmentEvent::EnrollmentOpened(EnrollmentOpened {
            tenant_id: cmd.tenant_id,
            enrollment_id: cmd.enrollment_id,
            product_id: cmd.product_id,
            total_amount: cmd.total_amount,
            currency: cmd.currency.clone(),
            anchor_date: cmd.anchor_date,
            linked_parent: cmd.linked_parent,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_select_plan(&self, cmd: &SelectPlan) -> Result<Vec<EnrollmentEvent>, DomainError> {
        self.ensure_exists(cmd.tenant_id, cmd.enrollment_id)?;

        if self.status != EnrollmentStatus::Onboarding {
            return Err(DomainError::conflict(
                "plan can only be selected while the enrollment is onboarding",
            ));
        }

        // A paid obligation is never deleted; re-selection is blocked once
        // money has moved.
        if self.has_paid_obligation() {
            return Err(DomainError::invariant(
                "cannot re-select a plan once an obligation has been paid",
            ));
        }

        validate_schedule(&cmd.obligations, cmd.total_amount, &self.currency)?;

        let obligations: Vec<PaymentObligation> =
            cmd.obligations.iter().map(PaymentObligation::from_spec).collect();
        let ledger = derive_ledger(cmd.total_amount, &obligations);

        Ok(vec![EnrollmentEvent::PlanSelected(PlanSelected {
            tenant_id: cmd.tenant_id,
            enrollment_id: cmd.enrollment_id,
            plan_template_id: cmd.plan_template_id,
            plan_type: cmd.plan_type,
            obligations,
            ledger,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_charge_success(
        &self,
        cmd: &RecordChargeSuccess,
    ) -> Result<Vec<EnrollmentEvent>, DomainError> {
        self.ensure_exists(cmd.tenant_id, cmd.enrollment_id)?;

        if self.linked_parent {
            return Err(DomainError::invariant(
                "linked enrollments are never charged directly",
            ));
        }

        let obligation = self
            .obligation(cmd.payment_number)
            .ok_or_else(|| {
                DomainError::invariant(format!(
                    "no obligation with payment_number {}",
                    cmd.payment_number
                ))
            })?;

        // Compare-and-set on the current status: this closes the race window
        // between two concurrent charge attempts.
        match obligation.status {
            ObligationStatus::Pending => {}
            ObligationStatus::Paid => {
                return Err(DomainError::conflict("obligation is already paid"));
            }
            ObligationStatus::Cancelled | ObligationStatus::Refunded => {
                return Err(DomainError::invariant(
                    "only a pending obligation can be charged",
                ));
            }
        }

        let mut obligations = self.obligations.clone();
        if let Some(o) = obligations
            .iter_mut()
            .find(|o| o.payment_number == cmd.payment_number)
        {
            o.status = ObligationStatus::Paid;
            o.paid_date = Some(cmd.occurred_at);
            o.processor_charge_id = Some(cmd.processor_charge_id.clone());
            o.processor_invoice_id = cmd.processor_invoice_id.clone();
        }
        let ledger = derive_ledger(self.ledger.total_amount, &obligations);

        Ok(vec![EnrollmentEvent::ObligationCharged(ObligationCharged {
            tenant_id: cmd.tenant_id,
            enrollment_id: cmd.enrollment_id,
            payment_number: cmd.payment_number,
            amount: obligation.amount,
            currency: obligation.currency.clone(),
            method_ref: cmd.method_ref.clone(),
            processor_charge_id: cmd.processor_charge_id.clone(),
            processor_invoice_id: cmd.processor_invoice_id.clone(),
            paid_date: cmd.occurred_at,
            ledger,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_external_refs(
        &self,
        cmd: &RecordExternalRefs,
    ) -> Result<Vec<EnrollmentEvent>, DomainError> {
        self.ensure_exists(cmd.tenant_id, cmd.enrollment_id)?;

        let obligation = self.obligation(cmd.payment_number).ok_or_else(|| {
            DomainError::invariant(format!(
                "no obligation with payment_number {}",
                cmd.payment_number
            ))
        })?;

        if obligation.status != ObligationStatus::Pending {
            return Err(DomainError::invariant(
                "external refs can only be recorded on a pending obligation",
            ));
        }
        if cmd.processor_charge_id.is_none() && cmd.processor_invoice_id.is_none() {
            return Err(DomainError::validation("no external refs supplied"));
        }

        Ok(vec![EnrollmentEvent::ExternalRefsRecorded(ExternalRefsRecorded {
            tenant_id: cmd.tenant_id,
            enrollment_id: cmd.enrollment_id,
            payment_number: cmd.payment_number,
            processor_charge_id: cmd.processor_charge_id.clone(),
            processor_invoice_id: cmd.processor_invoice_id.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelObligation) -> Result<Vec<EnrollmentEvent>, DomainError> {
        self.ensure_exists(cmd.tenant_id, cmd.enrollment_id)?;

        let obligation = self.obligation(cmd.payment_number).ok_or_else(|| {
            DomainError::invariant(format!(
                "no obligation with payment_number {}",
                cmd.payment_number
            ))
        })?;

        match obligation.status {
            ObligationStatus::Pending => {}
            ObligationStatus::Cancelled => {
                return Err(DomainError::conflict("obligation is already cancelled"));
            }
            ObligationStatus::Paid | ObligationStatus::Refunded => {
                return Err(DomainError::invariant(
                    "only a pending obligation can be cancelled",
                ));
            }
        }

        let mut obligations = self.obligations.clone();
        if let Some(o) = obligations
            .iter_mut()
            .find(|o| o.payment_number == cmd.payment_number)
        {
            o.status = ObligationStatus::Cancelled;
        }
        let ledger = derive_ledger(self.ledger.total_amount, &obligations);

        Ok(vec![EnrollmentEvent::ObligationCancelled(ObligationCancelled {
            tenant_id: cmd.tenant_id,
            enrollment_id: cmd.enrollment_id,
            payment_number: cmd.payment_number,
            reason: cmd.reason.clone(),
            ledger,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_refund(&self, cmd: &RefundObligation) -> Result<Vec<EnrollmentEvent>, DomainError> {
        self.ensure_exists(cmd.tenant_id, cmd.enrollment_id)?;

        let obligation = self.obligation(cmd.payment_number).ok_or_else(|| {
            DomainError::invariant(format!(
                "no obligation with payment_number {}",
                cmd.payment_number
            ))
        })?;

        match obligation.status {
            ObligationStatus::Paid => {}
            ObligationStatus::Refunded => {
                return Err(DomainError::conflict("obligation is already refunded"));
            }
            ObligationStatus::Pending | ObligationStatus::Cancelled => {
                return Err(DomainError::invariant(
                    "only a paid obligation can be refunded",
                ));
            }
        }

        let mut obligations = self.obligations.clone();
        if let Some(o) = obligations
            .iter_mut()
            .find(|o| o.payment_number == cmd.payment_number)
        {
            o.status = ObligationStatus::Refunded;
        }
        let ledger = derive_ledger(self.ledger.total_amount, &obligations);

        Ok(vec![EnrollmentEvent::ObligationRefunded(ObligationRefunded {
            tenant_id: cmd.tenant_id,
            enrollment_id: cmd.enrollment_id,
            payment_number: cmd.payment_number,
            amount: obligation.amount,
            reason: cmd.reason.clone(),
            ledger,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_agreement(
        &self,
        cmd: &RecordAgreementStatus,
    ) -> Result<Vec<EnrollmentEvent>, DomainError> {
        self.ensure_exists(cmd.tenant_id, cmd.enrollment_id)?;

        Ok(vec![EnrollmentEvent::AgreementStatusRecorded(
            AgreementStatusRecorded {
                tenant_id: cmd.tenant_id,
                enrollment_id: cmd.enrollment_id,
                status: cmd.status,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_activate(
        &self,
        cmd: &ActivateEnrollment,
    ) -> Result<Vec<EnrollmentEvent>, DomainError> {
        self.ensure_exists(cmd.tenant_id, cmd.enrollment_id)?;

        if self.status != EnrollmentStatus::Onboarding {
            return Err(DomainError::conflict(
                "only an onboarding enrollment can be activated",
            ));
        }

        Ok(vec![EnrollmentEvent::EnrollmentActivated(EnrollmentActivated {
            tenant_id: cmd.tenant_id,
            enrollment_id: cmd.enrollment_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_append_period(
        &self,
        cmd: &AppendSubscriptionPeriod,
    ) -> Result<Vec<EnrollmentEvent>, DomainError> {
        self.ensure_exists(cmd.tenant_id, cmd.enrollment_id)?;

        match &self.plan {
            Some(p) if p.plan_type == PlanType::Subscription => {}
            _ => {
                return Err(DomainError::invariant(
                    "periods can only be appended to a subscription enrollment",
                ));
            }
        }

        let last = self
            .obligations
            .last()
            .ok_or_else(|| DomainError::invariant("subscription has no materialized periods"))?;

        if cmd.period.payment_number != last.payment_number + 1 {
            return Err(DomainError::invariant(
                "subscription periods must be appended in payment_number order",
            ));
        }
        if cmd.period.scheduled_date < last.scheduled_date {
            return Err(DomainError::invariant(
                "appended period must not be scheduled before the previous one",
            ));
        }
        if cmd.period.amount == 0 {
            return Err(DomainError::validation("period amount must be positive"));
        }
        if cmd.period.currency != self.currency {
            return Err(DomainError::validation("period currency mismatch"));
        }

        let obligation = PaymentObligation::from_spec(&cmd.period);
        let new_total = self
            .ledger
            .total_amount
            .checked_add(obligation.amount)
            .ok_or_else(|| DomainError::invariant("enrollment total overflow"))?;

        let mut obligations = self.obligations.clone();
        obligations.push(obligation.clone());
        let ledger = derive_ledger(new_total, &obligations);

        Ok(vec![EnrollmentEvent::SubscriptionPeriodAppended(
            SubscriptionPeriodAppended {
                tenant_id: cmd.tenant_id,
                enrollment_id: cmd.enrollment_id,
                obligation,
                ledger,
                occurred_at: cmd.occurred_at,
            },
        )])
    }
}

/// Re-check the generator's guarantees at the aggregate boundary.
///
/// The coordinator always passes generator output, but the aggregate is the
/// last line of defense for the schedule invariants.
fn validate_schedule(
    specs: &[ObligationSpec],
    total_amount: u64,
    currency: &Currency,
) -> Result<(), DomainError> {
    if specs.is_empty() {
        return Err(DomainError::validation("schedule must not be empty"));
    }

    for (idx, spec) in specs.iter().enumerate() {
        if spec.payment_number != idx as u32 + 1 {
            return Err(DomainError::invariant(
                "schedule payment_numbers must be contiguous from 1",
            ));
        }
        if spec.amount == 0 {
            return Err(DomainError::validation("obligation amount must be positive"));
        }
        if &spec.currency != currency {
            return Err(DomainError::validation("obligation currency mismatch"));
        }
        if idx > 0 && spec.scheduled_date < specs[idx - 1].scheduled_date {
            return Err(DomainError::invariant(
                "schedule dates must be non-decreasing",
            ));
        }
    }

    let sum = coursepay_core::money::checked_sum(specs.iter().map(|s| s.amount))?;
    if sum != total_amount {
        return Err(DomainError::invariant(
            "schedule amounts must sum to the enrollment total",
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::generate_schedule;
    use chrono::{Duration, TimeZone};
    use coursepay_catalog::{BillingFrequency, PlanTemplate};
    use coursepay_core::AggregateId;
    use coursepay_events::execute;

    fn test_tenant_id() -> TenantId {
        TenantId::new()
    }

    fn test_enrollment_id() -> EnrollmentId {
        EnrollmentId::new(AggregateId::new())
    }

    fn anchor() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    fn deposit_template(deposit: u64, count: u32) -> PlanTemplate {
        PlanTemplate {
            id: PlanTemplateId::new(),
            name: "Deposit + installments".to_string(),
            plan_type: PlanType::DepositInstallments,
            deposit_amount: Some(deposit),
            installment_count: Some(count),
            frequency: Some(BillingFrequency::Monthly),
            period_amount: None,
            currency: Currency::usd(),
            active: true,
        }
    }

    fn opened(total: u64) -> (Enrollment, TenantId, EnrollmentId) {
        let tenant_id = test_tenant_id();
        let enrollment_id = test_enrollment_id();
        let mut enrollment = Enrollment::empty(enrollment_id);

        execute(
            &mut enrollment,
            &EnrollmentCommand::OpenEnrollment(OpenEnrollment {
                tenant_id,
                enrollment_id,
                product_id: ProductId::new(),
                total_amount: total,
                currency: Currency::usd(),
                anchor_date: Some(anchor()),
                linked_parent: false,
                occurred_at: anchor(),
            }),
        )
        .unwrap();

        (enrollment, tenant_id, enrollment_id)
    }

    fn with_plan(total: u64, deposit: u64, count: u32) -> (Enrollment, TenantId, EnrollmentId) {
        let (mut enrollment, tenant_id, enrollment_id) = opened(total);
        let template = deposit_template(deposit, count);
        let specs = generate_schedule(&template, total, anchor()).unwrap();

        execute(
            &mut enrollment,
            &EnrollmentCommand::SelectPlan(SelectPlan {
                tenant_id,
                enrollment_id,
                plan_template_id: template.id,
                plan_type: template.plan_type,
                obligations: specs,
                total_amount: total,
                occurred_at: anchor(),
            }),
        )
        .unwrap();

        (enrollment, tenant_id, enrollment_id)
    }

    fn charge(enrollment: &mut Enrollment, tenant_id: TenantId, enrollment_id: EnrollmentId, n: u32) {
        execute(
            enrollment,
            &EnrollmentCommand::RecordChargeSuccess(RecordChargeSuccess {
                tenant_id,
                enrollment_id,
                payment_number: n,
                method_ref: Some("pm_test".to_string()),
                processor_charge_id: format!("pi_{n}"),
                processor_invoice_id: None,
                occurred_at: anchor() + Duration::hours(n as i64),
            }),
        )
        .unwrap();
    }

    #[test]
    fn selecting_a_plan_installs_the_schedule_and_ledger() {
        let (enrollment, _, _) = with_plan(25000, 5000, 2);

        assert_eq!(enrollment.obligations().len(), 3);
        assert_eq!(enrollment.total_amount(), 25000);
        assert_eq!(enrollment.paid_amount(), 0);
        assert_eq!(enrollment.payment_status(), PaymentStatus::Unpaid);
        assert_eq!(enrollment.next_payment_date(), Some(anchor()));
    }

    #[test]
    fn charge_success_moves_the_ledger_and_next_payment_date() {
        let (mut enrollment, tenant_id, enrollment_id) = with_plan(25000, 5000, 2);

        charge(&mut enrollment, tenant_id, enrollment_id, 1);

        let deposit = enrollment.obligation(1).unwrap();
        assert_eq!(deposit.status, ObligationStatus::Paid);
        assert!(deposit.paid_date.is_some());
        assert_eq!(deposit.processor_charge_id.as_deref(), Some("pi_1"));

        assert_eq!(enrollment.paid_amount(), 5000);
        assert_eq!(enrollment.payment_status(), PaymentStatus::Partial);
        assert_eq!(
            enrollment.next_payment_date(),
            Some(Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap())
        );

        charge(&mut enrollment, tenant_id, enrollment_id, 2);
        charge(&mut enrollment, tenant_id, enrollment_id, 3);

        assert_eq!(enrollment.paid_amount(), 25000);
        assert_eq!(enrollment.payment_status(), PaymentStatus::Paid);
        assert_eq!(enrollment.next_payment_date(), None);
    }

    #[test]
    fn charging_a_paid_obligation_is_a_conflict() {
        let (mut enrollment, tenant_id, enrollment_id) = with_plan(25000, 5000, 2);
        charge(&mut enrollment, tenant_id, enrollment_id, 1);

        let err = enrollment
            .handle(&EnrollmentCommand::RecordChargeSuccess(RecordChargeSuccess {
                tenant_id,
                enrollment_id,
                payment_number: 1,
                method_ref: None,
                processor_charge_id: "pi_dup".to_string(),
                processor_invoice_id: None,
                occurred_at: anchor(),
            }))
            .unwrap_err();

        assert!(matches!(err, DomainError::Conflict(_)));
        // Ledger untouched.
        assert_eq!(enrollment.paid_amount(), 5000);
    }

    #[test]
    fn linked_parent_enrollments_are_never_charged() {
        let tenant_id = test_tenant_id();
        let enrollment_id = test_enrollment_id();
        let mut enrollment = Enrollment::empty(enrollment_id);
        execute(
            &mut enrollment,
            &EnrollmentCommand::OpenEnrollment(OpenEnrollment {
                tenant_id,
                enrollment_id,
                product_id: ProductId::new(),
                total_amount: 10000,
                currency: Currency::usd(),
                anchor_date: None,
                linked_parent: true,
                occurred_at: anchor(),
            }),
        )
        .unwrap();

        let err = enrollment
            .handle(&EnrollmentCommand::RecordChargeSuccess(RecordChargeSuccess {
                tenant_id,
                enrollment_id,
                payment_number: 1,
                method_ref: None,
                processor_charge_id: "pi_x".to_string(),
                processor_invoice_id: None,
                occurred_at: anchor(),
            }))
            .unwrap_err();

        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn reselecting_replaces_the_obligation_set_when_nothing_is_paid() {
        let (mut enrollment, tenant_id, enrollment_id) = with_plan(25000, 5000, 2);
        assert_eq!(enrollment.obligations().len(), 3);

        let new_template = deposit_template(10000, 4);
        let specs = generate_schedule(&new_template, 25000, anchor()).unwrap();
        execute(
            &mut enrollment,
            &EnrollmentCommand::SelectPlan(SelectPlan {
                tenant_id,
                enrollment_id,
                plan_template_id: new_template.id,
                plan_type: new_template.plan_type,
                obligations: specs,
                total_amount: 25000,
                occurred_at: anchor(),
            }),
        )
        .unwrap();

        assert_eq!(enrollment.obligations().len(), 5);
        assert_eq!(
            enrollment.plan().unwrap().plan_template_id,
            new_template.id
        );
        assert!(enrollment
            .obligations()
            .iter()
            .all(|o| o.status == ObligationStatus::Pending));
        assert_eq!(enrollment.paid_amount(), 0);
    }

    #[test]
    fn reselecting_with_a_paid_obligation_is_rejected() {
        let (mut enrollment, tenant_id, enrollment_id) = with_plan(25000, 5000, 2);
        charge(&mut enrollment, tenant_id, enrollment_id, 1);

        let template = deposit_template(10000, 4);
        let specs = generate_schedule(&template, 25000, anchor()).unwrap();
        let err = enrollment
            .handle(&EnrollmentCommand::SelectPlan(SelectPlan {
                tenant_id,
                enrollment_id,
                plan_template_id: template.id,
                plan_type: template.plan_type,
                obligations: specs,
                total_amount: 25000,
                occurred_at: anchor(),
            }))
            .unwrap_err();

        assert!(matches!(err, DomainError::InvariantViolation(_)));
        // The paid obligation is still there.
        assert_eq!(enrollment.obligation(1).unwrap().status, ObligationStatus::Paid);
    }

    #[test]
    fn selecting_a_plan_after_activation_is_rejected() {
        let (mut enrollment, tenant_id, enrollment_id) = with_plan(25000, 5000, 2);
        execute(
            &mut enrollment,
            &EnrollmentCommand::ActivateEnrollment(ActivateEnrollment {
                tenant_id,
                enrollment_id,
                occurred_at: anchor(),
            }),
        )
        .unwrap();

        let template = deposit_template(10000, 4);
        let specs = generate_schedule(&template, 25000, anchor()).unwrap();
        let err = enrollment
            .handle(&EnrollmentCommand::SelectPlan(SelectPlan {
                tenant_id,
                enrollment_id,
                plan_template_id: template.id,
                plan_type: template.plan_type,
                obligations: specs,
                total_amount: 25000,
                occurred_at: anchor(),
            }))
            .unwrap_err();

        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn refund_requires_a_paid_obligation_and_reduces_the_ledger() {
        let (mut enrollment, tenant_id, enrollment_id) = with_plan(25000, 5000, 2);

        // Refunding a pending obligation is an invariant violation.
        let err = enrollment
            .handle(&EnrollmentCommand::RefundObligation(RefundObligation {
                tenant_id,
                enrollment_id,
                payment_number: 1,
                reason: None,
                occurred_at: anchor(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));

        charge(&mut enrollment, tenant_id, enrollment_id, 1);
        assert_eq!(enrollment.paid_amount(), 5000);

        execute(
            &mut enrollment,
            &EnrollmentCommand::RefundObligation(RefundObligation {
                tenant_id,
                enrollment_id,
                payment_number: 1,
                reason: Some("withdrawal".to_string()),
                occurred_at: anchor(),
            }),
        )
        .unwrap();

        assert_eq!(enrollment.obligation(1).unwrap().status, ObligationStatus::Refunded);
        assert_eq!(enrollment.paid_amount(), 0);
        assert_eq!(enrollment.payment_status(), PaymentStatus::Unpaid);
    }

    #[test]
    fn cancel_only_applies_to_pending_obligations() {
        let (mut enrollment, tenant_id, enrollment_id) = with_plan(25000, 5000, 2);
        charge(&mut enrollment, tenant_id, enrollment_id, 1);

        let err = enrollment
            .handle(&EnrollmentCommand::CancelObligation(CancelObligation {
                tenant_id,
                enrollment_id,
                payment_number: 1,
                reason: None,
                occurred_at: anchor(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));

        execute(
            &mut enrollment,
            &EnrollmentCommand::CancelObligation(CancelObligation {
                tenant_id,
                enrollment_id,
                payment_number: 2,
                reason: Some("plan change".to_string()),
                occurred_at: anchor(),
            }),
        )
        .unwrap();
        assert_eq!(enrollment.obligation(2).unwrap().status, ObligationStatus::Cancelled);
        // A cancelled obligation no longer drives next_payment_date.
        assert_eq!(
            enrollment.next_payment_date(),
            Some(Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn overdue_is_a_view_not_a_state() {
        let (mut enrollment, tenant_id, enrollment_id) = with_plan(25000, 5000, 2);
        let now = anchor() + Duration::days(1);

        assert!(enrollment.obligation(1).unwrap().is_overdue(now));

        charge(&mut enrollment, tenant_id, enrollment_id, 1);
        assert!(!enrollment.obligation(1).unwrap().is_overdue(now));
    }

    #[test]
    fn agreement_status_gates_charging() {
        let (mut enrollment, tenant_id, enrollment_id) = with_plan(25000, 5000, 2);
        assert!(enrollment.agreement_allows_charge());

        execute(
            &mut enrollment,
            &EnrollmentCommand::RecordAgreementStatus(RecordAgreementStatus {
                tenant_id,
                enrollment_id,
                status: AgreementStatus::Sent,
                occurred_at: anchor(),
            }),
        )
        .unwrap();
        assert!(!enrollment.agreement_allows_charge());

        execute(
            &mut enrollment,
            &EnrollmentCommand::RecordAgreementStatus(RecordAgreementStatus {
                tenant_id,
                enrollment_id,
                status: AgreementStatus::Completed,
                occurred_at: anchor(),
            }),
        )
        .unwrap();
        assert!(enrollment.agreement_allows_charge());
    }

    #[test]
    fn subscription_periods_append_in_order_and_grow_the_total() {
        let tenant_id = test_tenant_id();
        let enrollment_id = test_enrollment_id();
        let mut enrollment = Enrollment::empty(enrollment_id);

        let template = PlanTemplate {
            id: PlanTemplateId::new(),
            name: "Monthly membership".to_string(),
            plan_type: PlanType::Subscription,
            deposit_amount: None,
            installment_count: None,
            frequency: Some(BillingFrequency::Monthly),
            period_amount: Some(2500),
            currency: Currency::usd(),
            active: true,
        };
        let specs = generate_schedule(&template, 2500, anchor()).unwrap();
        let window_total: u64 = specs.iter().map(|s| s.amount).sum();

        execute(
            &mut enrollment,
            &EnrollmentCommand::OpenEnrollment(OpenEnrollment {
                tenant_id,
                enrollment_id,
                product_id: ProductId::new(),
                total_amount: window_total,
                currency: Currency::usd(),
                anchor_date: Some(anchor()),
                linked_parent: false,
                occurred_at: anchor(),
            }),
        )
        .unwrap();
        execute(
            &mut enrollment,
            &EnrollmentCommand::SelectPlan(SelectPlan {
                tenant_id,
                enrollment_id,
                plan_template_id: template.id,
                plan_type: template.plan_type,
                obligations: specs,
                total_amount: window_total,
                occurred_at: anchor(),
            }),
        )
        .unwrap();

        let next = crate::schedule::subscription_period(&template, 13, anchor()).unwrap();
        execute(
            &mut enrollment,
            &EnrollmentCommand::AppendSubscriptionPeriod(AppendSubscriptionPeriod {
                tenant_id,
                enrollment_id,
                period: next,
                occurred_at: anchor(),
            }),
        )
        .unwrap();

        assert_eq!(enrollment.obligations().len(), 13);
        assert_eq!(enrollment.total_amount(), window_total + 2500);

        // Skipping a number is rejected.
        let skipped = crate::schedule::subscription_period(&template, 15, anchor()).unwrap();
        let err = enrollment
            .handle(&EnrollmentCommand::AppendSubscriptionPeriod(AppendSubscriptionPeriod {
                tenant_id,
                enrollment_id,
                period: skipped,
                occurred_at: anchor(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn cross_tenant_commands_are_rejected() {
        let (enrollment, _tenant_id, enrollment_id) = with_plan(25000, 5000, 2);

        let err = enrollment
            .handle(&EnrollmentCommand::ActivateEnrollment(ActivateEnrollment {
                tenant_id: test_tenant_id(),
                enrollment_id,
                occurred_at: anchor(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        /// Apply a random charge/refund sequence; the incrementally
        /// maintained ledger must always equal the from-scratch derivation.
        #[derive(Debug, Clone)]
        enum Op {
            Charge(u32),
            Refund(u32),
        }

        fn op_strategy(max_number: u32) -> impl Strategy<Value = Vec<Op>> {
            proptest::collection::vec(
                (0u8..2, 1u32..=max_number).prop_map(|(kind, n)| {
                    if kind == 0 { Op::Charge(n) } else { Op::Refund(n) }
                }),
                0..24,
            )
        }

        proptest! {
            #[test]
            fn ledger_never_drifts_from_obligations(
                total in 10_000u64..1_000_000,
                count in 1u32..6,
                ops in op_strategy(7),
            ) {
                prop_assume!(total / 4 >= (count as u64) * (count as u64));

                let (mut enrollment, tenant_id, enrollment_id) =
                    with_plan(total, total / 4, count);

                for op in ops {
                    let cmd = match op {
                        Op::Charge(n) => EnrollmentCommand::RecordChargeSuccess(RecordChargeSuccess {
                            tenant_id,
                            enrollment_id,
                            payment_number: n,
                            method_ref: None,
                            processor_charge_id: format!("pi_{n}"),
                            processor_invoice_id: None,
                            occurred_at: anchor(),
                        }),
                        Op::Refund(n) => EnrollmentCommand::RefundObligation(RefundObligation {
                            tenant_id,
                            enrollment_id,
                            payment_number: n,
                            reason: None,
                            occurred_at: anchor(),
                        }),
                    };

                    // Illegal transitions are rejected without mutation;
                    // that's part of the property.
                    let before = enrollment.clone();
                    if execute(&mut enrollment, &cmd).is_err() {
                        prop_assert_eq!(&before, &enrollment);
                    }

                    let rederived =
                        derive_ledger(enrollment.total_amount(), enrollment.obligations());
                    prop_assert_eq!(enrollment.ledger(), &rederived);

                    let paid_sum: u64 = enrollment
                        .obligations()
                        .iter()
                        .filter(|o| o.status == ObligationStatus::Paid)
                        .map(|o| o.amount)
                        .sum();
                    prop_assert_eq!(
                        enrollment.paid_amount(),
                        paid_sum.min(enrollment.total_amount())
                    );
                }
            }
        }
    }
}
