//! Billing domain module (event-sourced).
//!
//! This crate contains the payment plan & schedule engine's business rules,
//! implemented purely as deterministic domain logic (no IO, no HTTP, no
//! storage):
//!
//! - `schedule`: expansion of a plan template into a concrete, time-stamped
//!   sequence of payment obligations.
//! - `enrollment`: the aggregate owning an enrollment's plan reference,
//!   obligation set, agreement status, and derived payment ledger.

pub mod enrollment;
pub mod schedule;

pub use enrollment::{
    ActivateEnrollment, AgreementStatus, AgreementStatusRecorded, AppendSubscriptionPeriod,
    CancelObligation, Enrollment, EnrollmentActivated, EnrollmentCommand, EnrollmentEvent,
    EnrollmentId, EnrollmentOpened, EnrollmentStatus, ExternalRefsRecorded, LedgerSnapshot,
    ObligationCancelled, ObligationCharged, ObligationRefunded, ObligationStatus, OpenEnrollment,
    PaymentObligation, PaymentStatus, PlanSelected, PlanSnapshot, RecordAgreementStatus,
    RecordChargeSuccess, RecordExternalRefs, RefundObligation, SelectPlan,
    SubscriptionPeriodAppended, derive_ledger,
};
pub use schedule::{
    ObligationSpec, PaymentType, SUBSCRIPTION_INITIAL_PERIODS, generate_schedule,
    subscription_period,
};
