use serde::Deserialize;

use coursepay_billing::PaymentObligation;
use coursepay_infra::projections::{EnrollmentLedger, PaymentRecord, ScheduleEntry};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CreatePlanTemplateRequest {
    pub name: String,
    /// one_time | deposit_installments | subscription
    pub plan_type: String,
    pub deposit_amount: Option<u64>,
    pub installment_count: Option<u32>,
    /// weekly | biweekly | monthly | yearly
    pub frequency: Option<String>,
    pub period_amount: Option<u64>,
    pub currency: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateProductRequest {
    pub name: String,
    /// Price in minor units.
    pub price: u64,
    pub currency: Option<String>,
    pub allowed_plan_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateEnrollmentRequest {
    pub product_id: String,
    /// RFC3339; defaults to now.
    pub anchor_date: Option<String>,
    #[serde(default)]
    pub linked_parent: bool,
}

#[derive(Debug, Deserialize)]
pub struct SelectPlanRequest {
    pub plan_template_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ChargeObligationRequest {
    pub payment_method: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ObligationActionRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpcomingQuery {
    pub days: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ProcessorWebhookRequest {
    /// Only "charge.succeeded" settles an obligation.
    pub event_type: String,
    pub tenant_id: String,
    pub enrollment_id: String,
    pub payment_number: u32,
    pub charge_id: String,
    pub invoice_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EsignWebhookRequest {
    pub tenant_id: String,
    pub enrollment_id: String,
    /// sent | delivered | completed | declined | voided
    pub status: String,
}

// -------------------------
// JSON mapping helpers
// -------------------------

pub fn obligation_to_json(o: &PaymentObligation) -> serde_json::Value {
    serde_json::json!({
        "payment_number": o.payment_number,
        "payment_type": o.payment_type,
        "amount": o.amount,
        "currency": o.currency.as_str(),
        "scheduled_date": o.scheduled_date.to_rfc3339(),
        "paid_date": o.paid_date.map(|d| d.to_rfc3339()),
        "status": o.status,
        "processor_charge_id": o.processor_charge_id,
        "processor_invoice_id": o.processor_invoice_id,
    })
}

pub fn schedule_entry_to_json(e: &ScheduleEntry, now: chrono::DateTime<chrono::Utc>) -> serde_json::Value {
    serde_json::json!({
        "enrollment_id": e.enrollment_id.to_string(),
        "payment_number": e.payment_number,
        "payment_type": e.payment_type,
        "amount": e.amount,
        "currency": e.currency.as_str(),
        "scheduled_date": e.scheduled_date.to_rfc3339(),
        "paid_date": e.paid_date.map(|d| d.to_rfc3339()),
        "status": e.status,
        "overdue": e.status == coursepay_billing::ObligationStatus::Pending
            && e.scheduled_date < now,
    })
}

pub fn ledger_to_json(l: &EnrollmentLedger) -> serde_json::Value {
    serde_json::json!({
        "enrollment_id": l.enrollment_id.to_string(),
        "product_id": l.product_id.to_string(),
        "status": l.status,
        "linked_parent": l.linked_parent,
        "plan_template_id": l.plan_template_id.map(|id| id.to_string()),
        "agreement_status": l.agreement_status,
        "currency": l.currency.as_str(),
        "total_amount": l.total_amount,
        "paid_amount": l.paid_amount,
        "payment_status": l.payment_status,
        "next_payment_date": l.next_payment_date.map(|d| d.to_rfc3339()),
        "last_payment_at": l.last_payment_at.map(|d| d.to_rfc3339()),
    })
}

pub fn payment_to_json(p: &PaymentRecord) -> serde_json::Value {
    serde_json::json!({
        "payment_id": p.payment_id.to_string(),
        "enrollment_id": p.enrollment_id.to_string(),
        "payment_number": p.payment_number,
        "amount": p.amount,
        "currency": p.currency.as_str(),
        "method_ref": p.method_ref,
        "processor_charge_id": p.processor_charge_id,
        "processor_invoice_id": p.processor_invoice_id,
        "paid_at": p.paid_at.to_rfc3339(),
    })
}

pub fn template_to_json(t: &coursepay_catalog::PlanTemplate) -> serde_json::Value {
    serde_json::json!({
        "id": t.id.to_string(),
        "name": t.name,
        "plan_type": t.plan_type,
        "deposit_amount": t.deposit_amount,
        "installment_count": t.installment_count,
        "frequency": t.frequency,
        "period_amount": t.period_amount,
        "currency": t.currency.as_str(),
        "active": t.active,
    })
}
