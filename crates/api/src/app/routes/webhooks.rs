//! External callbacks: processor settlement and e-signature status.
//!
//! Webhook callers can't hold tenant JWTs; they authenticate with a shared
//! secret header and name the tenant in the payload. Both handlers are
//! idempotent; redeliveries are expected.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
};
use chrono::Utc;

use coursepay_billing::{
    Enrollment, EnrollmentCommand, EnrollmentId, RecordAgreementStatus,
};
use coursepay_infra::billing_ops::ENROLLMENT_AGGREGATE;
use coursepay_processor::{ChargeRef, InvoiceRef};

use crate::app::routes::common;
use crate::app::services::AppServices;
use crate::app::{dto, errors};

const WEBHOOK_SECRET_HEADER: &str = "x-webhook-secret";

pub fn router() -> Router {
    Router::new()
        .route("/processor", post(processor_webhook))
        .route("/esign", post(esign_webhook))
}

fn check_secret(headers: &HeaderMap, expected: &str) -> Result<(), axum::response::Response> {
    let supplied = headers
        .get(WEBHOOK_SECRET_HEADER)
        .and_then(|v| v.to_str().ok());

    if supplied == Some(expected) {
        Ok(())
    } else {
        Err(errors::json_error(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "missing or invalid webhook secret",
        ))
    }
}

/// Settlement callback: the processor confirmed a charge out-of-band
/// (async settlement, or a charge whose submission timed out on our side).
pub async fn processor_webhook(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
    Json(body): Json<dto::ProcessorWebhookRequest>,
) -> axum::response::Response {
    if let Err(resp) = check_secret(&headers, &services.webhook_secret) {
        return resp;
    }

    // Other event types are acknowledged and dropped; settlement is the
    // only state-bearing callback here.
    if body.event_type != "charge.succeeded" {
        return (StatusCode::OK, Json(serde_json::json!({ "ignored": body.event_type })))
            .into_response();
    }

    let tenant_id = match common::parse_tenant_id(&body.tenant_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let enrollment_id = match common::parse_enrollment_id(&body.enrollment_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services
        .orchestrator
        .record_external_charge(
            tenant_id,
            enrollment_id,
            body.payment_number,
            ChargeRef::new(body.charge_id),
            body.invoice_id.map(InvoiceRef::new),
        )
        .await
    {
        Ok(outcome) => crate::app::routes::enrollments::charge_outcome_response(outcome),
        Err(e) => errors::charge_error_to_response(e),
    }
}

/// E-signature status callback (sent/delivered/completed/declined/voided).
/// Recorded on the enrollment; gates charging.
pub async fn esign_webhook(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
    Json(body): Json<dto::EsignWebhookRequest>,
) -> axum::response::Response {
    if let Err(resp) = check_secret(&headers, &services.webhook_secret) {
        return resp;
    }

    let tenant_id = match common::parse_tenant_id(&body.tenant_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let enrollment_id = match common::parse_enrollment_id(&body.enrollment_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let status = match common::parse_agreement_status(&body.status) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.dispatch::<Enrollment>(
        tenant_id,
        enrollment_id.0,
        ENROLLMENT_AGGREGATE,
        EnrollmentCommand::RecordAgreementStatus(RecordAgreementStatus {
            tenant_id,
            enrollment_id,
            status,
            occurred_at: Utc::now(),
        }),
        |_t, id| Enrollment::empty(EnrollmentId::new(id)),
    ) {
        Ok(_) => {
            (StatusCode::OK, Json(serde_json::json!({ "recorded": body.status }))).into_response()
        }
        Err(e) => errors::dispatch_error_to_response(e),
    }
}
