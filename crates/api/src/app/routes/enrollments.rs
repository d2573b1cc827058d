use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::{Duration, Utc};

use coursepay_auth::Permission;
use coursepay_billing::{
    ActivateEnrollment, CancelObligation, Enrollment, EnrollmentCommand, EnrollmentId,
    OpenEnrollment, RefundObligation,
};
use coursepay_catalog::PlanCatalog;
use coursepay_core::AggregateId;
use coursepay_infra::billing_ops::{ChargeOutcome, ENROLLMENT_AGGREGATE};
use coursepay_processor::PaymentMethodRef;

use crate::app::routes::common::{self, CmdAuth};
use crate::app::services::AppServices;
use crate::app::{dto, errors};

/// Checkout tokens handed to enrollees are valid for three days.
const CHECKOUT_TOKEN_TTL_HOURS: i64 = 72;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_enrollment))
        .route("/:id", get(get_enrollment))
        .route("/:id/schedule", get(get_schedule))
        .route("/:id/payments", get(get_payments))
        .route("/:id/plan", post(select_plan))
        .route("/:id/activate", post(activate_enrollment))
        .route("/:id/obligations/:n/charge", post(charge_obligation))
        .route("/:id/obligations/:n/cancel", post(cancel_obligation))
        .route("/:id/obligations/:n/refund", post(refund_obligation))
}

pub async fn create_enrollment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Json(body): Json<dto::CreateEnrollmentRequest>,
) -> axum::response::Response {
    let product_id = match common::parse_product_id(&body.product_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let anchor_date = match &body.anchor_date {
        None => None,
        Some(raw) => match chrono::DateTime::parse_from_rfc3339(raw) {
            Ok(dt) => Some(dt.with_timezone(&Utc)),
            Err(_) => {
                return errors::json_error(
                    StatusCode::BAD_REQUEST,
                    "invalid_anchor_date",
                    "anchor_date must be RFC3339",
                );
            }
        },
    };

    let guard = CmdAuth {
        inner: (),
        required: vec![Permission::new("enrollments.manage")],
    };
    if let Err(e) = crate::authz::authorize_command(&tenant, &principal, &guard) {
        return errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string());
    }

    // The catalog is the authoritative price source; the request never
    // carries an amount.
    let product = match services
        .catalog
        .product(tenant.tenant_id(), product_id)
    {
        Some(p) => p,
        None => return errors::json_error(StatusCode::NOT_FOUND, "not_found", "product not found"),
    };

    let aggregate_id = AggregateId::new();
    let enrollment_id = EnrollmentId::new(aggregate_id);

    let cmd = EnrollmentCommand::OpenEnrollment(OpenEnrollment {
        tenant_id: tenant.tenant_id(),
        enrollment_id,
        product_id,
        total_amount: product.price,
        currency: product.currency.clone(),
        anchor_date,
        linked_parent: body.linked_parent,
        occurred_at: Utc::now(),
    });

    if let Err(e) = services.dispatch::<Enrollment>(
        tenant.tenant_id(),
        aggregate_id,
        ENROLLMENT_AGGREGATE,
        cmd,
        |_t, id| Enrollment::empty(EnrollmentId::new(id)),
    ) {
        return errors::dispatch_error_to_response(e);
    }

    // The enrollee's checkout link carries this time-bounded token.
    let checkout_token = match coursepay_auth::mint_enrollment_token(
        &services.token_secret,
        tenant.tenant_id(),
        aggregate_id,
        Utc::now(),
        Duration::hours(CHECKOUT_TOKEN_TTL_HOURS),
    ) {
        Ok(t) => t,
        Err(e) => {
            return errors::json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "token_error",
                e.to_string(),
            );
        }
    };

    (
        StatusCode::CREATED,
        Json(serde_json::json!({
            "id": enrollment_id.to_string(),
            "checkout_token": checkout_token,
        })),
    )
        .into_response()
}

pub async fn get_enrollment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let enrollment_id = match common::parse_enrollment_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services
        .ledger_projection
        .get(tenant.tenant_id(), &enrollment_id)
    {
        Some(ledger) => (StatusCode::OK, Json(dto::ledger_to_json(&ledger))).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "enrollment not found"),
    }
}

pub async fn get_schedule(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let enrollment_id = match common::parse_enrollment_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let now = Utc::now();
    let items = services
        .schedule_projection
        .list_for_enrollment(tenant.tenant_id(), enrollment_id)
        .iter()
        .map(|e| dto::schedule_entry_to_json(e, now))
        .collect::<Vec<_>>();

    (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
}

pub async fn get_payments(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let enrollment_id = match common::parse_enrollment_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let items = services
        .payments_projection
        .list_for_enrollment(tenant.tenant_id(), enrollment_id)
        .iter()
        .map(dto::payment_to_json)
        .collect::<Vec<_>>();

    (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
}

pub async fn select_plan(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::SelectPlanRequest>,
) -> axum::response::Response {
    let enrollment_id = match common::parse_enrollment_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let plan_template_id = match common::parse_plan_template_id(&body.plan_template_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let guard = CmdAuth {
        inner: (),
        required: vec![Permission::new("enrollments.manage")],
    };
    if let Err(e) = crate::authz::authorize_command(&tenant, &principal, &guard) {
        return errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string());
    }

    match services
        .coordinator
        .select_plan(tenant.tenant_id(), enrollment_id, plan_template_id)
        .await
    {
        Ok(report) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "obligations": report.obligations.iter().map(dto::obligation_to_json).collect::<Vec<_>>(),
                "cleanup_failures": report.cleanup_failures,
            })),
        )
            .into_response(),
        Err(e) => errors::plan_selection_error_to_response(e),
    }
}

pub async fn charge_obligation(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Path((id, n)): Path<(String, u32)>,
    Json(body): Json<dto::ChargeObligationRequest>,
) -> axum::response::Response {
    let enrollment_id = match common::parse_enrollment_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let guard = CmdAuth {
        inner: (),
        required: vec![Permission::new("enrollments.charge")],
    };
    if let Err(e) = crate::authz::authorize_command(&tenant, &principal, &guard) {
        return errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string());
    }

    let method = body.payment_method.map(PaymentMethodRef::new);

    match services
        .orchestrator
        .charge_obligation(tenant.tenant_id(), enrollment_id, n, method)
        .await
    {
        Ok(outcome) => charge_outcome_response(outcome),
        Err(e) => errors::charge_error_to_response(e),
    }
}

pub async fn cancel_obligation(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Path((id, n)): Path<(String, u32)>,
    Json(body): Json<dto::ObligationActionRequest>,
) -> axum::response::Response {
    let enrollment_id = match common::parse_enrollment_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let cmd = EnrollmentCommand::CancelObligation(CancelObligation {
        tenant_id: tenant.tenant_id(),
        enrollment_id,
        payment_number: n,
        reason: body.reason,
        occurred_at: Utc::now(),
    });

    let cmd_auth = CmdAuth {
        inner: cmd,
        required: vec![Permission::new("enrollments.manage")],
    };
    if let Err(e) = crate::authz::authorize_command(&tenant, &principal, &cmd_auth) {
        return errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string());
    }

    match services.dispatch::<Enrollment>(
        tenant.tenant_id(),
        enrollment_id.0,
        ENROLLMENT_AGGREGATE,
        cmd_auth.inner,
        |_t, id| Enrollment::empty(EnrollmentId::new(id)),
    ) {
        Ok(_) => (StatusCode::OK, Json(serde_json::json!({ "cancelled": n }))).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn refund_obligation(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Path((id, n)): Path<(String, u32)>,
    Json(body): Json<dto::ObligationActionRequest>,
) -> axum::response::Response {
    let enrollment_id = match common::parse_enrollment_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let cmd = EnrollmentCommand::RefundObligation(RefundObligation {
        tenant_id: tenant.tenant_id(),
        enrollment_id,
        payment_number: n,
        reason: body.reason,
        occurred_at: Utc::now(),
    });

    let cmd_auth = CmdAuth {
        inner: cmd,
        required: vec![Permission::new("enrollments.refund")],
    };
    if let Err(e) = crate::authz::authorize_command(&tenant, &principal, &cmd_auth) {
        return errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string());
    }

    match services.dispatch::<Enrollment>(
        tenant.tenant_id(),
        enrollment_id.0,
        ENROLLMENT_AGGREGATE,
        cmd_auth.inner,
        |_t, id| Enrollment::empty(EnrollmentId::new(id)),
    ) {
        Ok(_) => (StatusCode::OK, Json(serde_json::json!({ "refunded": n }))).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn activate_enrollment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let enrollment_id = match common::parse_enrollment_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let cmd = EnrollmentCommand::ActivateEnrollment(ActivateEnrollment {
        tenant_id: tenant.tenant_id(),
        enrollment_id,
        occurred_at: Utc::now(),
    });

    let cmd_auth = CmdAuth {
        inner: cmd,
        required: vec![Permission::new("enrollments.manage")],
    };
    if let Err(e) = crate::authz::authorize_command(&tenant, &principal, &cmd_auth) {
        return errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string());
    }

    match services.dispatch::<Enrollment>(
        tenant.tenant_id(),
        enrollment_id.0,
        ENROLLMENT_AGGREGATE,
        cmd_auth.inner,
        |_t, id| Enrollment::empty(EnrollmentId::new(id)),
    ) {
        Ok(_) => (StatusCode::OK, Json(serde_json::json!({ "status": "active" }))).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub(crate) fn charge_outcome_response(outcome: ChargeOutcome) -> axum::response::Response {
    match outcome {
        ChargeOutcome::Succeeded { charge_id } => (
            StatusCode::OK,
            Json(serde_json::json!({
                "outcome": "succeeded",
                "charge_id": charge_id.as_str(),
            })),
        )
            .into_response(),
        ChargeOutcome::AlreadyPaid => (
            StatusCode::OK,
            Json(serde_json::json!({ "outcome": "already_paid" })),
        )
            .into_response(),
        ChargeOutcome::SkippedLinkedEnrollment => (
            StatusCode::OK,
            Json(serde_json::json!({ "outcome": "skipped_linked_enrollment" })),
        )
            .into_response(),
    }
}
