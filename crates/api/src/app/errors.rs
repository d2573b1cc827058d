use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use coursepay_infra::billing_ops::{ChargeError, PlanSelectionError};
use coursepay_infra::command_dispatcher::DispatchError;
use coursepay_processor::ProcessorError;

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn dispatch_error_to_response(err: DispatchError) -> axum::response::Response {
    match err {
        DispatchError::Concurrency(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        DispatchError::Validation(msg) => {
            json_error(StatusCode::BAD_REQUEST, "validation_error", msg)
        }
        DispatchError::InvariantViolation(msg) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invariant_violation", msg)
        }
        DispatchError::Unauthorized => {
            json_error(StatusCode::FORBIDDEN, "unauthorized", "unauthorized")
        }
        DispatchError::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", "not found"),
        DispatchError::Deserialize(msg) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "deserialize_error", msg)
        }
        DispatchError::Store(e) => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "store_error",
            format!("{e:?}"),
        ),
        DispatchError::Publish(msg) => json_error(StatusCode::BAD_GATEWAY, "publish_error", msg),
        DispatchError::TenantIsolation(msg) => {
            json_error(StatusCode::FORBIDDEN, "tenant_isolation", msg)
        }
    }
}

/// Processor failures are reported with a stable classification for caller
/// messaging; operator detail goes to logs, not end users.
pub fn charge_error_to_response(err: ChargeError) -> axum::response::Response {
    match err {
        ChargeError::EnrollmentNotFound => {
            json_error(StatusCode::NOT_FOUND, "not_found", "enrollment not found")
        }
        ChargeError::ObligationNotFound(n) => json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("no obligation {n}"),
        ),
        ChargeError::NotChargeable(status) => json_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "not_chargeable",
            format!("obligation is {status:?}"),
        ),
        ChargeError::AgreementIncomplete => json_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "agreement_incomplete",
            "agreement must be completed before charging",
        ),
        ChargeError::NoPaymentMethod => json_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "no_payment_method",
            "no payment method on file",
        ),
        ChargeError::OutcomeUnknown => json_error(
            StatusCode::BAD_GATEWAY,
            "outcome_unknown",
            "charge outcome unknown; awaiting processor confirmation",
        ),
        ChargeError::Processor(err) => {
            let code = match &err {
                ProcessorError::Declined { .. } => "card_declined",
                ProcessorError::AuthenticationRequired => "authentication_required",
                ProcessorError::RateLimited => "rate_limited",
                ProcessorError::InvalidRequest(_) | ProcessorError::Transient(_) => {
                    "processing_error"
                }
            };
            tracing::warn!(error = %err, "processor charge failed");
            json_error(StatusCode::PAYMENT_REQUIRED, code, "payment was not completed")
        }
        ChargeError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        ChargeError::Internal(msg) => {
            tracing::error!(error = %msg, "charge failed internally");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "internal error",
            )
        }
    }
}

pub fn plan_selection_error_to_response(err: PlanSelectionError) -> axum::response::Response {
    match err {
        PlanSelectionError::EnrollmentNotFound => {
            json_error(StatusCode::NOT_FOUND, "not_found", "enrollment not found")
        }
        PlanSelectionError::EnrollmentNotOnboarding(status) => json_error(
            StatusCode::CONFLICT,
            "enrollment_not_onboarding",
            format!("enrollment is {status:?}"),
        ),
        PlanSelectionError::PaidObligationExists => json_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "paid_obligation_exists",
            "a paid obligation exists; plan cannot be re-selected",
        ),
        PlanSelectionError::ProductNotFound => {
            json_error(StatusCode::NOT_FOUND, "not_found", "product not found")
        }
        PlanSelectionError::TemplateNotFound => {
            json_error(StatusCode::NOT_FOUND, "not_found", "plan template not found")
        }
        PlanSelectionError::TemplateInactive => json_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "template_inactive",
            "plan template is not active",
        ),
        PlanSelectionError::TemplateNotAllowed => json_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "template_not_allowed",
            "plan template is not allowed for this product",
        ),
        PlanSelectionError::Config(err) => {
            json_error(StatusCode::BAD_REQUEST, "configuration_error", err.to_string())
        }
        PlanSelectionError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        PlanSelectionError::Internal(msg) => {
            tracing::error!(error = %msg, "plan selection failed internally");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "internal error",
            )
        }
    }
}
