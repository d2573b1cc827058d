//! Enrollee-facing checkout: unauthenticated flow guarded by a
//! time-bounded enrollment token instead of a back-office JWT.
//!
//! The token binds tenant + enrollment; the path id must match the token's
//! claim, so a leaked link can never charge a different enrollment.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
};
use chrono::Utc;

use coursepay_billing::EnrollmentId;
use coursepay_processor::PaymentMethodRef;

use crate::app::routes::common;
use crate::app::routes::enrollments::charge_outcome_response;
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::middleware::extract_bearer;

pub fn router() -> Router {
    Router::new().route("/:id/charge", post(checkout_charge))
}

/// Charge the enrollment's next pending obligation with the supplied (or
/// stored) payment method.
pub async fn checkout_charge(
    Extension(services): Extension<Arc<AppServices>>,
    headers: axum::http::HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<dto::ChargeObligationRequest>,
) -> axum::response::Response {
    let token = match extract_bearer(&headers) {
        Ok(t) => t,
        Err(status) => return errors::json_error(status, "unauthorized", "missing token"),
    };

    let claims =
        match coursepay_auth::validate_enrollment_token(&services.token_secret, token, Utc::now()) {
            Ok(c) => c,
            Err(e) => {
                return errors::json_error(StatusCode::UNAUTHORIZED, "invalid_token", e.to_string());
            }
        };

    let enrollment_id = match common::parse_enrollment_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if claims.enrollment_id != enrollment_id.0 {
        return errors::json_error(
            StatusCode::FORBIDDEN,
            "token_mismatch",
            "token is not valid for this enrollment",
        );
    }

    // The next pending obligation is the one an enrollee can settle.
    let enrollment = match services.load(claims.tenant_id, enrollment_id.0, |_t, id| {
        coursepay_billing::Enrollment::empty(EnrollmentId::new(id))
    }) {
        Ok(e) => e,
        Err(e) => return errors::dispatch_error_to_response(e),
    };
    let payment_number = match enrollment.next_pending() {
        Some(o) => o.payment_number,
        None => {
            return errors::json_error(
                StatusCode::UNPROCESSABLE_ENTITY,
                "nothing_due",
                "no pending obligation",
            );
        }
    };

    let method = body.payment_method.map(PaymentMethodRef::new);

    match services
        .orchestrator
        .charge_obligation(claims.tenant_id, enrollment_id, payment_number, method)
        .await
    {
        Ok(outcome) => charge_outcome_response(outcome),
        Err(e) => errors::charge_error_to_response(e),
    }
}
