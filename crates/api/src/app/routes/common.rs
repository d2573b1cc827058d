use axum::http::StatusCode;

use coursepay_auth::{CommandAuthorization, Permission};
use coursepay_billing::{AgreementStatus, EnrollmentId};
use coursepay_catalog::{BillingFrequency, PlanTemplateId, PlanType, ProductId};
use coursepay_core::{AggregateId, Currency, TenantId};

use crate::app::errors;

/// Small helper wrapper to associate required permissions with a command.
pub struct CmdAuth<C> {
    pub inner: C,
    pub required: Vec<Permission>,
}

impl<C> CommandAuthorization for CmdAuth<C> {
    fn required_permissions(&self) -> &[Permission] {
        &self.required
    }
}

pub fn parse_enrollment_id(s: &str) -> Result<EnrollmentId, axum::response::Response> {
    s.parse::<AggregateId>()
        .map(EnrollmentId::new)
        .map_err(|_| errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid enrollment id"))
}

pub fn parse_tenant_id(s: &str) -> Result<TenantId, axum::response::Response> {
    s.parse::<TenantId>()
        .map_err(|_| errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid tenant id"))
}

pub fn parse_product_id(s: &str) -> Result<ProductId, axum::response::Response> {
    s.parse::<ProductId>()
        .map_err(|_| errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid product id"))
}

pub fn parse_plan_template_id(s: &str) -> Result<PlanTemplateId, axum::response::Response> {
    s.parse::<PlanTemplateId>().map_err(|_| {
        errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid plan template id")
    })
}

pub fn parse_plan_type(s: &str) -> Result<PlanType, axum::response::Response> {
    match s {
        "one_time" => Ok(PlanType::OneTime),
        "deposit_installments" => Ok(PlanType::DepositInstallments),
        "subscription" => Ok(PlanType::Subscription),
        _ => Err(errors::json_error(
            StatusCode::BAD_REQUEST,
            "invalid_plan_type",
            "plan_type must be one of: one_time, deposit_installments, subscription",
        )),
    }
}

pub fn parse_frequency(s: &str) -> Result<BillingFrequency, axum::response::Response> {
    match s {
        "weekly" => Ok(BillingFrequency::Weekly),
        "biweekly" => Ok(BillingFrequency::Biweekly),
        "monthly" => Ok(BillingFrequency::Monthly),
        "yearly" => Ok(BillingFrequency::Yearly),
        _ => Err(errors::json_error(
            StatusCode::BAD_REQUEST,
            "invalid_frequency",
            "frequency must be one of: weekly, biweekly, monthly, yearly",
        )),
    }
}

pub fn parse_agreement_status(s: &str) -> Result<AgreementStatus, axum::response::Response> {
    match s {
        "sent" => Ok(AgreementStatus::Sent),
        "delivered" => Ok(AgreementStatus::Delivered),
        "completed" => Ok(AgreementStatus::Completed),
        "declined" => Ok(AgreementStatus::Declined),
        "voided" => Ok(AgreementStatus::Voided),
        _ => Err(errors::json_error(
            StatusCode::BAD_REQUEST,
            "invalid_status",
            "status must be one of: sent, delivered, completed, declined, voided",
        )),
    }
}

pub fn parse_currency(s: Option<&str>) -> Result<Currency, axum::response::Response> {
    match s {
        None => Ok(Currency::usd()),
        Some(code) => Currency::new(code).map_err(|e| {
            errors::json_error(StatusCode::BAD_REQUEST, "invalid_currency", e.to_string())
        }),
    }
}
