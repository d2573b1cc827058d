use std::sync::Arc;

use axum::{
    Json, Router,
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    routing::post,
};

use coursepay_auth::Permission;
use coursepay_catalog::{PlanCatalog, PlanTemplate, PlanTemplateId};

use crate::app::routes::common::{self, CmdAuth};
use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new().route("/", post(create_plan_template).get(list_plan_templates))
}

pub async fn list_plan_templates(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
) -> axum::response::Response {
    let items = services
        .catalog
        .list_templates(tenant.tenant_id())
        .iter()
        .map(dto::template_to_json)
        .collect::<Vec<_>>();

    (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
}

pub async fn create_plan_template(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Json(body): Json<dto::CreatePlanTemplateRequest>,
) -> axum::response::Response {
    let guard = CmdAuth {
        inner: (),
        required: vec![Permission::new("plans.manage")],
    };
    if let Err(e) = crate::authz::authorize_command(&tenant, &principal, &guard) {
        return errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string());
    }

    let plan_type = match common::parse_plan_type(&body.plan_type) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let frequency = match body.frequency.as_deref() {
        None => None,
        Some(s) => match common::parse_frequency(s) {
            Ok(v) => Some(v),
            Err(resp) => return resp,
        },
    };
    let currency = match common::parse_currency(body.currency.as_deref()) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let template = PlanTemplate {
        id: PlanTemplateId::new(),
        name: body.name,
        plan_type,
        deposit_amount: body.deposit_amount,
        installment_count: body.installment_count,
        frequency,
        period_amount: body.period_amount,
        currency,
        active: true,
    };

    // Configuration errors are rejected synchronously, never stored.
    if let Err(e) = template.validate() {
        return errors::json_error(StatusCode::BAD_REQUEST, "configuration_error", e.to_string());
    }

    services.catalog.upsert_template(tenant.tenant_id(), template.clone());

    (
        StatusCode::CREATED,
        Json(serde_json::json!({ "id": template.id.to_string() })),
    )
        .into_response()
}
