use std::sync::Arc;

use axum::{
    Json, Router,
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    routing::post,
};

use coursepay_auth::Permission;
use coursepay_catalog::{Product, ProductId};

use crate::app::routes::common::{self, CmdAuth};
use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new().route("/", post(create_product))
}

pub async fn create_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Json(body): Json<dto::CreateProductRequest>,
) -> axum::response::Response {
    let guard = CmdAuth {
        inner: (),
        required: vec![Permission::new("plans.manage")],
    };
    if let Err(e) = crate::authz::authorize_command(&tenant, &principal, &guard) {
        return errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string());
    }

    if body.price == 0 {
        return errors::json_error(
            StatusCode::BAD_REQUEST,
            "validation_error",
            "price must be positive",
        );
    }

    let currency = match common::parse_currency(body.currency.as_deref()) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let mut allowed_plan_ids = Vec::with_capacity(body.allowed_plan_ids.len());
    for raw in &body.allowed_plan_ids {
        match common::parse_plan_template_id(raw) {
            Ok(id) => allowed_plan_ids.push(id),
            Err(resp) => return resp,
        }
    }

    let product = Product {
        id: ProductId::new(),
        name: body.name,
        price: body.price,
        currency,
        allowed_plan_ids,
    };

    services.catalog.upsert_product(tenant.tenant_id(), product.clone());

    (
        StatusCode::CREATED,
        Json(serde_json::json!({ "id": product.id.to_string() })),
    )
        .into_response()
}
