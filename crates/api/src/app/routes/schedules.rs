use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use chrono::Utc;

use crate::app::services::AppServices;
use crate::app::dto;

const DEFAULT_UPCOMING_DAYS: i64 = 30;

pub fn router() -> Router {
    Router::new()
        .route("/overdue", get(get_overdue))
        .route("/upcoming", get(get_upcoming))
}

pub async fn get_overdue(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
) -> axum::response::Response {
    let now = Utc::now();
    let items = services
        .schedule_projection
        .list_overdue(tenant.tenant_id(), now)
        .iter()
        .map(|e| dto::schedule_entry_to_json(e, now))
        .collect::<Vec<_>>();

    (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
}

pub async fn get_upcoming(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Query(query): Query<dto::UpcomingQuery>,
) -> axum::response::Response {
    let now = Utc::now();
    let days = query.days.unwrap_or(DEFAULT_UPCOMING_DAYS).clamp(0, 365);
    let items = services
        .schedule_projection
        .list_upcoming(tenant.tenant_id(), now, days)
        .iter()
        .map(|e| dto::schedule_entry_to_json(e, now))
        .collect::<Vec<_>>();

    (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
}
