use axum::{Router, routing::get};

pub mod checkout;
pub mod common;
pub mod enrollments;
pub mod payments;
pub mod plans;
pub mod products;
pub mod schedules;
pub mod system;
pub mod webhooks;

/// Router for all authenticated (tenant-scoped) admin endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .nest("/plans", plans::router())
        .nest("/products", products::router())
        .nest("/enrollments", enrollments::router())
        .nest("/schedules", schedules::router())
        .nest("/payments", payments::router())
}
