//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: infrastructure wiring (event store/bus, projections,
//!   dispatcher, processor, catalog)
//! - `routes/`: HTTP routes + handlers (one file per domain area)
//! - `dto.rs`: request/response DTOs and JSON mapping helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Process-level configuration for the HTTP surface.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// HS256 secret for admin JWTs and enrollment checkout tokens.
    pub jwt_secret: String,
    /// Shared secret expected in `X-Webhook-Secret` on webhook calls.
    pub webhook_secret: String,
}

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(config: AppConfig) -> Router {
    let jwt = Arc::new(coursepay_auth::Hs256JwtValidator::new(
        config.jwt_secret.clone().into_bytes(),
    ));
    let auth_state = middleware::AuthState { jwt };

    let services = Arc::new(services::build_services(&config));

    // Admin routes: require a tenant-scoped JWT.
    let protected = routes::router()
        .layer(Extension(services.clone()))
        .layer(axum::middleware::from_fn_with_state(
            auth_state,
            middleware::auth_middleware,
        ));

    // Public routes: health, enrollee checkout (enrollment token), webhooks
    // (shared secret). Each authenticates on its own terms.
    let public = Router::new()
        .route("/health", get(routes::system::health))
        .nest("/checkout", routes::checkout::router())
        .nest("/webhooks", routes::webhooks::router())
        .layer(Extension(services));

    Router::new()
        .merge(public)
        .merge(protected)
        .layer(ServiceBuilder::new())
}
