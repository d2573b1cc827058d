//! `coursepay-infra` — infrastructure + application services.
//!
//! Everything that touches IO lives here: the append-only event store
//! (in-memory and Postgres), the command dispatch pipeline, tenant-isolated
//! read models and their projections, and the two application services that
//! coordinate external-processor IO with domain commands; the charge
//! orchestrator and the plan-selection coordinator.

pub mod billing_ops;
pub mod command_dispatcher;
pub mod event_store;
pub mod projections;
pub mod read_model;
