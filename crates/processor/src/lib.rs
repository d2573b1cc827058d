//! `coursepay-processor` — the external card processor boundary.
//!
//! The processor is an opaque capability: create/confirm an off-session
//! charge, cancel a payment intent, retrieve/void/delete an invoice, and
//! resolve a customer's stored payment methods. This crate defines that
//! capability as a trait plus a classified error taxonomy; the wire client
//! lives outside this repository. The in-memory implementation scripts
//! outcomes and records calls so orchestration logic is testable without a
//! processor account.
//!
//! Clients are constructed **per tenant** through `ProcessorFactory` and
//! passed explicitly; never cached in module scope.

pub mod client;
pub mod error;
pub mod in_memory;
pub mod types;

pub use client::{PaymentProcessor, ProcessorFactory, StaticProcessorFactory};
pub use error::ProcessorError;
pub use in_memory::{InMemoryProcessor, ProcessorCall, ScriptedOutcome};
pub use types::{
    ChargeReceipt, ChargeRequest, ChargeRef, CustomerRef, InvoiceRef, InvoiceState,
    PaymentMethodRef,
};
