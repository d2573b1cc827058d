use std::sync::Arc;

use async_trait::async_trait;

use coursepay_core::TenantId;

use crate::error::ProcessorError;
use crate::types::{
    ChargeReceipt, ChargeRequest, ChargeRef, CustomerRef, InvoiceRef, InvoiceState,
    PaymentMethodRef,
};

/// The opaque external card-processor capability.
///
/// Every method is a network call; callers bound them with timeouts and
/// treat a timeout as an unknown outcome (reconcile via webhook or
/// `invoice_state`/status queries before mutating obligation state).
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Submit a single atomic confirm+execute charge.
    ///
    /// Returns a receipt only for a terminal success status.
    async fn charge(&self, request: ChargeRequest) -> Result<ChargeReceipt, ProcessorError>;

    /// Cancel a not-yet-settled payment intent.
    async fn cancel_payment_intent(&self, charge_id: &ChargeRef) -> Result<(), ProcessorError>;

    /// Current state of an external invoice.
    async fn invoice_state(&self, invoice_id: &InvoiceRef) -> Result<InvoiceState, ProcessorError>;

    /// Void an open invoice.
    async fn void_invoice(&self, invoice_id: &InvoiceRef) -> Result<(), ProcessorError>;

    /// Delete a draft invoice.
    async fn delete_draft_invoice(&self, invoice_id: &InvoiceRef) -> Result<(), ProcessorError>;

    /// The customer's default stored method, if any.
    async fn default_payment_method(
        &self,
        customer: &CustomerRef,
    ) -> Result<Option<PaymentMethodRef>, ProcessorError>;

    /// All stored methods, most recently attached first.
    async fn list_payment_methods(
        &self,
        customer: &CustomerRef,
    ) -> Result<Vec<PaymentMethodRef>, ProcessorError>;

    /// Attach a method to a customer for later off-session reuse.
    async fn attach_payment_method(
        &self,
        customer: &CustomerRef,
        method: &PaymentMethodRef,
    ) -> Result<(), ProcessorError>;
}

/// Per-tenant processor client construction.
///
/// Tenants hold separate processor accounts, so clients are resolved per
/// operation and passed explicitly; replacing the module-level client
/// cache the original system relied on.
pub trait ProcessorFactory: Send + Sync {
    fn for_tenant(&self, tenant_id: TenantId) -> Arc<dyn PaymentProcessor>;
}

/// Factory returning the same client for every tenant (dev/test wiring).
pub struct StaticProcessorFactory {
    client: Arc<dyn PaymentProcessor>,
}

impl StaticProcessorFactory {
    pub fn new(client: Arc<dyn PaymentProcessor>) -> Self {
        Self { client }
    }
}

impl ProcessorFactory for StaticProcessorFactory {
    fn for_tenant(&self, _tenant_id: TenantId) -> Arc<dyn PaymentProcessor> {
        self.client.clone()
    }
}
