//! In-memory processor for tests/dev.
//!
//! Scripted outcomes + full call recording: orchestration tests assert not
//! just results but *how many* processor calls happened (the idempotency
//! guard's "zero calls the second time" property needs exactly this).

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::client::PaymentProcessor;
use crate::error::ProcessorError;
use crate::types::{
    ChargeReceipt, ChargeRequest, ChargeRef, CustomerRef, InvoiceRef, InvoiceState,
    PaymentMethodRef,
};

/// A recorded call, in invocation order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessorCall {
    Charge {
        customer: CustomerRef,
        method: PaymentMethodRef,
        amount: u64,
        off_session: bool,
        idempotency_key: String,
    },
    CancelPaymentIntent(ChargeRef),
    InvoiceState(InvoiceRef),
    VoidInvoice(InvoiceRef),
    DeleteDraftInvoice(InvoiceRef),
    DefaultPaymentMethod(CustomerRef),
    ListPaymentMethods(CustomerRef),
    AttachPaymentMethod(CustomerRef, PaymentMethodRef),
}

/// Next outcome for a `charge` call. Defaults to success when the queue is
/// empty.
#[derive(Debug, Clone)]
pub enum ScriptedOutcome {
    Succeed,
    Fail(ProcessorError),
}

#[derive(Debug, Default)]
struct CustomerState {
    default_method: Option<PaymentMethodRef>,
    methods: Vec<PaymentMethodRef>,
}

#[derive(Debug, Default)]
struct Inner {
    customers: HashMap<String, CustomerState>,
    invoices: HashMap<String, InvoiceState>,
    charge_outcomes: VecDeque<ScriptedOutcome>,
    /// Receipts by idempotency key (processor-side idempotency).
    receipts: HashMap<String, ChargeReceipt>,
    calls: Vec<ProcessorCall>,
    cleanup_fails: bool,
    next_charge: u64,
}

/// Scriptable in-memory processor.
#[derive(Debug, Default)]
pub struct InMemoryProcessor {
    inner: Mutex<Inner>,
}

impl InMemoryProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a method for a customer; the first attached becomes default
    /// unless `default` overrides later.
    pub fn seed_method(&self, customer: &CustomerRef, method: PaymentMethodRef, default: bool) {
        let mut inner = self.inner.lock().unwrap();
        let state = inner.customers.entry(customer.as_str().to_string()).or_default();
        if default || state.default_method.is_none() {
            state.default_method = Some(method.clone());
        }
        state.methods.insert(0, method);
    }

    pub fn seed_invoice(&self, invoice: InvoiceRef, state: InvoiceState) {
        self.inner
            .lock()
            .unwrap()
            .invoices
            .insert(invoice.as_str().to_string(), state);
    }

    /// Queue the outcome of the next `charge` call.
    pub fn script_charge(&self, outcome: ScriptedOutcome) {
        self.inner.lock().unwrap().charge_outcomes.push_back(outcome);
    }

    /// Make cleanup operations (cancel/void/delete) fail with a transient
    /// error, for best-effort-cleanup tests.
    pub fn fail_cleanup(&self, fail: bool) {
        self.inner.lock().unwrap().cleanup_fails = fail;
    }

    pub fn calls(&self) -> Vec<ProcessorCall> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn charge_call_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| matches!(c, ProcessorCall::Charge { .. }))
            .count()
    }

    pub fn invoice(&self, invoice: &InvoiceRef) -> Option<InvoiceState> {
        self.inner
            .lock()
            .unwrap()
            .invoices
            .get(invoice.as_str())
            .copied()
    }

    fn cleanup_guard(inner: &Inner) -> Result<(), ProcessorError> {
        if inner.cleanup_fails {
            Err(ProcessorError::Transient("injected cleanup failure".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PaymentProcessor for InMemoryProcessor {
    async fn charge(&self, request: ChargeRequest) -> Result<ChargeReceipt, ProcessorError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(ProcessorCall::Charge {
            customer: request.customer.clone(),
            method: request.method.clone(),
            amount: request.amount,
            off_session: request.off_session,
            idempotency_key: request.idempotency_key.clone(),
        });

        if let Some(receipt) = inner.receipts.get(&request.idempotency_key) {
            return Ok(receipt.clone());
        }

        match inner.charge_outcomes.pop_front() {
            Some(ScriptedOutcome::Fail(err)) => Err(err),
            Some(ScriptedOutcome::Succeed) | None => {
                inner.next_charge += 1;
                let receipt = ChargeReceipt {
                    charge_id: ChargeRef::new(format!("pi_{:06}", inner.next_charge)),
                    amount: request.amount,
                };
                inner
                    .receipts
                    .insert(request.idempotency_key, receipt.clone());
                Ok(receipt)
            }
        }
    }

    async fn cancel_payment_intent(&self, charge_id: &ChargeRef) -> Result<(), ProcessorError> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .calls
            .push(ProcessorCall::CancelPaymentIntent(charge_id.clone()));
        Self::cleanup_guard(&inner)
    }

    async fn invoice_state(&self, invoice_id: &InvoiceRef) -> Result<InvoiceState, ProcessorError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(ProcessorCall::InvoiceState(invoice_id.clone()));
        inner
            .invoices
            .get(invoice_id.as_str())
            .copied()
            .ok_or_else(|| ProcessorError::InvalidRequest(format!("no such invoice {invoice_id}")))
    }

    async fn void_invoice(&self, invoice_id: &InvoiceRef) -> Result<(), ProcessorError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(ProcessorCall::VoidInvoice(invoice_id.clone()));
        Self::cleanup_guard(&inner)?;

        match inner.invoices.get_mut(invoice_id.as_str()) {
            Some(state @ InvoiceState::Open) => {
                *state = InvoiceState::Void;
                Ok(())
            }
            Some(state) => Err(ProcessorError::InvalidRequest(format!(
                "cannot void invoice in state {state:?}"
            ))),
            None => Err(ProcessorError::InvalidRequest(format!(
                "no such invoice {invoice_id}"
            ))),
        }
    }

    async fn delete_draft_invoice(&self, invoice_id: &InvoiceRef) -> Result<(), ProcessorError> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .calls
            .push(ProcessorCall::DeleteDraftInvoice(invoice_id.clone()));
        Self::cleanup_guard(&inner)?;

        match inner.invoices.get(invoice_id.as_str()) {
            Some(InvoiceState::Draft) => {
                inner.invoices.remove(invoice_id.as_str());
                Ok(())
            }
            Some(state) => Err(ProcessorError::InvalidRequest(format!(
                "only draft invoices can be deleted (state {state:?})"
            ))),
            None => Err(ProcessorError::InvalidRequest(format!(
                "no such invoice {invoice_id}"
            ))),
        }
    }

    async fn default_payment_method(
        &self,
        customer: &CustomerRef,
    ) -> Result<Option<PaymentMethodRef>, ProcessorError> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .calls
            .push(ProcessorCall::DefaultPaymentMethod(customer.clone()));
        Ok(inner
            .customers
            .get(customer.as_str())
            .and_then(|c| c.default_method.clone()))
    }

    async fn list_payment_methods(
        &self,
        customer: &CustomerRef,
    ) -> Result<Vec<PaymentMethodRef>, ProcessorError> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .calls
            .push(ProcessorCall::ListPaymentMethods(customer.clone()));
        Ok(inner
            .customers
            .get(customer.as_str())
            .map(|c| c.methods.clone())
            .unwrap_or_default())
    }

    async fn attach_payment_method(
        &self,
        customer: &CustomerRef,
        method: &PaymentMethodRef,
    ) -> Result<(), ProcessorError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(ProcessorCall::AttachPaymentMethod(
            customer.clone(),
            method.clone(),
        ));
        let state = inner
            .customers
            .entry(customer.as_str().to_string())
            .or_default();
        if state.default_method.is_none() {
            state.default_method = Some(method.clone());
        }
        state.methods.insert(0, method.clone());
        Ok(())
    }
}
