use serde::{Deserialize, Serialize};

use coursepay_core::Currency;

macro_rules! impl_ref_newtype {
    ($t:ident) => {
        /// Opaque external processor reference.
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $t(String);

        impl $t {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

impl_ref_newtype!(CustomerRef);
impl_ref_newtype!(PaymentMethodRef);
impl_ref_newtype!(ChargeRef);
impl_ref_newtype!(InvoiceRef);

/// A single atomic charge submission.
///
/// `off_session` charges confirm and execute in one processor call using a
/// stored method, with no further user interaction. `idempotency_key` makes
/// a resubmitted request return the original receipt instead of charging
/// twice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeRequest {
    pub customer: CustomerRef,
    pub method: PaymentMethodRef,
    /// Amount in minor units.
    pub amount: u64,
    pub currency: Currency,
    pub off_session: bool,
    pub idempotency_key: String,
    pub description: Option<String>,
}

/// Terminal result of a successful charge.
///
/// Only this receipt (never mere submission) may trigger obligation
/// mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeReceipt {
    pub charge_id: ChargeRef,
    pub amount: u64,
}

/// External invoice lifecycle as the processor reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceState {
    Draft,
    Open,
    Paid,
    Void,
}
