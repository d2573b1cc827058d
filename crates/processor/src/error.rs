use thiserror::Error;

/// Classified processor failure.
///
/// The orchestrator surfaces these to callers verbatim; none of them may
/// trigger an internal retry (blind retries risk duplicate charges).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProcessorError {
    /// The card was declined with a processor decline code.
    #[error("card declined ({code}): {message}")]
    Declined { code: String, message: String },

    /// The method requires interactive authentication (e.g. 3DS) and the
    /// charge was submitted off-session.
    #[error("authentication required")]
    AuthenticationRequired,

    /// The processor is throttling this account.
    #[error("rate limited")]
    RateLimited,

    /// The request itself was malformed (missing customer/method, invoice
    /// in the wrong state, ...).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Network/5xx-style failure with an unknown server-side outcome.
    #[error("transient processor error: {0}")]
    Transient(String),
}

impl ProcessorError {
    /// Whether an operator may reasonably retry the same request later.
    ///
    /// Retry stays a caller decision; this only classifies.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProcessorError::RateLimited | ProcessorError::Transient(_))
    }
}
