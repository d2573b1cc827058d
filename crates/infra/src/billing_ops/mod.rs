//! Application services for the payment engine.
//!
//! These sit above the pure Enrollment aggregate and below HTTP: they load
//! state, talk to the external processor, and turn terminal processor
//! results into domain commands. All processor IO is bounded by timeouts;
//! all state mutation goes through the command dispatcher's optimistic
//! concurrency check.

pub mod charge;
pub mod plan_selection;

#[cfg(test)]
mod tests;

pub use charge::{ChargeError, ChargeOrchestrator, ChargeOutcome};
pub use plan_selection::{PlanSelectionCoordinator, PlanSelectionError, PlanSelectionReport};

/// The aggregate type identifier every enrollment stream is filed under.
pub const ENROLLMENT_AGGREGATE: &str = "billing.enrollment";
