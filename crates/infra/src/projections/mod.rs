//! Projection implementations (read model builders).
//!
//! Projections consume enrollment events and build query-optimized read
//! models. All projections are:
//! - **Rebuildable**: reconstructed from the event stream at any time
//! - **Tenant-isolated**: data partitioned by tenant
//! - **Idempotent**: safe for at-least-once delivery (cursor-guarded)

pub mod cursor_store;
pub mod ledger;
pub mod payments;
pub mod schedule;

pub use cursor_store::{CursorAdvance, CursorTracker, InMemoryCursorStore, ProjectionCursorStore};
pub use ledger::{EnrollmentLedger, EnrollmentLedgerProjection, LedgerProjectionError};
pub use payments::{PaymentRecord, PaymentsProjection, PaymentsProjectionError};
pub use schedule::{
    PaymentScheduleProjection, ScheduleEntry, ScheduleEntryKey, ScheduleProjectionError,
};
