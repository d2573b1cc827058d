//! Append-only event store boundary.
//!
//! Infrastructure-facing abstraction for storing and loading tenant-scoped
//! event streams without storage assumptions. The in-memory store backs
//! tests/dev; the Postgres store is the production backend.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
