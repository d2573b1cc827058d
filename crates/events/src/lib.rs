//! Event and command abstractions shared by the billing modules.
//!
//! The write model emits domain events (facts), envelopes carry them with
//! tenant + stream metadata, and the event bus distributes committed
//! envelopes to read-model projections.

pub mod bus;
pub mod command;
pub mod envelope;
pub mod event;
pub mod handler;
pub mod in_memory_bus;
pub mod tenant;

pub use bus::{EventBus, Subscription};
pub use command::Command;
pub use envelope::EventEnvelope;
pub use event::Event;
pub use handler::execute;
pub use in_memory_bus::InMemoryEventBus;
pub use tenant::TenantScoped;
