use coursepay_core::AggregateId;

/// A command targets a specific aggregate.
///
/// Commands represent **intent**; a request to perform an action. They are
/// transient (not persisted) and are transformed into events (which are).
/// A command is rejected if invalid; events represent accepted changes.
///
/// Commands must name the aggregate they target via
/// `target_aggregate_id()`, which gives infrastructure a routing key and
/// makes one aggregate stream the transaction boundary. Tenant context is
/// attached at the event level by the dispatch pipeline, keeping commands
/// domain-focused.
pub trait Command: Clone + core::fmt::Debug + Send + Sync + 'static {
    fn target_aggregate_id(&self) -> AggregateId;
}
