/// Execute an aggregate command deterministically (no IO, no async).
///
/// Combines decision and state evolution in one step:
/// 1. **Decide**: `aggregate.handle(command)` produces events (pure).
/// 2. **Evolve**: each event is applied via `aggregate.apply(event)`.
///
/// Useful in unit tests and inline processing; production code paths go
/// through `CommandDispatcher::dispatch`, which adds persistence,
/// publication, tenant isolation, and optimistic concurrency.
pub fn execute<A>(aggregate: &mut A, command: &A::Command) -> Result<Vec<A::Event>, A::Error>
where
    A: coursepay_core::Aggregate,
{
    let events = A::handle(aggregate, command)?;
    for ev in &events {
        A::apply(aggregate, ev);
    }
    Ok(events)
}
