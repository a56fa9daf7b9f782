use branchpos_core::Aggregate;

/// Decide and apply a command in place (no persistence, no publication).
///
/// Returns the events that were applied. Handy for tests and for replaying a
/// command against a rehydrated aggregate; the full pipeline lives in the
/// infra command dispatcher.
pub fn execute<A>(aggregate: &mut A, command: &A::Command) -> Result<Vec<A::Event>, A::Error>
where
    A: Aggregate,
{
    let events = aggregate.handle(command)?;
    for event in &events {
        aggregate.apply(event);
    }
    Ok(events)
}
