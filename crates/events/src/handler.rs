/// Run one command against an in-memory aggregate: decide, then apply the
/// resulting events in order.
///
/// No persistence or publication happens here; the infra dispatcher wraps the
/// same lifecycle with an event store and a bus.
pub fn execute<A>(aggregate: &mut A, command: &A::Command) -> Result<Vec<A::Event>, A::Error>
where
    A: ezbooks_core::Aggregate,
{
    let events = A::handle(aggregate, command)?;
    for ev in &events {
        A::apply(aggregate, ev);
    }
    Ok(events)
}
