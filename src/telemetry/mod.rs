//! Ambient observability for the engine: structured [`PolicyEvent`]s flow through a
//! [`TelemetrySink`], independent of the per-request [`crate::hooks::Hooks`] table.

pub mod events;
pub mod sinks;

pub use events::{
    event_to_json, CircuitBreakerEvent, PolicyEvent, RequestOutcome, RetryEvent, TimeoutEvent,
};
pub use sinks::{emit_best_effort, LogSink, MemorySink, NullSink, TelemetrySink};

use futures::future::BoxFuture;
use std::sync::Arc;

/// Object-safe wrapper around [`TelemetrySink`], since `ClientConfig` holds one concrete sink
/// type chosen at construction time rather than being generic over it.
pub trait DynTelemetrySink: Send + Sync {
    fn emit<'a>(&'a self, event: PolicyEvent) -> BoxFuture<'a, ()>;
}

impl<S> DynTelemetrySink for S
where
    S: TelemetrySink + Sync,
{
    fn emit<'a>(&'a self, event: PolicyEvent) -> BoxFuture<'a, ()> {
        let sink = self.clone();
        Box::pin(async move { emit_best_effort(sink, event).await })
    }
}

pub type SharedTelemetrySink = Arc<dyn DynTelemetrySink>;

pub fn null_telemetry() -> SharedTelemetrySink {
    Arc::new(NullSink)
}
