//! Convenient re-exports for common resilient-request types.
pub use crate::{
    backoff::{BackoffStrategy, RetryOn},
    circuit_breaker::{BreakerConfig, CircuitBreaker, CircuitState},
    client::{Client, HealthStatus, RequestDescriptor, Response},
    config::{ClientConfig, ClientConfigBuilder, ClientMode, ConfigError, ProtocolMode, RetryConfig},
    error::EngineError,
    hooks::{HookContext, Hooks, HooksPartial, ResponseSummary},
    integrity::IntegrityRegistry,
    sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper},
    state_machine::{RequestState, StateMachine},
    telemetry::{
        CircuitBreakerEvent, LogSink, MemorySink, NullSink, PolicyEvent, RequestOutcome,
        RetryEvent, TelemetrySink, TimeoutEvent,
    },
    transport::{Method, Transport, TransportRequest, TransportResponse},
    validator::{FnValidator, ResponseValidator, ValidationError},
};
