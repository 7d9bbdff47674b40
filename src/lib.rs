#![forbid(unsafe_code)]

//! # resilient-request
//!
//! A resilient outbound request engine: a per-request deterministic state machine, a
//! retry/backoff engine, a circuit breaker, an in-flight dedup map, a timeout/cancellation
//! harness, and an idempotency/payload-integrity registry, composed around a pluggable
//! byte-level transport.
//!
//! ## Features
//!
//! - **Deterministic per-request lifecycle** (`IDLE -> PENDING -> {RETRYING, SUCCESS, ERROR,
//!   CANCELLED}`) that rejects illegal transitions instead of silently clamping
//! - **Retry policies** with fixed/linear/exponential/custom backoff and jitter
//! - **Circuit breaker** with half-open probing, built on lock-free atomics
//! - **In-flight deduplication** for concurrent identical GET/HEAD calls
//! - **Idempotency-key / payload-fingerprint pinning** via SHA-256 canonicalization
//! - **Bounded concurrency** via a semaphore-backed transport-call gate
//! - **Pluggable transport** — any `tower::Service<TransportRequest, Response =
//!   TransportResponse>` works, so no sockets are opened by this crate
//! - **Fire-and-isolate observer hooks** plus a structured `TelemetrySink` for log aggregation
//!
//! ## Quick Start
//!
//! ```rust
//! use resilient_request::{Client, ClientConfigBuilder, Method, RequestDescriptor};
//! use resilient_request::{TransportRequest, TransportResponse};
//! use serde::Deserialize;
//! use std::collections::HashMap;
//! use std::task::{Context, Poll};
//!
//! #[derive(Clone)]
//! struct EchoTransport;
//!
//! impl tower_service::Service<TransportRequest> for EchoTransport {
//!     type Response = TransportResponse;
//!     type Error = std::io::Error;
//!     type Future = std::pin::Pin<
//!         Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
//!     >;
//!
//!     fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
//!         Poll::Ready(Ok(()))
//!     }
//!
//!     fn call(&mut self, _req: TransportRequest) -> Self::Future {
//!         Box::pin(async move {
//!             let mut headers = HashMap::new();
//!             headers.insert("content-type".to_string(), "application/json".to_string());
//!             Ok(TransportResponse { status: 200, headers, body: br#"{"ok":true}"#.to_vec() })
//!         })
//!     }
//! }
//!
//! #[derive(Deserialize, Clone)]
//! struct Payload {
//!     ok: bool,
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ClientConfigBuilder::new()
//!         .base_url("https://api.example.com")
//!         .build()
//!         .expect("valid client configuration");
//!     let client = Client::new(config, EchoTransport);
//!
//!     let response = client
//!         .request(RequestDescriptor::<Payload>::new(Method::Get, "/users/1"))
//!         .await
//!         .expect("request succeeds");
//!     assert!(response.data.ok);
//! }
//! ```

mod backoff;
mod circuit_breaker;
mod client;
mod clock;
mod config;
mod dedupe;
mod error;
mod hooks;
mod ids;
mod integrity;
mod jitter;
mod metrics;
mod sleeper;
mod state_machine;
mod telemetry;
mod timeout;
mod transport;
mod validator;

// Re-exports
pub use backoff::{compute_delay, should_retry, BackoffStrategy, RetryOn};
pub use circuit_breaker::{BreakerConfig, CircuitBreaker, CircuitState};
pub use client::{Client, HealthStatus, RequestDescriptor, Response, MAX_CONCURRENT_REQUESTS};
pub use clock::{Clock, MonotonicClock};
pub use config::{
    ClientConfig, ClientConfigBuilder, ClientMode, ConfigError, ProtocolMode, RetryConfig,
};
pub use dedupe::{dedupe_applies, dedupe_key, DedupeMap, Join, MAX_DEDUPE_MAP_SIZE};
pub use error::EngineError;
pub use hooks::{HookContext, Hooks, HooksPartial, ResponseSummary};
pub use ids::{generate_idempotency_key, generate_request_id};
pub use integrity::{fingerprint_hex, IntegrityRegistry};
pub use jitter::apply_jitter;
pub use metrics::{MetricsBuffer, Sample, MAX_SAMPLES};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use state_machine::{RequestState, StateMachine};
pub use telemetry::{
    event_to_json, CircuitBreakerEvent, LogSink, MemorySink, NullSink, PolicyEvent,
    RequestOutcome, RetryEvent, TelemetrySink, TimeoutEvent,
};
pub use timeout::{with_timeout, TimeoutOutcome};
pub use transport::{Method, Transport, TransportRequest, TransportResponse};
pub use validator::{FnValidator, ResponseValidator, ValidationError};

pub mod prelude;
