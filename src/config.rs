//! Immutable client configuration and its fallible builder.
//!
//! Validates the whole configuration up front via [`ClientConfigBuilder::build`], returning a
//! [`ConfigError`] rather than panicking deep inside the engine on bad input.

use crate::backoff::{BackoffStrategy, RetryOn};
use crate::circuit_breaker::BreakerConfig;
use crate::telemetry::{null_telemetry, DynTelemetrySink, SharedTelemetrySink, TelemetrySink};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// `standard` omits idempotency headers and never consults the integrity registry; `idempotent`
/// adds `Idempotency-Key`/`X-Payload-Hash` and enforces payload-fingerprint pinning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolMode {
    Standard,
    Idempotent,
}

/// `strict` runs the caller's response validator (or falls back to plain deserialization) and
/// may surface its failure as `response-validation`; `performance` skips validator invocation
/// entirely and only deserializes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientMode {
    Strict,
    Performance,
}

#[derive(Clone)]
pub struct RetryConfig {
    pub enabled: bool,
    pub max_attempts: u32,
    pub strategy: BackoffStrategy,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
    pub retry_on: Vec<RetryOn>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            strategy: BackoffStrategy::Exponential,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            jitter: true,
            retry_on: vec![RetryOn::Network, RetryOn::ServerError],
        }
    }
}

impl fmt::Debug for RetryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryConfig")
            .field("enabled", &self.enabled)
            .field("max_attempts", &self.max_attempts)
            .field("strategy", &self.strategy)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("jitter", &self.jitter)
            .field("retry_on", &self.retry_on)
            .finish()
    }
}

/// Immutable once built. Owned for the life of the [`crate::client::Client`] that built it.
#[derive(Clone)]
pub struct ClientConfig {
    pub base_url: Option<String>,
    pub default_timeout: Duration,
    pub default_headers: HashMap<String, String>,
    pub retry: RetryConfig,
    pub breaker: BreakerConfig,
    pub dedupe_enabled: bool,
    pub protocol_mode: ProtocolMode,
    pub client_mode: ClientMode,
    pub telemetry: SharedTelemetrySink,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid client configuration: {0}")]
pub struct ConfigError(pub String);

pub struct ClientConfigBuilder {
    base_url: Option<String>,
    default_timeout: Duration,
    default_headers: HashMap<String, String>,
    retry: RetryConfig,
    breaker: BreakerConfig,
    dedupe_enabled: bool,
    protocol_mode: ProtocolMode,
    client_mode: ClientMode,
    telemetry: SharedTelemetrySink,
}

impl Default for ClientConfigBuilder {
    fn default() -> Self {
        Self {
            base_url: None,
            default_timeout: Duration::from_millis(30_000),
            default_headers: HashMap::new(),
            retry: RetryConfig::default(),
            breaker: BreakerConfig::new(5, Duration::from_secs(30)),
            dedupe_enabled: false,
            protocol_mode: ProtocolMode::Standard,
            client_mode: ClientMode::Performance,
            telemetry: null_telemetry(),
        }
    }
}

impl ClientConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A conservative preset: idempotent protocol mode (integrity pinning on), strict response
    /// validation, moderate retry. Callers still tune individual fields afterward.
    pub fn strict() -> Self {
        Self::new().client_mode(ClientMode::Strict).protocol_mode(ProtocolMode::Idempotent)
    }

    /// A throughput-oriented preset: standard protocol mode, no validator invocation.
    pub fn performance() -> Self {
        Self::new().client_mode(ClientMode::Performance).protocol_mode(ProtocolMode::Standard)
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.insert(name.into(), value.into());
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn breaker(mut self, breaker: BreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn dedupe_enabled(mut self, enabled: bool) -> Self {
        self.dedupe_enabled = enabled;
        self
    }

    pub fn protocol_mode(mut self, mode: ProtocolMode) -> Self {
        self.protocol_mode = mode;
        self
    }

    pub fn client_mode(mut self, mode: ClientMode) -> Self {
        self.client_mode = mode;
        self
    }

    pub fn telemetry<S>(mut self, sink: S) -> Self
    where
        S: TelemetrySink + Sync,
    {
        self.telemetry = Arc::new(sink) as Arc<dyn DynTelemetrySink>;
        self
    }

    /// Validates the configuration and constructs a [`ClientConfig`], rejecting combinations
    /// that would otherwise panic or misbehave deep inside the engine.
    pub fn build(self) -> Result<ClientConfig, ConfigError> {
        if self.retry.max_attempts == 0 {
            return Err(ConfigError("retry.max_attempts must be >= 1".into()));
        }
        if self.retry.max_delay < self.retry.base_delay {
            return Err(ConfigError("retry.max_delay must be >= retry.base_delay".into()));
        }
        if self.breaker.failure_threshold == 0 {
            return Err(ConfigError("breaker.failure_threshold must be >= 1".into()));
        }
        if self.breaker.half_open_max_calls == 0 {
            return Err(ConfigError("breaker.half_open_max_calls must be >= 1".into()));
        }
        if let Some(url) = &self.base_url {
            if url.is_empty() {
                return Err(ConfigError("base_url must not be empty if set".into()));
            }
        }

        Ok(ClientConfig {
            base_url: self.base_url,
            default_timeout: self.default_timeout,
            default_headers: self.default_headers,
            retry: self.retry,
            breaker: self.breaker,
            dedupe_enabled: self.dedupe_enabled,
            protocol_mode: self.protocol_mode,
            client_mode: self.client_mode,
            telemetry: self.telemetry,
        })
    }
}
