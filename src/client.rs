//! The engine: orchestrates dedup, the state machine, the circuit breaker, retries, hooks, and
//! transport invocation into a single `request` call.

use crate::backoff::{compute_delay, should_retry};
use crate::circuit_breaker::{CircuitBreaker, CircuitState};
use crate::config::{ClientConfig, ClientMode, ProtocolMode};
use crate::dedupe::{dedupe_applies, dedupe_key, DedupeMap, Join};
use crate::error::{elapsed_timeout_ms, retry_exhausted, EngineError};
use crate::hooks::{HookContext, Hooks, HooksPartial, ResponseSummary};
use crate::ids::{generate_idempotency_key, generate_request_id};
use crate::integrity::{fingerprint_hex, IntegrityRegistry};
use crate::metrics::{MetricsBuffer, Sample};
use crate::sleeper::{Sleeper, TokioSleeper};
use crate::state_machine::{RequestState, StateMachine};
use crate::telemetry::{
    CircuitBreakerEvent, PolicyEvent, RequestOutcome, RetryEvent, TimeoutEvent,
};
use crate::timeout::{with_timeout, TimeoutOutcome};
use crate::transport::{Method, Transport, TransportRequest};
use crate::validator::ResponseValidator;

use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

/// Max concurrent in-flight transport calls per client.
pub const MAX_CONCURRENT_REQUESTS: usize = 100;

/// A fully-described outbound call. `T` is the type the response body is decoded into.
pub struct RequestDescriptor<T> {
    pub method: Method,
    pub url: String,
    pub body: Option<Value>,
    pub headers: HashMap<String, String>,
    pub validator: Option<Arc<dyn ResponseValidator<T>>>,
    pub cancellation: Option<CancellationToken>,
    pub idempotency_key: Option<String>,
    pub timeout: Option<Duration>,
}

impl<T> RequestDescriptor<T> {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            body: None,
            headers: HashMap::new(),
            validator: None,
            cancellation: None,
            idempotency_key: None,
            timeout: None,
        }
    }

    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn validator(mut self, validator: Arc<dyn ResponseValidator<T>>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// The decoded, successful result of a call.
#[derive(Debug, Clone)]
pub struct Response<T> {
    pub data: T,
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub attempt: u32,
    pub request_id: String,
}

#[derive(Debug, Clone)]
pub struct HealthStatus {
    pub circuit_state: CircuitState,
    /// This is `breaker.failures()`, a distinct notion of "recent" from
    /// `MetricsBuffer::recent_failures(window)`. Call the latter directly if the windowed count
    /// is what's needed.
    pub recent_failures: usize,
    pub average_latency_ms: u64,
}

fn shared<T, Err>(result: Result<Response<T>, EngineError<Err>>) -> Arc<dyn Any + Send + Sync>
where
    T: Clone + Send + Sync + 'static,
    Err: Clone + Send + Sync + 'static,
{
    Arc::new(result) as Arc<dyn Any + Send + Sync>
}

/// The request execution engine. Generic over any `Transport` — a `tower::Service<TransportRequest,
/// Response = TransportResponse>` — so no sockets are opened by this crate itself.
pub struct Client<Tr> {
    config: ClientConfig,
    transport: Tr,
    breaker: CircuitBreaker,
    dedupe: DedupeMap<Arc<dyn Any + Send + Sync>>,
    integrity: IntegrityRegistry,
    metrics: MetricsBuffer,
    hooks: RwLock<Hooks>,
    sleeper: Arc<dyn Sleeper>,
    /// Caps in-flight transport attempts at [`MAX_CONCURRENT_REQUESTS`]. Grounded on the
    /// teacher's `BulkheadPolicy`, which gates concurrency the same way (`Semaphore::
    /// try_acquire`) rather than a load-then-increment counter, so the cap is enforced
    /// atomically instead of racing two attempts through a check-then-increment window.
    concurrency: Arc<Semaphore>,
}

impl<Tr> Client<Tr>
where
    Tr: Transport + Clone + Send + 'static,
    Tr::Future: Send,
{
    pub fn new(config: ClientConfig, transport: Tr) -> Self {
        let breaker = CircuitBreaker::new(config.breaker.clone());
        Self {
            config,
            transport,
            breaker,
            dedupe: DedupeMap::new(),
            integrity: IntegrityRegistry::new(),
            metrics: MetricsBuffer::new(),
            hooks: RwLock::new(Hooks::default()),
            sleeper: Arc::new(TokioSleeper),
            concurrency: Arc::new(Semaphore::new(MAX_CONCURRENT_REQUESTS)),
        }
    }

    /// Swap the backoff sleeper, e.g. for an [`crate::sleeper::InstantSleeper`] in tests that
    /// want to exercise retry without waiting out real delays.
    pub fn with_sleeper<S: Sleeper + 'static>(mut self, sleeper: S) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    /// Merge a partial hook table into the client's. Later calls override earlier keys.
    pub fn use_hooks(&self, partial: HooksPartial) -> &Self {
        let mut hooks = self.hooks.write().unwrap_or_else(|p| p.into_inner());
        hooks.merge(partial);
        self
    }

    pub fn health(&self) -> HealthStatus {
        HealthStatus {
            circuit_state: self.breaker.state(),
            recent_failures: self.breaker.failures(),
            average_latency_ms: self.metrics.average_latency_ms(),
        }
    }

    fn hooks_snapshot(&self) -> Hooks {
        self.hooks.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn resolve_url(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            match &self.config.base_url {
                Some(base) => format!("{}{}", base, url),
                None => url.to_string(),
            }
        }
    }

    async fn emit(&self, event: PolicyEvent) {
        self.config.telemetry.emit(event).await;
    }

    pub async fn request<T>(
        &self,
        descriptor: RequestDescriptor<T>,
    ) -> Result<Response<T>, EngineError<Tr::Error>>
    where
        T: serde::de::DeserializeOwned + Clone + Send + Sync + 'static,
        Tr::Error: Clone + Send + Sync + std::fmt::Display + 'static,
    {
        let url = self.resolve_url(&descriptor.url);
        let request_id = generate_request_id();
        let effective_timeout = descriptor.timeout.unwrap_or(self.config.default_timeout);

        let body_fingerprint = fingerprint_hex(descriptor.body.as_ref());
        let dedup_eligible = dedupe_applies(
            self.config.dedupe_enabled,
            descriptor.method.as_str(),
            self.config.retry.max_attempts,
        );

        if dedup_eligible {
            let key = dedupe_key(descriptor.method.as_str(), &url, &body_fingerprint);
            match self.dedupe.join(&key) {
                Join::Lead => {
                    let result = self
                        .execute(descriptor, url, request_id, effective_timeout, body_fingerprint)
                        .await;
                    self.dedupe.settle(&key, shared(result.clone()));
                    result
                }
                Join::Follow(mut rx) => match rx.recv().await {
                    Ok(value) => value
                        .downcast_ref::<Result<Response<T>, EngineError<Tr::Error>>>()
                        .cloned()
                        .unwrap_or_else(|| {
                            Err(EngineError::network("dedup: shared result type mismatch"))
                        }),
                    Err(_) => Err(EngineError::network("dedup: leader dropped the result")),
                },
            }
        } else {
            self.execute(descriptor, url, request_id, effective_timeout, body_fingerprint).await
        }
    }

    async fn execute<T>(
        &self,
        descriptor: RequestDescriptor<T>,
        url: String,
        request_id: String,
        effective_timeout: Duration,
        body_fingerprint: String,
    ) -> Result<Response<T>, EngineError<Tr::Error>>
    where
        T: serde::de::DeserializeOwned + Clone + Send + Sync + 'static,
        Tr::Error: Clone + Send + Sync + std::fmt::Display + 'static,
    {
        let max_attempts = self.config.retry.max_attempts;
        let mut sm = StateMachine::new();
        sm.transition(RequestState::Pending)?;

        let mut ctx = HookContext {
            method: descriptor.method.as_str().to_string(),
            url: url.clone(),
            attempt: 1,
            request_id: request_id.clone(),
        };

        let mut last_error: Option<EngineError<Tr::Error>> = None;
        let mut attempt: u32 = 1;

        loop {
            ctx.attempt = attempt;

            if self.concurrency.available_permits() == 0 {
                let err = EngineError::network("max concurrent requests exceeded");
                sm.transition(RequestState::Error)?;
                self.hooks_snapshot().fire_error(ctx.clone(), err.to_string()).await;
                return Err(err);
            }

            if self.breaker.check().is_err() {
                self.hooks_snapshot().fire_circuit_open(ctx.clone()).await;
                self.emit(PolicyEvent::CircuitBreaker(CircuitBreakerEvent::Opened {
                    failure_count: self.breaker.failures(),
                }))
                .await;
                sm.transition(RequestState::Error)?;
                return Err(EngineError::CircuitOpen);
            }

            self.hooks_snapshot().fire_before_request(ctx.clone()).await;

            let token = descriptor.cancellation.clone().unwrap_or_else(CancellationToken::new);

            let mut headers = HashMap::new();
            headers.insert("Content-Type".to_string(), "application/json".to_string());
            headers.insert("X-Request-Id".to_string(), request_id.clone());
            for (k, v) in &self.config.default_headers {
                headers.insert(k.clone(), v.clone());
            }
            for (k, v) in &descriptor.headers {
                headers.insert(k.clone(), v.clone());
            }

            if self.config.protocol_mode == ProtocolMode::Idempotent {
                let idem_key = descriptor
                    .idempotency_key
                    .clone()
                    .unwrap_or_else(generate_idempotency_key);
                headers.insert("Idempotency-Key".to_string(), idem_key.clone());
                if descriptor.body.is_some() {
                    match self.integrity.enforce(&idem_key, descriptor.body.as_ref()) {
                        Ok(hash) => {
                            headers.insert("X-Payload-Hash".to_string(), hash);
                        }
                        Err(err) => {
                            sm.transition(RequestState::Error)?;
                            self.hooks_snapshot().fire_error(ctx.clone(), err.to_string()).await;
                            return Err(err);
                        }
                    }
                }
            }

            let wire_body = if descriptor.method.carries_body() {
                descriptor.body.as_ref().map(|b| serde_json::to_vec(b).unwrap_or_default())
            } else {
                None
            };

            let transport_request = TransportRequest {
                method: descriptor.method,
                url: url.clone(),
                headers: headers.clone(),
                body: wire_body,
                cancellation: token.clone(),
            };

            let permit = match self.concurrency.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    let err = EngineError::network("max concurrent requests exceeded");
                    sm.transition(RequestState::Error)?;
                    self.hooks_snapshot().fire_error(ctx.clone(), err.to_string()).await;
                    return Err(err);
                }
            };

            let start = Instant::now();
            let mut svc = self.transport.clone();
            let outcome = with_timeout(effective_timeout, &token, async move {
                match svc.ready().await {
                    Ok(ready) => ready.call(transport_request).await,
                    Err(e) => Err(e),
                }
            })
            .await;
            drop(permit);
            let latency_ms = start.elapsed().as_millis().min(u64::MAX as u128) as u64;

            match outcome {
                TimeoutOutcome::Completed(Ok(response)) if response.is_ok() => {
                    let decoded: Value = if response.is_json() {
                        serde_json::from_slice(&response.body).unwrap_or(Value::Null)
                    } else {
                        Value::String(String::from_utf8_lossy(&response.body).into_owned())
                    };

                    let parsed: Result<T, Vec<String>> = if self.config.client_mode
                        == ClientMode::Strict
                    {
                        if let Some(validator) = &descriptor.validator {
                            validator.parse(&decoded).map_err(|errs| {
                                errs.into_iter().map(|e| e.to_string()).collect()
                            })
                        } else {
                            serde_json::from_value(decoded.clone())
                                .map_err(|e| vec![e.to_string()])
                        }
                    } else {
                        serde_json::from_value(decoded.clone()).map_err(|e| vec![e.to_string()])
                    };

                    match parsed {
                        Ok(data) => {
                            self.breaker.record_success();
                            sm.transition(RequestState::Success)?;
                            self.metrics.record(Sample::new(
                                request_id.clone(),
                                url.clone(),
                                ctx.method.clone(),
                                latency_ms,
                                attempt,
                                Some(response.status),
                                true,
                            ));
                            self.emit(PolicyEvent::Request(RequestOutcome::Success {
                                duration: start.elapsed(),
                                status: response.status,
                            }))
                            .await;
                            self.hooks_snapshot()
                                .fire_after_response(
                                    ctx.clone(),
                                    ResponseSummary { status: response.status, attempt },
                                )
                                .await;
                            return Ok(Response {
                                data,
                                status: response.status,
                                headers: response.headers,
                                attempt,
                                request_id: request_id.clone(),
                            });
                        }
                        Err(validation_errors) => {
                            let err = EngineError::ResponseValidation {
                                message: "response failed validation".to_string(),
                                validation_errors,
                            };
                            sm.transition(RequestState::Error)?;
                            self.hooks_snapshot().fire_error(ctx.clone(), err.to_string()).await;
                            return Err(err);
                        }
                    }
                }
                TimeoutOutcome::Completed(Ok(response)) => {
                    self.breaker.record_failure();
                    let err = EngineError::network(format!("HTTP {}", response.status));
                    self.metrics.record(Sample::new(
                        request_id.clone(),
                        url.clone(),
                        ctx.method.clone(),
                        latency_ms,
                        attempt,
                        Some(response.status),
                        false,
                    ));
                    if !self.retry_and_continue(
                        &mut sm,
                        &mut attempt,
                        &mut last_error,
                        &ctx,
                        err,
                        Some(response.status),
                        &token,
                    )
                    .await?
                    {
                        break;
                    }
                }
                TimeoutOutcome::Completed(Err(transport_err)) => {
                    self.breaker.record_failure();
                    let err = EngineError::network_with_cause(
                        format!("transport error: {}", transport_err),
                        transport_err,
                    );
                    self.metrics.record(Sample::new(
                        request_id.clone(),
                        url.clone(),
                        ctx.method.clone(),
                        latency_ms,
                        attempt,
                        None,
                        false,
                    ));
                    if !self.retry_and_continue(
                        &mut sm,
                        &mut attempt,
                        &mut last_error,
                        &ctx,
                        err,
                        None,
                        &token,
                    )
                    .await?
                    {
                        break;
                    }
                }
                TimeoutOutcome::TimedOut => {
                    self.breaker.record_failure();
                    let err = EngineError::Timeout { timeout_ms: elapsed_timeout_ms(effective_timeout) };
                    self.metrics.record(Sample::new(
                        request_id.clone(),
                        url.clone(),
                        ctx.method.clone(),
                        latency_ms,
                        attempt,
                        None,
                        false,
                    ));
                    self.emit(PolicyEvent::Timeout(TimeoutEvent::Occurred {
                        timeout_ms: elapsed_timeout_ms(effective_timeout),
                    }))
                    .await;
                    if !self.retry_and_continue(
                        &mut sm,
                        &mut attempt,
                        &mut last_error,
                        &ctx,
                        err,
                        None,
                        &token,
                    )
                    .await?
                    {
                        break;
                    }
                }
                TimeoutOutcome::Cancelled => {
                    sm.transition(RequestState::Cancelled)?;
                    self.hooks_snapshot().fire_cancel(ctx.clone()).await;
                    return Err(EngineError::Cancelled);
                }
            }
        }

        sm.transition(RequestState::Error)?;
        let final_error = if max_attempts <= 1 {
            last_error.unwrap_or_else(|| EngineError::network("Request failed"))
        } else {
            retry_exhausted(max_attempts as usize, last_error.unwrap())
        };
        self.hooks_snapshot().fire_error(ctx.clone(), final_error.to_string()).await;
        Err(final_error)
    }

    /// Shared retry-or-terminate decision used by the three failure branches of the attempt
    /// loop. Returns `Ok(true)` to continue the loop, `Ok(false)` to break into terminal
    /// handling.
    #[allow(clippy::too_many_arguments)]
    async fn retry_and_continue<E>(
        &self,
        sm: &mut StateMachine,
        attempt: &mut u32,
        last_error: &mut Option<EngineError<E>>,
        ctx: &HookContext,
        err: EngineError<E>,
        status: Option<u16>,
        token: &CancellationToken,
    ) -> Result<bool, EngineError<E>> {
        let retryable = should_retry(
            self.config.retry.enabled,
            self.config.retry.max_attempts,
            &self.config.retry.retry_on,
            status,
            *attempt,
        );

        if !retryable {
            *last_error = Some(err);
            return Ok(false);
        }

        let delay = compute_delay(
            &self.config.retry.strategy,
            *attempt,
            self.config.retry.base_delay,
            self.config.retry.max_delay,
            self.config.retry.jitter,
        );

        sm.transition(RequestState::Retrying)?;
        self.hooks_snapshot().fire_retry(ctx.clone(), err.to_string()).await;
        self.emit(PolicyEvent::Retry(RetryEvent::Attempt { attempt: *attempt, delay })).await;

        match with_timeout(delay, token, self.sleeper.sleep(delay)).await {
            TimeoutOutcome::Cancelled => {
                sm.transition(RequestState::Cancelled)?;
                self.hooks_snapshot().fire_cancel(ctx.clone()).await;
                return Err(EngineError::Cancelled);
            }
            _ => {}
        }

        sm.transition(RequestState::Pending)?;
        *attempt += 1;
        *last_error = Some(err);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::BreakerConfig;
    use crate::config::{ClientConfigBuilder, RetryConfig};
    use crate::transport::TransportResponse;
    use crate::validator::{FnValidator, ValidationError};
    use serde_json::json;
    use std::sync::atomic::AtomicU32;
    use std::task::{Context, Poll};

    #[derive(Clone)]
    struct ScriptedTransport {
        responses: Arc<std::sync::Mutex<Vec<Result<TransportResponse, String>>>>,
        calls: Arc<AtomicU32>,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<Result<TransportResponse, String>>) -> Self {
            Self {
                responses: Arc::new(std::sync::Mutex::new(responses.into_iter().rev().collect())),
                calls: Arc::new(AtomicU32::new(0)),
            }
        }

        fn call_count(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    fn json_response(status: u16, body: Value) -> TransportResponse {
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        TransportResponse { status, headers, body: serde_json::to_vec(&body).unwrap() }
    }

    impl tower_service::Service<TransportRequest> for ScriptedTransport {
        type Response = TransportResponse;
        type Error = String;
        type Future = std::pin::Pin<
            Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
        >;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _req: TransportRequest) -> Self::Future {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.responses.lock().unwrap().pop();
            Box::pin(async move {
                match next {
                    Some(result) => result,
                    None => Err("no more scripted responses".to_string()),
                }
            })
        }
    }

    #[derive(serde::Deserialize, Clone, Debug, PartialEq)]
    struct Payload {
        ok: bool,
    }

    #[tokio::test]
    async fn s1_retry_then_succeed() {
        let transport = ScriptedTransport::new(vec![
            Ok(json_response(500, json!({}))),
            Ok(json_response(200, json!({"ok": true}))),
        ]);
        let mut retry = RetryConfig::default();
        retry.max_attempts = 3;
        retry.base_delay = Duration::from_millis(1);
        retry.jitter = false;
        let config = ClientConfigBuilder::new().retry(retry).build().unwrap();
        let client = Client::new(config, transport.clone());

        let descriptor = RequestDescriptor::<Payload>::new(Method::Get, "/x");
        let response = client.request(descriptor).await.unwrap();
        assert!(response.data.ok);
        assert_eq!(transport.call_count(), 2);
        assert_eq!(client.health().circuit_state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn s2_retry_exhausted() {
        let transport = ScriptedTransport::new(vec![
            Ok(json_response(503, json!({}))),
            Ok(json_response(503, json!({}))),
        ]);
        let mut retry = RetryConfig::default();
        retry.max_attempts = 2;
        retry.base_delay = Duration::from_millis(1);
        let config = ClientConfigBuilder::new().retry(retry).build().unwrap();
        let client = Client::new(config, transport);

        let descriptor = RequestDescriptor::<Payload>::new(Method::Get, "/x");
        let err = client.request(descriptor).await.unwrap_err();
        assert!(err.is_retry_exhausted());
        if let EngineError::RetryExhausted { attempts, last_error } = err {
            assert_eq!(attempts, 2);
            assert_eq!(last_error.code(), "NETWORK_ERROR");
        } else {
            panic!("expected retry-exhausted");
        }
    }

    #[tokio::test]
    async fn retry_exhausted_fires_on_error_exactly_once() {
        let transport = ScriptedTransport::new(vec![
            Ok(json_response(503, json!({}))),
            Ok(json_response(503, json!({}))),
        ]);
        let mut retry = RetryConfig::default();
        retry.max_attempts = 2;
        retry.base_delay = Duration::from_millis(1);
        let config = ClientConfigBuilder::new().retry(retry).build().unwrap();
        let client = Client::new(config, transport);

        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let mut partial = HooksPartial::default();
        partial.0.on_error = Some(Arc::new(move |_, _| {
            let calls = calls_clone.clone();
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
            })
        }));
        client.use_hooks(partial);

        let descriptor = RequestDescriptor::<Payload>::new(Method::Get, "/x");
        assert!(client.request(descriptor).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn s3_circuit_opens_after_threshold() {
        let transport = ScriptedTransport::new(vec![
            Ok(json_response(500, json!({}))),
            Ok(json_response(500, json!({}))),
            Ok(json_response(500, json!({}))),
        ]);
        let mut retry = RetryConfig::default();
        retry.max_attempts = 1;
        let breaker = BreakerConfig::new(3, Duration::from_secs(60));
        let config = ClientConfigBuilder::new().retry(retry).breaker(breaker).build().unwrap();
        let client = Client::new(config, transport.clone());

        for _ in 0..3 {
            let _ = client.request(RequestDescriptor::<Payload>::new(Method::Get, "/x")).await;
        }
        assert_eq!(client.health().circuit_state, CircuitState::Open);

        let err = client
            .request(RequestDescriptor::<Payload>::new(Method::Get, "/x"))
            .await
            .unwrap_err();
        assert!(err.is_circuit_open());
        assert_eq!(transport.call_count(), 3);
    }

    #[tokio::test]
    async fn s5_validation_failure_does_not_retry_or_trip_breaker() {
        let transport =
            ScriptedTransport::new(vec![Ok(json_response(200, json!({"wrong": "shape"})))]);
        let config = ClientConfigBuilder::strict().build().unwrap();
        let client = Client::new(config, transport.clone());

        let validator: Arc<dyn ResponseValidator<Payload>> =
            Arc::new(FnValidator(|data: &Value| {
                if data.get("ok").is_some() {
                    Ok(Payload { ok: true })
                } else {
                    Err(vec![ValidationError("missing ok field".into())])
                }
            }));

        let descriptor =
            RequestDescriptor::<Payload>::new(Method::Get, "/x").validator(validator);
        let err = client.request(descriptor).await.unwrap_err();
        assert!(err.is_response_validation());
        assert_eq!(transport.call_count(), 1);
        assert_eq!(client.health().recent_failures, 0);
    }

    #[tokio::test]
    async fn s6_dedup_shares_a_single_transport_call() {
        let transport = ScriptedTransport::new(vec![Ok(json_response(200, json!({"ok": true})))]);
        let mut retry = RetryConfig::default();
        retry.max_attempts = 1;
        let config =
            ClientConfigBuilder::new().dedupe_enabled(true).retry(retry).build().unwrap();
        let client = Arc::new(Client::new(config, transport.clone()));

        let mut handles = vec![];
        for _ in 0..3 {
            let client = client.clone();
            handles.push(tokio::spawn(async move {
                client
                    .request(RequestDescriptor::<Payload>::new(Method::Get, "/users/1"))
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            let response = handle.await.unwrap();
            assert!(response.data.ok);
        }
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn s7_integrity_violation_on_key_reuse_with_different_body() {
        let transport = ScriptedTransport::new(vec![Ok(json_response(200, json!({"ok": true})))]);
        let config = ClientConfigBuilder::new()
            .protocol_mode(crate::config::ProtocolMode::Idempotent)
            .build()
            .unwrap();
        let client = Client::new(config, transport);

        let first = RequestDescriptor::<Payload>::new(Method::Post, "/x")
            .idempotency_key("k1")
            .body(json!({"a": 1}));
        assert!(client.request(first).await.is_ok());

        let second = RequestDescriptor::<Payload>::new(Method::Post, "/x")
            .idempotency_key("k1")
            .body(json!({"a": 2}));
        let err = client.request(second).await.unwrap_err();
        assert!(err.is_integrity_violation());
    }

    #[tokio::test]
    async fn s8_cancel_during_backoff_terminates_request() {
        let transport = ScriptedTransport::new(vec![
            Ok(json_response(500, json!({}))),
            Ok(json_response(200, json!({"ok": true}))),
        ]);
        let mut retry = RetryConfig::default();
        retry.max_attempts = 3;
        retry.base_delay = Duration::from_secs(10);
        let config = ClientConfigBuilder::new().retry(retry).build().unwrap();
        let client = Client::new(config, transport);

        let token = CancellationToken::new();
        let token_clone = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            token_clone.cancel();
        });

        let descriptor =
            RequestDescriptor::<Payload>::new(Method::Get, "/x").cancellation(token);
        let err = client.request(descriptor).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    /// A transport that blocks every call on a shared `Notify` until the test releases it,
    /// letting the test pin exactly `MAX_CONCURRENT_REQUESTS` attempts in flight at once.
    #[derive(Clone)]
    struct BlockingTransport {
        gate: Arc<tokio::sync::Notify>,
        in_flight: Arc<AtomicU32>,
    }

    impl tower_service::Service<TransportRequest> for BlockingTransport {
        type Response = TransportResponse;
        type Error = String;
        type Future = std::pin::Pin<
            Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
        >;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _req: TransportRequest) -> Self::Future {
            self.in_flight.fetch_add(1, Ordering::SeqCst);
            let gate = self.gate.clone();
            Box::pin(async move {
                gate.notified().await;
                Ok(json_response(200, json!({"ok": true})))
            })
        }
    }

    #[tokio::test]
    async fn max_concurrent_requests_cap_rejects_before_transport() {
        let gate = Arc::new(tokio::sync::Notify::new());
        let in_flight = Arc::new(AtomicU32::new(0));
        let transport = BlockingTransport { gate: gate.clone(), in_flight: in_flight.clone() };
        let config = ClientConfigBuilder::new().build().unwrap();
        let client = Arc::new(Client::new(config, transport));

        let mut handles = vec![];
        for _ in 0..MAX_CONCURRENT_REQUESTS {
            let client = client.clone();
            handles.push(tokio::spawn(async move {
                client.request(RequestDescriptor::<Payload>::new(Method::Get, "/x")).await
            }));
        }

        while in_flight.load(Ordering::SeqCst) < MAX_CONCURRENT_REQUESTS as u32 {
            tokio::task::yield_now().await;
        }

        let overflow = client
            .request(RequestDescriptor::<Payload>::new(Method::Get, "/overflow"))
            .await
            .unwrap_err();
        assert!(!overflow.is_circuit_open());
        assert_eq!(overflow.code(), "NETWORK_ERROR");

        gate.notify_waiters();
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
    }
}
