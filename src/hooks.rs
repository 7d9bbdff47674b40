//! Fire-and-isolate observer invocations.
//!
//! Hooks never influence state, retry, or response: every invocation is wrapped so that panics
//! inside a user-supplied closure are caught and dropped, following the same isolation discipline
//! the ambient telemetry stack uses for sinks (`emit_best_effort`).

use futures::future::BoxFuture;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Context passed to every hook invocation: `{method, url, attempt, requestId}`.
#[derive(Debug, Clone)]
pub struct HookContext {
    pub method: String,
    pub url: String,
    pub attempt: u32,
    pub request_id: String,
}

type AsyncHook<Arg> = Arc<dyn Fn(HookContext, Arg) -> BoxFuture<'static, ()> + Send + Sync>;

/// Mergeable table of named callbacks. Later `Client::use_hooks` calls override earlier entries
/// on a per-key basis, not a wholesale replacement of the table.
#[derive(Clone, Default)]
pub struct Hooks {
    pub on_before_request: Option<AsyncHook<()>>,
    pub on_after_response: Option<AsyncHook<ResponseSummary>>,
    pub on_retry: Option<AsyncHook<String>>,
    pub on_circuit_open: Option<AsyncHook<()>>,
    pub on_error: Option<AsyncHook<String>>,
    pub on_cancel: Option<AsyncHook<()>>,
}

/// Minimal response shape exposed to `onAfterResponse`, independent of the caller's typed `T`.
#[derive(Debug, Clone)]
pub struct ResponseSummary {
    pub status: u16,
    pub attempt: u32,
}

/// A partial hook table as produced by `Hooks::builder()`, merged into the client's table via
/// `Client::use_hooks`.
#[derive(Clone, Default)]
pub struct HooksPartial(pub Hooks);

impl Hooks {
    pub fn merge(&mut self, other: HooksPartial) {
        let HooksPartial(other) = other;
        if other.on_before_request.is_some() {
            self.on_before_request = other.on_before_request;
        }
        if other.on_after_response.is_some() {
            self.on_after_response = other.on_after_response;
        }
        if other.on_retry.is_some() {
            self.on_retry = other.on_retry;
        }
        if other.on_circuit_open.is_some() {
            self.on_circuit_open = other.on_circuit_open;
        }
        if other.on_error.is_some() {
            self.on_error = other.on_error;
        }
        if other.on_cancel.is_some() {
            self.on_cancel = other.on_cancel;
        }
    }

    pub async fn fire_before_request(&self, ctx: HookContext) {
        if let Some(hook) = &self.on_before_request {
            isolate(hook(ctx, ())).await;
        }
    }

    pub async fn fire_after_response(&self, ctx: HookContext, res: ResponseSummary) {
        if let Some(hook) = &self.on_after_response {
            isolate(hook(ctx, res)).await;
        }
    }

    pub async fn fire_retry(&self, ctx: HookContext, error_message: String) {
        if let Some(hook) = &self.on_retry {
            isolate(hook(ctx, error_message)).await;
        }
    }

    pub async fn fire_circuit_open(&self, ctx: HookContext) {
        if let Some(hook) = &self.on_circuit_open {
            isolate(hook(ctx, ())).await;
        }
    }

    pub async fn fire_error(&self, ctx: HookContext, error_message: String) {
        if let Some(hook) = &self.on_error {
            isolate(hook(ctx, error_message)).await;
        }
    }

    pub async fn fire_cancel(&self, ctx: HookContext) {
        if let Some(hook) = &self.on_cancel {
            isolate(hook(ctx, ())).await;
        }
    }
}

/// Run a hook future, swallowing panics so a misbehaving observer can never change the request
/// outcome (spec §8 Invariant 8).
async fn isolate(fut: BoxFuture<'static, ()>) {
    if futures::FutureExt::catch_unwind(AssertUnwindSafe(fut)).await.is_err() {
        tracing::warn!("hook panicked; outcome unaffected");
    }
}
