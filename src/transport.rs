//! The pluggable transport collaborator.
//!
//! This crate never opens a socket; it is generic over a `tower::Service` that moves bytes over
//! the wire. Any HTTP client (or an in-memory fake, for tests) can implement [`Transport`] by
//! implementing `tower::Service<TransportRequest>`.

use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use tower_service::Service;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
        }
    }

    /// GET/HEAD never carry a serialized body on the wire, regardless of whether the caller
    /// supplied one.
    pub fn carries_body(self) -> bool {
        !matches!(self, Method::Get | Method::Head)
    }
}

/// A fully-composed outbound request: final headers, optional serialized body, and the internal
/// cancellation token the timeout harness and the caller's external signal both feed into.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<Vec<u8>>,
    pub cancellation: CancellationToken,
}

/// The raw response the engine classifies before decoding/validating.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    /// Header names are expected lowercase.
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl TransportResponse {
    pub fn is_ok(&self) -> bool {
        (200..400).contains(&self.status)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type").map(|s| s.as_str())
    }

    pub fn is_json(&self) -> bool {
        self.content_type().map(|ct| ct.contains("application/json")).unwrap_or(false)
    }
}

/// Implemented by any byte-level transport the engine can drive. Blanket-implemented for any
/// `tower::Service<TransportRequest, Response = TransportResponse>` so existing tower stacks
/// (timeouts, retries, load balancing layered by the caller below this crate) work unmodified.
pub trait Transport:
    Service<TransportRequest, Response = TransportResponse> + Send
{
}

impl<S> Transport for S where S: Service<TransportRequest, Response = TransportResponse> + Send {}
