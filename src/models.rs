//! Shared request and response types

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};

/// A fully buffered inbound request as handed over by the interception layer
///
/// The body is buffered exactly once, before the first dispatch attempt, so
/// that a failed mirror attempt can replay it against the upstream registry.
/// Fields are private and the type exposes no mutators: the dispatcher works
/// on derived values and the original stays pristine for fallback.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    method: Method,
    host: String,
    path: String,
    query: Option<String>,
    headers: HeaderMap,
    body: Bytes,
}

impl InboundRequest {
    pub fn new(
        method: Method,
        host: impl Into<String>,
        path: impl Into<String>,
        query: Option<String>,
        headers: HeaderMap,
        body: Bytes,
    ) -> Self {
        InboundRequest {
            method,
            host: host.into(),
            path: path.into(),
            query,
            headers,
            body,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Host the client believes it is talking to
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Buffered body; cloning is cheap and does not consume the original
    pub fn body(&self) -> Bytes {
        self.body.clone()
    }
}

/// A mirror-targeted request derived from a classified inbound request
///
/// Exists only for the duration of one dispatch attempt. Built as a disjoint
/// value so the inbound request remains usable for fallback.
#[derive(Debug, Clone)]
pub struct RewrittenRequest {
    pub url: String,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Where the response that reached the client came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    /// Served from the response cache without a network round trip
    MirrorCache,
    /// Fetched live from the mirror registry
    MirrorLive,
    /// Forwarded to the original upstream registry
    UpstreamFallback,
}

/// A plain response fetched over the network, before source attribution
#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// The response delivered to the client, with its source attached
#[derive(Debug, Clone)]
pub struct ProxyResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub source: ResponseSource,
}

impl ProxyResponse {
    pub fn from_fetched(fetched: FetchedResponse, source: ResponseSource) -> Self {
        ProxyResponse {
            status: fetched.status,
            headers: fetched.headers,
            body: fetched.body,
            source,
        }
    }

    pub fn outcome(&self) -> Outcome {
        Outcome {
            status: self.status,
            source: self.source,
        }
    }
}

/// Final status and source for one inbound request, produced exactly once
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    pub status: StatusCode,
    pub source: ResponseSource,
}
