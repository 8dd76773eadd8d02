//! Pass-through forwarding to the original upstream registry
//!
//! Fallback goes through an explicit `Forwarder` interface so the dispatcher
//! never depends on a concrete transport. The HTTP implementation rebuilds
//! the request the client originally sent and delivers exactly what a direct,
//! unintercepted request would have received.

use crate::config::UpstreamConfig;
use crate::error::Result;
use crate::models::{FetchedResponse, InboundRequest};
use async_trait::async_trait;
use http::header::{HeaderName, CONNECTION, HOST, TE, TRAILER, TRANSFER_ENCODING, UPGRADE};
use http::HeaderMap;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// Generic pass-through capability used for fallback
#[async_trait]
pub trait Forwarder: Send + Sync {
    /// Deliver the pristine original request to its intended registry
    async fn forward(&self, request: &InboundRequest) -> Result<FetchedResponse>;
}

/// Build an outbound HTTP client with the configured timeout
///
/// Shared by the mirror transport and the upstream forwarder so both honor
/// the same per-request deadline.
pub fn build_client(timeout_secs: u64, insecure_skip_verify: bool) -> Result<Client> {
    let client = Client::builder()
        .danger_accept_invalid_certs(insecure_skip_verify)
        // Redirects belong to the client, not the proxy; following them here
        // would blur the strict success criterion for mirror responses.
        .redirect(reqwest::redirect::Policy::none())
        .pool_max_idle_per_host(10)
        .pool_idle_timeout(Duration::from_secs(90))
        .timeout(Duration::from_secs(timeout_secs))
        .connect_timeout(Duration::from_secs(10))
        .build()?;
    Ok(client)
}

/// Remove hop-by-hop headers that must not survive proxying
pub(crate) fn strip_hop_by_hop(headers: &mut HeaderMap) {
    const HOP_BY_HOP: [HeaderName; 5] = [CONNECTION, TE, TRAILER, TRANSFER_ENCODING, UPGRADE];
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
    headers.remove("proxy-connection");
    headers.remove("keep-alive");
}

/// Forwarder that replays the original request over HTTP(S)
pub struct HttpForwarder {
    client: Client,
    scheme: String,
}

impl HttpForwarder {
    pub fn new(config: &UpstreamConfig) -> Result<Self> {
        Ok(HttpForwarder {
            client: build_client(config.timeout_secs, config.insecure_skip_verify)?,
            scheme: config.scheme.clone(),
        })
    }
}

#[async_trait]
impl Forwarder for HttpForwarder {
    async fn forward(&self, request: &InboundRequest) -> Result<FetchedResponse> {
        let mut url = format!("{}://{}{}", self.scheme, request.host(), request.path());
        if let Some(query) = request.query() {
            url.push('?');
            url.push_str(query);
        }
        debug!(url = %url, method = %request.method(), "forwarding to upstream");

        let mut headers = request.headers().clone();
        // The client sets Host from the URL; a stale copy would confuse
        // virtual-hosted registries.
        headers.remove(HOST);
        strip_hop_by_hop(&mut headers);

        let response = self
            .client
            .request(request.method().clone(), &url)
            .headers(headers)
            .body(request.body())
            .send()
            .await?;

        let status = response.status();
        let mut headers = response.headers().clone();
        strip_hop_by_hop(&mut headers);
        let body = response.bytes().await?;
        Ok(FetchedResponse {
            status,
            headers,
            body,
        })
    }
}
