//! Mirror dispatch and fallback control
//!
//! The orchestration entry point for one inbound request: classify, rewrite,
//! attempt the mirror through the cached transport, and fall back to the
//! upstream registry whenever the mirror cannot serve. Every per-request
//! failure is recovered here; callers always get a response to write.

use crate::cache::CachedTransport;
use crate::classifier::classify;
use crate::config::ProxyConfig;
use crate::error::Result;
use crate::metrics::ProxyMetrics;
use crate::models::{FetchedResponse, InboundRequest, ProxyResponse, ResponseSource};
use crate::rewriter::{MirrorTarget, Rewriter};
use crate::upstream::{build_client, Forwarder};
use http::StatusCode;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Orchestrates classification, rewrite, mirror attempt, and fallback
pub struct MirrorDispatcher {
    rewriter: Rewriter,
    transport: CachedTransport,
    forwarder: Arc<dyn Forwarder>,
    metrics: Arc<ProxyMetrics>,
}

impl MirrorDispatcher {
    pub fn new(
        config: &ProxyConfig,
        forwarder: Arc<dyn Forwarder>,
        metrics: Arc<ProxyMetrics>,
    ) -> Result<Self> {
        let rewriter = Rewriter::new(
            MirrorTarget::from(&config.mirror),
            config.rewrite.strategy,
            config.rewrite.forward_authorization,
        );
        let mirror_client = build_client(
            config.upstream.timeout_secs,
            config.mirror.insecure_skip_verify,
        )?;
        let transport = CachedTransport::new(
            mirror_client,
            config.cache.enabled,
            config.cache.max_entries,
        );
        Ok(MirrorDispatcher {
            rewriter,
            transport,
            forwarder,
            metrics,
        })
    }

    /// Produce the response for one inbound request
    ///
    /// The mirror attempt succeeds only on a transport-error-free response
    /// with status exactly 200; any other outcome, including redirects and
    /// partial content, discards the mirror response and forwards the
    /// pristine original upstream. An `Err` here means the upstream forward
    /// itself failed and the caller must synthesize a gateway error.
    pub async fn dispatch(&self, request: &InboundRequest) -> Result<ProxyResponse> {
        let Some(artifact) = classify(request.method(), request.path()) else {
            debug!(
                method = %request.method(),
                path = request.path(),
                "not a mirrorable request, passing through"
            );
            self.metrics.record_passthrough();
            return self.forward(request).await;
        };

        let rewritten = match self.rewriter.rewrite(request, &artifact) {
            Ok(rewritten) => rewritten,
            Err(e) => {
                warn!(error = %e, path = request.path(), "rewrite failed, falling back");
                self.metrics.record_reroute_fallback();
                return self.forward(request).await;
            }
        };

        match self.transport.execute(&rewritten).await {
            Ok(response) if response.status == StatusCode::OK => {
                let source = if response.from_cache {
                    self.metrics.record_mirror_cache();
                    ResponseSource::MirrorCache
                } else {
                    self.metrics.record_mirror_live();
                    ResponseSource::MirrorLive
                };
                info!(url = %rewritten.url, source = ?source, "rerouted to mirror registry");
                Ok(ProxyResponse {
                    status: response.status,
                    headers: response.headers,
                    body: response.body,
                    source,
                })
            }
            Ok(response) => {
                info!(
                    url = %rewritten.url,
                    status = %response.status,
                    "mirror could not serve, falling back to upstream"
                );
                self.metrics.record_reroute_fallback();
                self.forward(request).await
            }
            Err(e) => {
                warn!(
                    url = %rewritten.url,
                    error = %e,
                    "mirror unreachable, falling back to upstream"
                );
                self.metrics.record_reroute_fallback();
                self.forward(request).await
            }
        }
    }

    async fn forward(&self, request: &InboundRequest) -> Result<ProxyResponse> {
        let fetched: FetchedResponse = self.forwarder.forward(request).await?;
        Ok(ProxyResponse::from_fetched(
            fetched,
            ResponseSource::UpstreamFallback,
        ))
    }

    pub fn metrics(&self) -> Arc<ProxyMetrics> {
        Arc::clone(&self.metrics)
    }
}
