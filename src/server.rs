//! Per-request wiring and process startup
//!
//! `ProxyService` is the plaintext handler given to the interception engine:
//! it buffers the request body once, runs the dispatcher, records the final
//! status, and always produces a valid HTTP response for the client.

use crate::ca::CertificateAuthority;
use crate::config::ProxyConfig;
use crate::dispatcher::MirrorDispatcher;
use crate::error::Result;
use crate::interceptor::{PlainRequestHandler, TlsInterceptor};
use crate::metrics::ProxyMetrics;
use crate::models::{InboundRequest, ProxyResponse, ResponseSource};
use crate::recorder::StatusRecorder;
use crate::upstream::{strip_hop_by_hop, Forwarder, HttpForwarder};
use async_trait::async_trait;
use bytes::Bytes;
use http::header::HOST;
use http::{HeaderMap, StatusCode, Uri};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Request, Response};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// The plaintext-request handler behind the interception engine
pub struct ProxyService {
    dispatcher: MirrorDispatcher,
}

impl ProxyService {
    pub fn new(
        config: &ProxyConfig,
        forwarder: Arc<dyn Forwarder>,
        metrics: Arc<ProxyMetrics>,
    ) -> Result<Self> {
        Ok(ProxyService {
            dispatcher: MirrorDispatcher::new(config, forwarder, metrics)?,
        })
    }

    pub fn metrics(&self) -> Arc<ProxyMetrics> {
        self.dispatcher.metrics()
    }
}

#[async_trait]
impl PlainRequestHandler for ProxyService {
    async fn handle(
        &self,
        request: Request<Incoming>,
        origin_host: Option<String>,
    ) -> Response<Full<Bytes>> {
        let (parts, body) = request.into_parts();
        let host = derive_host(&parts.headers, &parts.uri, origin_host);
        let path = parts.uri.path().to_string();
        let query = parts.uri.query().map(str::to_string);

        // Buffer the body once, up front. A failed mirror attempt replays it
        // against upstream, which a streamed body could not support.
        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                warn!(error = %e, path = %path, "failed to buffer request body");
                return plain_status(StatusCode::BAD_REQUEST);
            }
        };

        let inbound = InboundRequest::new(parts.method, host, path, query, parts.headers, body);
        let mut recorder = StatusRecorder::new();
        let response = match self.dispatcher.dispatch(&inbound).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, path = inbound.path(), "upstream forward failed");
                ProxyResponse {
                    status: StatusCode::BAD_GATEWAY,
                    headers: HeaderMap::new(),
                    body: Bytes::new(),
                    source: ResponseSource::UpstreamFallback,
                }
            }
        };
        let outcome = response.outcome();
        recorder.observe(outcome.status);
        info!(
            status = %recorder
                .recorded()
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            source = ?outcome.source,
            path = inbound.path(),
            "request complete"
        );
        write_response(response)
    }
}

/// The host the client believes it is talking to
///
/// Inside an intercepted tunnel the Host header is authoritative, with the
/// CONNECT target as a fallback; plain requests may carry an absolute URI.
fn derive_host(headers: &HeaderMap, uri: &Uri, origin_host: Option<String>) -> String {
    headers
        .get(HOST)
        .and_then(|h| h.to_str().ok())
        .map(str::to_string)
        .or_else(|| uri.authority().map(|a| a.to_string()))
        .or(origin_host)
        .unwrap_or_default()
}

fn write_response(response: ProxyResponse) -> Response<Full<Bytes>> {
    let mut headers = response.headers;
    strip_hop_by_hop(&mut headers);
    let mut out = Response::new(Full::new(response.body));
    *out.status_mut() = response.status;
    *out.headers_mut() = headers;
    out
}

fn plain_status(status: StatusCode) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}

/// Build every component from configuration and serve until failure
pub async fn run(config: ProxyConfig) -> Result<()> {
    config.validate()?;
    let ca = Arc::new(CertificateAuthority::from_config(&config.ca)?);
    let metrics = Arc::new(ProxyMetrics::new());
    let forwarder: Arc<dyn Forwarder> = Arc::new(HttpForwarder::new(&config.upstream)?);
    let service = Arc::new(ProxyService::new(&config, forwarder, metrics)?);

    let listener = TcpListener::bind(("0.0.0.0", config.listen_port)).await?;
    info!(
        port = config.listen_port,
        mirror = %format!(
            "{}://{}:{}",
            config.mirror.scheme, config.mirror.host, config.mirror.port
        ),
        "mirror proxy serving"
    );
    TlsInterceptor::new(ca, service).run(listener).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn test_derive_host_prefers_host_header() {
        let mut headers = HeaderMap::new();
        headers.insert(HOST, HeaderValue::from_static("registry-1.docker.io"));
        let uri: Uri = "/v2/library/nginx/manifests/latest".parse().unwrap();
        assert_eq!(
            derive_host(&headers, &uri, Some("connect.example".to_string())),
            "registry-1.docker.io"
        );
    }

    #[test]
    fn test_derive_host_uses_absolute_uri_authority() {
        let headers = HeaderMap::new();
        let uri: Uri = "http://registry.example.com/v2/a/blobs/sha256:aa"
            .parse()
            .unwrap();
        assert_eq!(derive_host(&headers, &uri, None), "registry.example.com");
    }

    #[test]
    fn test_derive_host_falls_back_to_connect_target() {
        let headers = HeaderMap::new();
        let uri: Uri = "/v2/a/manifests/t".parse().unwrap();
        assert_eq!(
            derive_host(&headers, &uri, Some("registry.example.com".to_string())),
            "registry.example.com"
        );
    }

    #[test]
    fn test_write_response_strips_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        let out = write_response(ProxyResponse {
            status: StatusCode::OK,
            headers,
            body: Bytes::from_static(b"{}"),
            source: ResponseSource::MirrorLive,
        });
        assert_eq!(out.status(), StatusCode::OK);
        assert!(out.headers().get("transfer-encoding").is_none());
        assert_eq!(
            out.headers().get("content-type").unwrap(),
            "application/json"
        );
    }
}
