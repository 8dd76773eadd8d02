//! TLS interception engine
//!
//! Accepts client connections and turns encrypted registry traffic into
//! plaintext requests for a wrapped handler. Clients reach the proxy either
//! with `CONNECT host:443` (the normal path for container runtimes behind an
//! HTTPS proxy) or with plain HTTP requests; for CONNECT the engine answers
//! 200, performs a TLS handshake using a leaf certificate forged for the
//! requested host, and serves HTTP/1.1 inside the tunnel. Nothing outside
//! this module sees raw TLS bytes.

use crate::ca::CertificateAuthority;
use crate::error::{ProxyError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use http::header::HOST;
use http::uri::Authority;
use http::{Method, StatusCode};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::upgrade::Upgraded;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

/// A handler for decrypted, plaintext HTTP requests
///
/// `origin_host` is the authority the client believes it is talking to,
/// taken from the CONNECT target when the request arrived through a tunnel.
#[async_trait]
pub trait PlainRequestHandler: Send + Sync + 'static {
    async fn handle(
        &self,
        request: Request<Incoming>,
        origin_host: Option<String>,
    ) -> Response<Full<Bytes>>;
}

/// Connection-level wrapper around a plaintext handler
pub struct TlsInterceptor<H> {
    ca: Arc<CertificateAuthority>,
    handler: Arc<H>,
}

impl<H: PlainRequestHandler> TlsInterceptor<H> {
    pub fn new(ca: Arc<CertificateAuthority>, handler: Arc<H>) -> Self {
        TlsInterceptor { ca, handler }
    }

    /// Accept and serve connections until the listener fails
    pub async fn run(&self, listener: TcpListener) -> Result<()> {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "interception listener ready");
        }
        loop {
            let (stream, peer) = listener.accept().await?;
            debug!(%peer, "accepted connection");
            let ca = Arc::clone(&self.ca);
            let handler = Arc::clone(&self.handler);
            tokio::task::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(move |req| {
                    let ca = Arc::clone(&ca);
                    let handler = Arc::clone(&handler);
                    async move { Ok::<_, Infallible>(route_request(ca, handler, req).await) }
                });
                if let Err(err) = http1::Builder::new()
                    .serve_connection(io, service)
                    .with_upgrades()
                    .await
                {
                    debug!(error = ?err, "connection closed with error");
                }
            });
        }
    }
}

async fn route_request<H: PlainRequestHandler>(
    ca: Arc<CertificateAuthority>,
    handler: Arc<H>,
    request: Request<Incoming>,
) -> Response<Full<Bytes>> {
    if request.method() == Method::CONNECT {
        return intercept_connect(ca, handler, request);
    }
    // Plain HTTP request, no tunnel involved
    let host = request
        .uri()
        .authority()
        .map(|a| a.host().to_string())
        .or_else(|| {
            request
                .headers()
                .get(HOST)
                .and_then(|h| h.to_str().ok())
                .map(|h| h.to_string())
        });
    handler.handle(request, host).await
}

/// Answer CONNECT with 200 and take over the tunnel once it upgrades
fn intercept_connect<H: PlainRequestHandler>(
    ca: Arc<CertificateAuthority>,
    handler: Arc<H>,
    request: Request<Incoming>,
) -> Response<Full<Bytes>> {
    let Some(authority) = request.uri().authority().cloned() else {
        warn!(uri = %request.uri(), "CONNECT without authority");
        return status_response(StatusCode::BAD_REQUEST);
    };

    tokio::task::spawn(async move {
        match hyper::upgrade::on(request).await {
            Ok(upgraded) => {
                if let Err(e) = serve_intercepted(ca, handler, &authority, upgraded).await {
                    warn!(authority = %authority, error = %e, "intercepted tunnel failed");
                }
            }
            Err(e) => warn!(authority = %authority, error = %e, "CONNECT upgrade failed"),
        }
    });

    status_response(StatusCode::OK)
}

/// Terminate TLS inside the tunnel and serve plaintext HTTP over it
async fn serve_intercepted<H: PlainRequestHandler>(
    ca: Arc<CertificateAuthority>,
    handler: Arc<H>,
    authority: &Authority,
    upgraded: Upgraded,
) -> Result<()> {
    let tls_config = ca.server_config_for(authority.host())?;
    let acceptor = TlsAcceptor::from(tls_config);
    let tls_stream = acceptor
        .accept(TokioIo::new(upgraded))
        .await
        .map_err(|e| ProxyError::Tls(format!("client handshake failed: {}", e)))?;

    let origin_host = authority.host().to_string();
    let service = service_fn(move |req| {
        let handler = Arc::clone(&handler);
        let origin_host = origin_host.clone();
        async move { Ok::<_, Infallible>(handler.handle(req, Some(origin_host)).await) }
    });
    http1::Builder::new()
        .serve_connection(TokioIo::new(tls_stream), service)
        .await
        .map_err(|e| ProxyError::Http(format!("intercepted connection error: {}", e)))
}

fn status_response(status: StatusCode) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}
