//! Transparent mirror proxy for container registries
//!
//! Sits between image-pulling clients and their registries, terminates TLS
//! with per-host forged certificates, and redirects manifest and blob GETs
//! to a preferred local mirror. Any failure to serve from the mirror falls
//! back invisibly to the original registry, so clients cannot tell the
//! difference between "mirror absent" and "no interception at all" except
//! by latency.
//!
//! # Pipeline
//!
//! ```text
//! client ── TLS ──▶ interceptor ──▶ classifier ──▶ rewriter
//!                                       │               │
//!                                 (unclassified)   cached transport ──▶ mirror
//!                                       │               │
//!                                       ▼          (non-200 / error)
//!                                   upstream  ◀─────────┘
//! ```
//!
//! Only GET requests for the two registry read endpoints are redirected:
//! `/v2/{name}/manifests/{reference}` and `/v2/{name}/blobs/{digest}`.
//! Everything else passes through untouched.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use mirror_proxy::ProxyConfig;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ProxyConfig::from_file("mirror_proxy.yaml")?;
//!     mirror_proxy::server::run(config).await?;
//!     Ok(())
//! }
//! ```

pub mod ca;
pub mod cache;
pub mod classifier;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod interceptor;
pub mod metrics;
pub mod models;
pub mod recorder;
pub mod rewriter;
pub mod server;
pub mod upstream;

// Re-export commonly used types
pub use ca::{CaMode, CertificateAuthority};
pub use cache::{CachedTransport, TransportResponse, FROM_CACHE_HEADER};
pub use classifier::{classify, ArtifactKind, ArtifactReference};
pub use config::ProxyConfig;
pub use dispatcher::MirrorDispatcher;
pub use error::{ProxyError, Result};
pub use interceptor::{PlainRequestHandler, TlsInterceptor};
pub use metrics::{MetricsSnapshot, ProxyMetrics};
pub use models::{
    FetchedResponse, InboundRequest, Outcome, ProxyResponse, ResponseSource, RewrittenRequest,
};
pub use recorder::StatusRecorder;
pub use rewriter::{MirrorTarget, RewriteStrategy, Rewriter};
pub use server::ProxyService;
pub use upstream::{Forwarder, HttpForwarder};
