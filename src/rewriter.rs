//! Building mirror-targeted requests from classified inbound requests

use crate::classifier::ArtifactReference;
use crate::config::MirrorConfig;
use crate::error::{ProxyError, Result};
use crate::models::{InboundRequest, RewrittenRequest};
use http::header::AUTHORIZATION;
use http::HeaderMap;
use serde::{Deserialize, Serialize};

/// Where classified requests are redirected to
///
/// Process-wide, read-only; built once from configuration at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorTarget {
    pub host: String,
    pub port: u16,
    pub scheme: String,
}

impl From<&MirrorConfig> for MirrorTarget {
    fn from(config: &MirrorConfig) -> Self {
        MirrorTarget {
            host: config.host.clone(),
            port: config.port,
            scheme: config.scheme.clone(),
        }
    }
}

/// How mirror paths are built from classified requests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewriteStrategy {
    /// Embed the original registry host as a leading repository segment
    /// (`/v2/{original_host}/{name}/...`) so a single mirror can serve
    /// several origins without colliding repository names.
    #[default]
    HostNamespaced,
    /// Keep the repository name exactly as the client sent it.
    Plain,
}

/// Rewrite options resolved from configuration
#[derive(Debug, Clone)]
pub struct Rewriter {
    target: MirrorTarget,
    strategy: RewriteStrategy,
    forward_authorization: bool,
}

impl Rewriter {
    pub fn new(
        target: MirrorTarget,
        strategy: RewriteStrategy,
        forward_authorization: bool,
    ) -> Self {
        Rewriter {
            target,
            strategy,
            forward_authorization,
        }
    }

    pub fn target(&self) -> &MirrorTarget {
        &self.target
    }

    /// Build a mirror-targeted request from a classified inbound request
    ///
    /// The returned value shares nothing mutable with the inbound request:
    /// the method is copied, the buffered body is cheaply cloned, and the
    /// path is reconstructed from the artifact reference with the original
    /// query string preserved. Client headers are not carried over to the
    /// mirror, with the single exception of `Authorization` when explicitly
    /// configured.
    pub fn rewrite(
        &self,
        request: &InboundRequest,
        artifact: &ArtifactReference,
    ) -> Result<RewrittenRequest> {
        let repository = match self.strategy {
            RewriteStrategy::HostNamespaced => {
                format!("{}/{}", request.host(), artifact.repository)
            }
            RewriteStrategy::Plain => artifact.repository.clone(),
        };
        if repository.is_empty() || artifact.reference.is_empty() {
            // Unreachable after a successful classification; kept so a bad
            // caller cannot produce a half-built mirror URL.
            return Err(ProxyError::Rewrite(format!(
                "incomplete artifact reference for {}",
                request.path()
            )));
        }

        let mut url = format!(
            "{}://{}:{}/v2/{}/{}/{}",
            self.target.scheme,
            self.target.host,
            self.target.port,
            repository,
            artifact.kind.segment(),
            artifact.reference,
        );
        if let Some(query) = request.query() {
            url.push('?');
            url.push_str(query);
        }

        let mut headers = HeaderMap::new();
        if self.forward_authorization {
            if let Some(auth) = request.headers().get(AUTHORIZATION) {
                headers.insert(AUTHORIZATION, auth.clone());
            }
        }

        Ok(RewrittenRequest {
            url,
            method: request.method().clone(),
            headers,
            body: request.body(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::classify;
    use bytes::Bytes;
    use http::{HeaderValue, Method};

    fn inbound(host: &str, path: &str, query: Option<&str>) -> InboundRequest {
        InboundRequest::new(
            Method::GET,
            host,
            path,
            query.map(|q| q.to_string()),
            HeaderMap::new(),
            Bytes::new(),
        )
    }

    fn rewriter(strategy: RewriteStrategy) -> Rewriter {
        Rewriter::new(
            MirrorTarget {
                host: "mirror.local".to_string(),
                port: 8081,
                scheme: "http".to_string(),
            },
            strategy,
            false,
        )
    }

    #[test]
    fn test_rewrite_manifest_host_namespaced() {
        let req = inbound(
            "registry-1.docker.io",
            "/v2/library/nginx/manifests/latest",
            None,
        );
        let artifact = classify(req.method(), req.path()).unwrap();
        let rewritten = rewriter(RewriteStrategy::HostNamespaced)
            .rewrite(&req, &artifact)
            .unwrap();
        assert_eq!(
            rewritten.url,
            "http://mirror.local:8081/v2/registry-1.docker.io/library/nginx/manifests/latest"
        );
        assert_eq!(rewritten.method, Method::GET);
    }

    #[test]
    fn test_rewrite_blob_plain() {
        let req = inbound("registry.example.com", "/v2/app/blobs/sha256:aa", None);
        let artifact = classify(req.method(), req.path()).unwrap();
        let rewritten = rewriter(RewriteStrategy::Plain)
            .rewrite(&req, &artifact)
            .unwrap();
        assert_eq!(
            rewritten.url,
            "http://mirror.local:8081/v2/app/blobs/sha256:aa"
        );
    }

    #[test]
    fn test_rewrite_preserves_query() {
        let req = inbound(
            "registry.example.com",
            "/v2/app/manifests/v2",
            Some("ns=prod"),
        );
        let artifact = classify(req.method(), req.path()).unwrap();
        let rewritten = rewriter(RewriteStrategy::Plain)
            .rewrite(&req, &artifact)
            .unwrap();
        assert_eq!(
            rewritten.url,
            "http://mirror.local:8081/v2/app/manifests/v2?ns=prod"
        );
    }

    #[test]
    fn test_rewrite_does_not_touch_inbound() {
        let req = inbound("h.example", "/v2/a/manifests/t", Some("x=1"));
        let artifact = classify(req.method(), req.path()).unwrap();
        let _ = rewriter(RewriteStrategy::HostNamespaced)
            .rewrite(&req, &artifact)
            .unwrap();
        assert_eq!(req.path(), "/v2/a/manifests/t");
        assert_eq!(req.query(), Some("x=1"));
        assert_eq!(req.host(), "h.example");
    }

    #[test]
    fn test_authorization_dropped_by_default() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer secret"));
        let req = InboundRequest::new(
            Method::GET,
            "h.example",
            "/v2/a/manifests/t",
            None,
            headers,
            Bytes::new(),
        );
        let artifact = classify(req.method(), req.path()).unwrap();
        let rewritten = rewriter(RewriteStrategy::Plain)
            .rewrite(&req, &artifact)
            .unwrap();
        assert!(rewritten.headers.get(AUTHORIZATION).is_none());
    }

    #[test]
    fn test_authorization_forwarded_when_configured() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer secret"));
        let req = InboundRequest::new(
            Method::GET,
            "h.example",
            "/v2/a/manifests/t",
            None,
            headers,
            Bytes::new(),
        );
        let artifact = classify(req.method(), req.path()).unwrap();
        let rw = Rewriter::new(
            MirrorTarget {
                host: "mirror.local".to_string(),
                port: 8081,
                scheme: "http".to_string(),
            },
            RewriteStrategy::Plain,
            true,
        );
        let rewritten = rw.rewrite(&req, &artifact).unwrap();
        assert_eq!(
            rewritten.headers.get(AUTHORIZATION).unwrap(),
            "Bearer secret"
        );
    }

    #[test]
    fn test_https_mirror_scheme() {
        let rw = Rewriter::new(
            MirrorTarget {
                host: "mirror.local".to_string(),
                port: 443,
                scheme: "https".to_string(),
            },
            RewriteStrategy::Plain,
            false,
        );
        let req = inbound("h.example", "/v2/a/blobs/sha256:bb", None);
        let artifact = classify(req.method(), req.path()).unwrap();
        let rewritten = rw.rewrite(&req, &artifact).unwrap();
        assert!(rewritten.url.starts_with("https://mirror.local:443/"));
    }
}
