//! Path classification for registry pull requests
//!
//! Exactly two path shapes are recognized, matching the registry
//! distribution API read endpoints:
//!
//! - manifests: `/v2/{name}/manifests/{reference}`
//! - blobs:     `/v2/{name}/blobs/{digest}`
//!
//! `{name}` is matched greedily and may itself contain `/` (for example
//! `library/nginx`), so the *last* occurrence of the literal segment wins.
//! Anything else, including every non-GET request, is unclassified and must
//! be forwarded untouched.

use http::Method;
use tracing::debug;

const V2_PREFIX: &str = "/v2/";
const MANIFESTS_SEGMENT: &str = "/manifests/";
const BLOBS_SEGMENT: &str = "/blobs/";

/// Which of the two mirrorable endpoint shapes a path matched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Manifest,
    Blob,
}

impl ArtifactKind {
    /// The literal path segment for this kind, used when rebuilding the path
    pub fn segment(&self) -> &'static str {
        match self {
            ArtifactKind::Manifest => "manifests",
            ArtifactKind::Blob => "blobs",
        }
    }
}

/// A classified reference to a registry artifact
///
/// Derived deterministically from the request path. Extraction is total: a
/// path either fully matches one of the two shapes or yields no reference at
/// all, never a partial match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactReference {
    /// Repository name, possibly containing `/`
    pub repository: String,
    pub kind: ArtifactKind,
    /// Tag or digest, captured verbatim from the trailing segment
    pub reference: String,
}

/// Classify a request by method and path
///
/// Returns `None` for any non-GET method regardless of path, and for every
/// path that does not fully match one of the two recognized shapes. The
/// manifest shape is checked first.
pub fn classify(method: &Method, path: &str) -> Option<ArtifactReference> {
    if method != Method::GET {
        return None;
    }
    let rest = path.strip_prefix(V2_PREFIX)?;

    for kind in [ArtifactKind::Manifest, ArtifactKind::Blob] {
        let segment = match kind {
            ArtifactKind::Manifest => MANIFESTS_SEGMENT,
            ArtifactKind::Blob => BLOBS_SEGMENT,
        };
        // rfind keeps {name} greedy: a repository like library/nginx keeps
        // its slashes and the trailing segment stays intact.
        if let Some(idx) = rest.rfind(segment) {
            let repository = &rest[..idx];
            let reference = &rest[idx + segment.len()..];
            if repository.is_empty() || reference.is_empty() {
                continue;
            }
            debug!(
                repository,
                reference,
                kind = ?kind,
                "classified registry pull request"
            );
            return Some(ArtifactReference {
                repository: repository.to_string(),
                kind,
                reference: reference.to_string(),
            });
        }
    }
    None
}
