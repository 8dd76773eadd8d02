//! Property tests for classification and rewriting
//!
//! Property: only GET requests for the two recognized path shapes are ever
//! classified, and a classified request rewrites into a mirror URL that
//! preserves the repository name, the literal segment, and the reference.

use bytes::Bytes;
use http::{HeaderMap, Method};
use mirror_proxy::{
    classify, ArtifactKind, InboundRequest, MirrorTarget, RewriteStrategy, Rewriter,
};
use proptest::prelude::*;

fn repository_strategy() -> impl Strategy<Value = String> {
    // Multi-segment lowercase names; the literal segments are excluded so a
    // generated repository cannot shadow the shape being tested.
    "[a-z][a-z0-9]{0,8}(/[a-z][a-z0-9]{0,8}){0,3}"
        .prop_filter("repository must not contain literal segments", |name| {
            !name.contains("manifests") && !name.contains("blobs")
        })
}

fn reference_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9][a-zA-Z0-9_.:-]{0,30}"
}

fn non_get_method() -> impl Strategy<Value = Method> {
    prop_oneof![
        Just(Method::POST),
        Just(Method::PUT),
        Just(Method::HEAD),
        Just(Method::DELETE),
        Just(Method::PATCH),
        Just(Method::OPTIONS),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_manifest_paths_classify(
        repository in repository_strategy(),
        reference in reference_strategy(),
    ) {
        let path = format!("/v2/{}/manifests/{}", repository, reference);
        let artifact = classify(&Method::GET, &path);
        prop_assert!(artifact.is_some(), "path {} must classify", path);
        let artifact = artifact.unwrap();
        prop_assert_eq!(artifact.repository, repository);
        prop_assert_eq!(artifact.kind, ArtifactKind::Manifest);
        prop_assert_eq!(artifact.reference, reference);
    }

    #[test]
    fn prop_blob_paths_classify(
        repository in repository_strategy(),
        digest in reference_strategy(),
    ) {
        let path = format!("/v2/{}/blobs/{}", repository, digest);
        let artifact = classify(&Method::GET, &path);
        prop_assert!(artifact.is_some(), "path {} must classify", path);
        let artifact = artifact.unwrap();
        prop_assert_eq!(artifact.repository, repository);
        prop_assert_eq!(artifact.kind, ArtifactKind::Blob);
        prop_assert_eq!(artifact.reference, digest);
    }

    #[test]
    fn prop_non_get_is_never_classified(
        method in non_get_method(),
        repository in repository_strategy(),
        reference in reference_strategy(),
    ) {
        let manifest_path = format!("/v2/{}/manifests/{}", repository, reference);
        let blob_path = format!("/v2/{}/blobs/{}", repository, reference);
        prop_assert!(classify(&method, &manifest_path).is_none());
        prop_assert!(classify(&method, &blob_path).is_none());
    }

    #[test]
    fn prop_paths_without_literal_segments_are_unclassified(
        tail in "[a-z0-9/]{0,40}",
    ) {
        let path = format!("/v2/{}", tail);
        prop_assume!(!path.contains("/manifests/") && !path.contains("/blobs/"));
        prop_assert!(classify(&Method::GET, &path).is_none());
    }

    #[test]
    fn prop_rewrite_preserves_segments(
        repository in repository_strategy(),
        reference in reference_strategy(),
        port in 1u16..,
    ) {
        let path = format!("/v2/{}/manifests/{}", repository, reference);
        let request = InboundRequest::new(
            Method::GET,
            "registry.example.com",
            path.as_str(),
            None,
            HeaderMap::new(),
            Bytes::new(),
        );
        let artifact = classify(request.method(), request.path()).unwrap();

        let target = MirrorTarget {
            host: "mirror.local".to_string(),
            port,
            scheme: "http".to_string(),
        };

        let plain = Rewriter::new(target.clone(), RewriteStrategy::Plain, false)
            .rewrite(&request, &artifact)
            .unwrap();
        prop_assert_eq!(
            plain.url,
            format!(
                "http://mirror.local:{}/v2/{}/manifests/{}",
                port, repository, reference
            )
        );

        let namespaced = Rewriter::new(target, RewriteStrategy::HostNamespaced, false)
            .rewrite(&request, &artifact)
            .unwrap();
        prop_assert_eq!(
            namespaced.url,
            format!(
                "http://mirror.local:{}/v2/registry.example.com/{}/manifests/{}",
                port, repository, reference
            )
        );

        // The inbound request is untouched by both rewrites
        prop_assert_eq!(request.path(), path.as_str());
    }
}
