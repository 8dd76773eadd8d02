//! End-to-end interception test
//!
//! Runs the full listener with an ephemeral CA and drives it the way a real
//! client does: CONNECT through the proxy, TLS handshake against the forged
//! leaf, then a registry GET inside the tunnel. The client trusts the
//! proxy's CA, exactly like a container runtime configured for interception.

use mirror_proxy::{
    CertificateAuthority, Forwarder, HttpForwarder, ProxyConfig, ProxyMetrics, ProxyService,
    RewriteStrategy, TlsInterceptor,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn start_proxy(config: ProxyConfig) -> (std::net::SocketAddr, Arc<CertificateAuthority>) {
    let ca = Arc::new(CertificateAuthority::ephemeral().unwrap());
    let metrics = Arc::new(ProxyMetrics::new());
    let forwarder: Arc<dyn Forwarder> = Arc::new(HttpForwarder::new(&config.upstream).unwrap());
    let service = Arc::new(ProxyService::new(&config, forwarder, metrics).unwrap());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let interceptor = TlsInterceptor::new(Arc::clone(&ca), service);
    tokio::spawn(async move {
        let _ = interceptor.run(listener).await;
    });
    (addr, ca)
}

#[tokio::test]
async fn test_connect_tunnel_is_intercepted_and_mirrored() {
    let mirror = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/registry.invalid/library/nginx/manifests/latest"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(&b"MANIFEST_JSON"[..]))
        .expect(1)
        .mount(&mirror)
        .await;

    let mut config = ProxyConfig::default();
    config.mirror.host = mirror.address().ip().to_string();
    config.mirror.port = mirror.address().port();
    config.mirror.scheme = "http".to_string();
    config.rewrite.strategy = RewriteStrategy::HostNamespaced;
    config.upstream.timeout_secs = 5;

    let (proxy_addr, ca) = start_proxy(config).await;

    let client = reqwest::Client::builder()
        .proxy(reqwest::Proxy::https(format!("http://{}", proxy_addr)).unwrap())
        .add_root_certificate(
            reqwest::Certificate::from_pem(ca.ca_certificate_pem().as_bytes()).unwrap(),
        )
        .build()
        .unwrap();

    // The client believes it is pulling from registry.invalid over HTTPS;
    // the proxy terminates TLS and answers from the mirror.
    let response = client
        .get("https://registry.invalid/v2/library/nginx/manifests/latest")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.bytes().await.unwrap(), &b"MANIFEST_JSON"[..]);
}

#[tokio::test]
async fn test_plain_http_request_is_handled_without_tunnel() {
    let mirror = MockServer::start().await;
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/library/nginx/tags/list"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(&b"TAG_LIST"[..]))
        .expect(1)
        .mount(&upstream)
        .await;

    let mut config = ProxyConfig::default();
    config.mirror.host = mirror.address().ip().to_string();
    config.mirror.port = mirror.address().port();
    config.mirror.scheme = "http".to_string();
    config.upstream.scheme = "http".to_string();
    config.upstream.timeout_secs = 5;

    let (proxy_addr, _ca) = start_proxy(config).await;

    // An unclassified plaintext request rides straight through to upstream.
    let client = reqwest::Client::builder()
        .proxy(reqwest::Proxy::http(format!("http://{}", proxy_addr)).unwrap())
        .build()
        .unwrap();
    let response = client
        .get(format!(
            "http://{}/v2/library/nginx/tags/list",
            upstream.address()
        ))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.bytes().await.unwrap(), &b"TAG_LIST"[..]);
}
