//! Configuration management for the mirror proxy

use crate::ca::CaMode;
use crate::error::{ProxyError, Result};
use crate::rewriter::RewriteStrategy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Top-level proxy configuration
///
/// Loaded once at startup and passed into constructors as an immutable value.
/// Nothing in the proxy mutates configuration after that point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Port the intercepting listener binds to (default: 2000)
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// Mirror registry that classified requests are redirected to
    #[serde(default)]
    pub mirror: MirrorConfig,

    /// Request rewriting options
    #[serde(default)]
    pub rewrite: RewriteConfig,

    /// Upstream (fallback) transport options
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Response cache options
    #[serde(default)]
    pub cache: CacheConfig,

    /// Certificate-authority material for TLS interception
    #[serde(default)]
    pub ca: CaConfig,
}

/// Location of the preferred mirror registry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MirrorConfig {
    /// Mirror registry host (default: "localhost")
    #[serde(default = "default_mirror_host")]
    pub host: String,

    /// Mirror registry port (default: 5000)
    #[serde(default = "default_mirror_port")]
    pub port: u16,

    /// Scheme used to reach the mirror, "http" or "https" (default: "http")
    #[serde(default = "default_mirror_scheme")]
    pub scheme: String,

    /// Skip TLS certificate verification when talking to the mirror
    /// (default: false)
    #[serde(default)]
    pub insecure_skip_verify: bool,
}

/// Request rewriting options
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RewriteConfig {
    /// How mirror paths are built from classified requests
    /// (default: host_namespaced)
    #[serde(default)]
    pub strategy: RewriteStrategy,

    /// Copy the client's Authorization header onto mirror requests
    /// (default: false)
    #[serde(default)]
    pub forward_authorization: bool,
}

/// Upstream (fallback) transport options
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpstreamConfig {
    /// Scheme used to reach the original registry (default: "https")
    #[serde(default = "default_upstream_scheme")]
    pub scheme: String,

    /// Per-request timeout in seconds for both mirror and upstream
    /// transports (default: 30)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Skip TLS certificate verification for upstream requests
    /// (default: false)
    #[serde(default)]
    pub insecure_skip_verify: bool,
}

/// Response cache options
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    /// Whether mirror responses are cached at all (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Upper bound on stored entries, evicted least-recently-used
    /// (default: 4096)
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

/// Certificate-authority material options
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CaConfig {
    /// Where CA material comes from (default: ephemeral)
    #[serde(default)]
    pub mode: CaMode,

    /// PEM certificate path, required when mode is file_backed
    #[serde(default)]
    pub cert_path: Option<String>,

    /// PEM private key path, required when mode is file_backed
    #[serde(default)]
    pub key_path: Option<String>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        ProxyConfig {
            listen_port: default_listen_port(),
            mirror: MirrorConfig::default(),
            rewrite: RewriteConfig::default(),
            upstream: UpstreamConfig::default(),
            cache: CacheConfig::default(),
            ca: CaConfig::default(),
        }
    }
}

impl Default for MirrorConfig {
    fn default() -> Self {
        MirrorConfig {
            host: default_mirror_host(),
            port: default_mirror_port(),
            scheme: default_mirror_scheme(),
            insecure_skip_verify: false,
        }
    }
}

impl Default for RewriteConfig {
    fn default() -> Self {
        RewriteConfig {
            strategy: RewriteStrategy::default(),
            forward_authorization: false,
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        UpstreamConfig {
            scheme: default_upstream_scheme(),
            timeout_secs: default_timeout_secs(),
            insecure_skip_verify: false,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            enabled: true,
            max_entries: default_max_entries(),
        }
    }
}

impl Default for CaConfig {
    fn default() -> Self {
        CaConfig {
            mode: CaMode::default(),
            cert_path: None,
            key_path: None,
        }
    }
}

impl ProxyConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref()).map_err(|e| {
            ProxyError::Config(format!(
                "failed to read {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        let config: ProxyConfig = serde_yaml::from_str(&contents)
            .map_err(|e| ProxyError::Config(format!("failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.mirror.host.is_empty() {
            return Err(ProxyError::Config("mirror.host must not be empty".to_string()));
        }
        if !matches!(self.mirror.scheme.as_str(), "http" | "https") {
            return Err(ProxyError::Config(format!(
                "mirror.scheme must be http or https, got {:?}",
                self.mirror.scheme
            )));
        }
        if !matches!(self.upstream.scheme.as_str(), "http" | "https") {
            return Err(ProxyError::Config(format!(
                "upstream.scheme must be http or https, got {:?}",
                self.upstream.scheme
            )));
        }
        if self.upstream.timeout_secs == 0 {
            return Err(ProxyError::Config(
                "upstream.timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.cache.max_entries == 0 {
            return Err(ProxyError::Config(
                "cache.max_entries must be greater than zero".to_string(),
            ));
        }
        if self.ca.mode == CaMode::FileBacked
            && (self.ca.cert_path.is_none() || self.ca.key_path.is_none())
        {
            return Err(ProxyError::Config(
                "ca.cert_path and ca.key_path are required when ca.mode is file_backed"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

fn default_listen_port() -> u16 {
    2000
}

fn default_mirror_host() -> String {
    "localhost".to_string()
}

fn default_mirror_port() -> u16 {
    5000
}

fn default_mirror_scheme() -> String {
    "http".to_string()
}

fn default_upstream_scheme() -> String {
    "https".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_max_entries() -> usize {
    4096
}
