//! Error types for the mirror proxy

use thiserror::Error;

/// Result type alias for proxy operations
pub type Result<T> = std::result::Result<T, ProxyError>;

/// Error types that can occur in the mirror proxy
///
/// Per-request errors (`Rewrite`, `Transport`, `Cache`) are recovered inside
/// the dispatcher by falling back to the upstream registry. Only `Config` and
/// `Tls` errors raised during startup are fatal.
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Rewrite error: {0}")]
    Rewrite(String),

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
