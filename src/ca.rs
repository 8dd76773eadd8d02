//! Certificate-authority material for TLS interception
//!
//! Clients only accept the interception if they trust the proxy's CA, so the
//! CA either comes from operator-provided PEM files or is generated fresh
//! for the lifetime of the process. Failure to obtain or construct this
//! material is the one fatal startup condition; everything after startup is
//! recoverable per request.
//!
//! Leaf certificates are minted on demand for each intercepted host and
//! cached, so repeated connections to the same registry reuse one rustls
//! server configuration.

use crate::config::CaConfig;
use crate::error::{ProxyError, Result};
use rcgen::{CertificateParams, DistinguishedName, KeyPair, SanType};
use rustls::crypto::{ring::default_provider, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::ServerConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::Cursor;
use std::net::IpAddr;
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};
use tracing::{debug, info};

const CA_COMMON_NAME: &str = "Registry Mirror Proxy CA";
const CA_VALIDITY_SECS: u64 = 10 * 365 * 24 * 60 * 60;
const LEAF_VALIDITY_SECS: u64 = 365 * 24 * 60 * 60;

/// Where CA material comes from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaMode {
    /// Self-signed authority generated per run
    #[default]
    Ephemeral,
    /// Authority loaded from configured PEM files
    FileBacked,
}

/// CA material plus a per-host leaf configuration cache
pub struct CertificateAuthority {
    ca_cert_pem: String,
    ca_key_pem: String,
    leaf_cache: RwLock<HashMap<String, Arc<ServerConfig>>>,
}

impl CertificateAuthority {
    /// Build the authority selected by configuration
    pub fn from_config(config: &CaConfig) -> Result<Self> {
        match config.mode {
            CaMode::Ephemeral => Self::ephemeral(),
            CaMode::FileBacked => {
                let cert_path = config.cert_path.as_deref().ok_or_else(|| {
                    ProxyError::Config("ca.cert_path is required for file_backed mode".to_string())
                })?;
                let key_path = config.key_path.as_deref().ok_or_else(|| {
                    ProxyError::Config("ca.key_path is required for file_backed mode".to_string())
                })?;
                Self::from_pem_files(cert_path, key_path)
            }
        }
    }

    /// Generate a self-signed authority valid for this process run
    pub fn ephemeral() -> Result<Self> {
        info!("generating ephemeral interception CA");
        let mut params = CertificateParams::new(vec![])
            .map_err(|e| ProxyError::Tls(format!("failed to create CA params: {}", e)))?;
        params.distinguished_name = DistinguishedName::new();
        params
            .distinguished_name
            .push(rcgen::DnType::CommonName, CA_COMMON_NAME);
        params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);

        let not_before = SystemTime::now();
        params.not_before = not_before.into();
        params.not_after = (not_before + Duration::from_secs(CA_VALIDITY_SECS)).into();

        let key_pair = KeyPair::generate()
            .map_err(|e| ProxyError::Tls(format!("failed to generate CA key pair: {}", e)))?;
        let cert = params
            .self_signed(&key_pair)
            .map_err(|e| ProxyError::Tls(format!("failed to self-sign CA certificate: {}", e)))?;

        Ok(CertificateAuthority {
            ca_cert_pem: cert.pem(),
            ca_key_pem: key_pair.serialize_pem(),
            leaf_cache: RwLock::new(HashMap::new()),
        })
    }

    /// Load an authority from PEM files
    ///
    /// Both files are parsed eagerly so a bad pair fails the process at
    /// startup instead of on the first intercepted connection.
    pub fn from_pem_files(cert_path: &str, key_path: &str) -> Result<Self> {
        info!(cert_path, key_path, "loading interception CA from PEM files");
        let ca_cert_pem = fs::read_to_string(cert_path)
            .map_err(|e| ProxyError::Tls(format!("failed to read {}: {}", cert_path, e)))?;
        let ca_key_pem = fs::read_to_string(key_path)
            .map_err(|e| ProxyError::Tls(format!("failed to read {}: {}", key_path, e)))?;

        KeyPair::from_pem(&ca_key_pem)
            .map_err(|e| ProxyError::Tls(format!("failed to parse CA key: {}", e)))?;
        CertificateParams::from_ca_cert_pem(&ca_cert_pem)
            .map_err(|e| ProxyError::Tls(format!("failed to parse CA certificate: {}", e)))?;

        Ok(CertificateAuthority {
            ca_cert_pem,
            ca_key_pem,
            leaf_cache: RwLock::new(HashMap::new()),
        })
    }

    /// PEM of the CA certificate, for installing into client trust stores
    pub fn ca_certificate_pem(&self) -> &str {
        &self.ca_cert_pem
    }

    /// A rustls server configuration presenting a leaf for `host`
    ///
    /// Issued leaves are cached by host; concurrent callers may race to
    /// issue the same host once, after which one winner stays cached.
    pub fn server_config_for(&self, host: &str) -> Result<Arc<ServerConfig>> {
        let host = host.trim_end_matches(":443").to_ascii_lowercase();
        if let Ok(cache) = self.leaf_cache.read() {
            if let Some(config) = cache.get(&host) {
                return Ok(Arc::clone(config));
            }
        }

        let config = Arc::new(self.issue_server_config(&host)?);
        if let Ok(mut cache) = self.leaf_cache.write() {
            cache.insert(host.clone(), Arc::clone(&config));
        }
        debug!(host = %host, "issued leaf certificate");
        Ok(config)
    }

    fn issue_server_config(&self, host: &str) -> Result<ServerConfig> {
        let _ = CryptoProvider::install_default(default_provider());

        let ca_key = KeyPair::from_pem(&self.ca_key_pem)
            .map_err(|e| ProxyError::Tls(format!("failed to parse CA key: {}", e)))?;
        let ca_params = CertificateParams::from_ca_cert_pem(&self.ca_cert_pem)
            .map_err(|e| ProxyError::Tls(format!("failed to parse CA certificate: {}", e)))?;
        // Recreate the CA certificate with its stored key so it can sign;
        // subject and key match the trusted original, so chains verify.
        let ca_cert = ca_params
            .self_signed(&ca_key)
            .map_err(|e| ProxyError::Tls(format!("failed to rebuild CA for signing: {}", e)))?;

        let mut params = CertificateParams::new(vec![])
            .map_err(|e| ProxyError::Tls(format!("failed to create leaf params: {}", e)))?;
        params.distinguished_name = DistinguishedName::new();
        params
            .distinguished_name
            .push(rcgen::DnType::CommonName, host);
        match host.parse::<IpAddr>() {
            Ok(ip) => params.subject_alt_names.push(SanType::IpAddress(ip)),
            Err(_) => params.subject_alt_names.push(SanType::DnsName(
                host.try_into()
                    .map_err(|e| ProxyError::Tls(format!("invalid host name {}: {}", host, e)))?,
            )),
        }
        let not_before = SystemTime::now();
        params.not_before = not_before.into();
        params.not_after = (not_before + Duration::from_secs(LEAF_VALIDITY_SECS)).into();

        let leaf_key = KeyPair::generate()
            .map_err(|e| ProxyError::Tls(format!("failed to generate leaf key pair: {}", e)))?;
        let leaf_cert = params
            .signed_by(&leaf_key, &ca_cert, &ca_key)
            .map_err(|e| ProxyError::Tls(format!("failed to sign leaf certificate: {}", e)))?;

        let mut chain: Vec<CertificateDer<'static>> =
            vec![CertificateDer::from(leaf_cert.der().to_vec())];
        let mut ca_reader = Cursor::new(self.ca_cert_pem.as_bytes());
        for der in rustls_pemfile::certs(&mut ca_reader) {
            chain.push(
                der.map_err(|e| ProxyError::Tls(format!("failed to decode CA PEM: {}", e)))?,
            );
        }

        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(leaf_key.serialize_der()));
        ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(chain, key)
            .map_err(|e| ProxyError::Tls(format!("failed to build TLS config: {}", e)))
    }
}
