//! TLS configuration and certificate loading.
//!
//! Cipher-suite selection mirrors the constrained-platform policy: devices
//! without hardware-accelerated elliptic-curve crypto cannot afford ECDSA
//! handshakes, so they are restricted to RSA-authenticated suites. The
//! policy is a runtime configuration flag, not a build variant, so one
//! binary serves every platform.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::crypto::{ring, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig, SupportedCipherSuite};
use tokio_rustls::TlsAcceptor;

use crate::config::schema::TlsConfig;

/// Error type for TLS setup.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("no certificates found in {0}")]
    NoCertificates(String),

    #[error("no private key found in {0}")]
    NoPrivateKey(String),

    #[error("invalid client CA bundle: {0}")]
    ClientCa(String),

    #[error("TLS configuration rejected: {0}")]
    Config(#[from] rustls::Error),
}

/// Build a TLS acceptor from the configured certificate material.
pub fn build_acceptor(cfg: &TlsConfig) -> Result<TlsAcceptor, TlsError> {
    let certs = load_certs(Path::new(&cfg.cert))?;
    let key = load_key(Path::new(&cfg.key))?;

    let provider = Arc::new(CryptoProvider {
        cipher_suites: cipher_suites(cfg),
        ..ring::default_provider()
    });

    let builder = ServerConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(rustls::ALL_VERSIONS)?;

    let config = match &cfg.ca {
        Some(ca_path) => {
            let mut roots = RootCertStore::empty();
            for cert in load_certs(Path::new(ca_path))? {
                roots
                    .add(cert)
                    .map_err(|e| TlsError::ClientCa(e.to_string()))?;
            }
            let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider)
                .build()
                .map_err(|e| TlsError::ClientCa(e.to_string()))?;
            builder
                .with_client_cert_verifier(verifier)
                .with_single_cert(certs, key)?
        }
        None => builder.with_no_client_auth().with_single_cert(certs, key)?,
    };

    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Cipher suites for the listener.
///
/// Unconstrained platforms take the provider defaults. Constrained ones get
/// an ECDSA-inclusive list when hardware EC crypto is present, and an
/// RSA-authenticated-only list otherwise.
fn cipher_suites(cfg: &TlsConfig) -> Vec<SupportedCipherSuite> {
    if !cfg.constrained_platform {
        return ring::default_provider().cipher_suites;
    }
    if cfg.hardware_crypto {
        vec![
            ring::cipher_suite::TLS13_AES_128_GCM_SHA256,
            ring::cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
            ring::cipher_suite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
        ]
    } else {
        vec![
            ring::cipher_suite::TLS13_AES_128_GCM_SHA256,
            ring::cipher_suite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
        ]
    }
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let file = File::open(path).map_err(|source| TlsError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<_, _>>()
        .map_err(|source| TlsError::Io {
            path: path.display().to_string(),
            source,
        })?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(path.display().to_string()));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let file = File::open(path).map_err(|source| TlsError::Io {
        path: path.display().to_string(),
        source,
    })?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|source| TlsError::Io {
            path: path.display().to_string(),
            source,
        })?
        .ok_or_else(|| TlsError::NoPrivateKey(path.display().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constrained_without_hardware_crypto_drops_ecdsa() {
        let cfg = TlsConfig {
            constrained_platform: true,
            hardware_crypto: false,
            ..TlsConfig::default()
        };
        let suites = cipher_suites(&cfg);
        assert!(suites.contains(&ring::cipher_suite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256));
        assert!(!suites.contains(&ring::cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256));
    }

    #[test]
    fn constrained_with_hardware_crypto_keeps_ecdsa() {
        let cfg = TlsConfig {
            constrained_platform: true,
            hardware_crypto: true,
            ..TlsConfig::default()
        };
        let suites = cipher_suites(&cfg);
        assert!(suites.contains(&ring::cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256));
    }

    #[test]
    fn unconstrained_uses_provider_defaults() {
        let cfg = TlsConfig::default();
        assert_eq!(
            cipher_suites(&cfg).len(),
            ring::default_provider().cipher_suites.len()
        );
    }

    #[test]
    fn missing_certificate_file_is_an_io_error() {
        let cfg = TlsConfig {
            cert: "/nonexistent/cert.pem".into(),
            key: "/nonexistent/key.pem".into(),
            ..TlsConfig::default()
        };
        assert!(matches!(build_acceptor(&cfg), Err(TlsError::Io { .. })));
    }
}
