//! TLS configuration and certificate loading.

use axum_server::tls_rustls::RustlsConfig;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors loading the listener certificate or key.
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to read {}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no certificates found in {}", .0.display())]
    NoCertificates(PathBuf),

    #[error("no private key found in {}", .0.display())]
    NoPrivateKey(PathBuf),

    #[error("certificate and key do not form a usable TLS configuration")]
    Config(#[source] std::io::Error),
}

/// Install `ring` as the process-wide rustls provider. Safe to call repeatedly.
pub fn install_crypto_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

/// Load TLS configuration from PEM certificate chain and key files.
pub async fn load_tls_config(cert_path: &Path, key_path: &Path) -> Result<RustlsConfig, TlsError> {
    install_crypto_provider();

    let read_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| TlsError::Read { path, source }
    };

    let cert_pem = tokio::fs::read(cert_path).await.map_err(read_err(cert_path))?;
    let key_pem = tokio::fs::read(key_path).await.map_err(read_err(key_path))?;

    let certs = rustls_pemfile::certs(&mut cert_pem.as_slice())
        .map(|cert| cert.map(|der| der.to_vec()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(read_err(cert_path))?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(cert_path.to_path_buf()));
    }

    let key = rustls_pemfile::private_key(&mut key_pem.as_slice())
        .map_err(read_err(key_path))?
        .ok_or_else(|| TlsError::NoPrivateKey(key_path.to_path_buf()))?;

    tracing::debug!(
        cert = %cert_path.display(),
        chain_len = certs.len(),
        "TLS material loaded"
    );

    RustlsConfig::from_der(certs, key.secret_der().to_vec())
        .await
        .map_err(TlsError::Config)
}
