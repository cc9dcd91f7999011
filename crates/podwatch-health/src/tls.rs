//! TLS client configuration for HTTPS status probes.
//!
//! Services that declare `status_http = false` are probed over HTTPS. The
//! server certificate is verified against the Mozilla roots plus an
//! optional cluster CA bundle; nodes that authenticate to their services
//! can present a client certificate.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::TlsError;

/// Paths to PEM files used by HTTPS probes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TlsSettings {
    /// Extra trusted CA certificates.
    pub ca_file: Option<PathBuf>,
    /// Client certificate chain presented to services.
    pub cert_file: Option<PathBuf>,
    /// Private key for `cert_file`.
    pub key_file: Option<PathBuf>,
}

impl TlsSettings {
    /// Build the `rustls` client configuration shared by every probe.
    pub fn client_config(&self) -> Result<Arc<rustls::ClientConfig>, TlsError> {
        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        if let Some(ca_file) = &self.ca_file {
            let certs = load_certs(ca_file)?;
            let (added, ignored) = roots.add_parsable_certificates(certs);
            debug!(path = ?ca_file, added, ignored, "loaded probe CA bundle");
        }

        let builder = rustls::ClientConfig::builder_with_provider(
            rustls::crypto::ring::default_provider().into(),
        )
        .with_safe_default_protocol_versions()?
        .with_root_certificates(roots);

        let config = match (&self.cert_file, &self.key_file) {
            (Some(cert_file), Some(key_file)) => {
                let chain = load_certs(cert_file)?;
                let key = load_key(key_file)?;
                builder.with_client_auth_cert(chain, key)?
            }
            (None, None) => builder.with_no_client_auth(),
            _ => return Err(TlsError::IncompleteClientAuth),
        };

        Ok(Arc::new(config))
    }
}

fn open(path: &Path) -> Result<BufReader<File>, TlsError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let mut reader = open(path)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(path.to_path_buf()));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let mut reader = open(path)?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| TlsError::NoPrivateKey(path.to_path_buf()))
}
