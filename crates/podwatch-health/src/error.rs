//! Health watch error types.

use std::path::PathBuf;

use podwatch_state::HealthResult;
use thiserror::Error;

/// Transport-level failure of a single probe. Never escapes a check: the
/// checker turns it into a critical result whose output is this text.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("invalid probe uri {0}")]
    InvalidUri(String),

    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid tls server name {0}")]
    ServerName(String),

    #[error("tls handshake with {addr} failed: {source}")]
    Tls {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("http handshake failed: {0}")]
    Handshake(#[source] hyper::Error),

    #[error("request failed: {0}")]
    Request(#[source] hyper::Error),

    #[error("probe timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// A check that could not produce a publishable result.
#[derive(Debug, Error)]
pub enum CheckError {
    /// The response arrived but its body could not be read. `result`
    /// still carries the classification derived from the status code.
    #[error("failed to read status body from {uri}: {reason}")]
    BodyRead {
        uri: String,
        reason: String,
        result: Box<HealthResult>,
    },
}

/// Errors loading TLS material for HTTPS probes.
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no certificates found in {0}")]
    NoCertificates(PathBuf),

    #[error("no private key found in {0}")]
    NoPrivateKey(PathBuf),

    #[error("client certificate requires both cert_file and key_file")]
    IncompleteClientAuth,

    #[error("tls configuration error: {0}")]
    Config(#[from] rustls::Error),
}
