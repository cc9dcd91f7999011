//! Status probe logic.
//!
//! A [`StatusChecker`] performs one HTTP(S) GET against a service's
//! `/_status` endpoint per [`check`](StatusChecker::check) and classifies
//! the outcome. Transport failures are health observations, not checker
//! failures: they come back as a critical result carrying the error text.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use http::{StatusCode, Uri};
use http_body_util::{BodyExt, Empty};
use hyper::body::Incoming;
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tokio::time::{Instant, timeout_at};
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

use podwatch_state::{HealthResult, HealthStatus, ServiceDescriptor};

use crate::config::STATUS_PATH;
use crate::error::{CheckError, ProbeError};

/// Build the probe URI for a service running on `node`.
///
/// IPv6 literals are bracketed so the port stays unambiguous.
pub fn probe_uri(node: &str, desc: &ServiceDescriptor) -> String {
    let host = if node.contains(':') && !node.starts_with('[') {
        format!("[{node}]")
    } else {
        node.to_string()
    };
    format!(
        "{}://{}:{}{}",
        desc.status_scheme(),
        host,
        desc.status_port,
        STATUS_PATH
    )
}

/// Classify a status code: 2xx is passing, anything else critical.
pub fn classify(status: StatusCode) -> HealthStatus {
    if (200..300).contains(&status.as_u16()) {
        HealthStatus::Passing
    } else {
        HealthStatus::Critical
    }
}

/// HTTP client shared by every worker on the node.
///
/// Cheap to clone; connections are not pooled, so concurrent probes never
/// contend on shared state.
#[derive(Clone)]
pub struct ProbeClient {
    tls: TlsConnector,
    timeout: Duration,
}

impl ProbeClient {
    pub fn new(tls: Arc<rustls::ClientConfig>, timeout: Duration) -> Self {
        Self {
            tls: TlsConnector::from(tls),
            timeout,
        }
    }

    /// Per-probe deadline budget.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Open a connection to `uri` and send one GET.
    async fn get(&self, uri: &Uri) -> Result<http::Response<Incoming>, ProbeError> {
        let host = uri
            .host()
            .ok_or_else(|| ProbeError::InvalidUri(uri.to_string()))?;
        let https = uri.scheme_str() == Some("https");
        let port = uri.port_u16().unwrap_or(if https { 443 } else { 80 });
        let addr = format!("{host}:{port}");
        // `Uri::host` keeps the brackets around IPv6 literals.
        let host = host.trim_start_matches('[').trim_end_matches(']');

        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|source| ProbeError::Connect {
                addr: addr.clone(),
                source,
            })?;

        if https {
            let server_name = rustls::pki_types::ServerName::try_from(host)
                .map_err(|_| ProbeError::ServerName(host.to_string()))?
                .to_owned();
            let tls = self
                .tls
                .connect(server_name, stream)
                .await
                .map_err(|source| ProbeError::Tls {
                    addr: addr.clone(),
                    source,
                })?;
            send(TokioIo::new(tls), uri, &addr).await
        } else {
            send(TokioIo::new(stream), uri, &addr).await
        }
    }
}

/// Send a GET over an established connection.
async fn send<IO>(io: IO, uri: &Uri, authority: &str) -> Result<http::Response<Incoming>, ProbeError>
where
    IO: hyper::rt::Read + hyper::rt::Write + Unpin + Send + 'static,
{
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(ProbeError::Handshake)?;

    // Drive the connection in the background.
    tokio::spawn(async move {
        let _ = conn.await;
    });

    let path = uri.path_and_query().map_or(STATUS_PATH, |p| p.as_str());
    let req = http::Request::builder()
        .method("GET")
        .uri(path)
        .header("host", authority)
        .header("user-agent", "podwatch/0.1")
        .body(Empty::<Bytes>::new())
        .map_err(|_| ProbeError::InvalidUri(uri.to_string()))?;

    sender.send_request(req).await.map_err(ProbeError::Request)
}

/// Probes one service's status endpoint.
#[derive(Clone)]
pub struct StatusChecker {
    service: String,
    node: String,
    uri: String,
    client: ProbeClient,
}

impl StatusChecker {
    pub fn new(service: &str, node: &str, uri: String, client: ProbeClient) -> Self {
        Self {
            service: service.to_string(),
            node: node.to_string(),
            uri,
            client,
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Perform exactly one probe.
    ///
    /// Returns `Err` only when a response arrived but its body could not be
    /// read; the error still carries the status-code classification.
    pub async fn check(&self) -> Result<HealthResult, CheckError> {
        let deadline = Instant::now() + self.client.timeout();

        let response = match self.request(deadline).await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(service = %self.service, uri = %self.uri, error = %e, "status probe failed");
                return Ok(self.result(HealthStatus::Critical, e.to_string()));
            }
        };

        let status = classify(response.status());
        if status == HealthStatus::Critical {
            debug!(service = %self.service, code = %response.status(), "status probe non-2xx");
        }

        let body = match timeout_at(deadline, response.into_body().collect()).await {
            Ok(Ok(collected)) => collected.to_bytes(),
            Ok(Err(e)) => return Err(self.body_error(status, e.to_string())),
            Err(_) => {
                let reason = ProbeError::Timeout(self.client.timeout()).to_string();
                return Err(self.body_error(status, reason));
            }
        };

        Ok(self.result(status, String::from_utf8_lossy(&body).into_owned()))
    }

    async fn request(&self, deadline: Instant) -> Result<http::Response<Incoming>, ProbeError> {
        let uri: Uri = self
            .uri
            .parse()
            .map_err(|_| ProbeError::InvalidUri(self.uri.clone()))?;
        match timeout_at(deadline, self.client.get(&uri)).await {
            Ok(result) => result,
            Err(_) => Err(ProbeError::Timeout(self.client.timeout())),
        }
    }

    fn result(&self, status: HealthStatus, output: String) -> HealthResult {
        HealthResult {
            service: self.service.clone(),
            node: self.node.clone(),
            status,
            output,
            checked_at: epoch_secs(),
        }
    }

    fn body_error(&self, status: HealthStatus, reason: String) -> CheckError {
        CheckError::BodyRead {
            uri: self.uri.clone(),
            reason,
            result: Box::new(self.result(status, String::new())),
        }
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
