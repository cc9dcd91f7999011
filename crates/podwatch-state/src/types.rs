//! Domain types for the podwatch state store.
//!
//! These types represent what the coordination store says should run on a
//! node and the health outcomes the node agent writes back. All types are
//! serializable to/from JSON for storage in redb tables.

use serde::{Deserialize, Serialize};

/// Identifier of a service, unique within a node.
pub type ServiceId = String;

/// Identifier (host name) of a node in the cluster.
pub type NodeId = String;

// ── Reality ───────────────────────────────────────────────────────

/// One service that should currently run on a node.
///
/// Only `id` takes part in "is this the same service" comparisons; the
/// remaining fields are read once when the service is first supervised.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceDescriptor {
    pub id: ServiceId,
    /// Port serving the `/_status` endpoint. Zero means "not probed".
    #[serde(default)]
    pub status_port: u16,
    /// Probe over plain HTTP when true, HTTPS otherwise.
    #[serde(default)]
    pub status_http: bool,
    /// Opaque pod manifest, carried through unchanged.
    #[serde(default)]
    pub manifest: serde_json::Value,
}

impl ServiceDescriptor {
    /// Whether this service publishes a status endpoint at all.
    pub fn is_probed(&self) -> bool {
        self.status_port != 0
    }

    /// Scheme used to reach the status endpoint.
    pub fn status_scheme(&self) -> &'static str {
        if self.status_http { "http" } else { "https" }
    }
}

// ── Health ────────────────────────────────────────────────────────

/// Classification of a single probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Passing,
    Critical,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Passing => "passing",
            HealthStatus::Critical => "critical",
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one probe of one service on one node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthResult {
    pub service: ServiceId,
    pub node: NodeId,
    pub status: HealthStatus,
    /// Response body, or the transport error text.
    pub output: String,
    /// Unix timestamp (seconds) when the probe completed.
    pub checked_at: u64,
}

impl HealthResult {
    /// Build the composite key for the health table.
    pub fn table_key(&self) -> (&str, &str) {
        (self.node.as_str(), self.service.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_defaults_to_unprobed_https() {
        let desc: ServiceDescriptor = serde_json::from_str(r#"{"id":"svc"}"#).unwrap();
        assert!(!desc.is_probed());
        assert_eq!(desc.status_scheme(), "https");
        assert_eq!(desc.manifest, serde_json::Value::Null);
    }

    #[test]
    fn manifest_is_carried_verbatim() {
        let raw = r#"{"id":"svc","status_port":8080,"status_http":true,"manifest":{"launchables":{"app":{"location":"https://x/app.tar.gz"}}}}"#;
        let desc: ServiceDescriptor = serde_json::from_str(raw).unwrap();
        assert!(desc.is_probed());
        assert_eq!(desc.status_scheme(), "http");
        assert_eq!(
            desc.manifest["launchables"]["app"]["location"],
            "https://x/app.tar.gz"
        );
    }

    #[test]
    fn health_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Critical).unwrap(),
            "\"critical\""
        );
        assert_eq!(HealthStatus::Passing.to_string(), "passing");
    }
}
