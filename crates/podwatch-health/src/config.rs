//! Timing and failure-handling knobs for the health watch.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Path probed on every service's status port.
pub const STATUS_PATH: &str = "/_status";

/// What the reconciler does when the reality store cannot be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorPolicy {
    /// Keep every current watch and try again next cycle.
    #[default]
    Skip,
    /// Reconcile against an empty snapshot, stopping every watch.
    Empty,
}

/// Configuration for a [`Reconciler`](crate::Reconciler) and its workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Interval between reality store polls.
    #[serde(with = "duration_str")]
    pub poll_interval: Duration,
    /// Interval between probes of one service.
    #[serde(with = "duration_str")]
    pub probe_interval: Duration,
    /// Upper bound on one probe, connect through body.
    #[serde(with = "duration_str")]
    pub probe_timeout: Duration,
    pub on_fetch_error: FetchErrorPolicy,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
            probe_interval: Duration::from_secs(1),
            probe_timeout: Duration::from_secs(5),
            on_fetch_error: FetchErrorPolicy::Skip,
        }
    }
}

/// Parse a duration string like "5s", "500ms", "1m".
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

/// Render a duration in the shortest form `parse_duration` accepts.
pub fn format_duration(d: Duration) -> String {
    if d.subsec_millis() != 0 || d.as_secs() == 0 {
        format!("{}ms", d.as_millis())
    } else {
        format!("{}s", d.as_secs())
    }
}

mod duration_str {
    use super::*;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        match parse_duration(&raw) {
            Some(dur) if !dur.is_zero() => Ok(dur),
            Some(_) => Err(serde::de::Error::custom("duration must be non-zero")),
            None => Err(serde::de::Error::custom(format!("invalid duration {raw:?}"))),
        }
    }
}
