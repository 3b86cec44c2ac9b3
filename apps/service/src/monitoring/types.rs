use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io;
use std::str::FromStr;
use thiserror::Error;

/// Displayed status of an endpoint, and the outcome recorded on observations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MonitorStatus {
    #[default]
    Pending,
    Up,
    Down,
}

impl MonitorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorStatus::Pending => "pending",
            MonitorStatus::Up => "up",
            MonitorStatus::Down => "down",
        }
    }
}

impl std::fmt::Display for MonitorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MonitorStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(MonitorStatus::Pending),
            "up" => Ok(MonitorStatus::Up),
            "down" => Ok(MonitorStatus::Down),
            other => Err(anyhow::anyhow!("Unknown monitor status: {}", other)),
        }
    }
}

/// Categorized reason a probe failed
///
/// The `Display` output is what users see next to a `down` endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureReason {
    #[error("DNS resolution failed: {0}")]
    Dns(String),

    #[error("Connection refused")]
    ConnectionRefused,

    #[error("Connection reset by peer")]
    ConnectionReset,

    #[error("Timed out after {0}s")]
    Timeout(u64),

    #[error("Host unreachable")]
    HostUnreachable,

    #[error("Network unreachable")]
    NetworkUnreachable,

    #[error("TLS/certificate error: {0}")]
    Tls(String),

    #[error("HTTP status {0} is not accepted")]
    HttpStatus(u16),

    #[error("Keyword \"{0}\" not found in response body")]
    KeywordMissing(String),

    #[error("Ping failed: {0}")]
    Ping(String),

    #[error("Broker error: {0}")]
    Broker(String),

    #[error("No message received within {0}s")]
    NoMessage(u64),

    #[error("Service responded, but upside-down mode expects it to be unreachable")]
    InvertedSuccess,

    #[error("{0}")]
    Other(String),
}

impl FailureReason {
    /// Map an I/O error from a connect/read into a reason category
    pub fn from_io(error: &io::Error, timeout_seconds: u64) -> Self {
        match error.kind() {
            io::ErrorKind::ConnectionRefused => FailureReason::ConnectionRefused,
            io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => {
                FailureReason::ConnectionReset
            }
            io::ErrorKind::TimedOut => FailureReason::Timeout(timeout_seconds),
            io::ErrorKind::HostUnreachable => FailureReason::HostUnreachable,
            io::ErrorKind::NetworkUnreachable => FailureReason::NetworkUnreachable,
            _ => {
                if let Some(tls) = error.get_ref().and_then(|inner| inner.downcast_ref::<rustls::Error>()) {
                    return FailureReason::Tls(tls.to_string());
                }

                let message = error.to_string();
                let lower = message.to_lowercase();
                if lower.contains("lookup") || lower.contains("resolve") || lower.contains("name or service") {
                    FailureReason::Dns(message)
                } else {
                    FailureReason::Other(message)
                }
            }
        }
    }
}

/// Result of a single probe attempt, after upside-down inversion
#[derive(Debug, Clone, PartialEq)]
pub struct CheckResult {
    /// Whether the endpoint counts as reachable for this attempt
    pub ok: bool,

    /// Response time in milliseconds, 0 when not measured
    pub response_time_ms: u64,

    /// Why the attempt failed (only set when `ok` is false)
    pub failure_reason: Option<FailureReason>,

    /// When the attempt finished
    pub timestamp: DateTime<Utc>,
}

impl CheckResult {
    /// Mark the check as successful with latency
    pub fn success(response_time_ms: u64) -> Self {
        Self { ok: true, response_time_ms, failure_reason: None, timestamp: Utc::now() }
    }

    /// Mark the check as failed with a reason
    pub fn failure(reason: FailureReason, response_time_ms: u64) -> Self {
        Self { ok: false, response_time_ms, failure_reason: Some(reason), timestamp: Utc::now() }
    }

    /// Build from a raw checker outcome, applying upside-down mode
    pub fn from_outcome(outcome: Result<u64, FailureReason>, invert: bool) -> Self {
        match (outcome, invert) {
            (Ok(ms), false) => Self::success(ms),
            (Err(reason), false) => Self::failure(reason, 0),
            (Ok(ms), true) => Self::failure(FailureReason::InvertedSuccess, ms),
            (Err(_), true) => Self::success(0),
        }
    }

    /// Status recorded on the observation for this attempt
    pub fn status(&self) -> MonitorStatus {
        if self.ok { MonitorStatus::Up } else { MonitorStatus::Down }
    }
}
