use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;
use uuid::Uuid;

use crate::monitoring::types::MonitorStatus;

pub const DEFAULT_INTERVAL_SECONDS: u64 = 60;
pub const DEFAULT_RETRY_THRESHOLD: u32 = 1;
pub const DEFAULT_CERT_INTERVAL_SECONDS: u64 = 86_400;
pub const DEFAULT_CERT_THRESHOLD_DAYS: i64 = 14;
pub const DEFAULT_MAX_REDIRECTS: usize = 10;

/// Kind of probe an endpoint uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProbeKind {
    Http,
    Ping,
    Tcp,
    BrokerProducer,
    BrokerConsumer,
}

impl ProbeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeKind::Http => "http",
            ProbeKind::Ping => "ping",
            ProbeKind::Tcp => "tcp",
            ProbeKind::BrokerProducer => "broker-producer",
            ProbeKind::BrokerConsumer => "broker-consumer",
        }
    }
}

impl std::fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Probe configuration, one variant per endpoint kind
///
/// Values are validated once when a draft is turned into an [`Endpoint`];
/// checkers can rely on them being well formed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ProbeConfig {
    Http(HttpProbe),
    Ping(PingProbe),
    Tcp(TcpProbe),
    BrokerProducer(BrokerProbe),
    BrokerConsumer(BrokerProbe),
}

impl ProbeConfig {
    pub fn kind(&self) -> ProbeKind {
        match self {
            ProbeConfig::Http(_) => ProbeKind::Http,
            ProbeConfig::Ping(_) => ProbeKind::Ping,
            ProbeConfig::Tcp(_) => ProbeKind::Tcp,
            ProbeConfig::BrokerProducer(_) => ProbeKind::BrokerProducer,
            ProbeConfig::BrokerConsumer(_) => ProbeKind::BrokerConsumer,
        }
    }

    /// Human readable target (URL, host or broker list)
    pub fn target(&self) -> String {
        match self {
            ProbeConfig::Http(http) => http.url.to_string(),
            ProbeConfig::Ping(ping) => ping.host.clone(),
            ProbeConfig::Tcp(tcp) => format!("{}:{}", tcp.host, tcp.port),
            ProbeConfig::BrokerProducer(broker) | ProbeConfig::BrokerConsumer(broker) => {
                format!("{}/{}", broker.brokers.join(","), broker.topic)
            }
        }
    }
}

/// Inclusive range of accepted HTTP status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRange {
    pub start: u16,
    pub end: u16,
}

impl StatusRange {
    pub fn single(code: u16) -> Self {
        Self { start: code, end: code }
    }

    pub fn contains(&self, code: u16) -> bool {
        (self.start..=self.end).contains(&code)
    }

    /// Parse `"200"` or `"200-299"`
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        match raw.split_once('-') {
            Some((start, end)) => {
                let start = start.trim().parse().ok()?;
                let end = end.trim().parse().ok()?;
                (start <= end).then_some(Self { start, end })
            }
            None => raw.parse().ok().map(Self::single),
        }
    }
}

/// Client certificate material for mutual TLS
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientTls {
    pub cert_pem: String,
    pub key_pem: String,
    /// When set, the server certificate is verified against this CA
    pub ca_pem: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpProbe {
    pub url: Url,
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    /// Empty means any 2xx
    #[serde(default)]
    pub accepted_statuses: Vec<StatusRange>,
    pub keyword: Option<String>,
    pub client_tls: Option<ClientTls>,
    #[serde(default)]
    pub ignore_tls: bool,
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
}

fn default_max_redirects() -> usize {
    DEFAULT_MAX_REDIRECTS
}

impl HttpProbe {
    pub fn get(url: Url) -> Self {
        Self {
            url,
            method: "GET".to_string(),
            headers: BTreeMap::new(),
            body: None,
            accepted_statuses: Vec::new(),
            keyword: None,
            client_tls: None,
            ignore_tls: false,
            max_redirects: DEFAULT_MAX_REDIRECTS,
        }
    }

    pub fn accepts(&self, code: u16) -> bool {
        if self.accepted_statuses.is_empty() {
            (200..300).contains(&code)
        } else {
            self.accepted_statuses.iter().any(|range| range.contains(code))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PingProbe {
    pub host: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TcpProbe {
    pub host: String,
    pub port: u16,
}

/// Kafka-protocol broker health check settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerProbe {
    pub brokers: Vec<String>,
    pub topic: String,
    #[serde(default)]
    pub partition: i32,
    /// Payload published in producer mode
    #[serde(default)]
    pub message: String,
    /// Consumer mode: read retained messages instead of waiting for new ones
    #[serde(default)]
    pub from_beginning: bool,
}

/// Certificate/domain expiry check settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CertCheckSettings {
    pub enabled: bool,
    pub interval_seconds: u64,
    pub expiry_threshold_days: i64,
}

impl Default for CertCheckSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_seconds: DEFAULT_CERT_INTERVAL_SECONDS,
            expiry_threshold_days: DEFAULT_CERT_THRESHOLD_DAYS,
        }
    }
}

/// Live state mutated on every health check
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EndpointState {
    pub status: MonitorStatus,
    pub consecutive_failures: u32,
    pub last_checked_at: Option<DateTime<Utc>>,
}

/// One certificate of the presented chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CertificateDetails {
    pub subject: String,
    pub issuer: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub days_remaining: i64,
}

/// Certificate chain presented by the endpoint, leaf first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CertificateInfo {
    pub chain: Vec<CertificateDetails>,
    pub checked_at: DateTime<Utc>,
}

impl CertificateInfo {
    pub fn leaf(&self) -> Option<&CertificateDetails> {
        self.chain.first()
    }

    /// Days until the leaf certificate expires
    pub fn expires_in(&self) -> Option<i64> {
        self.leaf().map(|leaf| leaf.days_remaining)
    }

    pub fn expiry_date(&self) -> Option<DateTime<Utc>> {
        self.leaf().map(|leaf| leaf.not_after)
    }
}

/// Domain registration data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainInfo {
    pub domain: String,
    pub registered_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub days_remaining: Option<i64>,
    pub checked_at: DateTime<Utc>,
}

/// Cached side-channel data; `None` means "unknown", never "stale"
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExpirySnapshot {
    pub certificate: Option<CertificateInfo>,
    pub domain: Option<DomainInfo>,
}

impl ExpirySnapshot {
    pub fn is_empty(&self) -> bool {
        self.certificate.is_none() && self.domain.is_none()
    }
}

/// Endpoint model - a monitored target with its configuration and live state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: Uuid,
    pub name: String,
    pub probe: ProbeConfig,
    pub interval_seconds: u64,
    pub retry_threshold: u32,
    pub invert_result: bool,
    pub paused: bool,
    pub cert_check: CertCheckSettings,
    pub state: EndpointState,
    pub snapshot: ExpirySnapshot,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Endpoint {
    /// Create a new endpoint with default scheduling settings
    pub fn new(name: impl Into<String>, probe: ProbeConfig) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            probe,
            interval_seconds: DEFAULT_INTERVAL_SECONDS,
            retry_threshold: DEFAULT_RETRY_THRESHOLD,
            invert_result: false,
            paused: false,
            cert_check: CertCheckSettings::default(),
            state: EndpointState::default(),
            snapshot: ExpirySnapshot::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn kind(&self) -> ProbeKind {
        self.probe.kind()
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds.max(1))
    }

    pub fn cert_interval(&self) -> Duration {
        Duration::from_secs(self.cert_check.interval_seconds.max(1))
    }

    /// Host and port the certificate inspector connects to
    ///
    /// Only HTTPS endpoints with certificate checks enabled qualify.
    pub fn cert_target(&self) -> Option<(String, u16)> {
        if !self.cert_check.enabled {
            return None;
        }
        match &self.probe {
            ProbeConfig::Http(http) if http.url.scheme() == "https" => {
                let host = http.url.host_str()?.to_string();
                Some((host, http.url.port_or_known_default().unwrap_or(443)))
            }
            _ => None,
        }
    }
}
