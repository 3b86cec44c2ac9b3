//! Loosely typed endpoint records as submitted by the configuration API or
//! seeded from the config file.
//!
//! Drafts carry JSON-encoded blobs for headers, accepted status codes and
//! broker options. They are parsed here, once: malformed JSON is logged and
//! treated as "no value" rather than rejecting the endpoint.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::warn;

use super::endpoint::{
    BrokerProbe, CertCheckSettings, ClientTls, DEFAULT_CERT_INTERVAL_SECONDS,
    DEFAULT_CERT_THRESHOLD_DAYS, DEFAULT_INTERVAL_SECONDS, DEFAULT_MAX_REDIRECTS,
    DEFAULT_RETRY_THRESHOLD, Endpoint, HttpProbe, PingProbe, ProbeConfig, StatusRange, TcpProbe,
};
use crate::monitoring::validation;

#[derive(Debug, Error)]
pub enum DraftError {
    #[error("Unknown probe kind: {0}")]
    UnknownKind(String),

    #[error("Missing field for {kind} endpoint: {field}")]
    MissingField { kind: &'static str, field: &'static str },

    #[error("Invalid endpoint configuration: {0:#}")]
    Invalid(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointDraft {
    pub name: String,
    /// `http | ping | tcp | broker-producer | broker-consumer`
    pub kind: String,
    /// URL for HTTP, host for ping/TCP, comma separated `host:port` list for brokers
    pub target: String,
    pub port: Option<u16>,

    pub method: Option<String>,
    /// JSON object of header name to value
    pub headers: Option<String>,
    pub body: Option<String>,
    /// JSON array such as `["200-299", "301"]`
    pub accepted_status_codes: Option<String>,
    pub keyword: Option<String>,
    pub ignore_tls: bool,
    pub max_redirects: Option<usize>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub tls_ca: Option<String>,

    pub broker_topic: Option<String>,
    pub broker_message: Option<String>,
    /// JSON object, e.g. `{"partition": 0, "from_beginning": true}`
    pub broker_config: Option<String>,

    pub interval_seconds: Option<u64>,
    pub retry_threshold: Option<u32>,
    pub invert_result: bool,
    /// Unset keeps the current pause state when editing an endpoint
    pub paused: Option<bool>,
    pub cert_check_enabled: bool,
    pub cert_check_interval_seconds: Option<u64>,
    pub cert_expiry_threshold_days: Option<i64>,
}

/// Options accepted in the `broker_config` JSON blob
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BrokerOptions {
    partition: i32,
    from_beginning: bool,
}

impl EndpointDraft {
    /// Validate and build a brand new endpoint
    pub fn into_endpoint(self) -> Result<Endpoint, DraftError> {
        let probe = self.probe_config()?;
        let mut endpoint = Endpoint::new(self.name.clone(), probe);
        self.apply_settings(&mut endpoint)?;
        Ok(endpoint)
    }

    /// Validate and apply this draft as an edit of `existing`
    ///
    /// Identity, live state and cached snapshot are preserved.
    pub fn apply_to(self, existing: &Endpoint) -> Result<Endpoint, DraftError> {
        let probe = self.probe_config()?;
        let mut endpoint = existing.clone();
        endpoint.name = self.name.clone();
        endpoint.probe = probe;
        endpoint.updated_at = Utc::now();
        self.apply_settings(&mut endpoint)?;
        Ok(endpoint)
    }

    fn apply_settings(&self, endpoint: &mut Endpoint) -> Result<(), DraftError> {
        let interval = self.interval_seconds.unwrap_or(DEFAULT_INTERVAL_SECONDS);
        validation::validate_check_interval(interval)?;

        let cert_interval = self.cert_check_interval_seconds.unwrap_or(DEFAULT_CERT_INTERVAL_SECONDS);
        if self.cert_check_enabled {
            validation::validate_cert_interval(cert_interval)?;
        }

        endpoint.interval_seconds = interval;
        endpoint.retry_threshold = self.retry_threshold.unwrap_or(DEFAULT_RETRY_THRESHOLD).max(1);
        endpoint.invert_result = self.invert_result;
        if let Some(paused) = self.paused {
            endpoint.paused = paused;
        }
        endpoint.cert_check = CertCheckSettings {
            enabled: self.cert_check_enabled,
            interval_seconds: cert_interval,
            expiry_threshold_days: self.cert_expiry_threshold_days.unwrap_or(DEFAULT_CERT_THRESHOLD_DAYS),
        };
        Ok(())
    }

    fn probe_config(&self) -> Result<ProbeConfig, DraftError> {
        match self.kind.trim().to_ascii_lowercase().as_str() {
            "http" | "https" | "keyword" => self.http_probe().map(ProbeConfig::Http),
            "ping" | "icmp" => {
                let host = self.target.trim().to_string();
                validation::validate_host(&host)?;
                Ok(ProbeConfig::Ping(PingProbe { host }))
            }
            "tcp" | "port" => {
                let host = self.target.trim().to_string();
                validation::validate_host(&host)?;
                let port = self.port.ok_or(DraftError::MissingField { kind: "tcp", field: "port" })?;
                validation::validate_port(port)?;
                Ok(ProbeConfig::Tcp(TcpProbe { host, port }))
            }
            "broker-producer" => self.broker_probe("broker-producer").map(ProbeConfig::BrokerProducer),
            "broker-consumer" => self.broker_probe("broker-consumer").map(ProbeConfig::BrokerConsumer),
            other => Err(DraftError::UnknownKind(other.to_string())),
        }
    }

    fn http_probe(&self) -> Result<HttpProbe, DraftError> {
        let url = validation::validate_http_target(&self.target)?;

        let method = self.method.as_deref().unwrap_or("GET").trim().to_ascii_uppercase();
        reqwest::Method::from_bytes(method.as_bytes())
            .map_err(|_| anyhow::anyhow!("Invalid HTTP method: {}", method))?;

        let client_tls = match (&self.tls_cert, &self.tls_key) {
            (Some(cert), Some(key)) if !cert.trim().is_empty() && !key.trim().is_empty() => Some(ClientTls {
                cert_pem: cert.clone(),
                key_pem: key.clone(),
                ca_pem: self.tls_ca.clone().filter(|ca| !ca.trim().is_empty()),
            }),
            (Some(_), None) => return Err(DraftError::MissingField { kind: "http", field: "tls_key" }),
            (None, Some(_)) => return Err(DraftError::MissingField { kind: "http", field: "tls_cert" }),
            _ => None,
        };

        Ok(HttpProbe {
            url,
            method,
            headers: parse_headers(self.headers.as_deref()),
            body: self.body.clone().filter(|body| !body.is_empty()),
            accepted_statuses: parse_accepted_statuses(self.accepted_status_codes.as_deref()),
            keyword: self.keyword.clone().filter(|keyword| !keyword.is_empty()),
            client_tls,
            ignore_tls: self.ignore_tls,
            max_redirects: self.max_redirects.unwrap_or(DEFAULT_MAX_REDIRECTS),
        })
    }

    fn broker_probe(&self, kind: &'static str) -> Result<BrokerProbe, DraftError> {
        let brokers: Vec<String> = self
            .target
            .split(',')
            .map(str::trim)
            .filter(|broker| !broker.is_empty())
            .map(str::to_string)
            .collect();
        if brokers.is_empty() {
            return Err(DraftError::MissingField { kind, field: "target" });
        }
        for broker in &brokers {
            validation::validate_broker_address(broker)?;
        }

        let topic = self
            .broker_topic
            .clone()
            .filter(|topic| !topic.trim().is_empty())
            .ok_or(DraftError::MissingField { kind, field: "broker_topic" })?;

        let options: BrokerOptions = parse_json_or_default("broker_config", self.broker_config.as_deref());

        Ok(BrokerProbe {
            brokers,
            topic,
            partition: options.partition,
            message: self.broker_message.clone().unwrap_or_default(),
            from_beginning: options.from_beginning,
        })
    }
}

/// Parse a JSON object of headers, logging and ignoring malformed input
pub fn parse_headers(raw: Option<&str>) -> BTreeMap<String, String> {
    let raw_map: BTreeMap<String, serde_json::Value> = parse_json_or_default("headers", raw);
    raw_map
        .into_iter()
        .map(|(name, value)| {
            let value = match value {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            (name, value)
        })
        .collect()
}

/// Parse a JSON array of accepted status codes / ranges
///
/// Malformed JSON and unparseable entries are logged and dropped; an empty
/// result means "any 2xx".
pub fn parse_accepted_statuses(raw: Option<&str>) -> Vec<StatusRange> {
    let entries: Vec<serde_json::Value> = parse_json_or_default("accepted_status_codes", raw);
    entries
        .into_iter()
        .filter_map(|entry| {
            let text = match entry {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            let range = StatusRange::parse(&text);
            if range.is_none() {
                warn!("Ignoring invalid accepted status code entry: {}", text);
            }
            range
        })
        .collect()
}

fn parse_json_or_default<T: serde::de::DeserializeOwned + Default>(field: &str, raw: Option<&str>) -> T {
    match raw.map(str::trim) {
        None | Some("") => T::default(),
        Some(raw) => serde_json::from_str(raw).unwrap_or_else(|e| {
            warn!("Malformed JSON in {} field, treating as empty: {}", field, e);
            T::default()
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProbeKind;

    fn http_draft() -> EndpointDraft {
        EndpointDraft {
            name: "api".into(),
            kind: "http".into(),
            target: "https://example.com/health".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_malformed_headers_are_treated_as_empty() {
        assert!(parse_headers(Some("{not json")).is_empty());
        assert!(parse_headers(None).is_empty());

        let headers = parse_headers(Some(r#"{"Authorization": "Bearer x", "X-Retry": 3}"#));
        assert_eq!(headers.get("Authorization").map(String::as_str), Some("Bearer x"));
        assert_eq!(headers.get("X-Retry").map(String::as_str), Some("3"));
    }

    #[test]
    fn test_accepted_statuses_parse_ranges_and_skip_garbage() {
        let ranges = parse_accepted_statuses(Some(r#"["200-299", 301, "nope"]"#));
        assert_eq!(ranges, vec![StatusRange { start: 200, end: 299 }, StatusRange::single(301)]);
        assert!(parse_accepted_statuses(Some("[broken")).is_empty());
    }

    #[test]
    fn test_http_draft_with_bad_json_still_builds() {
        let mut draft = http_draft();
        draft.headers = Some("oops".into());
        draft.accepted_status_codes = Some("{".into());

        let endpoint = draft.into_endpoint().unwrap();
        match endpoint.probe {
            ProbeConfig::Http(http) => {
                assert!(http.headers.is_empty());
                assert!(http.accepted_statuses.is_empty());
                assert_eq!(http.method, "GET");
            }
            other => panic!("unexpected probe {other:?}"),
        }
    }

    #[test]
    fn test_tcp_draft_requires_port() {
        let draft = EndpointDraft {
            name: "db".into(),
            kind: "tcp".into(),
            target: "db.internal".into(),
            ..Default::default()
        };
        assert!(matches!(draft.into_endpoint(), Err(DraftError::MissingField { field: "port", .. })));
    }

    #[test]
    fn test_broker_draft_reads_options() {
        let draft = EndpointDraft {
            name: "events".into(),
            kind: "broker-consumer".into(),
            target: "kafka-1:9092, kafka-2:9092".into(),
            broker_topic: Some("health".into()),
            broker_config: Some(r#"{"partition": 2, "from_beginning": true}"#.into()),
            ..Default::default()
        };
        let endpoint = draft.into_endpoint().unwrap();
        assert_eq!(endpoint.kind(), ProbeKind::BrokerConsumer);
        match endpoint.probe {
            ProbeConfig::BrokerConsumer(broker) => {
                assert_eq!(broker.brokers, vec!["kafka-1:9092", "kafka-2:9092"]);
                assert_eq!(broker.partition, 2);
                assert!(broker.from_beginning);
            }
            other => panic!("unexpected probe {other:?}"),
        }
    }

    #[test]
    fn test_apply_to_keeps_identity_and_state() {
        let original = http_draft().into_endpoint().unwrap();
        let mut edited = http_draft();
        edited.interval_seconds = Some(120);
        edited.paused = Some(true);

        let updated = edited.apply_to(&original).unwrap();
        assert_eq!(updated.id, original.id);
        assert_eq!(updated.state, original.state);
        assert_eq!(updated.interval_seconds, 120);
        assert!(updated.paused);
    }

    #[test]
    fn test_unset_pause_keeps_current_value() {
        let mut paused = http_draft().into_endpoint().unwrap();
        assert!(!paused.paused);
        paused.paused = true;

        let updated = http_draft().apply_to(&paused).unwrap();
        assert!(updated.paused);

        let mut resume = http_draft();
        resume.paused = Some(false);
        assert!(!resume.apply_to(&paused).unwrap().paused);
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let mut draft = http_draft();
        draft.kind = "smtp".into();
        assert!(matches!(draft.into_endpoint(), Err(DraftError::UnknownKind(_))));
    }
}
