//! Domain registration lookups over RDAP.

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::net::IpAddr;
use std::time::Duration;

use crate::models::DomainInfo;

#[derive(Debug, Deserialize)]
struct RdapDomain {
    #[serde(default)]
    events: Vec<RdapEvent>,
}

#[derive(Debug, Deserialize)]
struct RdapEvent {
    #[serde(rename = "eventAction")]
    action: String,
    #[serde(rename = "eventDate")]
    date: Option<DateTime<Utc>>,
}

/// RDAP client resolving registration metadata for a host's domain
pub struct DomainLookup {
    client: reqwest::Client,
    base_url: String,
}

impl DomainLookup {
    pub fn new(base_url: impl Into<String>, timeout_seconds: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()?;

        Ok(Self { client, base_url: base_url.into().trim_end_matches('/').to_string() })
    }

    /// Look up the registrable domain of `host`
    ///
    /// Returns `Ok(None)` for hosts without one (IP addresses, single labels).
    pub async fn lookup(&self, host: &str) -> Result<Option<DomainInfo>> {
        let Some(domain) = registrable_domain(host) else {
            return Ok(None);
        };

        let url = format!("{}/domain/{}", self.base_url, domain);
        let response = self
            .client
            .get(&url)
            .header("Accept", "application/rdap+json")
            .send()
            .await
            .with_context(|| format!("RDAP request for {} failed", domain))?;

        if !response.status().is_success() {
            return Err(anyhow!("RDAP lookup for {} returned {}", domain, response.status()));
        }

        let body: RdapDomain = response
            .json()
            .await
            .with_context(|| format!("Malformed RDAP response for {}", domain))?;

        Ok(Some(domain_info(domain, body, Utc::now())))
    }
}

fn domain_info(domain: String, body: RdapDomain, now: DateTime<Utc>) -> DomainInfo {
    let event = |action: &str| {
        body.events
            .iter()
            .find(|event| event.action.eq_ignore_ascii_case(action))
            .and_then(|event| event.date)
    };

    let expires_at = event("expiration");
    DomainInfo {
        domain,
        registered_at: event("registration"),
        updated_at: event("last changed"),
        expires_at,
        days_remaining: expires_at.map(|expiry| (expiry - now).num_days()),
        checked_at: now,
    }
}

/// Naive registrable domain: the last two labels of a DNS name
pub fn registrable_domain(host: &str) -> Option<String> {
    let host = host.trim().trim_end_matches('.').to_ascii_lowercase();
    if host.parse::<IpAddr>().is_ok() || host.starts_with('[') {
        return None;
    }

    let labels: Vec<&str> = host.split('.').filter(|label| !label.is_empty()).collect();
    if labels.len() < 2 {
        return None;
    }
    Some(labels[labels.len() - 2..].join("."))
}
