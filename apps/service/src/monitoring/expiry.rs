//! Certificate and domain expiry side-checks.
//!
//! Any failure clears the corresponding part of the cached snapshot: showing
//! nothing is preferred over showing the last good value as if it were current.

use tracing::{debug, warn};

use super::certificate::CertificateInspector;
use super::domain::DomainLookup;
use crate::models::{Endpoint, ExpirySnapshot};

/// New snapshot for an endpoint plus any threshold alerts to raise
#[derive(Debug, Clone, PartialEq)]
pub struct ExpiryUpdate {
    pub snapshot: ExpirySnapshot,
    pub alerts: Vec<String>,
}

pub struct ExpiryInspector {
    certificates: CertificateInspector,
    domains: Option<DomainLookup>,
}

impl ExpiryInspector {
    /// `domains` is optional; without it only certificates are inspected
    pub fn new(certificates: CertificateInspector, domains: Option<DomainLookup>) -> Self {
        Self { certificates, domains }
    }

    /// Inspect the endpoint; `None` when it does not qualify for expiry checks
    pub async fn refresh(&self, endpoint: &Endpoint) -> Option<ExpiryUpdate> {
        let (host, port) = endpoint.cert_target()?;

        let certificate = match self.certificates.inspect(&host, port).await {
            Ok(info) => Some(info),
            Err(e) => {
                warn!(endpoint = %endpoint.id, "Certificate inspection failed, clearing cached data: {:#}", e);
                None
            }
        };

        let domain = match &self.domains {
            Some(lookup) => match lookup.lookup(&host).await {
                Ok(info) => info,
                Err(e) => {
                    debug!(endpoint = %endpoint.id, "Domain lookup failed, clearing cached data: {:#}", e);
                    None
                }
            },
            None => None,
        };

        let snapshot = ExpirySnapshot { certificate, domain };
        let alerts = threshold_alerts(endpoint, &snapshot);
        Some(ExpiryUpdate { snapshot, alerts })
    }
}

/// Alerts for values at or below the endpoint's threshold
///
/// A day count already reported in the cached snapshot is not re-alerted.
pub fn threshold_alerts(endpoint: &Endpoint, next: &ExpirySnapshot) -> Vec<String> {
    let threshold = endpoint.cert_check.expiry_threshold_days;
    let previous = &endpoint.snapshot;
    let mut alerts = Vec::new();

    if let Some(days) = next.certificate.as_ref().and_then(|cert| cert.expires_in()) {
        let already_reported = previous.certificate.as_ref().and_then(|cert| cert.expires_in()) == Some(days);
        if days <= threshold && !already_reported {
            let subject = next
                .certificate
                .as_ref()
                .and_then(|cert| cert.leaf())
                .map(|leaf| leaf.subject.clone())
                .unwrap_or_default();
            alerts.push(if days < 0 {
                format!("[{}] TLS certificate ({}) expired {} days ago", endpoint.name, subject, -days)
            } else {
                format!("[{}] TLS certificate ({}) expires in {} days", endpoint.name, subject, days)
            });
        }
    }

    if let Some(domain) = &next.domain {
        if let Some(days) = domain.days_remaining {
            let already_reported = previous.domain.as_ref().and_then(|d| d.days_remaining) == Some(days);
            if days <= threshold && !already_reported {
                alerts.push(format!(
                    "[{}] Domain {} registration expires in {} days",
                    endpoint.name, domain.domain, days
                ));
            }
        }
    }

    alerts
}
