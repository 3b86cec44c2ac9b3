//! TLS certificate inspection.
//!
//! Opens a raw TLS session with verification disabled so that expired or
//! self-signed chains can still be read, then parses the presented chain.

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, ring};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use x509_parser::prelude::{FromDer, X509Certificate};

use crate::models::{CertificateDetails, CertificateInfo};

/// Accepts any server certificate; signatures are still checked
#[derive(Debug)]
struct AcceptAnyServerCert(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

/// Reads the certificate chain an endpoint presents
pub struct CertificateInspector {
    connector: TlsConnector,
    timeout_duration: Duration,
}

impl CertificateInspector {
    pub fn new(timeout_seconds: u64) -> Result<Self> {
        let provider = Arc::new(ring::default_provider());
        let config = ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert(provider)))
            .with_no_client_auth();

        Ok(Self {
            connector: TlsConnector::from(Arc::new(config)),
            timeout_duration: Duration::from_secs(timeout_seconds),
        })
    }

    /// Connect to `host:port` and return the parsed chain, leaf first
    pub async fn inspect(&self, host: &str, port: u16) -> Result<CertificateInfo> {
        timeout(self.timeout_duration, self.fetch_chain(host, port))
            .await
            .map_err(|_| anyhow!("TLS handshake with {}:{} timed out", host, port))?
    }

    async fn fetch_chain(&self, host: &str, port: u16) -> Result<CertificateInfo> {
        let server_name = ServerName::try_from(host.to_string())
            .with_context(|| format!("Invalid TLS server name: {}", host))?;

        let stream = TcpStream::connect((host, port))
            .await
            .with_context(|| format!("Failed to connect to {}:{}", host, port))?;
        let tls = self
            .connector
            .connect(server_name, stream)
            .await
            .with_context(|| format!("TLS handshake with {}:{} failed", host, port))?;

        let (_, session) = tls.get_ref();
        let certificates = session
            .peer_certificates()
            .filter(|chain| !chain.is_empty())
            .ok_or_else(|| anyhow!("{}:{} presented no certificate", host, port))?;

        let now = Utc::now();
        Ok(CertificateInfo { chain: parse_chain(certificates, now)?, checked_at: now })
    }
}

/// Parse DER certificates into display details
pub fn parse_chain(certificates: &[CertificateDer<'_>], now: DateTime<Utc>) -> Result<Vec<CertificateDetails>> {
    certificates
        .iter()
        .map(|der| {
            let (_, cert) = X509Certificate::from_der(der.as_ref())
                .map_err(|e| anyhow!("Malformed certificate: {}", e))?;
            let validity = cert.validity();
            let not_before = DateTime::from_timestamp(validity.not_before.timestamp(), 0)
                .ok_or_else(|| anyhow!("Certificate not-before out of range"))?;
            let not_after = DateTime::from_timestamp(validity.not_after.timestamp(), 0)
                .ok_or_else(|| anyhow!("Certificate not-after out of range"))?;

            Ok(CertificateDetails {
                subject: cert.subject().to_string(),
                issuer: cert.issuer().to_string(),
                not_before,
                not_after,
                days_remaining: (not_after - now).num_days(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_generated_certificate() {
        let mut params = rcgen::CertificateParams::new(vec!["example.test".to_string()]).unwrap();
        params.not_before = rcgen::date_time_ymd(2024, 1, 1);
        params.not_after = rcgen::date_time_ymd(2030, 1, 1);
        let key = rcgen::KeyPair::generate().unwrap();
        let cert = params.self_signed(&key).unwrap();

        let now = Utc.with_ymd_and_hms(2029, 12, 22, 0, 0, 0).unwrap();
        let chain = parse_chain(&[cert.der().clone()], now).unwrap();

        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].days_remaining, 10);
        assert_eq!(chain[0].not_after, Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_malformed_certificate_is_an_error() {
        let garbage = CertificateDer::from(vec![0x30, 0x03, 0x01, 0x02]);
        assert!(parse_chain(&[garbage], Utc::now()).is_err());
    }

    #[tokio::test]
    async fn test_inspect_closed_port_fails() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let inspector = CertificateInspector::new(2).unwrap();
        assert!(inspector.inspect("127.0.0.1", port).await.is_err());
    }
}
