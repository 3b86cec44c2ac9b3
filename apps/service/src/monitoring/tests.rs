/// TLS integration tests against local servers
///
/// These tests verify:
/// - Mutual TLS: the HTTP probe presents its client certificate
/// - Certificate snapshots are refreshed, alerted on and cleared on failure
use chrono::{Datelike, Utc};
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
};
use rustls::RootCertStore;
use rustls::crypto::ring;
use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::server::{ServerConfig, WebPkiClientVerifier};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use url::Url;

use crate::database::{Database, MemoryDatabase};
use crate::models::{ClientTls, Endpoint, HttpProbe, ProbeConfig};
use crate::monitoring::certificate::CertificateInspector;
use crate::monitoring::checker::{Checker, HttpChecker};
use crate::monitoring::types::FailureReason;
use crate::monitoring::{ExpiryInspector, MonitoringExecutor, MonitoringScheduler};
use crate::notify::ChannelNotifier;

struct Issued {
    cert: Certificate,
    key: KeyPair,
}

fn certificate_authority() -> Issued {
    let key = KeyPair::generate().unwrap();
    let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.distinguished_name.push(DnType::CommonName, "Monitor Test CA");
    let cert = params.self_signed(&key).unwrap();
    Issued { cert, key }
}

fn issue(ca: &Issued, names: &[&str], client: bool, expires_in_days: Option<i64>) -> Issued {
    let key = KeyPair::generate().unwrap();
    let mut params = CertificateParams::new(names.iter().map(|n| n.to_string()).collect::<Vec<_>>()).unwrap();
    params.distinguished_name.push(DnType::CommonName, names[0]);
    if client {
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
    }
    if let Some(days) = expires_in_days {
        let yesterday = Utc::now() - chrono::Duration::days(1);
        let expiry = Utc::now() + chrono::Duration::days(days);
        params.not_before = rcgen::date_time_ymd(yesterday.year(), yesterday.month() as u8, yesterday.day() as u8);
        params.not_after = rcgen::date_time_ymd(expiry.year(), expiry.month() as u8, expiry.day() as u8);
    }
    let cert = params.signed_by(&key, &ca.cert, &ca.key).unwrap();
    Issued { cert, key }
}

fn private_key(issued: &Issued) -> PrivateKeyDer<'static> {
    PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(issued.key.serialize_der()))
}

fn server_config(server: &Issued, client_ca: Option<&Issued>) -> ServerConfig {
    let provider = Arc::new(ring::default_provider());
    let builder = ServerConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .unwrap();

    let builder = match client_ca {
        Some(ca) => {
            let mut roots = RootCertStore::empty();
            roots.add(ca.cert.der().clone()).unwrap();
            let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider)
                .build()
                .unwrap();
            builder.with_client_cert_verifier(verifier)
        }
        None => builder.with_no_client_auth(),
    };

    builder.with_single_cert(vec![server.cert.der().clone()], private_key(server)).unwrap()
}

/// Serve a canned `200 ok` over TLS on an ephemeral port
async fn tls_server(config: ServerConfig) -> (u16, JoinHandle<()>) {
    let acceptor = TlsAcceptor::from(Arc::new(config));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else { break };
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                let Ok(mut tls) = acceptor.accept(socket).await else { return };
                let mut buf = vec![0u8; 4096];
                let _ = tls.read(&mut buf).await;
                let _ = tls
                    .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok")
                    .await;
                let _ = tls.shutdown().await;
            });
        }
    });

    (port, handle)
}

fn https_endpoint(port: u16, probe: impl FnOnce(&mut HttpProbe)) -> Endpoint {
    let url = Url::parse(&format!("https://127.0.0.1:{}/", port)).unwrap();
    let mut http = HttpProbe::get(url);
    probe(&mut http);
    Endpoint::new("secure", ProbeConfig::Http(http))
}

#[tokio::test]
async fn test_mutual_tls_presents_client_certificate() {
    let ca = certificate_authority();
    let server = issue(&ca, &["localhost", "127.0.0.1"], false, None);
    let client = issue(&ca, &["monitor-client"], true, None);
    let (port, handle) = tls_server(server_config(&server, Some(&ca))).await;

    let checker = HttpChecker::new(5);

    let with_identity = https_endpoint(port, |http| {
        http.client_tls = Some(ClientTls {
            cert_pem: client.cert.pem(),
            key_pem: client.key.serialize_pem(),
            ca_pem: Some(ca.cert.pem()),
        });
    });
    assert!(checker.check(&with_identity).await.is_ok());

    // Server verification off, but no identity to present
    let anonymous = https_endpoint(port, |http| http.ignore_tls = true);
    let reason = checker.check(&anonymous).await.unwrap_err();
    assert!(matches!(reason, FailureReason::Tls(_)), "unexpected reason: {:?}", reason);

    // Verification on against the public roots: our private CA is unknown
    let untrusted = https_endpoint(port, |_| {});
    assert!(matches!(checker.check(&untrusted).await, Err(FailureReason::Tls(_))));

    handle.abort();
}

#[tokio::test]
async fn test_certificate_snapshot_refresh_alert_and_clear() {
    let ca = certificate_authority();
    let server = issue(&ca, &["localhost", "127.0.0.1"], false, Some(5));
    let (port, handle) = tls_server(server_config(&server, None)).await;

    let database = Arc::new(MemoryDatabase::new());
    let (notifier, mut notifications) = ChannelNotifier::new();
    let executor = Arc::new(MonitoringExecutor::new(&crate::config::EngineConfig::default()));
    let inspector = Arc::new(ExpiryInspector::new(CertificateInspector::new(2).unwrap(), None));
    let scheduler =
        MonitoringScheduler::new(database.clone(), executor, inspector, Arc::new(notifier), Duration::ZERO);

    let mut endpoint = https_endpoint(port, |http| http.ignore_tls = true);
    endpoint.cert_check.enabled = true;
    endpoint.cert_check.expiry_threshold_days = 14;
    database.save_endpoint(&endpoint).await.unwrap();

    let refreshed = scheduler.check_expiry_now(endpoint.id).await.unwrap().unwrap();
    let certificate = refreshed.snapshot.certificate.expect("certificate cached");
    let days = certificate.expires_in().unwrap();
    assert!((4..=6).contains(&days), "unexpected days remaining: {}", days);
    assert_eq!(certificate.chain.len(), 1);
    assert!(certificate.leaf().unwrap().subject.contains("localhost"));

    let alert = notifications.try_recv().unwrap();
    assert!(alert.message.contains("certificate"));

    // Same day count again: no repeated alert
    scheduler.check_expiry_now(endpoint.id).await.unwrap();
    assert!(notifications.try_recv().is_err());

    // Server gone: the cached certificate is dropped rather than kept stale
    handle.abort();
    let _ = handle.await;
    let cleared = scheduler.check_expiry_now(endpoint.id).await.unwrap().unwrap();
    assert!(cleared.snapshot.certificate.is_none());
    assert!(cleared.snapshot.is_empty());
}
