use async_trait::async_trait;
use regex::Regex;
use std::error::Error as StdError;
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;
use uuid::Uuid;

use super::types::FailureReason;
use crate::models::{Endpoint, HttpProbe, ProbeConfig};

/// Checker trait for different types of monitoring checks
///
/// Expected network failures are never errors of the checker itself: they come
/// back as a categorized [`FailureReason`].
#[async_trait]
pub trait Checker: Send + Sync {
    /// Perform the check and return the response time in milliseconds
    async fn check(&self, endpoint: &Endpoint) -> Result<u64, FailureReason>;

    /// Drop any connection held on behalf of an endpoint
    async fn release(&self, _endpoint_id: Uuid) {}
}

fn misrouted(endpoint: &Endpoint, checker: &str) -> FailureReason {
    FailureReason::Other(format!("{} endpoint routed to {} checker", endpoint.kind(), checker))
}

/// HTTP/HTTPS checker
pub struct HttpChecker {
    timeout: Duration,
}

impl HttpChecker {
    pub fn new(timeout_seconds: u64) -> Self {
        Self { timeout: Duration::from_secs(timeout_seconds) }
    }

    /// Build a client for one probe
    ///
    /// Clients differ per endpoint (client identity, CA, redirect limit), so
    /// they are built per attempt instead of shared.
    fn client(&self, probe: &HttpProbe) -> Result<reqwest::Client, FailureReason> {
        let mut builder = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(self.timeout)
            .redirect(reqwest::redirect::Policy::limited(probe.max_redirects))
            .user_agent(concat!("uppe-monitor/", env!("CARGO_PKG_VERSION")));

        if probe.ignore_tls {
            builder = builder.danger_accept_invalid_certs(true);
        }

        if let Some(tls) = &probe.client_tls {
            let mut pem = tls.cert_pem.trim_end().as_bytes().to_vec();
            pem.push(b'\n');
            pem.extend_from_slice(tls.key_pem.as_bytes());
            let identity = reqwest::Identity::from_pem(&pem)
                .map_err(|e| FailureReason::Tls(format!("invalid client certificate: {}", e)))?;
            builder = builder.identity(identity);

            match &tls.ca_pem {
                Some(ca) => {
                    let ca = reqwest::Certificate::from_pem(ca.as_bytes())
                        .map_err(|e| FailureReason::Tls(format!("invalid CA certificate: {}", e)))?;
                    builder = builder.add_root_certificate(ca);
                }
                None => builder = builder.danger_accept_invalid_certs(true),
            }
        }

        builder
            .build()
            .map_err(|e| FailureReason::Tls(format!("failed to build TLS client: {}", e)))
    }
}

#[async_trait]
impl Checker for HttpChecker {
    async fn check(&self, endpoint: &Endpoint) -> Result<u64, FailureReason> {
        let ProbeConfig::Http(probe) = &endpoint.probe else {
            return Err(misrouted(endpoint, "http"));
        };

        let client = self.client(probe)?;
        let method = reqwest::Method::from_bytes(probe.method.as_bytes())
            .map_err(|_| FailureReason::Other(format!("invalid HTTP method {}", probe.method)))?;

        let mut request = client.request(method, probe.url.clone());
        for (name, value) in &probe.headers {
            request = request.header(name, value);
        }
        if let Some(body) = &probe.body {
            request = request.body(body.clone());
        }

        let start = Instant::now();
        let response = request
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&e, self.timeout.as_secs()))?;

        let status_code = response.status().as_u16();
        if !probe.accepts(status_code) {
            return Err(FailureReason::HttpStatus(status_code));
        }

        if let Some(keyword) = &probe.keyword {
            let body = response
                .text()
                .await
                .map_err(|e| classify_reqwest_error(&e, self.timeout.as_secs()))?;
            if !body.contains(keyword.as_str()) {
                return Err(FailureReason::KeywordMissing(keyword.clone()));
            }
        }

        Ok(start.elapsed().as_millis() as u64)
    }
}

/// Map a reqwest error onto a reason category by walking its source chain
pub fn classify_reqwest_error(error: &reqwest::Error, timeout_seconds: u64) -> FailureReason {
    if error.is_timeout() {
        return FailureReason::Timeout(timeout_seconds);
    }

    let mut source: Option<&(dyn StdError + 'static)> = error.source();
    let mut chain = error.to_string();
    while let Some(cause) = source {
        if let Some(tls) = cause.downcast_ref::<rustls::Error>() {
            return FailureReason::Tls(tls.to_string());
        }
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            let reason = FailureReason::from_io(io, timeout_seconds);
            if !matches!(reason, FailureReason::Other(_)) {
                return reason;
            }
        }
        chain.push_str(": ");
        chain.push_str(&cause.to_string());
        source = cause.source();
    }

    let lower = chain.to_lowercase();
    if lower.contains("dns error") || lower.contains("failed to lookup") {
        FailureReason::Dns(chain)
    } else if lower.contains("certificate") || lower.contains("tls") || lower.contains("handshake") {
        FailureReason::Tls(chain)
    } else if lower.contains("connection refused") {
        FailureReason::ConnectionRefused
    } else if lower.contains("connection reset") || lower.contains("connection closed") {
        FailureReason::ConnectionReset
    } else {
        FailureReason::Other(chain)
    }
}

/// TCP port checker
pub struct TcpChecker {
    timeout_duration: Duration,
}

impl TcpChecker {
    pub fn new(timeout_seconds: u64) -> Self {
        Self { timeout_duration: Duration::from_secs(timeout_seconds) }
    }
}

#[async_trait]
impl Checker for TcpChecker {
    async fn check(&self, endpoint: &Endpoint) -> Result<u64, FailureReason> {
        let ProbeConfig::Tcp(probe) = &endpoint.probe else {
            return Err(misrouted(endpoint, "tcp"));
        };
        let timeout_seconds = self.timeout_duration.as_secs();

        let start = Instant::now();
        let connect = tokio::net::TcpStream::connect((probe.host.as_str(), probe.port));

        timeout(self.timeout_duration, connect)
            .await
            .map_err(|_| FailureReason::Timeout(timeout_seconds))?
            .map_err(|e| FailureReason::from_io(&e, timeout_seconds))?;

        Ok(start.elapsed().as_millis() as u64)
    }
}

/// ICMP ping checker backed by the system `ping` binary
///
/// Raw ICMP sockets need elevated privileges; the setuid `ping` binary does not.
pub struct IcmpChecker {
    timeout_duration: Duration,
}

impl IcmpChecker {
    pub fn new(timeout_seconds: u64) -> Self {
        Self { timeout_duration: Duration::from_secs(timeout_seconds) }
    }
}

#[async_trait]
impl Checker for IcmpChecker {
    async fn check(&self, endpoint: &Endpoint) -> Result<u64, FailureReason> {
        let ProbeConfig::Ping(probe) = &endpoint.probe else {
            return Err(misrouted(endpoint, "ping"));
        };
        let timeout_seconds = self.timeout_duration.as_secs().max(1);

        let mut command = Command::new("ping");
        command
            .args(ping_args(&probe.host, timeout_seconds, cfg!(target_os = "macos")))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // The binary's own deadline bounds the wait; this guards against a hung resolver
        let output = timeout(self.timeout_duration + Duration::from_secs(2), command.output())
            .await
            .map_err(|_| FailureReason::Timeout(timeout_seconds))?
            .map_err(|e| FailureReason::Ping(format!("failed to execute ping: {}", e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!("ping {} failed: {} {}", probe.host, stdout.trim(), stderr.trim());
            return Err(classify_ping_failure(&stdout, &stderr, timeout_seconds));
        }

        // Reachable even when the RTT cannot be parsed
        Ok(parse_ping_rtt(&stdout).map(|ms| ms.round() as u64).unwrap_or(0))
    }
}

/// Arguments for a single echo bounded by `timeout_seconds`
///
/// Linux `-W` is the reply wait in seconds. On macOS `-W` is in milliseconds,
/// so the overall `-t` deadline (seconds) is used there instead.
fn ping_args(host: &str, timeout_seconds: u64, macos: bool) -> Vec<String> {
    let wait_flag = if macos { "-t" } else { "-W" };
    vec!["-c".into(), "1".into(), wait_flag.into(), timeout_seconds.to_string(), host.into()]
}

fn classify_ping_failure(stdout: &str, stderr: &str, timeout_seconds: u64) -> FailureReason {
    let combined = format!("{} {}", stdout, stderr).to_lowercase();
    if combined.contains("unknown host")
        || combined.contains("name or service not known")
        || combined.contains("cannot resolve")
        || combined.contains("temporary failure in name resolution")
    {
        FailureReason::Dns(stderr.trim().to_string())
    } else if combined.contains("network is unreachable") {
        FailureReason::NetworkUnreachable
    } else if combined.contains("host unreachable") {
        FailureReason::HostUnreachable
    } else if combined.contains("100% packet loss") || combined.contains("100.0% packet loss") {
        FailureReason::Timeout(timeout_seconds)
    } else {
        let detail = if stderr.trim().is_empty() { stdout.trim() } else { stderr.trim() };
        FailureReason::Ping(detail.to_string())
    }
}

/// Parse the round-trip time in milliseconds from Linux or macOS ping output
pub fn parse_ping_rtt(output: &str) -> Option<f64> {
    // Per-packet response "time=X.XXX ms"
    static PER_PACKET: OnceLock<Regex> = OnceLock::new();
    let per_packet = PER_PACKET.get_or_init(|| {
        Regex::new(r"time[=<](?P<val>[0-9.]+)\s*ms").expect("static regex")
    });
    if let Some(ms) = per_packet
        .captures(output)
        .and_then(|caps| caps.name("val"))
        .and_then(|val| val.as_str().parse::<f64>().ok())
    {
        return Some(ms);
    }

    // Summary line "rtt min/avg/max/mdev = ..." or "round-trip min/avg/max/stddev = ..."
    static SUMMARY: OnceLock<Regex> = OnceLock::new();
    let summary = SUMMARY.get_or_init(|| {
        Regex::new(r"(?:rtt|round-trip)\s+min/avg/max/(?:mdev|stddev)\s*=\s*([0-9.]+)/([0-9.]+)/([0-9.]+)")
            .expect("static regex")
    });
    summary
        .captures(output)
        .and_then(|caps| caps.get(2))
        .and_then(|avg| avg.as_str().parse::<f64>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{StatusRange, TcpProbe};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use url::Url;

    /// Serve one canned HTTP response per connection
    async fn serve(status_line: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else { break };
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 4096];
                    let _ = socket.read(&mut buf).await;
                    let response = format!(
                        "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        status_line,
                        body.len(),
                        body
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        (format!("http://{}/", addr), handle)
    }

    fn http_endpoint(url: &str) -> (Endpoint, HttpProbe) {
        let probe = HttpProbe::get(Url::parse(url).unwrap());
        (Endpoint::new("web", ProbeConfig::Http(probe.clone())), probe)
    }

    fn with_probe(mut endpoint: Endpoint, probe: HttpProbe) -> Endpoint {
        endpoint.probe = ProbeConfig::Http(probe);
        endpoint
    }

    #[tokio::test]
    async fn test_http_check_accepts_2xx() {
        let (url, _server) = serve("200 OK", "all good").await;
        let (endpoint, _) = http_endpoint(&url);

        let checker = HttpChecker::new(5);
        assert!(checker.check(&endpoint).await.is_ok());
    }

    #[tokio::test]
    async fn test_http_check_rejects_status_outside_accepted_set() {
        let (url, _server) = serve("503 Service Unavailable", "").await;
        let (endpoint, _) = http_endpoint(&url);

        let checker = HttpChecker::new(5);
        assert_eq!(checker.check(&endpoint).await, Err(FailureReason::HttpStatus(503)));
    }

    #[tokio::test]
    async fn test_http_check_uses_configured_status_set() {
        let (url, _server) = serve("418 I'm a teapot", "").await;
        let (endpoint, mut probe) = http_endpoint(&url);
        probe.accepted_statuses = vec![StatusRange::single(418)];
        let endpoint = with_probe(endpoint, probe);

        let checker = HttpChecker::new(5);
        assert!(checker.check(&endpoint).await.is_ok());
    }

    #[tokio::test]
    async fn test_http_check_keyword() {
        let (url, _server) = serve("200 OK", "status: healthy").await;
        let (endpoint, mut probe) = http_endpoint(&url);
        let checker = HttpChecker::new(5);

        probe.keyword = Some("healthy".into());
        let found = with_probe(endpoint.clone(), probe.clone());
        assert!(checker.check(&found).await.is_ok());

        probe.keyword = Some("Healthy".into());
        let missing = with_probe(endpoint, probe);
        assert_eq!(
            checker.check(&missing).await,
            Err(FailureReason::KeywordMissing("Healthy".into()))
        );
    }

    #[tokio::test]
    async fn test_http_check_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (endpoint, _) = http_endpoint(&format!("http://{}/", addr));
        let checker = HttpChecker::new(5);
        assert_eq!(checker.check(&endpoint).await, Err(FailureReason::ConnectionRefused));
    }

    #[tokio::test]
    async fn test_tcp_check() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let endpoint = Endpoint::new(
            "tcp",
            ProbeConfig::Tcp(TcpProbe { host: "127.0.0.1".into(), port }),
        );

        let checker = TcpChecker::new(5);
        assert!(checker.check(&endpoint).await.is_ok());

        drop(listener);
        assert_eq!(checker.check(&endpoint).await, Err(FailureReason::ConnectionRefused));
    }

    #[tokio::test]
    async fn test_checker_rejects_other_kinds() {
        let endpoint = Endpoint::new(
            "tcp",
            ProbeConfig::Tcp(TcpProbe { host: "127.0.0.1".into(), port: 1 }),
        );
        let result = HttpChecker::new(1).check(&endpoint).await;
        assert!(matches!(result, Err(FailureReason::Other(_))));
    }

    #[test]
    fn test_parse_ping_output_linux() {
        let output = "64 bytes from 8.8.8.8: icmp_seq=1 ttl=117 time=12.345 ms";
        let latency = parse_ping_rtt(output).unwrap();
        assert!((latency - 12.345).abs() < 1e-9);
    }

    #[test]
    fn test_parse_ping_output_macos_summary() {
        let output = r#"PING google.com (142.250.69.174): 56 data bytes

--- google.com ping statistics ---
1 packets transmitted, 1 packets received, 0.0% packet loss
round-trip min/avg/max/stddev = 17.906/17.906/17.906/0.000 ms"#;
        let latency = parse_ping_rtt(output).unwrap();
        assert!((latency - 17.906).abs() < 1e-9);
    }

    #[test]
    fn test_ping_wait_flag_per_platform() {
        assert_eq!(ping_args("10.0.0.1", 10, false), ["-c", "1", "-W", "10", "10.0.0.1"]);
        assert_eq!(ping_args("10.0.0.1", 10, true), ["-c", "1", "-t", "10", "10.0.0.1"]);
    }

    #[test]
    fn test_parse_ping_output_unknown() {
        assert_eq!(parse_ping_rtt("1 packets transmitted, 1 received"), None);
    }

    #[test]
    fn test_classify_ping_failures() {
        assert!(matches!(
            classify_ping_failure("", "ping: nowhere.invalid: Name or service not known", 10),
            FailureReason::Dns(_)
        ));
        assert_eq!(
            classify_ping_failure("1 packets transmitted, 0 received, 100% packet loss", "", 10),
            FailureReason::Timeout(10)
        );
    }
}
