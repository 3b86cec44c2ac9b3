//! Endpoint target validation applied at the configuration boundary.
//!
//! Unlike public monitors, a self-hosted engine is expected to reach private
//! and loopback addresses, so only well-formedness is enforced here.

use anyhow::{Result, anyhow};
use url::Url;

/// Validates an HTTP(S) target and returns the parsed URL
pub fn validate_http_target(target: &str) -> Result<Url> {
    let url = Url::parse(target.trim()).map_err(|e| anyhow!("Invalid URL: {}", e))?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(anyhow!("Invalid scheme for HTTP monitor: {}", other)),
    }

    if url.host_str().is_none_or(str::is_empty) {
        return Err(anyhow!("URL has no host: {}", target));
    }

    if let Some(port) = url.port() {
        validate_port(port)?;
    }

    Ok(url)
}

/// Validate a bare hostname or IP address used by ping and TCP monitors
pub fn validate_host(host: &str) -> Result<()> {
    if host.is_empty() {
        return Err(anyhow!("Host must not be empty"));
    }

    // Hosts are passed to the system ping binary as an argument
    if host.starts_with('-') {
        return Err(anyhow!("Host must not start with '-': {}", host));
    }

    let valid = host
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | ':' | '_' | '[' | ']'));
    if !valid {
        return Err(anyhow!("Host contains invalid characters: {}", host));
    }

    Ok(())
}

/// Validate port is in valid range
pub fn validate_port(port: u16) -> Result<()> {
    if port == 0 {
        return Err(anyhow!("Port 0 is not valid"));
    }
    Ok(())
}

/// Validate a broker list entry (`host:port`)
pub fn validate_broker_address(address: &str) -> Result<()> {
    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("Broker address must be in format host:port: {}", address))?;

    validate_host(host)?;
    let port: u16 = port.parse().map_err(|_| anyhow!("Invalid broker port: {}", address))?;
    validate_port(port)
}

/// Validate heartbeat interval
pub fn validate_check_interval(interval_seconds: u64) -> Result<()> {
    const MIN_INTERVAL: u64 = 10; // 10 seconds
    const MAX_INTERVAL: u64 = 86400; // 24 hours

    if interval_seconds < MIN_INTERVAL {
        return Err(anyhow!(
            "Check interval too short: {} seconds (minimum: {})",
            interval_seconds,
            MIN_INTERVAL
        ));
    }

    if interval_seconds > MAX_INTERVAL {
        return Err(anyhow!(
            "Check interval too long: {} seconds (maximum: {})",
            interval_seconds,
            MAX_INTERVAL
        ));
    }

    Ok(())
}

/// Validate certificate/domain check interval
pub fn validate_cert_interval(interval_seconds: u64) -> Result<()> {
    const MIN_INTERVAL: u64 = 60;
    const MAX_INTERVAL: u64 = 30 * 86400;

    if !(MIN_INTERVAL..=MAX_INTERVAL).contains(&interval_seconds) {
        return Err(anyhow!(
            "Certificate check interval must be between {} and {} seconds, got {}",
            MIN_INTERVAL,
            MAX_INTERVAL,
            interval_seconds
        ));
    }

    Ok(())
}
