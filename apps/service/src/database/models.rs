//! Row mapping between libsql and the domain models.
//!
//! Timestamps are stored as unix milliseconds, structured values
//! (probe configuration, expiry snapshot) as JSON text.

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use libsql::Row;
use uuid::Uuid;

use crate::models::{CertCheckSettings, Endpoint, EndpointState, ExpirySnapshot, Observation};

pub const ENDPOINT_COLUMNS: &str = "id, name, probe, interval_seconds, retry_threshold, invert_result, paused, \
     cert_check_enabled, cert_check_interval_seconds, cert_expiry_threshold_days, \
     status, consecutive_failures, last_checked_at, snapshot, created_at, updated_at";

pub const OBSERVATION_COLUMNS: &str =
    "id, endpoint_id, timestamp_ms, status, response_time_ms, failure_reason";

pub fn to_millis(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

pub fn from_millis(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| anyhow!("Timestamp out of range: {}", millis))
}

pub fn endpoint_from_row(row: &Row) -> Result<Endpoint> {
    let id: String = row.get(0)?;
    let probe: String = row.get(2)?;
    let status: String = row.get(10)?;
    let last_checked_at: Option<i64> = row.get(12)?;
    let snapshot: Option<String> = row.get(13)?;

    Ok(Endpoint {
        id: Uuid::parse_str(&id)?,
        name: row.get(1)?,
        probe: serde_json::from_str(&probe).with_context(|| format!("Corrupt probe config for {}", id))?,
        interval_seconds: row.get::<i64>(3)? as u64,
        retry_threshold: row.get::<i64>(4)? as u32,
        invert_result: row.get::<i64>(5)? != 0,
        paused: row.get::<i64>(6)? != 0,
        cert_check: CertCheckSettings {
            enabled: row.get::<i64>(7)? != 0,
            interval_seconds: row.get::<i64>(8)? as u64,
            expiry_threshold_days: row.get(9)?,
        },
        state: EndpointState {
            status: status.parse()?,
            consecutive_failures: row.get::<i64>(11)? as u32,
            last_checked_at: last_checked_at.map(from_millis).transpose()?,
        },
        snapshot: match snapshot {
            Some(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!("Discarding unreadable expiry snapshot for {}: {}", id, e);
                ExpirySnapshot::default()
            }),
            None => ExpirySnapshot::default(),
        },
        created_at: from_millis(row.get(14)?)?,
        updated_at: from_millis(row.get(15)?)?,
    })
}

pub fn observation_from_row(row: &Row) -> Result<Observation> {
    let endpoint_id: String = row.get(1)?;
    let status: String = row.get(3)?;

    Ok(Observation {
        id: Some(row.get(0)?),
        endpoint_id: Uuid::parse_str(&endpoint_id)?,
        timestamp: from_millis(row.get(2)?)?,
        status: status.parse()?,
        response_time_ms: row.get::<i64>(4)? as u64,
        failure_reason: row.get(5)?,
    })
}

pub fn snapshot_to_json(snapshot: &ExpirySnapshot) -> Result<Option<String>> {
    if snapshot.is_empty() {
        Ok(None)
    } else {
        Ok(Some(serde_json::to_string(snapshot)?))
    }
}
