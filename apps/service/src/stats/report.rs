//! Read-side views consumed by dashboards: current stats, outage intervals,
//! bucketed response series and the heartbeat tail.

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::availability::{Availability, gap_aware_uptime};
use super::response::ResponseStats;
use crate::database::Database;
use crate::models::{Endpoint, Observation};
use crate::monitoring::types::MonitorStatus;

/// Every range is split into this many buckets
pub const TARGET_BUCKETS: u32 = 90;

/// Reporting window; owns both the period length and the bucket width
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Range {
    ThreeHours,
    SixHours,
    Day,
    Week,
}

impl Range {
    pub fn duration(self) -> Duration {
        let hours = match self {
            Range::ThreeHours => 3,
            Range::SixHours => 6,
            Range::Day => 24,
            Range::Week => 24 * 7,
        };
        Duration::from_secs(hours * 3600)
    }

    /// 120s, 240s, 960s and 6720s respectively
    pub fn bucket_width(self) -> Duration {
        self.duration() / TARGET_BUCKETS
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Range::ThreeHours => "3h",
            Range::SixHours => "6h",
            Range::Day => "24h",
            Range::Week => "1w",
        }
    }

    fn start(self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - chrono::Duration::seconds(self.duration().as_secs() as i64)
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Range {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "3h" => Ok(Range::ThreeHours),
            "6h" => Ok(Range::SixHours),
            "24h" | "1d" => Ok(Range::Day),
            "1w" | "7d" => Ok(Range::Week),
            other => Err(anyhow!("Unknown range: {} (expected 3h, 6h, 24h or 1w)", other)),
        }
    }
}

/// One slot of the response-time series
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bucket {
    pub start: DateTime<Utc>,
    /// Mean over measured responses; `None` when nothing was measured
    pub average_response_ms: Option<f64>,
    pub up: usize,
    pub down: usize,
}

/// Split the range ending at `now` into [`TARGET_BUCKETS`] slots
pub fn bucket_series(observations: &[Observation], range: Range, now: DateTime<Utc>) -> Vec<Bucket> {
    let start = range.start(now);
    let width_ms = range.bucket_width().as_millis() as i64;

    let mut buckets: Vec<Bucket> = (0..TARGET_BUCKETS as i64)
        .map(|i| Bucket {
            start: start + chrono::Duration::milliseconds(i * width_ms),
            average_response_ms: None,
            up: 0,
            down: 0,
        })
        .collect();
    let mut sums = vec![(0u64, 0u64); buckets.len()];

    for observation in observations {
        let offset = (observation.timestamp - start).num_milliseconds();
        if offset < 0 || observation.timestamp > now {
            continue;
        }
        let index = ((offset / width_ms) as usize).min(buckets.len() - 1);

        if observation.is_up() {
            buckets[index].up += 1;
        } else {
            buckets[index].down += 1;
        }
        if observation.response_time_ms > 0 {
            sums[index].0 += observation.response_time_ms;
            sums[index].1 += 1;
        }
    }

    for (bucket, (total, measured)) in buckets.iter_mut().zip(sums) {
        if measured > 0 {
            bucket.average_response_ms = Some(total as f64 / measured as f64);
        }
    }

    buckets
}

/// A maximal run of `down` observations
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outage {
    pub start: DateTime<Utc>,
    /// First `up` observation after the run; `None` while still down
    pub end: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub observations: usize,
}

impl Outage {
    pub fn duration(&self, now: DateTime<Utc>) -> chrono::Duration {
        self.end.unwrap_or(now) - self.start
    }
}

pub fn outages(observations: &[Observation]) -> Vec<Outage> {
    let mut ordered: Vec<&Observation> = observations.iter().collect();
    ordered.sort_by_key(|o| o.timestamp);

    let mut outages: Vec<Outage> = Vec::new();
    let mut open: Option<Outage> = None;

    for observation in ordered {
        match observation.status {
            MonitorStatus::Down => match open.as_mut() {
                Some(outage) => outage.observations += 1,
                None => {
                    open = Some(Outage {
                        start: observation.timestamp,
                        end: None,
                        failure_reason: observation.failure_reason.clone(),
                        observations: 1,
                    });
                }
            },
            MonitorStatus::Up => {
                if let Some(mut outage) = open.take() {
                    outage.end = Some(observation.timestamp);
                    outages.push(outage);
                }
            }
            MonitorStatus::Pending => {}
        }
    }

    outages.extend(open);
    outages
}

/// Everything a dashboard shows for one endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurrentStats {
    pub endpoint_id: Uuid,
    pub status: MonitorStatus,
    pub range: Range,
    pub availability: Availability,
    pub response: Option<ResponseStats>,
    pub certificate_days_remaining: Option<i64>,
    pub certificate_expiry_date: Option<DateTime<Utc>>,
    pub domain_days_remaining: Option<i64>,
}

pub struct Reporter {
    database: Arc<dyn Database>,
}

impl Reporter {
    pub fn new(database: Arc<dyn Database>) -> Self {
        Self { database }
    }

    async fn window(&self, id: Uuid, range: Range, now: DateTime<Utc>) -> Result<Option<(Endpoint, Vec<Observation>)>> {
        let Some(endpoint) = self.database.get_endpoint(id).await? else {
            return Ok(None);
        };
        let observations = self.database.observations_since(id, range.start(now)).await?;
        Ok(Some((endpoint, observations)))
    }

    pub async fn current_stats(&self, id: Uuid, range: Range) -> Result<Option<CurrentStats>> {
        let now = Utc::now();
        let Some((endpoint, observations)) = self.window(id, range, now).await? else {
            return Ok(None);
        };

        Ok(Some(CurrentStats {
            endpoint_id: id,
            status: endpoint.state.status,
            range,
            availability: gap_aware_uptime(&observations, endpoint.interval(), range.duration()),
            response: ResponseStats::from_observations(&observations),
            certificate_days_remaining: endpoint.snapshot.certificate.as_ref().and_then(|c| c.expires_in()),
            certificate_expiry_date: endpoint.snapshot.certificate.as_ref().and_then(|c| c.expiry_date()),
            domain_days_remaining: endpoint.snapshot.domain.as_ref().and_then(|d| d.days_remaining),
        }))
    }

    pub async fn outages(&self, id: Uuid, range: Range) -> Result<Vec<Outage>> {
        let observations = self.database.observations_since(id, range.start(Utc::now())).await?;
        Ok(outages(&observations))
    }

    pub async fn response_series(&self, id: Uuid, range: Range) -> Result<Vec<Bucket>> {
        let now = Utc::now();
        let observations = self.database.observations_since(id, range.start(now)).await?;
        Ok(bucket_series(&observations, range, now))
    }

    /// The most recent `limit` observations, oldest first
    pub async fn heartbeat_tail(&self, id: Uuid, limit: usize) -> Result<Vec<Observation>> {
        self.database.recent_observations(id, limit).await
    }
}
