//! Gap-aware uptime.
//!
//! Observations are split into monitoring sessions wherever two consecutive
//! observations are further apart than 2.5 heartbeats. Time between sessions
//! counts as "not monitored" rather than up or down, so an interrupted
//! monitor does not distort the uptime figure. Coverage reports how much of
//! the requested period the sessions actually span.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

use crate::models::Observation;

/// Sessions break on gaps wider than this many heartbeat intervals
pub const GAP_FACTOR: f64 = 2.5;

/// A run of observations without a monitoring gap
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    pub first: DateTime<Utc>,
    pub last: DateTime<Utc>,
    pub observations: usize,
    pub up: usize,
}

impl Session {
    fn open(observation: &Observation) -> Self {
        Self {
            first: observation.timestamp,
            last: observation.timestamp,
            observations: 1,
            up: observation.is_up() as usize,
        }
    }

    /// Monitored time in seconds, one heartbeat past the last observation
    pub fn duration_seconds(&self, heartbeat: Duration) -> f64 {
        let heartbeat = heartbeat.as_secs_f64();
        if self.observations < 2 {
            return heartbeat;
        }
        let span = (self.last - self.first).num_milliseconds().max(0) as f64 / 1000.0;
        span + heartbeat
    }

    pub fn uptime_seconds(&self, heartbeat: Duration) -> f64 {
        self.duration_seconds(heartbeat) * self.up as f64 / self.observations as f64
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Availability {
    pub uptime_percent: f64,
    pub coverage_percent: f64,
    /// Mean response time over every observation in the period
    pub average_response_ms: f64,
    pub monitored_seconds: f64,
    pub sessions: usize,
}

fn heartbeat_or_minimum(heartbeat: Duration) -> Duration {
    heartbeat.max(Duration::from_secs(1))
}

/// Partition observations into monitoring sessions
pub fn sessions(observations: &[Observation], heartbeat: Duration) -> Vec<Session> {
    let heartbeat = heartbeat_or_minimum(heartbeat);
    let gap_threshold_ms = (heartbeat.as_secs_f64() * GAP_FACTOR * 1000.0) as i64;

    let mut ordered: Vec<&Observation> = observations.iter().collect();
    ordered.sort_by_key(|o| o.timestamp);

    let mut sessions: Vec<Session> = Vec::new();
    for observation in ordered {
        match sessions.last_mut() {
            Some(session) if (observation.timestamp - session.last).num_milliseconds() <= gap_threshold_ms => {
                session.last = observation.timestamp;
                session.observations += 1;
                session.up += observation.is_up() as usize;
            }
            _ => sessions.push(Session::open(observation)),
        }
    }

    sessions
}

/// Uptime, coverage and mean response time for one endpoint over `period`
pub fn gap_aware_uptime(observations: &[Observation], heartbeat: Duration, period: Duration) -> Availability {
    if observations.is_empty() {
        return Availability::default();
    }

    let heartbeat = heartbeat_or_minimum(heartbeat);
    let sessions = sessions(observations, heartbeat);

    let monitored: f64 = sessions.iter().map(|s| s.duration_seconds(heartbeat)).sum();
    let up: f64 = sessions.iter().map(|s| s.uptime_seconds(heartbeat)).sum();

    let uptime_percent = if monitored > 0.0 { (up / monitored * 100.0).clamp(0.0, 100.0) } else { 0.0 };
    let coverage_percent = if period.is_zero() {
        0.0
    } else {
        (monitored / period.as_secs_f64() * 100.0).min(100.0)
    };

    let total_response: u64 = observations.iter().map(|o| o.response_time_ms).sum();

    Availability {
        uptime_percent,
        coverage_percent,
        average_response_ms: total_response as f64 / observations.len() as f64,
        monitored_seconds: monitored,
        sessions: sessions.len(),
    }
}
