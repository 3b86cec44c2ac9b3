use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::monitoring::types::{CheckResult, MonitorStatus};

/// One persisted probe outcome; never mutated after insert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub id: Option<i64>,
    pub endpoint_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub status: MonitorStatus,
    pub response_time_ms: u64,
    pub failure_reason: Option<String>,
}

impl Observation {
    pub fn from_check_result(endpoint_id: Uuid, result: &CheckResult) -> Self {
        Self {
            id: None,
            endpoint_id,
            timestamp: result.timestamp,
            status: result.status(),
            response_time_ms: result.response_time_ms,
            failure_reason: result.failure_reason.as_ref().map(ToString::to_string),
        }
    }

    pub fn is_up(&self) -> bool {
        self.status == MonitorStatus::Up
    }
}
