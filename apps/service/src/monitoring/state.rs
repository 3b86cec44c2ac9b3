//! Failure/recovery state machine.
//!
//! `pending -> up`, `pending -> down`, `up <-> down`. Failures below the retry
//! threshold keep the previous displayed status; only entering `up` from a
//! non-up status or `down` from a non-down status produces a notification.

use super::types::{CheckResult, MonitorStatus};
use crate::models::EndpointState;

/// A status change worth notifying about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub from: MonitorStatus,
    pub to: MonitorStatus,
}

/// Outcome of applying one check to the endpoint's state
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub state: EndpointState,
    pub change: Option<StatusChange>,
}

/// Apply a (possibly inverted) check result to the previous state
///
/// A threshold of 0 behaves like 1: the first failure flips to `down`.
pub fn apply(previous: &EndpointState, retry_threshold: u32, result: &CheckResult) -> Transition {
    let threshold = retry_threshold.max(1);

    let (status, consecutive_failures) = if result.ok {
        (MonitorStatus::Up, 0)
    } else {
        let failures = previous.consecutive_failures.saturating_add(1);
        let status = if failures >= threshold { MonitorStatus::Down } else { previous.status };
        (status, failures)
    };

    let change = (status != previous.status && status != MonitorStatus::Pending)
        .then_some(StatusChange { from: previous.status, to: status });

    Transition {
        state: EndpointState {
            status,
            consecutive_failures,
            last_checked_at: Some(result.timestamp),
        },
        change,
    }
}
