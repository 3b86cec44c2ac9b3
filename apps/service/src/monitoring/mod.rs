//! Monitoring engine - probes, state transitions and scheduling
//!
//! Checkers turn an endpoint into a categorized outcome, the executor applies
//! upside-down mode, `state` debounces failures and the scheduler drives all
//! of it per endpoint. Certificate and domain expiry run beside the health
//! checks on their own cadence.

pub mod broker;
pub mod certificate;
pub mod checker;
pub mod domain;
pub mod executor;
pub mod expiry;
pub mod scheduler;
pub mod state;
pub mod types;
pub mod validation;

#[cfg(test)]
mod tests;

pub use executor::MonitoringExecutor;
pub use expiry::ExpiryInspector;
pub use scheduler::MonitoringScheduler;
pub use types::{CheckResult, FailureReason, MonitorStatus};
