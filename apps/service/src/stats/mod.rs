//! Reporting over the observation history.

pub mod availability;
pub mod report;
pub mod response;

pub use availability::{Availability, gap_aware_uptime};
pub use report::{Range, Reporter};
pub use response::ResponseStats;
