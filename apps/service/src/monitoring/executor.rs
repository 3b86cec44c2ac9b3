use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use super::broker::{BrokerChecker, BrokerPool};
use super::checker::{Checker, HttpChecker, IcmpChecker, TcpChecker};
use super::types::CheckResult;
use crate::config::EngineConfig;
use crate::models::{Endpoint, ProbeKind};

/// Monitoring executor - routes an endpoint to its checker and applies
/// upside-down mode to the raw outcome
pub struct MonitoringExecutor {
    http_checker: Arc<dyn Checker>,
    tcp_checker: Arc<dyn Checker>,
    icmp_checker: Arc<dyn Checker>,
    broker_checker: Arc<dyn Checker>,
}

impl MonitoringExecutor {
    /// Create a new monitoring executor with the protocol checkers
    pub fn new(engine: &EngineConfig) -> Self {
        let pool = Arc::new(BrokerPool::new());
        Self {
            http_checker: Arc::new(HttpChecker::new(engine.http_timeout_seconds)),
            tcp_checker: Arc::new(TcpChecker::new(engine.tcp_timeout_seconds)),
            icmp_checker: Arc::new(IcmpChecker::new(engine.ping_timeout_seconds)),
            broker_checker: Arc::new(BrokerChecker::new(pool, engine.broker_timeout_seconds)),
        }
    }

    /// Route every probe kind to a single checker
    pub fn with_checker(checker: Arc<dyn Checker>) -> Self {
        Self {
            http_checker: checker.clone(),
            tcp_checker: checker.clone(),
            icmp_checker: checker.clone(),
            broker_checker: checker,
        }
    }

    fn checker_for(&self, kind: ProbeKind) -> &dyn Checker {
        match kind {
            ProbeKind::Http => self.http_checker.as_ref(),
            ProbeKind::Tcp => self.tcp_checker.as_ref(),
            ProbeKind::Ping => self.icmp_checker.as_ref(),
            ProbeKind::BrokerProducer | ProbeKind::BrokerConsumer => self.broker_checker.as_ref(),
        }
    }

    /// Execute a monitoring check
    pub async fn execute_check(&self, endpoint: &Endpoint) -> CheckResult {
        let outcome = self.checker_for(endpoint.kind()).check(endpoint).await;
        if let Err(reason) = &outcome {
            debug!(endpoint = %endpoint.id, "{} check failed: {}", endpoint.kind(), reason);
        }
        CheckResult::from_outcome(outcome, endpoint.invert_result)
    }

    /// Release connections any checker holds for the endpoint
    pub async fn release(&self, endpoint_id: Uuid) {
        self.broker_checker.release(endpoint_id).await;
    }
}
