//! Kafka-protocol broker health checks.
//!
//! Each endpoint keeps one client connection across ticks. Connections are
//! owned by [`BrokerPool`] and dropped through [`BrokerPool::release`] when the
//! scheduler stops the endpoint, or when a check fails so the next tick
//! reconnects from scratch.

use async_trait::async_trait;
use chrono::Utc;
use rskafka::client::partition::{Compression, OffsetAt, PartitionClient, UnknownTopicHandling};
use rskafka::client::{Client, ClientBuilder};
use rskafka::record::Record;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, info};
use uuid::Uuid;

use super::checker::Checker;
use super::types::FailureReason;
use crate::models::{BrokerProbe, Endpoint, ProbeConfig};

/// Upper bound on bytes fetched by one consumer poll
const MAX_FETCH_BYTES: i32 = 1_000_000;

struct PooledClient<C> {
    brokers: Vec<String>,
    client: Arc<C>,
}

/// Per-endpoint persistent broker clients
///
/// A cached client is reused for as long as the endpoint's broker list is
/// unchanged.
pub struct BrokerPool<C = Client> {
    clients: Mutex<HashMap<Uuid, PooledClient<C>>>,
}

impl<C> Default for BrokerPool<C> {
    fn default() -> Self {
        Self { clients: Mutex::new(HashMap::new()) }
    }
}

impl<C> BrokerPool<C> {
    pub fn new() -> Self {
        Self::default()
    }

    fn cached(&self, endpoint_id: Uuid, brokers: &[String]) -> Option<Arc<C>> {
        let clients = self.clients.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        clients
            .get(&endpoint_id)
            .filter(|pooled| pooled.brokers == brokers)
            .map(|pooled| pooled.client.clone())
    }

    /// Get the endpoint's client, calling `connect` only if none is cached
    pub async fn client_with<F, Fut, E>(&self, endpoint_id: Uuid, brokers: &[String], connect: F) -> Result<Arc<C>, E>
    where
        F: FnOnce(Vec<String>) -> Fut,
        Fut: Future<Output = Result<C, E>>,
    {
        if let Some(client) = self.cached(endpoint_id, brokers) {
            return Ok(client);
        }

        debug!(endpoint = %endpoint_id, "Connecting to brokers {}", brokers.join(","));
        let client = Arc::new(connect(brokers.to_vec()).await?);

        let mut clients = self.clients.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        clients.insert(endpoint_id, PooledClient { brokers: brokers.to_vec(), client: client.clone() });
        Ok(client)
    }

    /// Drop the endpoint's connection; returns whether one was held
    pub fn release(&self, endpoint_id: Uuid) -> bool {
        let mut clients = self.clients.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let released = clients.remove(&endpoint_id).is_some();
        if released {
            info!(endpoint = %endpoint_id, "Released broker connection");
        }
        released
    }

    pub fn len(&self) -> usize {
        self.clients.lock().map(|clients| clients.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BrokerPool<Client> {
    /// Get the endpoint's client, connecting if none is cached
    pub async fn client(&self, endpoint_id: Uuid, brokers: &[String]) -> Result<Arc<Client>, rskafka::client::error::Error> {
        self.client_with(endpoint_id, brokers, |brokers| async move { ClientBuilder::new(brokers).build().await })
            .await
    }
}

/// Producer/consumer broker checker
pub struct BrokerChecker {
    pool: Arc<BrokerPool>,
    timeout_duration: Duration,
}

impl BrokerChecker {
    pub fn new(pool: Arc<BrokerPool>, timeout_seconds: u64) -> Self {
        Self { pool, timeout_duration: Duration::from_secs(timeout_seconds) }
    }

    async fn partition(&self, endpoint_id: Uuid, probe: &BrokerProbe) -> Result<PartitionClient, FailureReason> {
        let client = self.pool.client(endpoint_id, &probe.brokers).await.map_err(broker_error)?;
        client
            .partition_client(probe.topic.clone(), probe.partition, UnknownTopicHandling::Error)
            .await
            .map_err(broker_error)
    }

    async fn produce(&self, endpoint_id: Uuid, probe: &BrokerProbe) -> Result<(), FailureReason> {
        let partition = self.partition(endpoint_id, probe).await?;
        let record = Record {
            key: None,
            value: Some(probe.message.as_bytes().to_vec()),
            headers: BTreeMap::new(),
            timestamp: Utc::now(),
        };
        partition
            .produce(vec![record], Compression::NoCompression)
            .await
            .map_err(broker_error)?;
        Ok(())
    }

    /// Wait for any message on the partition
    ///
    /// The partition handle is scoped to this call, so nothing outlives the
    /// attempt whatever its outcome.
    async fn consume(&self, endpoint_id: Uuid, probe: &BrokerProbe) -> Result<(), FailureReason> {
        let partition = self.partition(endpoint_id, probe).await?;
        let start_at = if probe.from_beginning { OffsetAt::Earliest } else { OffsetAt::Latest };
        let offset = partition.get_offset(start_at).await.map_err(broker_error)?;

        let max_wait_ms = i32::try_from(self.timeout_duration.as_millis()).unwrap_or(i32::MAX);
        let (records, _high_watermark) = partition
            .fetch_records(offset, 1..MAX_FETCH_BYTES, max_wait_ms)
            .await
            .map_err(broker_error)?;

        if records.is_empty() {
            return Err(FailureReason::NoMessage(self.timeout_duration.as_secs()));
        }
        Ok(())
    }
}

fn broker_error(error: rskafka::client::error::Error) -> FailureReason {
    FailureReason::Broker(error.to_string())
}

#[async_trait]
impl Checker for BrokerChecker {
    async fn check(&self, endpoint: &Endpoint) -> Result<u64, FailureReason> {
        let start = Instant::now();
        // The consumer's own fetch wait is bounded by the same timeout, give it headroom
        let deadline = self.timeout_duration + Duration::from_secs(2);

        let outcome = match &endpoint.probe {
            ProbeConfig::BrokerProducer(probe) => timeout(deadline, self.produce(endpoint.id, probe)).await,
            ProbeConfig::BrokerConsumer(probe) => timeout(deadline, self.consume(endpoint.id, probe)).await,
            _ => {
                return Err(FailureReason::Other(format!(
                    "{} endpoint routed to broker checker",
                    endpoint.kind()
                )));
            }
        };

        match outcome {
            Ok(Ok(())) => Ok(start.elapsed().as_millis() as u64),
            Ok(Err(reason)) => {
                self.pool.release(endpoint.id);
                Err(reason)
            }
            Err(_) => {
                self.pool.release(endpoint.id);
                Err(FailureReason::Timeout(self.timeout_duration.as_secs()))
            }
        }
    }

    async fn release(&self, endpoint_id: Uuid) {
        self.pool.release(endpoint_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;

    fn broker_endpoint(port: u16, consumer: bool) -> Endpoint {
        let probe = BrokerProbe {
            brokers: vec![format!("127.0.0.1:{}", port)],
            topic: "health".into(),
            partition: 0,
            message: "ping".into(),
            from_beginning: false,
        };
        let config = if consumer { ProbeConfig::BrokerConsumer(probe) } else { ProbeConfig::BrokerProducer(probe) };
        Endpoint::new("kafka", config)
    }

    #[tokio::test]
    async fn test_unreachable_broker_fails_without_caching_a_client() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let pool = Arc::new(BrokerPool::new());
        let checker = BrokerChecker::new(pool.clone(), 1);

        for consumer in [false, true] {
            let endpoint = broker_endpoint(port, consumer);
            let result = checker.check(&endpoint).await;
            assert!(result.is_err(), "broker check against a closed port must fail");
            assert!(pool.is_empty());
        }
    }

    #[test]
    fn test_release_unknown_endpoint_is_noop() {
        let pool: BrokerPool = BrokerPool::new();
        assert!(!pool.release(Uuid::new_v4()));
    }

    async fn connect_counted(
        pool: &BrokerPool<String>,
        id: Uuid,
        brokers: &[String],
        connects: &AtomicUsize,
    ) -> Arc<String> {
        pool.client_with(id, brokers, |brokers| async move {
            connects.fetch_add(1, Ordering::SeqCst);
            Ok::<_, ()>(brokers.join(","))
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_pool_reuses_client_across_ticks() {
        let pool = BrokerPool::<String>::new();
        let connects = AtomicUsize::new(0);
        let id = Uuid::new_v4();
        let brokers = vec!["kafka-1:9092".to_string()];

        let first = connect_counted(&pool, id, &brokers, &connects).await;
        let second = connect_counted(&pool, id, &brokers, &connects).await;
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(connects.load(Ordering::SeqCst), 1);

        // Edited broker list: the stale client is replaced, not reused
        let moved = vec!["kafka-2:9092".to_string()];
        let third = connect_counted(&pool, id, &moved, &connects).await;
        assert_eq!(third.as_str(), "kafka-2:9092");
        assert_eq!(connects.load(Ordering::SeqCst), 2);
        assert_eq!(pool.len(), 1);

        // Other endpoints get their own connection
        connect_counted(&pool, Uuid::new_v4(), &moved, &connects).await;
        assert_eq!(connects.load(Ordering::SeqCst), 3);
        assert_eq!(pool.len(), 2);

        assert!(pool.release(id));
        connect_counted(&pool, id, &moved, &connects).await;
        assert_eq!(connects.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_failed_connect_is_not_cached() {
        let pool = BrokerPool::<String>::new();
        let id = Uuid::new_v4();
        let brokers = vec!["kafka:9092".to_string()];

        let result = pool.client_with(id, &brokers, |_| async { Err::<String, _>("refused") }).await;
        assert_eq!(result.unwrap_err(), "refused");
        assert!(pool.is_empty());
    }
}
