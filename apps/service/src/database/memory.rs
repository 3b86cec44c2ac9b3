//! Ephemeral storage for runs without a database file, and for tests.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::repository::Database;
use crate::models::{Endpoint, EndpointState, ExpirySnapshot, Observation};

#[derive(Default)]
struct Tables {
    endpoints: HashMap<Uuid, Endpoint>,
    observations: HashMap<Uuid, Vec<Observation>>,
    next_observation_id: i64,
}

impl Tables {
    fn insert_observation(&mut self, observation: &Observation) -> i64 {
        self.next_observation_id += 1;
        let mut stored = observation.clone();
        stored.id = Some(self.next_observation_id);

        let history = self.observations.entry(observation.endpoint_id).or_default();
        // Keep each history sorted so range queries can slice it
        let position = history.partition_point(|o| o.timestamp <= stored.timestamp);
        history.insert(position, stored);

        self.next_observation_id
    }
}

#[derive(Default)]
pub struct MemoryDatabase {
    tables: RwLock<Tables>,
    retain_history: bool,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn retain_history_on_delete(mut self, retain: bool) -> Self {
        self.retain_history = retain;
        self
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn list_endpoints(&self) -> Result<Vec<Endpoint>> {
        let tables = self.tables.read().await;
        let mut endpoints: Vec<Endpoint> = tables.endpoints.values().cloned().collect();
        endpoints.sort_by_key(|e| e.created_at);
        Ok(endpoints)
    }

    async fn get_endpoint(&self, id: Uuid) -> Result<Option<Endpoint>> {
        Ok(self.tables.read().await.endpoints.get(&id).cloned())
    }

    async fn save_endpoint(&self, endpoint: &Endpoint) -> Result<()> {
        let mut tables = self.tables.write().await;
        match tables.endpoints.get_mut(&endpoint.id) {
            Some(existing) => {
                let state = existing.state;
                let snapshot = std::mem::take(&mut existing.snapshot);
                let created_at = existing.created_at;
                *existing = endpoint.clone();
                existing.state = state;
                existing.snapshot = snapshot;
                existing.created_at = created_at;
            }
            None => {
                tables.endpoints.insert(endpoint.id, endpoint.clone());
            }
        }
        Ok(())
    }

    async fn delete_endpoint(&self, id: Uuid) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let deleted = tables.endpoints.remove(&id).is_some();
        if !self.retain_history {
            tables.observations.remove(&id);
        }
        Ok(deleted)
    }

    async fn set_paused(&self, id: Uuid, paused: bool) -> Result<bool> {
        let mut tables = self.tables.write().await;
        Ok(match tables.endpoints.get_mut(&id) {
            Some(endpoint) => {
                endpoint.paused = paused;
                endpoint.updated_at = Utc::now();
                true
            }
            None => false,
        })
    }

    async fn record_check(&self, id: Uuid, state: &EndpointState, observation: &Observation) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let Some(endpoint) = tables.endpoints.get_mut(&id) else {
            return Ok(false);
        };
        endpoint.state = *state;
        tables.insert_observation(observation);
        Ok(true)
    }

    async fn save_snapshot(&self, id: Uuid, snapshot: &ExpirySnapshot) -> Result<bool> {
        let mut tables = self.tables.write().await;
        Ok(match tables.endpoints.get_mut(&id) {
            Some(endpoint) => {
                endpoint.snapshot = snapshot.clone();
                true
            }
            None => false,
        })
    }

    async fn append_observation(&self, observation: &Observation) -> Result<i64> {
        Ok(self.tables.write().await.insert_observation(observation))
    }

    async fn observations_since(&self, id: Uuid, since: DateTime<Utc>) -> Result<Vec<Observation>> {
        let tables = self.tables.read().await;
        Ok(tables
            .observations
            .get(&id)
            .map(|history| history.iter().filter(|o| o.timestamp >= since).cloned().collect())
            .unwrap_or_default())
    }

    async fn recent_observations(&self, id: Uuid, limit: usize) -> Result<Vec<Observation>> {
        let tables = self.tables.read().await;
        Ok(tables
            .observations
            .get(&id)
            .map(|history| history[history.len().saturating_sub(limit)..].to_vec())
            .unwrap_or_default())
    }

    async fn clear_observations(&self, id: Uuid) -> Result<u64> {
        let mut tables = self.tables.write().await;
        Ok(tables.observations.remove(&id).map(|h| h.len() as u64).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PingProbe, ProbeConfig};
    use crate::monitoring::types::{CheckResult, MonitorStatus};
    use chrono::Duration;

    fn endpoint() -> Endpoint {
        Endpoint::new("gateway", ProbeConfig::Ping(PingProbe { host: "10.0.0.1".into() }))
    }

    #[tokio::test]
    async fn test_save_keeps_live_state() {
        let db = MemoryDatabase::new();
        let mut endpoint = endpoint();
        db.save_endpoint(&endpoint).await.unwrap();

        let state = EndpointState { status: MonitorStatus::Up, consecutive_failures: 0, last_checked_at: Some(Utc::now()) };
        let observation = Observation::from_check_result(endpoint.id, &CheckResult::success(12));
        assert!(db.record_check(endpoint.id, &state, &observation).await.unwrap());

        endpoint.retry_threshold = 3;
        db.save_endpoint(&endpoint).await.unwrap();

        let loaded = db.get_endpoint(endpoint.id).await.unwrap().unwrap();
        assert_eq!(loaded.retry_threshold, 3);
        assert_eq!(loaded.state.status, MonitorStatus::Up);
    }

    #[tokio::test]
    async fn test_out_of_order_appends_stay_sorted() {
        let db = MemoryDatabase::new();
        let id = Uuid::new_v4();
        let now = Utc::now();

        for offset in [3, 1, 2] {
            let mut observation = Observation::from_check_result(id, &CheckResult::success(offset));
            observation.timestamp = now + Duration::seconds(offset as i64);
            db.append_observation(&observation).await.unwrap();
        }

        let all = db.recent_observations(id, 10).await.unwrap();
        assert_eq!(all.iter().map(|o| o.response_time_ms).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(db.recent_observations(id, 1).await.unwrap()[0].response_time_ms, 3);
    }

    #[tokio::test]
    async fn test_missing_endpoint_records_nothing() {
        let db = MemoryDatabase::new();
        let id = Uuid::new_v4();
        let observation = Observation::from_check_result(id, &CheckResult::success(1));
        assert!(!db.record_check(id, &EndpointState::default(), &observation).await.unwrap());
        assert!(db.recent_observations(id, 10).await.unwrap().is_empty());
    }
}
