use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::params;
use uuid::Uuid;

use super::models::{
    ENDPOINT_COLUMNS, OBSERVATION_COLUMNS, endpoint_from_row, observation_from_row, snapshot_to_json,
    to_millis,
};
use crate::models::{Endpoint, EndpointState, ExpirySnapshot, Observation};
use crate::pool::LibsqlPool;

/// Database trait for abstracting database operations
#[async_trait]
pub trait Database: Send + Sync {
    /// All endpoints, paused ones included
    async fn list_endpoints(&self) -> Result<Vec<Endpoint>>;

    async fn get_endpoint(&self, id: Uuid) -> Result<Option<Endpoint>>;

    /// Insert or update an endpoint's configuration
    ///
    /// Live state and the expiry snapshot are only written on insert; after
    /// that they belong to `record_check` and `save_snapshot`.
    async fn save_endpoint(&self, endpoint: &Endpoint) -> Result<()>;

    /// Delete an endpoint, and its history unless retention is enabled
    async fn delete_endpoint(&self, id: Uuid) -> Result<bool>;

    async fn set_paused(&self, id: Uuid, paused: bool) -> Result<bool>;

    /// Store the new live state and its observation together
    ///
    /// Returns `false` without writing anything when the endpoint no longer exists.
    async fn record_check(&self, id: Uuid, state: &EndpointState, observation: &Observation) -> Result<bool>;

    async fn save_snapshot(&self, id: Uuid, snapshot: &ExpirySnapshot) -> Result<bool>;

    async fn append_observation(&self, observation: &Observation) -> Result<i64>;

    /// Observations at or after `since`, oldest first
    async fn observations_since(&self, id: Uuid, since: DateTime<Utc>) -> Result<Vec<Observation>>;

    /// The latest `limit` observations, oldest first
    async fn recent_observations(&self, id: Uuid, limit: usize) -> Result<Vec<Observation>>;

    /// Purge an endpoint's history, returning the number of rows removed
    async fn clear_observations(&self, id: Uuid) -> Result<u64>;
}

/// LibSQL database implementation
pub struct DatabaseImpl {
    pool: LibsqlPool,
    retain_history: bool,
}

impl DatabaseImpl {
    /// Create a new database instance from a pool
    pub fn new_from_pool(pool: LibsqlPool) -> Self {
        Self { pool, retain_history: false }
    }

    /// Keep observations when their endpoint is deleted
    pub fn retain_history_on_delete(mut self, retain: bool) -> Self {
        self.retain_history = retain;
        self
    }

    /// Get a connection from the pool
    async fn get_conn(&self) -> Result<deadpool::managed::Object<crate::pool::LibsqlManager>> {
        Ok(self.pool.get().await?)
    }

    async fn query_observations(&self, sql: &str, params: impl libsql::params::IntoParams) -> Result<Vec<Observation>> {
        let conn = self.get_conn().await?;
        let mut rows = conn.query(sql, params).await?;
        let mut observations = Vec::new();

        while let Some(row) = rows.next().await? {
            observations.push(observation_from_row(&row)?);
        }

        Ok(observations)
    }
}

#[async_trait]
impl Database for DatabaseImpl {
    async fn list_endpoints(&self) -> Result<Vec<Endpoint>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(&format!("SELECT {} FROM endpoints ORDER BY created_at", ENDPOINT_COLUMNS), ())
            .await?;
        let mut endpoints = Vec::new();

        while let Some(row) = rows.next().await? {
            endpoints.push(endpoint_from_row(&row)?);
        }

        Ok(endpoints)
    }

    async fn get_endpoint(&self, id: Uuid) -> Result<Option<Endpoint>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {} FROM endpoints WHERE id = ?", ENDPOINT_COLUMNS),
                params![id.to_string()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(endpoint_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn save_endpoint(&self, endpoint: &Endpoint) -> Result<()> {
        let conn = self.get_conn().await?;

        conn.execute(
            "INSERT INTO endpoints (id, name, probe, interval_seconds, retry_threshold, invert_result, paused, \
             cert_check_enabled, cert_check_interval_seconds, cert_expiry_threshold_days, \
             status, consecutive_failures, last_checked_at, snapshot, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET name = excluded.name, probe = excluded.probe, \
             interval_seconds = excluded.interval_seconds, retry_threshold = excluded.retry_threshold, \
             invert_result = excluded.invert_result, paused = excluded.paused, \
             cert_check_enabled = excluded.cert_check_enabled, \
             cert_check_interval_seconds = excluded.cert_check_interval_seconds, \
             cert_expiry_threshold_days = excluded.cert_expiry_threshold_days, \
             updated_at = excluded.updated_at",
            params![
                endpoint.id.to_string(),
                endpoint.name.clone(),
                serde_json::to_string(&endpoint.probe)?,
                endpoint.interval_seconds as i64,
                endpoint.retry_threshold as i64,
                endpoint.invert_result as i64,
                endpoint.paused as i64,
                endpoint.cert_check.enabled as i64,
                endpoint.cert_check.interval_seconds as i64,
                endpoint.cert_check.expiry_threshold_days,
                endpoint.state.status.as_str(),
                endpoint.state.consecutive_failures as i64,
                endpoint.state.last_checked_at.map(to_millis),
                snapshot_to_json(&endpoint.snapshot)?,
                to_millis(endpoint.created_at),
                to_millis(endpoint.updated_at)
            ],
        )
        .await?;

        Ok(())
    }

    async fn delete_endpoint(&self, id: Uuid) -> Result<bool> {
        let conn = self.get_conn().await?;
        let tx = conn.transaction().await?;

        let deleted = tx.execute("DELETE FROM endpoints WHERE id = ?", params![id.to_string()]).await?;
        if !self.retain_history {
            tx.execute("DELETE FROM observations WHERE endpoint_id = ?", params![id.to_string()])
                .await?;
        }

        tx.commit().await?;
        Ok(deleted > 0)
    }

    async fn set_paused(&self, id: Uuid, paused: bool) -> Result<bool> {
        let conn = self.get_conn().await?;
        let updated = conn
            .execute(
                "UPDATE endpoints SET paused = ?, updated_at = ? WHERE id = ?",
                params![paused as i64, to_millis(Utc::now()), id.to_string()],
            )
            .await?;
        Ok(updated > 0)
    }

    async fn record_check(&self, id: Uuid, state: &EndpointState, observation: &Observation) -> Result<bool> {
        let conn = self.get_conn().await?;
        let tx = conn.transaction().await?;

        let updated = tx
            .execute(
                "UPDATE endpoints SET status = ?, consecutive_failures = ?, last_checked_at = ? WHERE id = ?",
                params![
                    state.status.as_str(),
                    state.consecutive_failures as i64,
                    state.last_checked_at.map(to_millis),
                    id.to_string()
                ],
            )
            .await?;

        if updated == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        tx.execute(
            "INSERT INTO observations (endpoint_id, timestamp_ms, status, response_time_ms, failure_reason) VALUES (?, ?, ?, ?, ?)",
            params![
                id.to_string(),
                to_millis(observation.timestamp),
                observation.status.as_str(),
                observation.response_time_ms as i64,
                observation.failure_reason.clone()
            ],
        )
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn save_snapshot(&self, id: Uuid, snapshot: &ExpirySnapshot) -> Result<bool> {
        let conn = self.get_conn().await?;
        let updated = conn
            .execute(
                "UPDATE endpoints SET snapshot = ? WHERE id = ?",
                params![snapshot_to_json(snapshot)?, id.to_string()],
            )
            .await?;
        Ok(updated > 0)
    }

    async fn append_observation(&self, observation: &Observation) -> Result<i64> {
        let conn = self.get_conn().await?;

        conn.execute(
            "INSERT INTO observations (endpoint_id, timestamp_ms, status, response_time_ms, failure_reason) VALUES (?, ?, ?, ?, ?)",
            params![
                observation.endpoint_id.to_string(),
                to_millis(observation.timestamp),
                observation.status.as_str(),
                observation.response_time_ms as i64,
                observation.failure_reason.clone()
            ],
        )
        .await?;

        Ok(conn.last_insert_rowid())
    }

    async fn observations_since(&self, id: Uuid, since: DateTime<Utc>) -> Result<Vec<Observation>> {
        self.query_observations(
            &format!(
                "SELECT {} FROM observations WHERE endpoint_id = ? AND timestamp_ms >= ? ORDER BY timestamp_ms, id",
                OBSERVATION_COLUMNS
            ),
            params![id.to_string(), to_millis(since)],
        )
        .await
    }

    async fn recent_observations(&self, id: Uuid, limit: usize) -> Result<Vec<Observation>> {
        let mut observations = self
            .query_observations(
                &format!(
                    "SELECT {} FROM observations WHERE endpoint_id = ? ORDER BY timestamp_ms DESC, id DESC LIMIT ?",
                    OBSERVATION_COLUMNS
                ),
                params![id.to_string(), limit as i64],
            )
            .await?;
        observations.reverse();
        Ok(observations)
    }

    async fn clear_observations(&self, id: Uuid) -> Result<u64> {
        let conn = self.get_conn().await?;
        let removed = conn
            .execute("DELETE FROM observations WHERE endpoint_id = ?", params![id.to_string()])
            .await?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::initialize_database;
    use crate::models::{HttpProbe, PingProbe, ProbeConfig};
    use crate::monitoring::types::{CheckResult, FailureReason, MonitorStatus};
    use chrono::Duration;
    use tempfile::tempdir;
    use url::Url;

    async fn open(dir: &tempfile::TempDir) -> DatabaseImpl {
        let path = dir.path().join("monitor.db");
        let pool = crate::pool::open_local(path.to_str().unwrap(), 4).await.unwrap();
        let conn = pool.get().await.unwrap();
        initialize_database(&conn).await.unwrap();
        drop(conn);
        DatabaseImpl::new_from_pool(pool)
    }

    fn http_endpoint() -> Endpoint {
        let url = Url::parse("https://status.example.com/health").unwrap();
        Endpoint::new("website", ProbeConfig::Http(HttpProbe::get(url)))
    }

    #[tokio::test]
    async fn test_endpoint_roundtrip_and_update() {
        let dir = tempdir().unwrap();
        let db = open(&dir).await;

        let mut endpoint = http_endpoint();
        endpoint.cert_check.enabled = true;
        db.save_endpoint(&endpoint).await.unwrap();

        let loaded = db.get_endpoint(endpoint.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "website");
        assert_eq!(loaded.probe, endpoint.probe);
        assert!(loaded.cert_check.enabled);
        assert_eq!(loaded.state.status, MonitorStatus::Pending);

        endpoint.name = "homepage".into();
        endpoint.interval_seconds = 120;
        db.save_endpoint(&endpoint).await.unwrap();

        let all = db.list_endpoints().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].name, "homepage");
        assert_eq!(all[0].interval_seconds, 120);
    }

    #[tokio::test]
    async fn test_record_check_updates_state_and_history() {
        let dir = tempdir().unwrap();
        let db = open(&dir).await;
        let endpoint = http_endpoint();
        db.save_endpoint(&endpoint).await.unwrap();

        let result = CheckResult::failure(FailureReason::ConnectionRefused, 3);
        let state = EndpointState {
            status: MonitorStatus::Down,
            consecutive_failures: 1,
            last_checked_at: Some(result.timestamp),
        };
        let observation = Observation::from_check_result(endpoint.id, &result);
        assert!(db.record_check(endpoint.id, &state, &observation).await.unwrap());

        let loaded = db.get_endpoint(endpoint.id).await.unwrap().unwrap();
        assert_eq!(loaded.state.status, MonitorStatus::Down);
        assert_eq!(loaded.state.consecutive_failures, 1);

        let history = db.recent_observations(endpoint.id, 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, MonitorStatus::Down);
        assert_eq!(history[0].failure_reason.as_deref(), Some("Connection refused"));

        // Configuration edits leave the live state alone
        let mut edited = endpoint.clone();
        edited.interval_seconds = 300;
        db.save_endpoint(&edited).await.unwrap();
        let loaded = db.get_endpoint(endpoint.id).await.unwrap().unwrap();
        assert_eq!(loaded.state.status, MonitorStatus::Down);
    }

    #[tokio::test]
    async fn test_record_check_for_missing_endpoint() {
        let dir = tempdir().unwrap();
        let db = open(&dir).await;
        let id = Uuid::new_v4();
        let observation = Observation::from_check_result(id, &CheckResult::success(5));

        assert!(!db.record_check(id, &EndpointState::default(), &observation).await.unwrap());
        assert!(db.recent_observations(id, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_observation_queries_are_chronological() {
        let dir = tempdir().unwrap();
        let db = open(&dir).await;
        let id = Uuid::new_v4();
        let start = Utc::now() - Duration::hours(1);

        for minute in 0..5 {
            let mut observation = Observation::from_check_result(id, &CheckResult::success(minute * 10));
            observation.timestamp = start + Duration::minutes(minute as i64);
            db.append_observation(&observation).await.unwrap();
        }

        let since = db.observations_since(id, start + Duration::minutes(2)).await.unwrap();
        assert_eq!(since.iter().map(|o| o.response_time_ms).collect::<Vec<_>>(), vec![20, 30, 40]);

        let tail = db.recent_observations(id, 2).await.unwrap();
        assert_eq!(tail.iter().map(|o| o.response_time_ms).collect::<Vec<_>>(), vec![30, 40]);

        assert_eq!(db.clear_observations(id).await.unwrap(), 5);
        assert!(db.observations_since(id, start).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_cascades_unless_retained() {
        let dir = tempdir().unwrap();
        let db = open(&dir).await;

        let endpoint = Endpoint::new("gateway", ProbeConfig::Ping(PingProbe { host: "10.0.0.1".into() }));
        db.save_endpoint(&endpoint).await.unwrap();
        let observation = Observation::from_check_result(endpoint.id, &CheckResult::success(1));
        db.append_observation(&observation).await.unwrap();

        assert!(db.delete_endpoint(endpoint.id).await.unwrap());
        assert!(db.get_endpoint(endpoint.id).await.unwrap().is_none());
        assert!(db.recent_observations(endpoint.id, 10).await.unwrap().is_empty());
        assert!(!db.delete_endpoint(endpoint.id).await.unwrap());

        let db = db.retain_history_on_delete(true);
        let kept = Endpoint::new("kept", ProbeConfig::Ping(PingProbe { host: "10.0.0.2".into() }));
        db.save_endpoint(&kept).await.unwrap();
        db.append_observation(&Observation::from_check_result(kept.id, &CheckResult::success(1)))
            .await
            .unwrap();
        db.delete_endpoint(kept.id).await.unwrap();
        assert_eq!(db.recent_observations(kept.id, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_pause_and_snapshot() {
        let dir = tempdir().unwrap();
        let db = open(&dir).await;
        let endpoint = http_endpoint();
        db.save_endpoint(&endpoint).await.unwrap();

        assert!(db.set_paused(endpoint.id, true).await.unwrap());
        assert!(db.get_endpoint(endpoint.id).await.unwrap().unwrap().paused);
        assert!(!db.set_paused(Uuid::new_v4(), true).await.unwrap());

        let snapshot = ExpirySnapshot {
            certificate: None,
            domain: Some(crate::models::DomainInfo {
                domain: "example.com".into(),
                registered_at: None,
                updated_at: None,
                expires_at: None,
                days_remaining: Some(200),
                checked_at: Utc::now(),
            }),
        };
        assert!(db.save_snapshot(endpoint.id, &snapshot).await.unwrap());
        let loaded = db.get_endpoint(endpoint.id).await.unwrap().unwrap();
        assert_eq!(loaded.snapshot.domain.unwrap().days_remaining, Some(200));

        db.save_snapshot(endpoint.id, &ExpirySnapshot::default()).await.unwrap();
        assert!(db.get_endpoint(endpoint.id).await.unwrap().unwrap().snapshot.is_empty());
    }
}
