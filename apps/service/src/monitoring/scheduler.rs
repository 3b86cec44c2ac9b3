//! Per-endpoint recurring tasks.
//!
//! Each endpoint owns at most one live health task and one live expiry task.
//! A task sleeps for the endpoint's interval *after* its previous check has
//! completed, so checks for one endpoint never overlap. Restarting an
//! endpoint cancels the old task and the replacement first waits for it to
//! wind down, which keeps that guarantee across configuration edits.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::executor::MonitoringExecutor;
use super::expiry::ExpiryInspector;
use super::state::{self, StatusChange};
use super::types::{CheckResult, MonitorStatus};
use crate::database::Database;
use crate::models::{Endpoint, EndpointDraft, Observation};
use crate::notify::Notifier;

/// Delay before retrying a tick whose endpoint could not be loaded
const STORE_RETRY_DELAY: Duration = Duration::from_secs(30);

struct TaskHandle {
    cancel: watch::Sender<bool>,
    join: JoinHandle<()>,
    /// `updated_at` of the configuration the task was started with
    revision: DateTime<Utc>,
}

impl TaskHandle {
    fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    fn is_live(&self) -> bool {
        !*self.cancel.borrow() && !self.join.is_finished()
    }
}

type TaskMap = Mutex<HashMap<Uuid, TaskHandle>>;

/// Everything a running task needs, shared by all of them
struct Engine {
    database: Arc<dyn Database>,
    executor: Arc<MonitoringExecutor>,
    inspector: Arc<ExpiryInspector>,
    notifier: Arc<dyn Notifier>,
    startup_jitter: Duration,
}

impl Engine {
    fn jitter(&self) -> Duration {
        let max = self.startup_jitter.as_millis() as u64;
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max))
    }
}

enum TickOutcome {
    /// Sleep for the given delay, then tick again
    Continue(Duration),
    Stop,
}

/// Monitoring scheduler - owns the recurring health and expiry tasks
pub struct MonitoringScheduler {
    engine: Arc<Engine>,
    health: TaskMap,
    expiry: TaskMap,
}

impl MonitoringScheduler {
    /// Create a new monitoring scheduler
    pub fn new(
        database: Arc<dyn Database>,
        executor: Arc<MonitoringExecutor>,
        inspector: Arc<ExpiryInspector>,
        notifier: Arc<dyn Notifier>,
        startup_jitter: Duration,
    ) -> Self {
        Self {
            engine: Arc::new(Engine { database, executor, inspector, notifier, startup_jitter }),
            health: Mutex::new(HashMap::new()),
            expiry: Mutex::new(HashMap::new()),
        }
    }

    /// Start every stored endpoint
    pub async fn initialize(&self) -> Result<usize> {
        let endpoints = self.engine.database.list_endpoints().await?;
        let mut started = 0;

        for endpoint in &endpoints {
            if self.start(endpoint) {
                started += 1;
            }
        }

        info!("Scheduled {} of {} endpoints", started, endpoints.len());
        Ok(started)
    }

    /// (Re)start the tasks for an endpoint
    ///
    /// Any existing task for the id is cancelled first. Paused endpoints are
    /// left stopped. Returns whether a health task was started.
    pub fn start(&self, endpoint: &Endpoint) -> bool {
        let id = endpoint.id;

        if endpoint.paused {
            cancel(&self.health, id);
            cancel(&self.expiry, id);
            debug!(endpoint = %id, "Endpoint is paused, not scheduling");
            return false;
        }

        let initial_delay = self.engine.jitter();

        let revision = endpoint.updated_at;

        let engine = self.engine.clone();
        replace(&self.health, id, revision, move |cancel, previous| {
            tokio::spawn(run_health(engine, id, initial_delay, cancel, previous))
        });

        if endpoint.cert_target().is_some() {
            let engine = self.engine.clone();
            replace(&self.expiry, id, revision, move |cancel, previous| {
                tokio::spawn(run_expiry(engine, id, initial_delay, cancel, previous))
            });
        } else {
            cancel(&self.expiry, id);
        }

        debug!(endpoint = %id, "Scheduled {} checks every {}s", endpoint.kind(), endpoint.interval_seconds);
        true
    }

    /// Stop both tasks for an endpoint and release its broker connection
    ///
    /// Safe to call for ids without a task.
    pub async fn stop(&self, id: Uuid) {
        cancel(&self.health, id);
        cancel(&self.expiry, id);
        self.engine.executor.release(id).await;
        prune(&self.health);
        prune(&self.expiry);
    }

    /// Reload an endpoint from storage and apply its current configuration
    pub async fn restart(&self, id: Uuid) -> Result<bool> {
        match self.engine.database.get_endpoint(id).await? {
            Some(endpoint) => {
                // The old client may point at brokers the edit replaced
                self.engine.executor.release(id).await;
                Ok(self.start(&endpoint))
            }
            None => {
                self.stop(id).await;
                Ok(false)
            }
        }
    }

    /// Cancel every task, e.g. on shutdown
    pub async fn stop_all(&self) {
        let mut ids: Vec<Uuid> = {
            let health = lock(&self.health);
            let expiry = lock(&self.expiry);
            health.keys().chain(expiry.keys()).copied().collect()
        };
        ids.sort();
        ids.dedup();

        for id in &ids {
            self.stop(*id).await;
        }

        let handles: Vec<JoinHandle<()>> = [&self.health, &self.expiry]
            .into_iter()
            .flat_map(|map| lock(map).drain().map(|(_, task)| task.join).collect::<Vec<_>>())
            .collect();
        for handle in handles {
            let _ = handle.await;
        }

        info!("Stopped monitoring {} endpoints", ids.len());
    }

    /// Bring running tasks in line with storage
    ///
    /// Starts endpoints that are new, edited since their task started, or
    /// resumed; stops tasks whose endpoint was paused or removed. Returns the
    /// number of endpoints whose tasks changed.
    pub async fn reconcile(&self) -> Result<usize> {
        let endpoints = self.engine.database.list_endpoints().await?;
        let stored: HashSet<Uuid> = endpoints.iter().map(|e| e.id).collect();
        let mut changed = 0;

        for endpoint in &endpoints {
            let (live, revision) = match lock(&self.health).get(&endpoint.id) {
                Some(task) => (task.is_live(), Some(task.revision)),
                None => (false, None),
            };

            if endpoint.paused {
                if live {
                    self.stop(endpoint.id).await;
                    changed += 1;
                }
            } else if !live || revision != Some(endpoint.updated_at) {
                debug!(endpoint = %endpoint.id, "Configuration changed, rescheduling");
                self.engine.executor.release(endpoint.id).await;
                self.start(endpoint);
                changed += 1;
            }
        }

        let orphaned: Vec<Uuid> = lock(&self.health)
            .iter()
            .filter(|(id, task)| !stored.contains(id) && task.is_live())
            .map(|(id, _)| *id)
            .collect();
        for id in orphaned {
            self.stop(id).await;
            changed += 1;
        }
        prune(&self.health);
        prune(&self.expiry);

        if changed > 0 {
            info!("Reconciled {} endpoints with storage", changed);
        }
        Ok(changed)
    }

    /// Whether a live health task exists for the endpoint
    pub fn is_scheduled(&self, id: Uuid) -> bool {
        lock(&self.health).get(&id).is_some_and(TaskHandle::is_live)
    }

    /// Create or update an endpoint from a draft and hot-apply it
    pub async fn upsert(&self, draft: EndpointDraft, existing: Option<Uuid>) -> Result<Endpoint> {
        let current = match existing {
            Some(id) => self.engine.database.get_endpoint(id).await?,
            None => None,
        };

        let endpoint = match &current {
            Some(current) => draft.apply_to(current)?,
            None => draft.into_endpoint()?,
        };

        self.engine.database.save_endpoint(&endpoint).await?;
        self.restart(endpoint.id).await?;
        Ok(endpoint)
    }

    /// Pause or resume an endpoint
    pub async fn set_paused(&self, id: Uuid, paused: bool) -> Result<bool> {
        if !self.engine.database.set_paused(id, paused).await? {
            return Ok(false);
        }
        self.restart(id).await?;
        Ok(true)
    }

    /// Stop an endpoint and remove it from storage
    pub async fn delete(&self, id: Uuid) -> Result<bool> {
        self.stop(id).await;
        self.engine.database.delete_endpoint(id).await
    }

    /// Refresh an endpoint's certificate/domain data right away
    pub async fn check_expiry_now(&self, id: Uuid) -> Result<Option<Endpoint>> {
        let Some(endpoint) = self.engine.database.get_endpoint(id).await? else {
            return Ok(None);
        };
        refresh_expiry(&self.engine, &endpoint).await?;
        self.engine.database.get_endpoint(id).await
    }
}

fn lock(map: &TaskMap) -> std::sync::MutexGuard<'_, HashMap<Uuid, TaskHandle>> {
    map.lock().unwrap_or_else(PoisonError::into_inner)
}

fn cancel(map: &TaskMap, id: Uuid) {
    if let Some(task) = lock(map).get(&id) {
        task.cancel();
    }
}

/// Drop entries whose task has finished, cancelled or not
fn prune(map: &TaskMap) {
    lock(map).retain(|_, task| !task.join.is_finished());
}

/// Cancel the current task for `id` and spawn its successor
///
/// The successor receives the predecessor's handle so it can wait for any
/// in-flight check to finish before running its own.
fn replace<F>(map: &TaskMap, id: Uuid, revision: DateTime<Utc>, spawn: F)
where
    F: FnOnce(watch::Receiver<bool>, Option<JoinHandle<()>>) -> JoinHandle<()>,
{
    let mut tasks = lock(map);
    let previous = tasks.remove(&id).map(|task| {
        task.cancel();
        task.join
    });

    let (cancel, cancelled) = watch::channel(false);
    let join = spawn(cancelled, previous);
    tasks.insert(id, TaskHandle { cancel, join, revision });
}

/// Sleep for `delay`; `false` if the task was cancelled first
async fn sleep_unless_cancelled(cancel: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);

    loop {
        if *cancel.borrow_and_update() {
            return false;
        }
        tokio::select! {
            biased;
            changed = cancel.changed() => {
                if changed.is_err() {
                    return false;
                }
            }
            _ = &mut sleep => return true,
        }
    }
}

async fn run_health(
    engine: Arc<Engine>,
    id: Uuid,
    initial_delay: Duration,
    mut cancel: watch::Receiver<bool>,
    previous: Option<JoinHandle<()>>,
) {
    if let Some(previous) = previous {
        let _ = previous.await;
    }

    let mut delay = initial_delay;

    while sleep_unless_cancelled(&mut cancel, delay).await {
        match health_tick(&engine, id, &cancel).await {
            TickOutcome::Continue(next) => delay = next,
            TickOutcome::Stop => break,
        }
    }

    debug!(endpoint = %id, "Health task finished");
}

async fn health_tick(engine: &Engine, id: Uuid, cancel: &watch::Receiver<bool>) -> TickOutcome {
    let endpoint = match engine.database.get_endpoint(id).await {
        Ok(Some(endpoint)) => endpoint,
        Ok(None) => {
            info!(endpoint = %id, "Endpoint no longer exists, stopping its checks");
            engine.executor.release(id).await;
            return TickOutcome::Stop;
        }
        Err(e) => {
            error!(endpoint = %id, "Failed to load endpoint: {:#}", e);
            return TickOutcome::Continue(STORE_RETRY_DELAY);
        }
    };

    if endpoint.paused {
        debug!(endpoint = %id, "Endpoint was paused, stopping its checks");
        engine.executor.release(id).await;
        return TickOutcome::Stop;
    }

    let result = engine.executor.execute_check(&endpoint).await;

    // Superseded while probing: the replacement task owns the state now. The
    // check may have connected after `stop` released.
    if *cancel.borrow() {
        engine.executor.release(id).await;
        return TickOutcome::Stop;
    }

    let transition = state::apply(&endpoint.state, endpoint.retry_threshold, &result);
    let observation = Observation::from_check_result(id, &result);

    match engine.database.record_check(id, &transition.state, &observation).await {
        Ok(true) => {}
        Ok(false) => {
            info!(endpoint = %id, "Endpoint removed mid-check, stopping its checks");
            engine.executor.release(id).await;
            return TickOutcome::Stop;
        }
        Err(e) => {
            error!(endpoint = %id, "Failed to record check result: {:#}", e);
            return TickOutcome::Continue(endpoint.interval());
        }
    }

    if let Some(change) = transition.change {
        let message = status_message(&endpoint, change, &result);
        info!(endpoint = %id, "{}", message);
        engine.notifier.notify(&endpoint, &message);
    }

    TickOutcome::Continue(endpoint.interval())
}

fn status_message(endpoint: &Endpoint, change: StatusChange, result: &CheckResult) -> String {
    match change.to {
        MonitorStatus::Up => format!(
            "[{}] {} is UP ({} ms)",
            endpoint.name,
            endpoint.probe.target(),
            result.response_time_ms
        ),
        _ => format!(
            "[{}] {} is DOWN: {}",
            endpoint.name,
            endpoint.probe.target(),
            result
                .failure_reason
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "unknown failure".into())
        ),
    }
}

async fn run_expiry(
    engine: Arc<Engine>,
    id: Uuid,
    initial_delay: Duration,
    mut cancel: watch::Receiver<bool>,
    previous: Option<JoinHandle<()>>,
) {
    if let Some(previous) = previous {
        let _ = previous.await;
    }

    let mut delay = initial_delay;

    while sleep_unless_cancelled(&mut cancel, delay).await {
        let endpoint = match engine.database.get_endpoint(id).await {
            Ok(Some(endpoint)) if !endpoint.paused && endpoint.cert_target().is_some() => endpoint,
            Ok(_) => break,
            Err(e) => {
                error!(endpoint = %id, "Failed to load endpoint: {:#}", e);
                delay = STORE_RETRY_DELAY;
                continue;
            }
        };

        if let Err(e) = refresh_expiry(&engine, &endpoint).await {
            warn!(endpoint = %id, "Failed to store expiry data: {:#}", e);
        }
        delay = endpoint.cert_interval();
    }

    debug!(endpoint = %id, "Expiry task finished");
}

/// Inspect, persist, and raise threshold alerts for one endpoint
async fn refresh_expiry(engine: &Engine, endpoint: &Endpoint) -> Result<()> {
    let Some(update) = engine.inspector.refresh(endpoint).await else {
        return Ok(());
    };

    if !engine.database.save_snapshot(endpoint.id, &update.snapshot).await? {
        return Ok(());
    }

    for alert in &update.alerts {
        info!(endpoint = %endpoint.id, "{}", alert);
        engine.notifier.notify(endpoint, alert);
    }

    Ok(())
}
