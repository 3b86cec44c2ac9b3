/// Orchestrator module - wires storage, probes and the scheduler together
///
/// The orchestrator:
/// - Prepares the database schema and imports endpoints seeded in the config
/// - Starts every stored endpoint
/// - Periodically reconciles running tasks with storage
/// - Stops everything cleanly on ctrl-c


use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::database::{Database, DatabaseImpl, initialize_database};
use crate::monitoring::certificate::CertificateInspector;
use crate::monitoring::domain::DomainLookup;
use crate::monitoring::{ExpiryInspector, MonitoringExecutor, MonitoringScheduler};
use crate::notify::{LogNotifier, Notifier};
use crate::pool::LibsqlPool;
use crate::stats::Reporter;

/// Main orchestrator for the monitoring engine
pub struct Orchestrator {
    config: Arc<Config>,
    database: Arc<dyn Database>,
    scheduler: Arc<MonitoringScheduler>,
    reporter: Reporter,
}

impl Orchestrator {
    /// Create and start a new orchestrator
    /// This is a convenience method that creates and immediately runs the orchestrator
    pub async fn start(config: Config, pool: LibsqlPool) -> Result<()> {
        let orchestrator = Self::new(config, pool).await?;
        orchestrator.run().await
    }

    /// Create an orchestrator backed by the libsql pool
    pub async fn new(config: Config, pool: LibsqlPool) -> Result<Self> {
        // Get database connection for initialization
        let conn = pool.get().await?;

        info!("Initializing database schema...");
        initialize_database(&conn).await?;
        drop(conn);

        let database = DatabaseImpl::new_from_pool(pool)
            .retain_history_on_delete(config.engine.retain_history_on_delete);

        Self::with_database(config, Arc::new(database), Arc::new(LogNotifier))
    }

    /// Create an orchestrator over any storage and notification backend
    pub fn with_database(config: Config, database: Arc<dyn Database>, notifier: Arc<dyn Notifier>) -> Result<Self> {
        let engine = &config.engine;

        let executor = Arc::new(MonitoringExecutor::new(engine));
        let domains = if engine.domain_check_enabled {
            Some(DomainLookup::new(engine.rdap_base_url.clone(), engine.cert_timeout_seconds)?)
        } else {
            None
        };
        let inspector = Arc::new(ExpiryInspector::new(
            CertificateInspector::new(engine.cert_timeout_seconds)?,
            domains,
        ));

        let scheduler = Arc::new(MonitoringScheduler::new(
            database.clone(),
            executor,
            inspector,
            notifier,
            Duration::from_millis(engine.startup_jitter_ms),
        ));

        Ok(Self {
            config: Arc::new(config),
            reporter: Reporter::new(database.clone()),
            database,
            scheduler,
        })
    }

    pub fn database(&self) -> &Arc<dyn Database> {
        &self.database
    }

    pub fn scheduler(&self) -> &Arc<MonitoringScheduler> {
        &self.scheduler
    }

    pub fn reporter(&self) -> &Reporter {
        &self.reporter
    }

    /// Upsert the endpoints listed in the config file, matched by name
    ///
    /// Invalid entries are logged and skipped. Returns how many were stored.
    pub async fn import_seeds(&self) -> Result<usize> {
        if self.config.endpoints.is_empty() {
            return Ok(0);
        }

        let existing: HashMap<String, _> = self
            .database
            .list_endpoints()
            .await?
            .into_iter()
            .map(|endpoint| (endpoint.name.clone(), endpoint))
            .collect();

        let mut imported = 0;
        for draft in &self.config.endpoints {
            let name = draft.name.clone();
            let endpoint = match existing.get(&name) {
                Some(current) => draft.clone().apply_to(current),
                None => draft.clone().into_endpoint(),
            };

            match endpoint {
                Ok(endpoint) => {
                    self.database.save_endpoint(&endpoint).await?;
                    debug!(endpoint = %endpoint.id, "Imported seeded endpoint {}", name);
                    imported += 1;
                }
                Err(e) => warn!("Skipping seeded endpoint {:?}: {}", name, e),
            }
        }

        info!("Imported {} of {} seeded endpoints", imported, self.config.endpoints.len());
        Ok(imported)
    }

    /// Main event loop
    pub async fn run(&self) -> Result<()> {
        info!("Starting monitoring orchestrator...");
        info!("{}", self.config);

        self.import_seeds().await?;
        self.scheduler.initialize().await?;

        let reload_interval = match self.config.engine.reload_interval_seconds {
            0 => None,
            seconds => Some(Duration::from_secs(seconds)),
        };

        loop {
            tokio::select! {
                signal = tokio::signal::ctrl_c() => {
                    if let Err(e) = signal {
                        error!("Failed to listen for shutdown signal: {}", e);
                    }
                    info!("Shutdown signal received");
                    break;
                }
                _ = sleep_or_forever(reload_interval) => {
                    if let Err(e) = self.scheduler.reconcile().await {
                        error!("Failed to reconcile endpoints: {:#}", e);
                    }
                }
            }
        }

        self.scheduler.stop_all().await;
        info!("Orchestrator stopped");
        Ok(())
    }
}

async fn sleep_or_forever(duration: Option<Duration>) {
    match duration {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending().await,
    }
}
