//! Background worker driving periodic reconciliation passes.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::domain::AppError;

use super::reconciler::Reconciler;

/// Configuration for the background worker
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Interval between pass starts
    pub interval: Duration,
    /// Whether the worker is enabled
    pub enabled: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            enabled: true,
        }
    }
}

/// Runs `Reconciler::run_exclusive` on a fixed cadence until shut down.
///
/// Ticks that fire while a pass is still running are dropped, not queued.
pub struct ReconcileWorker {
    reconciler: Arc<Reconciler>,
    config: WorkerConfig,
    shutdown_rx: watch::Receiver<bool>,
}

impl ReconcileWorker {
    /// Create a new worker instance
    pub fn new(
        reconciler: Arc<Reconciler>,
        config: WorkerConfig,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            reconciler,
            config,
            shutdown_rx,
        }
    }

    /// Run the worker loop
    pub async fn run(mut self) {
        if !self.config.enabled {
            info!("Reconciliation worker is disabled");
            return;
        }

        info!(interval = ?self.config.interval, "Starting reconciliation worker");

        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_pass().await;
                }
                result = self.shutdown_rx.changed() => {
                    if result.is_err() || *self.shutdown_rx.borrow() {
                        info!("Reconciliation worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn run_pass(&self) {
        match self.reconciler.run_exclusive().await {
            Ok(report) if report.total_pending() == 0 => {
                debug!("No pending records");
            }
            Ok(report) => {
                info!(
                    pending = report.total_pending(),
                    mutated = report.total_mutated(),
                    duration_ms = report.duration_ms,
                    "Reconciliation pass finished"
                );
            }
            Err(AppError::PassInFlight) => {
                debug!("Previous pass still running, skipping tick");
            }
            Err(e) => {
                error!(error = ?e, "Reconciliation pass could not start");
            }
        }
    }
}

/// Spawn the background worker as a tokio task
pub fn spawn_worker(
    reconciler: Arc<Reconciler>,
    config: WorkerConfig,
) -> (tokio::task::JoinHandle<()>, watch::Sender<bool>) {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = ReconcileWorker::new(reconciler, config, shutdown_rx);
    let handle = tokio::spawn(worker.run());
    (handle, shutdown_tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EntityKind, PassLease, Rental};
    use crate::infra::LocalPassLease;
    use crate::test_utils::{
        InMemoryStore, MockCacheInvalidator, MockLedgerClient, hash, in_memory_stores,
    };
    use uuid::Uuid;

    fn reconciler_with(
        lease: Arc<LocalPassLease>,
    ) -> (Arc<Reconciler>, Arc<InMemoryStore>, Arc<MockLedgerClient>, Arc<MockCacheInvalidator>) {
        let (store, stores) = in_memory_stores();
        let ledger = Arc::new(MockLedgerClient::new());
        let cache = Arc::new(MockCacheInvalidator::new());
        let reconciler = Arc::new(Reconciler::new(
            stores,
            Arc::clone(&ledger) as _,
            Arc::clone(&cache) as _,
            lease,
        ));
        (reconciler, store, ledger, cache)
    }

    #[test]
    fn test_worker_config_default() {
        let config = WorkerConfig::default();
        assert_eq!(config.interval, Duration::from_secs(5));
        assert!(config.enabled);
    }

    #[tokio::test]
    async fn test_worker_disabled_returns_immediately() {
        let (reconciler, _, _, cache) = reconciler_with(Arc::new(LocalPassLease::new()));
        let config = WorkerConfig {
            interval: Duration::from_millis(100),
            enabled: false,
        };
        let (_, shutdown_rx) = watch::channel(false);
        let worker = ReconcileWorker::new(reconciler, config, shutdown_rx);

        let start = std::time::Instant::now();
        worker.run().await;

        assert!(start.elapsed() < Duration::from_millis(50));
        assert_eq!(cache.total_invalidations(), 0);
    }

    #[tokio::test]
    async fn test_worker_reconciles_on_first_tick() {
        let (reconciler, store, ledger, _) = reconciler_with(Arc::new(LocalPassLease::new()));
        let rental = Rental {
            id: Uuid::new_v4(),
            ledger_reference: hash(1),
            ..Default::default()
        };
        store.seed(rental.clone());
        ledger.confirm(&hash(1));

        let (handle, shutdown_tx) = spawn_worker(
            reconciler,
            WorkerConfig {
                interval: Duration::from_secs(60),
                enabled: true,
            },
        );

        let mut settled = false;
        for _ in 0..50 {
            if store
                .get::<Rental>(rental.id)
                .is_some_and(|r| !r.status.is_pending())
            {
                settled = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(settled, "first tick should fire immediately");

        shutdown_tx.send(true).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(2), handle).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_tick_skipped_while_lease_held() {
        let lease = Arc::new(LocalPassLease::new());
        let (reconciler, _, _, cache) = reconciler_with(Arc::clone(&lease));
        assert!(lease.try_acquire().await.unwrap());

        let (handle, shutdown_tx) = spawn_worker(
            reconciler,
            WorkerConfig {
                interval: Duration::from_millis(20),
                enabled: true,
            },
        );
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(cache.invalidations(EntityKind::Token.cache_prefix()), 0);

        shutdown_tx.send(true).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(2), handle).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_worker_shutdown_via_channel() {
        let (reconciler, _, _, _) = reconciler_with(Arc::new(LocalPassLease::new()));
        let config = WorkerConfig {
            interval: Duration::from_secs(60),
            enabled: true,
        };
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(ReconcileWorker::new(reconciler, config, shutdown_rx).run());

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(true).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(2), handle).await;
        assert!(result.is_ok(), "Worker should shutdown within 2 seconds");
    }

    #[tokio::test]
    async fn test_worker_stops_when_sender_dropped() {
        let (reconciler, _, _, _) = reconciler_with(Arc::new(LocalPassLease::new()));
        let (handle, shutdown_tx) = spawn_worker(
            reconciler,
            WorkerConfig {
                interval: Duration::from_secs(60),
                enabled: true,
            },
        );
        drop(shutdown_tx);

        let result = tokio::time::timeout(Duration::from_secs(2), handle).await;
        assert!(result.is_ok());
    }
}
