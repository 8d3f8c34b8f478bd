use std::sync::Arc;
use std::time::Duration;

use chrono::FixedOffset;
use reposter_core::config::{HistoryErrorPolicy, SchedulerConfig};
use reposter_core::Delivery;
use reposter_store::Store;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::clock::{Clock, SystemClock};
use crate::dispatch::{DispatchReport, Dispatcher, Pacing};
use crate::due::DueCheck;
use crate::locks::DeliveryLocks;
use crate::manual::ManualOps;
use crate::materialize::{MaterializeReport, Materializer};
use crate::reconcile::{Reconciler, RetryPolicy};

/// Runtime knobs of the engine, resolved from [`SchedulerConfig`].
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub check_interval: Duration,
    pub dispatch_interval: Duration,
    pub max_workers: usize,
    pub retry: RetryPolicy,
    pub history_window: usize,
    pub on_history_error: HistoryErrorPolicy,
    pub offset: FixedOffset,
    pub pacing: Pacing,
    pub manual_pace: Duration,
    pub manual_grace: Duration,
}

impl EngineSettings {
    pub fn from_config(cfg: &SchedulerConfig) -> Self {
        let retry_secs = i64::try_from(cfg.retry_interval_secs).unwrap_or(i64::MAX / 1000);
        Self {
            check_interval: cfg.check_interval(),
            dispatch_interval: cfg.dispatch_interval(),
            max_workers: cfg.max_workers,
            retry: RetryPolicy {
                max_attempts: cfg.max_retry_attempts,
                interval: chrono::Duration::seconds(retry_secs),
            },
            history_window: cfg.history_window,
            on_history_error: cfg.on_history_error,
            offset: cfg.utc_offset(),
            pacing: Pacing {
                delay: Duration::from_millis(cfg.pace_delay_ms),
                burst_size: cfg.burst_size,
                burst_pause: Duration::from_millis(cfg.burst_pause_ms),
            },
            manual_pace: Duration::from_millis(cfg.manual_pace_ms),
            manual_grace: Duration::from_millis(cfg.manual_grace_ms),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&SchedulerConfig::default())
    }
}

/// What one due-check tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DueTickReport {
    pub groups_due: usize,
    pub materialized: Vec<MaterializeReport>,
}

impl DueTickReport {
    pub fn created(&self) -> usize {
        self.materialized.iter().map(|r| r.created.len()).sum()
    }
}

/// Owns the due-check and dispatch loops plus the shared manual-operation handle.
pub struct SchedulerEngine {
    store: Arc<dyn Store>,
    settings: EngineSettings,
    due: DueCheck,
    materializer: Materializer,
    dispatcher: Dispatcher,
    manual: Arc<ManualOps>,
}

impl SchedulerEngine {
    pub fn new(store: Arc<dyn Store>, delivery: Arc<dyn Delivery>, settings: EngineSettings) -> Self {
        Self::with_clock(store, delivery, Arc::new(SystemClock), settings)
    }

    pub fn with_clock(
        store: Arc<dyn Store>,
        delivery: Arc<dyn Delivery>,
        clock: Arc<dyn Clock>,
        settings: EngineSettings,
    ) -> Self {
        let locks = Arc::new(DeliveryLocks::new());
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&store),
            delivery,
            Arc::clone(&clock),
            settings.retry,
        ));
        let due = DueCheck::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            settings.offset,
            settings.history_window,
            settings.on_history_error,
        );
        let materializer = Materializer::new(Arc::clone(&store), Arc::clone(&clock));
        let dispatcher = Dispatcher::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            Arc::clone(&reconciler),
            Arc::clone(&locks),
            settings.max_workers,
            settings.pacing,
        );
        let manual = Arc::new(ManualOps::new(
            Arc::clone(&store),
            clock,
            reconciler,
            locks,
            settings.manual_pace,
            settings.manual_grace,
        ));
        Self {
            store,
            settings,
            due,
            materializer,
            dispatcher,
            manual,
        }
    }

    /// Handle for operator-triggered sends and deletes. Shares delivery
    /// claims with the dispatch loop.
    pub fn manual(&self) -> Arc<ManualOps> {
        Arc::clone(&self.manual)
    }

    /// Drop pending repost records left over from a previous process.
    ///
    /// Retry rows and pushes survive; the next due check re-creates reposts
    /// when they are still owed.
    pub fn startup_sweep(&self) -> usize {
        match self.store.purge_stale_pending() {
            Ok(n) => n,
            Err(e) => {
                error!(error = %e, "startup sweep failed");
                0
            }
        }
    }

    /// Evaluate every active group and materialize records for the due ones.
    pub fn due_tick(&self) -> DueTickReport {
        let groups = match self.due.due_groups() {
            Ok(groups) => groups,
            Err(e) => {
                error!(error = %e, "due check failed");
                return DueTickReport::default();
            }
        };

        let mut report = DueTickReport {
            groups_due: groups.len(),
            materialized: Vec::with_capacity(groups.len()),
        };
        for group in &groups {
            match self.materializer.materialize(group) {
                Ok(m) => report.materialized.push(m),
                Err(e) => error!(group_id = %group.id, error = %e, "materialization failed"),
            }
        }
        report
    }

    pub async fn dispatch_tick(&self, shutdown: &watch::Receiver<bool>) -> DispatchReport {
        match self.dispatcher.tick(shutdown).await {
            Ok(report) => report,
            Err(e) => {
                error!(error = %e, "dispatch tick failed");
                DispatchReport::default()
            }
        }
    }

    /// Workers currently delivering.
    pub fn in_flight(&self) -> usize {
        self.dispatcher.in_flight()
    }

    /// Run both loops until `shutdown` broadcasts `true`, then wait for
    /// in-flight deliveries to finish.
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        info!(
            check_secs = self.settings.check_interval.as_secs(),
            dispatch_secs = self.settings.dispatch_interval.as_secs(),
            max_workers = self.settings.max_workers,
            "scheduler engine started"
        );
        self.startup_sweep();

        tokio::join!(
            self.due_loop(shutdown.clone()),
            self.dispatch_loop(shutdown.clone())
        );

        info!(in_flight = self.in_flight(), "draining delivery workers");
        self.dispatcher.drain().await;
        info!("scheduler engine stopped");
    }

    async fn due_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.settings.check_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.due_tick();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    async fn dispatch_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.settings.dispatch_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.dispatch_tick(&shutdown).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }
}
