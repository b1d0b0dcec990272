//! # Sweep Scheduler
//!
//! Background task that runs the daily sweep.
//!
//! The task wakes up every check interval, reads the UTC clock, and runs the
//! sweep at most once per UTC day, on the first wake-up at or after the
//! configured hour. The core is synchronous, so each run happens on the
//! blocking pool inside its own [`StoreSession`]: the store is opened fresh,
//! swept, saved and released. Approvals and grades made by other processes
//! between runs are seen by the next run. A run whose save loses a race with
//! another writer is discarded and retried on the next tick.
//!
//! ## Lifecycle
//!
//! - [`SweepScheduler::shutdown`] asks the task to stop after the current run
//! - [`SweepScheduler::join`] waits for it to finish
//! - Dropping the handle detaches the task; it keeps running

use crate::config::{ScheduleConfig, StorageConfig};
use crate::storage::StoreSession;
use chrono::{DateTime, NaiveDate, Timelike, Utc};
use cursus_core::{CursusError, SweepReport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

/// Source of the current instant. Swapped out in tests.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Day to sweep for, or `None` when the sweep is not due yet.
#[must_use]
pub fn due_date(
    now: DateTime<Utc>,
    run_hour_utc: u32,
    last_run: Option<NaiveDate>,
) -> Option<NaiveDate> {
    let today = now.date_naive();
    if now.hour() < run_hour_utc {
        return None;
    }
    match last_run {
        Some(done) if done >= today => None,
        _ => Some(today),
    }
}

/// Handle to the running scheduler task.
#[derive(Debug)]
pub struct SweepScheduler {
    stop: Arc<Notify>,
    reports: watch::Receiver<Option<SweepReport>>,
    handle: JoinHandle<()>,
}

impl SweepScheduler {
    /// Spawn on the current runtime using the wall clock.
    #[must_use]
    pub fn spawn(storage: StorageConfig, schedule: &ScheduleConfig) -> Self {
        Self::spawn_with_clock(
            storage,
            schedule.run_hour_utc,
            schedule.interval(),
            Arc::new(Utc::now),
        )
    }

    #[must_use]
    pub fn spawn_with_clock(
        storage: StorageConfig,
        run_hour_utc: u32,
        interval: Duration,
        clock: Clock,
    ) -> Self {
        let stop = Arc::new(Notify::new());
        let (report_tx, reports) = watch::channel(None);

        info!(
            run_hour_utc,
            interval_secs = interval.as_secs(),
            "sweep scheduler started"
        );
        let handle = tokio::spawn(run_loop(
            storage,
            run_hour_utc,
            interval,
            clock,
            Arc::clone(&stop),
            report_tx,
        ));

        Self {
            stop,
            reports,
            handle,
        }
    }

    /// Latest sweep report; `None` until the first run.
    #[must_use]
    pub fn reports(&self) -> watch::Receiver<Option<SweepReport>> {
        self.reports.clone()
    }

    /// Ask the task to stop. A sweep already running completes first.
    pub fn shutdown(&self) {
        // notify_one stores a permit, so a stop sent mid-run is not lost
        self.stop.notify_one();
    }

    /// Wait for the task to exit.
    pub async fn join(self) {
        if let Err(e) = self.handle.await {
            error!(error = %e, "sweep scheduler task failed");
        }
    }
}

async fn run_loop(
    storage: StorageConfig,
    run_hour_utc: u32,
    interval: Duration,
    clock: Clock,
    stop: Arc<Notify>,
    report_tx: watch::Sender<Option<SweepReport>>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_run: Option<NaiveDate> = None;

    loop {
        tokio::select! {
            biased;
            () = stop.notified() => break,
            _ = ticker.tick() => {
                let Some(today) = due_date(clock(), run_hour_utc, last_run) else {
                    continue;
                };
                match sweep_once(&storage, today).await {
                    Ok(report) => {
                        last_run = Some(today);
                        report_tx.send_replace(Some(report));
                    }
                    // Left unmarked so the next tick retries the day
                    Err(e) => error!(%today, error = %e, "scheduled sweep failed"),
                }
            }
        }
    }

    info!("sweep scheduler stopped");
}

/// Run one sweep on the blocking pool and persist the result.
pub async fn sweep_once(
    storage: &StorageConfig,
    today: NaiveDate,
) -> Result<SweepReport, CursusError> {
    let storage = storage.clone();

    let joined = tokio::task::spawn_blocking(move || {
        let mut session = StoreSession::open(&storage)?;
        let report = session.registrar_mut().run_scheduled_sweep(today);
        session.commit()?;
        Ok::<_, CursusError>(report)
    })
    .await
    .map_err(|e| CursusError::IoError(format!("sweep task: {}", e)))?;

    let report = joined?;
    if !report.issues.is_empty() {
        warn!(
            %today,
            issues = report.issues.len(),
            mutations = report.mutations(),
            "scheduled sweep finished with issues"
        );
    }
    Ok(report)
}

// =============================================================================
// TESTS
// =============================================================================
