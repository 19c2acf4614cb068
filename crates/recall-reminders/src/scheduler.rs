//! Background polling of the notification service.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::{NotificationService, ReminderError, SweepReport};

/// Default time between sweeps.
const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;

/// Source of "now" for each sweep.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub poll_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
        }
    }
}

struct Worker {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Runs [`NotificationService::sweep`] on a fixed interval in one background task.
pub struct ReminderScheduler {
    service: Arc<NotificationService>,
    poll_interval: Duration,
    clock: Clock,
    worker: Mutex<Option<Worker>>,
}

impl ReminderScheduler {
    pub fn new(service: Arc<NotificationService>, config: SchedulerConfig) -> Self {
        Self {
            service,
            poll_interval: config.poll_interval,
            clock: Arc::new(Utc::now),
            worker: Mutex::new(None),
        }
    }

    /// Replace the wall clock, e.g. with a fixed instant in tests.
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Whether a worker task is currently alive.
    pub fn is_running(&self) -> bool {
        self.lock_worker()
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }

    /// Spawn the worker task. Must be called inside a tokio runtime.
    ///
    /// Returns `false` without doing anything if a worker is already running.
    pub fn start(&self) -> bool {
        let mut worker = self.lock_worker();
        if worker.as_ref().is_some_and(|w| !w.handle.is_finished()) {
            debug!("scheduler already running");
            return false;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_loop(
            Arc::clone(&self.service),
            Arc::clone(&self.clock),
            self.poll_interval,
            shutdown_rx,
        ));

        *worker = Some(Worker {
            shutdown_tx,
            handle,
        });
        info!(poll_interval_ms = self.poll_interval.as_millis() as u64, "scheduler started");
        true
    }

    /// Signal the worker and wait for it to exit.
    ///
    /// A sweep already in progress is allowed to finish. Once this returns no
    /// further sweep runs until [`start`](Self::start) is called again.
    pub async fn stop(&self) {
        let Some(worker) = self.lock_worker().take() else {
            return;
        };

        let _ = worker.shutdown_tx.send(true);
        if let Err(e) = worker.handle.await {
            error!(error = %e, "scheduler task ended abnormally");
        }
        info!("scheduler stopped");
    }

    /// Run a single sweep now, outside the background loop.
    pub async fn run_pending(&self) -> Result<SweepReport, ReminderError> {
        let now = (self.clock)();
        self.service.sweep(now).await
    }

    fn lock_worker(&self) -> std::sync::MutexGuard<'_, Option<Worker>> {
        // The guarded state is a plain Option; a poisoned lock is still usable.
        self.worker.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for ReminderScheduler {
    fn drop(&mut self) {
        if let Some(worker) = self.lock_worker().take() {
            let _ = worker.shutdown_tx.send(true);
        }
    }
}

async fn run_loop(
    service: Arc<NotificationService>,
    clock: Clock,
    poll_interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let now = clock();
        if let Err(e) = service.sweep(now).await {
            warn!(error = %e, "sweep failed");
        }

        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    // Sender dropped along with the scheduler
                    break;
                }
            }
            _ = sleep(poll_interval) => {}
        }
    }

    debug!("scheduler loop exited");
}
