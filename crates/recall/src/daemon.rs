//! Daemon command for running Recall's delivery loop.
//!
//! Two tasks share one notification service:
//! - The reminder scheduler sweeps due reminders on a fixed interval
//! - A callback poller long-polls the Bot API for inline button taps

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveTime, Utc};
use miette::Result;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use recall_reminders::{
    CallbackOutcome, FileReminderRepository, InMemoryNotificationSettingsProvider,
    NotificationService, NotificationSettings, Reminder, ReminderError, ReminderScheduler,
    SchedulerConfig, ServiceConfig, SweepReport,
};
use recall_telegram::{TelegramClient, TelegramError, Update};

/// Default sweep interval in seconds.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;

/// Default long-poll timeout for `getUpdates` in seconds.
pub const DEFAULT_UPDATES_TIMEOUT_SECS: u64 = 30;

/// Pause after a failed `getUpdates` call when the API gives no hint.
const DEFAULT_ERROR_BACKOFF_SECS: u64 = 5;

/// Configuration for the daemon.
pub struct DaemonConfig {
    pub bot_token: String,
    pub api_url: String,
    pub reminders_file: PathBuf,
    /// Optional JSON array of per-user settings.
    pub settings_file: Option<PathBuf>,
    /// Snooze button durations in seconds.
    pub snooze_secs: Vec<u64>,
    /// Time of day that "tomorrow" resolves to.
    pub reschedule_at: NaiveTime,
    /// Sweep interval in seconds.
    pub poll_interval: u64,
    /// Long-poll timeout for button taps in seconds.
    pub updates_timeout: u64,
}

impl DaemonConfig {
    fn service_config(&self) -> ServiceConfig {
        let snooze_options = self
            .snooze_secs
            .iter()
            .filter_map(|secs| crate::snooze_duration(*secs))
            .collect();
        ServiceConfig::default()
            .with_snooze_options(snooze_options)
            .with_reschedule_time(self.reschedule_at)
    }
}

/// Load per-user settings from a JSON array, or start empty.
pub(crate) async fn load_settings(
    path: Option<&Path>,
) -> Result<InMemoryNotificationSettingsProvider> {
    let Some(path) = path else {
        return Ok(InMemoryNotificationSettingsProvider::default());
    };

    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| miette::miette!("failed to read settings file {}: {}", path.display(), e))?;
    let settings: Vec<NotificationSettings> = serde_json::from_str(&contents)
        .map_err(|e| miette::miette!("invalid settings file {}: {}", path.display(), e))?;

    info!(path = %path.display(), users = settings.len(), "loaded notification settings");
    Ok(InMemoryNotificationSettingsProvider::new(settings))
}

/// Wire the repository, settings, transport and service from the config.
async fn build_service(
    config: &DaemonConfig,
) -> Result<(Arc<NotificationService>, Arc<TelegramClient>)> {
    let repository = FileReminderRepository::open(&config.reminders_file)
        .await
        .map_err(|e| miette::miette!("{}", e))?;
    info!(path = %repository.path().display(), "opened reminder store");

    let settings = load_settings(config.settings_file.as_deref()).await?;
    let client = Arc::new(TelegramClient::with_api_url(
        config.bot_token.clone(),
        config.api_url.clone(),
    ));

    let service = NotificationService::new(Arc::new(repository), client.clone(), Arc::new(settings))
        .with_config(config.service_config());
    Ok((Arc::new(service), client))
}

/// Store a reminder and exit.
pub async fn add_reminder(config: DaemonConfig, reminder: Reminder) -> Result<()> {
    let (service, _) = build_service(&config).await?;
    let id = reminder.id.clone();
    let scheduled_at = reminder.scheduled_at;
    service
        .add_reminder(reminder)
        .await
        .map_err(|e| miette::miette!("{}", e))?;
    println!("Added reminder {} for {}", id, scheduled_at.to_rfc3339());
    Ok(())
}

/// Run a single sweep and exit.
pub async fn sweep_once(config: DaemonConfig) -> Result<()> {
    let (service, _) = build_service(&config).await?;
    let scheduler = ReminderScheduler::new(service, SchedulerConfig::default());
    let report = scheduler
        .run_pending()
        .await
        .map_err(|e| miette::miette!("{}", e))?;

    print!("{}", summarize(&report));
    Ok(())
}

/// Human-readable sweep summary, one failure per line.
fn summarize(report: &SweepReport) -> String {
    let mut out = format!(
        "Sent {}, deferred {}, vanished {}, failed {}\n",
        report.sent,
        report.deferred,
        report.vanished,
        report.failures.len()
    );
    for failure in &report.failures {
        out.push_str(&format!("  {}: {}\n", failure.reminder_id, failure.error));
    }
    out
}

/// Run the daemon until Ctrl-C.
pub async fn run(config: DaemonConfig) -> Result<()> {
    let (service, client) = build_service(&config).await?;

    let scheduler = ReminderScheduler::new(
        Arc::clone(&service),
        SchedulerConfig {
            poll_interval: Duration::from_secs(config.poll_interval),
        },
    );

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Handle shutdown signals
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    scheduler.start();

    let poller = tokio::spawn(poll_callbacks(
        service,
        client,
        config.updates_timeout,
        shutdown_rx,
    ));

    if let Err(e) = poller.await {
        error!(error = %e, "callback poller panicked");
    }
    scheduler.stop().await;

    info!("daemon stopped");
    Ok(())
}

/// Long-poll for button taps and hand them to the service.
async fn poll_callbacks(
    service: Arc<NotificationService>,
    client: Arc<TelegramClient>,
    timeout_secs: u64,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut offset: Option<i64> = None;
    info!(timeout_secs, "callback poller started");

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let result = tokio::select! {
            biased;
            _ = shutdown_rx.changed() => break,
            result = client.get_updates(offset, timeout_secs) => result,
        };

        let pause = match result {
            Ok(updates) => {
                if let Some(next) = next_offset(&updates) {
                    offset = Some(next);
                }
                for update in updates {
                    dispatch(&service, update).await;
                }
                continue;
            }
            Err(TelegramError::RateLimited { retry_after_secs }) => {
                let secs = retry_after_secs.unwrap_or(DEFAULT_ERROR_BACKOFF_SECS);
                warn!(retry_after_secs = secs, "rate limited while polling updates");
                Duration::from_secs(secs)
            }
            Err(e) => {
                warn!(error = %e, "failed to poll updates");
                Duration::from_secs(DEFAULT_ERROR_BACKOFF_SECS)
            }
        };

        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = tokio::time::sleep(pause) => {}
        }
    }

    info!("callback poller stopped");
}

/// Offset acknowledging every update in the batch.
fn next_offset(updates: &[Update]) -> Option<i64> {
    updates.iter().map(|u| u.update_id + 1).max()
}

async fn dispatch(service: &NotificationService, update: Update) {
    let Some(query) = update.callback_query else {
        debug!(update_id = update.update_id, "ignoring non-callback update");
        return;
    };
    let data = query.data.unwrap_or_default();

    match service.handle_callback(&query.id, &data, Utc::now()).await {
        Ok(CallbackOutcome::UnknownReminder { reminder_id }) => {
            info!(%reminder_id, user_id = query.from.id, "callback for unknown reminder");
        }
        Ok(outcome) => {
            debug!(?outcome, user_id = query.from.id, "callback handled");
        }
        Err(ReminderError::MalformedCallback(token)) => {
            warn!(%token, user_id = query.from.id, "malformed callback token");
        }
        Err(e) => {
            error!(error = %e, callback_id = %query.id, "failed to handle callback");
        }
    }
}
