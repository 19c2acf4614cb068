//! Reminder delivery and callback handling.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveTime, Utc};
use tracing::{debug, error, info, warn};

use crate::{
    ActionPayload, CallbackAction, CallbackToken, NotificationSettingsProvider,
    NotificationTransport, Reminder, ReminderError, ReminderRepository, RescheduleTarget,
    actions::snooze_delay,
};

/// Acknowledgment shown after a snooze.
pub const ACK_SNOOZED: &str = "Reminder snoozed";
/// Acknowledgment shown after a reschedule.
pub const ACK_RESCHEDULED: &str = "Reminder rescheduled";
/// Acknowledgment for a well-formed token with an unknown action.
pub const ACK_UNRECOGNIZED: &str = "Unknown action";
/// Acknowledgment when the reminder no longer exists.
pub const ACK_NOT_FOUND: &str = "Reminder not found";
/// Acknowledgment for a token that could not be decoded.
pub const ACK_MALFORMED: &str = "Could not process this action";

/// Tunables for [`NotificationService`].
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// One snooze button per entry, in order.
    pub snooze_options: Vec<Duration>,
    /// Time of day used by "postpone to tomorrow".
    pub reschedule_time: NaiveTime,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            snooze_options: vec![Duration::minutes(15), Duration::hours(1)],
            reschedule_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or_default(),
        }
    }
}

impl ServiceConfig {
    pub fn with_snooze_options(mut self, options: Vec<Duration>) -> Self {
        self.snooze_options = options;
        self
    }

    pub fn with_reschedule_time(mut self, time: NaiveTime) -> Self {
        self.reschedule_time = time;
        self
    }
}

/// A reminder that could not be processed during a sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepFailure {
    pub reminder_id: String,
    pub error: String,
}

/// Summary of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Reminders delivered through the transport.
    pub sent: usize,
    /// Reminders pushed to the end of quiet hours.
    pub deferred: usize,
    /// Reminders deleted while the sweep was running.
    pub vanished: usize,
    /// Reminders left untouched because of a transport or storage error.
    pub failures: Vec<SweepFailure>,
}

/// Result of a handled callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    Snoozed { until: DateTime<Utc> },
    Rescheduled { until: DateTime<Utc> },
    Unrecognized { action: String },
    UnknownReminder { reminder_id: String },
}

enum Delivery {
    Sent,
    Deferred,
}

/// Sends due reminders and reacts to inline actions.
pub struct NotificationService {
    repository: Arc<dyn ReminderRepository>,
    transport: Arc<dyn NotificationTransport>,
    settings: Arc<dyn NotificationSettingsProvider>,
    config: ServiceConfig,
}

impl NotificationService {
    pub fn new(
        repository: Arc<dyn ReminderRepository>,
        transport: Arc<dyn NotificationTransport>,
        settings: Arc<dyn NotificationSettingsProvider>,
    ) -> Self {
        Self {
            repository,
            transport,
            settings,
            config: ServiceConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ServiceConfig) -> Self {
        self.config = config;
        self
    }

    /// Inline actions offered with a reminder.
    pub fn build_actions(&self, reminder_id: &str) -> ActionPayload {
        ActionPayload::for_reminder(reminder_id, &self.config.snooze_options)
    }

    /// Store a new reminder with its default actions attached.
    ///
    /// The id must be non-empty and free of `:` so that its callback tokens
    /// parse back to the same reminder.
    #[tracing::instrument(skip(self, reminder), fields(reminder_id = %reminder.id))]
    pub async fn add_reminder(&self, mut reminder: Reminder) -> Result<(), ReminderError> {
        if reminder.id.is_empty() || reminder.id.contains(':') {
            return Err(ReminderError::InvalidReminder(format!(
                "id {:?} must be non-empty and must not contain ':'",
                reminder.id
            )));
        }
        reminder.actions = Some(self.build_actions(&reminder.id));
        self.repository.add(reminder).await
    }

    /// Process every reminder due at `now`.
    ///
    /// Reminders are handled one at a time. A failure on one reminder is
    /// logged and recorded in the report; the rest are still processed.
    #[tracing::instrument(skip(self))]
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, ReminderError> {
        let due = self.repository.list_due(now).await?;
        let mut report = SweepReport::default();

        if due.is_empty() {
            debug!("no due reminders");
            return Ok(report);
        }

        debug!(count = due.len(), "processing due reminders");

        for reminder in due {
            let reminder_id = reminder.id.clone();
            match self.deliver(reminder, now).await {
                Ok(Delivery::Sent) => report.sent += 1,
                Ok(Delivery::Deferred) => report.deferred += 1,
                Err(ReminderError::NotFound(_)) => {
                    warn!(reminder_id = %reminder_id, "reminder removed during sweep, skipping");
                    report.vanished += 1;
                }
                Err(e) => {
                    error!(reminder_id = %reminder_id, error = %e, "failed to process reminder");
                    report.failures.push(SweepFailure {
                        reminder_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            sent = report.sent,
            deferred = report.deferred,
            vanished = report.vanished,
            failed = report.failures.len(),
            "sweep complete"
        );
        Ok(report)
    }

    async fn deliver(
        &self,
        mut reminder: Reminder,
        now: DateTime<Utc>,
    ) -> Result<Delivery, ReminderError> {
        let settings = self.settings.get_settings(reminder.user_id).await;

        if settings.is_quiet(now) {
            let until = settings.next_allowed(now);
            reminder.postpone(until);
            self.repository.update(reminder).await?;
            debug!(user_id = settings.user_id, until = %until, "quiet hours, delivery deferred");
            return Ok(Delivery::Deferred);
        }

        // An unrepresentable next slot fails the reminder before anything is sent
        let next = now.checked_add_signed(settings.frequency).ok_or_else(|| {
            ReminderError::ScheduleOutOfRange(format!(
                "frequency of {}s for user {}",
                settings.frequency.num_seconds(),
                settings.user_id
            ))
        })?;

        let actions = self.build_actions(&reminder.id);
        self.transport
            .send_message(reminder.chat_id, &reminder.message, Some(&actions))
            .await
            .map_err(ReminderError::Transport)?;

        reminder.actions = Some(actions);
        reminder.postpone(next);
        info!(reminder_id = %reminder.id, chat_id = reminder.chat_id, next = %next, "reminder sent");
        self.repository.update(reminder).await?;

        Ok(Delivery::Sent)
    }

    /// Handle an inline action tap.
    ///
    /// The callback is always answered exactly once. A malformed token is
    /// answered with a generic failure and then returned as
    /// [`ReminderError::MalformedCallback`]; an unknown reminder is answered
    /// and reported as [`CallbackOutcome::UnknownReminder`].
    #[tracing::instrument(skip(self))]
    pub async fn handle_callback(
        &self,
        callback_id: &str,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<CallbackOutcome, ReminderError> {
        let token: CallbackToken = match token.parse() {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "rejecting malformed callback");
                self.answer(callback_id, ACK_MALFORMED).await?;
                return Err(e);
            }
        };

        let CallbackToken {
            reminder_id,
            action,
        } = token;

        let mut reminder = match self.repository.get(&reminder_id).await {
            Ok(reminder) => reminder,
            Err(ReminderError::NotFound(_)) => return self.unknown(callback_id, reminder_id).await,
            Err(e) => return Err(e),
        };

        let (until, outcome, ack) = match action {
            CallbackAction::Snooze { seconds } => {
                let delay = match seconds {
                    Some(secs) => snooze_delay(secs),
                    None => Some(self.settings.get_settings(reminder.user_id).await.frequency),
                };
                let Some(until) = delay.and_then(|d| now.checked_add_signed(d)) else {
                    return self.out_of_range(callback_id, &reminder_id).await;
                };
                (until, CallbackOutcome::Snoozed { until }, ACK_SNOOZED)
            }
            CallbackAction::Reschedule(target) => {
                let until = match target {
                    RescheduleTarget::Tomorrow => match self.tomorrow(now) {
                        Some(until) => until,
                        None => return self.out_of_range(callback_id, &reminder_id).await,
                    },
                    RescheduleTarget::At(at) => at,
                };
                (until, CallbackOutcome::Rescheduled { until }, ACK_RESCHEDULED)
            }
            CallbackAction::Other { action, .. } => {
                debug!(action = %action, "unrecognized callback action");
                self.answer(callback_id, ACK_UNRECOGNIZED).await?;
                return Ok(CallbackOutcome::Unrecognized { action });
            }
        };

        reminder.postpone(until);
        match self.repository.update(reminder).await {
            Ok(()) => {}
            Err(ReminderError::NotFound(_)) => return self.unknown(callback_id, reminder_id).await,
            Err(e) => return Err(e),
        }

        info!(reminder_id = %reminder_id, until = %until, "reminder moved by user");
        self.answer(callback_id, ack).await?;
        Ok(outcome)
    }

    /// Next day at the configured reschedule time.
    fn tomorrow(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let day = now.date_naive().succ_opt()?;
        Some(day.and_time(self.config.reschedule_time).and_utc())
    }

    /// A well-formed token whose target instant cannot be represented.
    async fn out_of_range(
        &self,
        callback_id: &str,
        reminder_id: &str,
    ) -> Result<CallbackOutcome, ReminderError> {
        warn!(reminder_id = %reminder_id, "callback target out of range");
        self.answer(callback_id, ACK_MALFORMED).await?;
        Err(ReminderError::MalformedCallback(format!(
            "target time for {reminder_id} is out of range"
        )))
    }

    async fn unknown(
        &self,
        callback_id: &str,
        reminder_id: String,
    ) -> Result<CallbackOutcome, ReminderError> {
        warn!(reminder_id = %reminder_id, "callback for unknown reminder");
        self.answer(callback_id, ACK_NOT_FOUND).await?;
        Ok(CallbackOutcome::UnknownReminder { reminder_id })
    }

    async fn answer(&self, callback_id: &str, text: &str) -> Result<(), ReminderError> {
        self.transport
            .answer_callback(callback_id, Some(text))
            .await
            .map_err(ReminderError::Transport)
    }
}
