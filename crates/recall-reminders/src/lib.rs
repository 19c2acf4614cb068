//! Reminder scheduling and dispatch for Recall.
//!
//! This crate provides:
//! - Reminder and per-user notification settings types, including quiet hours
//! - Repositories for reminders (in-memory and JSON file)
//! - A notification service that sweeps due reminders and handles
//!   snooze/reschedule callbacks
//! - A background scheduler with safe start/stop

mod actions;
mod error;
mod file;
mod repository;
mod scheduler;
mod service;
mod settings;
mod transport;
mod types;

pub use actions::{
    ActionButton, ActionPayload, CallbackAction, CallbackToken, RESCHEDULE_ACTION,
    RESCHEDULE_LABEL, RescheduleTarget, SNOOZE_ACTION, TOMORROW, snooze_label,
};
pub use error::{ReminderError, TransportError};
pub use file::FileReminderRepository;
pub use repository::{InMemoryReminderRepository, ReminderRepository};
pub use scheduler::{Clock, ReminderScheduler, SchedulerConfig};
pub use service::{
    ACK_MALFORMED, ACK_NOT_FOUND, ACK_RESCHEDULED, ACK_SNOOZED, ACK_UNRECOGNIZED,
    CallbackOutcome, NotificationService, ServiceConfig, SweepFailure, SweepReport,
};
pub use settings::{InMemoryNotificationSettingsProvider, NotificationSettingsProvider};
pub use transport::NotificationTransport;
pub use types::{DEFAULT_FREQUENCY_SECS, NotificationSettings, Reminder};
