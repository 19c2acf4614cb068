//! Error types for reminder scheduling.

use thiserror::Error;

/// Boxed error raised by a notification transport.
pub type TransportError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur in reminder operations.
#[derive(Debug, Error)]
pub enum ReminderError {
    /// Reminder is not stored in the repository.
    #[error("reminder not found: {0}")]
    NotFound(String),

    /// Callback token does not match `<action>:<reminder_id>[:<param>]`.
    #[error("malformed callback: {0}")]
    MalformedCallback(String),

    /// Callback references a reminder that is not stored.
    #[error("unknown reminder: {0}")]
    UnknownReminder(String),

    /// Reminder cannot be stored as given.
    #[error("invalid reminder: {0}")]
    InvalidReminder(String),

    /// A computed delivery time falls outside the representable range.
    #[error("schedule out of range: {0}")]
    ScheduleOutOfRange(String),

    /// Outbound notification transport failed.
    #[error("transport error: {0}")]
    Transport(#[source] TransportError),

    /// Repository backend failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
