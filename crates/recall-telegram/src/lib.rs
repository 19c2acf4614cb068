//! Telegram Bot API transport for Recall.
//!
//! Provides [`TelegramClient`], which implements
//! [`recall_reminders::NotificationTransport`] for delivering reminders with
//! inline keyboards, plus long-polling of callback queries for the daemon.

mod client;
mod error;
mod types;

pub use client::{DEFAULT_API_URL, TelegramClient};
pub use error::TelegramError;
pub use types::{CallbackQuery, Chat, Message, Update, User};
