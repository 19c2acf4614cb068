//! Recall: spaced-repetition practice reminders over Telegram
//!
//! Main binary with subcommands:
//! - `daemon`: Scheduler loop plus callback polling
//! - `sweep`: Run a single delivery pass and exit
//! - `add`: Store a new reminder

use std::path::PathBuf;

use chrono::{DateTime, NaiveTime, Utc};
use clap::{Parser, Subcommand};
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod daemon;

/// Parse a comma-separated list of snooze durations in seconds.
fn parse_snooze_list(s: &str) -> Result<Vec<u64>, String> {
    s.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<u64>()
                .map_err(|_| format!("invalid snooze duration '{}', expected seconds", part))
                .and_then(|secs| {
                    if secs == 0 {
                        Err("snooze duration must be positive".to_string())
                    } else if snooze_duration(secs).is_none() {
                        Err(format!("snooze duration '{}' is too large", part))
                    } else {
                        Ok(secs)
                    }
                })
        })
        .collect()
}

fn snooze_duration(secs: u64) -> Option<chrono::Duration> {
    i64::try_from(secs).ok().and_then(chrono::Duration::try_seconds)
}

/// Parse a time of day as `HH:MM` or `HH:MM:SS`.
fn parse_time_of_day(s: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .map_err(|_| format!("invalid time of day '{}', expected HH:MM", s))
}

#[derive(Parser)]
#[command(name = "recall")]
#[command(about = "Practice reminders with quiet hours and snooze", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every command that touches the reminder store.
#[derive(clap::Args)]
struct StoreArgs {
    /// Telegram bot token
    #[arg(long, env = "RECALL_TELEGRAM_TOKEN")]
    bot_token: String,

    /// Bot API root
    #[arg(long, env = "RECALL_TELEGRAM_API_URL", default_value = recall_telegram::DEFAULT_API_URL)]
    api_url: String,

    /// JSON file holding reminders
    #[arg(long, env = "RECALL_REMINDERS_FILE", default_value = "reminders.json")]
    reminders_file: PathBuf,

    /// Optional JSON array of per-user notification settings
    #[arg(long, env = "RECALL_SETTINGS_FILE")]
    settings_file: Option<PathBuf>,

    /// Snooze buttons, comma-separated seconds
    #[arg(long, value_parser = parse_snooze_list, default_value = "900,3600")]
    snooze: std::vec::Vec<u64>,

    /// Time of day used by "postpone to tomorrow" (UTC)
    #[arg(long, value_parser = parse_time_of_day, default_value = "09:00")]
    reschedule_at: NaiveTime,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler and answer inline button taps until Ctrl-C
    Daemon {
        #[command(flatten)]
        store: StoreArgs,

        /// Sweep interval in seconds
        #[arg(long, default_value = "60")]
        poll_interval: u64,

        /// Long-poll timeout for button taps in seconds
        #[arg(long, default_value = "30")]
        updates_timeout: u64,
    },

    /// Deliver everything due right now, then exit
    Sweep {
        #[command(flatten)]
        store: StoreArgs,
    },

    /// Store a new reminder
    Add {
        #[command(flatten)]
        store: StoreArgs,

        /// Unique reminder id (must not contain ':')
        #[arg(long)]
        id: String,

        /// Owning user id
        #[arg(long)]
        user: i64,

        /// Chat to deliver to
        #[arg(long)]
        chat: i64,

        /// Message text
        #[arg(long)]
        message: String,

        /// First delivery time (RFC 3339); defaults to now
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },
}

impl StoreArgs {
    fn into_config(self) -> daemon::DaemonConfig {
        daemon::DaemonConfig {
            bot_token: self.bot_token,
            api_url: self.api_url,
            reminders_file: self.reminders_file,
            settings_file: self.settings_file,
            snooze_secs: self.snooze,
            reschedule_at: self.reschedule_at,
            poll_interval: daemon::DEFAULT_POLL_INTERVAL_SECS,
            updates_timeout: daemon::DEFAULT_UPDATES_TIMEOUT_SECS,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| {
                "recall=info,recall_reminders=info,recall_telegram=info".to_string()
            }),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Daemon {
            store,
            poll_interval,
            updates_timeout,
        } => {
            let config = daemon::DaemonConfig {
                poll_interval,
                updates_timeout,
                ..store.into_config()
            };
            daemon::run(config).await
        }

        Commands::Sweep { store } => daemon::sweep_once(store.into_config()).await,

        Commands::Add {
            store,
            id,
            user,
            chat,
            message,
            at,
        } => {
            let reminder =
                recall_reminders::Reminder::new(id, user, chat, message, at.unwrap_or_else(Utc::now));
            daemon::add_reminder(store.into_config(), reminder).await
        }
    }
}
