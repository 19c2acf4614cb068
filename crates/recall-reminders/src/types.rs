//! Reminder and delivery-policy types.

use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ActionPayload;

/// Frequency used when a user has no stored settings.
pub const DEFAULT_FREQUENCY_SECS: i64 = 24 * 60 * 60;

/// A scheduled notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reminder {
    /// Caller-supplied unique id. Must not contain `:`.
    pub id: String,
    /// Owning user.
    pub user_id: i64,
    /// Chat the notification is delivered to.
    pub chat_id: i64,
    /// Message text.
    pub message: String,
    /// When this reminder should next be delivered.
    pub scheduled_at: DateTime<Utc>,
    /// Inline actions attached to the most recent send.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<ActionPayload>,
}

impl Reminder {
    /// Create a reminder without attached actions.
    pub fn new(
        id: impl Into<String>,
        user_id: i64,
        chat_id: i64,
        message: impl Into<String>,
        scheduled_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            user_id,
            chat_id,
            message: message.into(),
            scheduled_at,
            actions: None,
        }
    }

    /// A reminder is due once its scheduled time has been reached.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_at <= now
    }

    /// Move the reminder to an absolute time.
    pub fn postpone(&mut self, at: DateTime<Utc>) {
        self.scheduled_at = at;
    }
}

/// Per-user delivery policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationSettings {
    pub user_id: i64,
    /// Added to "now" after a successful send.
    #[serde(with = "duration_secs", default = "default_frequency")]
    pub frequency: Duration,
    #[serde(default)]
    pub quiet_hours_start: Option<NaiveTime>,
    #[serde(default)]
    pub quiet_hours_end: Option<NaiveTime>,
}

fn default_frequency() -> Duration {
    Duration::seconds(DEFAULT_FREQUENCY_SECS)
}

impl NotificationSettings {
    /// Settings with a one-day frequency and no quiet hours.
    pub fn new(user_id: i64) -> Self {
        Self {
            user_id,
            frequency: default_frequency(),
            quiet_hours_start: None,
            quiet_hours_end: None,
        }
    }

    pub fn with_frequency(mut self, frequency: Duration) -> Self {
        self.frequency = frequency;
        self
    }

    pub fn with_quiet_hours(mut self, start: NaiveTime, end: NaiveTime) -> Self {
        self.quiet_hours_start = Some(start);
        self.quiet_hours_end = Some(end);
        self
    }

    /// The active quiet window, if any.
    ///
    /// Returns `None` when either bound is missing or both bounds are equal.
    pub fn quiet_window(&self) -> Option<(NaiveTime, NaiveTime)> {
        match (self.quiet_hours_start, self.quiet_hours_end) {
            (Some(start), Some(end)) if start != end => Some((start, end)),
            _ => None,
        }
    }

    /// Check whether `now` falls inside quiet hours.
    pub fn is_quiet(&self, now: DateTime<Utc>) -> bool {
        let Some((start, end)) = self.quiet_window() else {
            return false;
        };
        let time = now.time();

        if start < end {
            start <= time && time < end
        } else {
            // Window wraps midnight, e.g. 22:00 - 07:00
            time >= start || time < end
        }
    }

    /// First instant at or after `now` where delivery is allowed again.
    ///
    /// For a moment inside quiet hours this is the window's end boundary,
    /// which is always strictly after `now`. Returns `now` when quiet hours
    /// are disabled.
    pub fn next_allowed(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let Some((start, end)) = self.quiet_window() else {
            return now;
        };
        let today_end = now.date_naive().and_time(end).and_utc();

        if start < end {
            if today_end <= now {
                today_end + Duration::days(1)
            } else {
                today_end
            }
        } else if now.time() < end {
            today_end
        } else {
            today_end + Duration::days(1)
        }
    }
}

/// Serialize a `chrono::Duration` as whole seconds.
mod duration_secs {
    use chrono::Duration;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(value.num_seconds())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = i64::deserialize(deserializer)?;
        Duration::try_seconds(secs)
            .ok_or_else(|| D::Error::custom(format!("duration of {secs} seconds is out of range")))
    }
}
