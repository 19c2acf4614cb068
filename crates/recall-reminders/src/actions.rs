//! Inline action payloads and the callback token protocol.
//!
//! Every delivered reminder carries rows of labeled buttons. Each button holds
//! an opaque token of the form `<action>:<reminder_id>[:<param>]` that comes
//! back verbatim when the user taps it.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ReminderError;

pub const SNOOZE_ACTION: &str = "snooze";
pub const RESCHEDULE_ACTION: &str = "reschedule";
pub const TOMORROW: &str = "tomorrow";

/// Label of the trailing "tomorrow" button.
pub const RESCHEDULE_LABEL: &str = "Postpone to tomorrow";

/// Naive timestamp layouts accepted for absolute reschedules, read as UTC.
const NAIVE_TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Rows of labeled actions attached to a message.
///
/// Serializes as a Telegram-style inline keyboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionPayload {
    #[serde(rename = "inline_keyboard")]
    pub rows: Vec<Vec<ActionButton>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionButton {
    pub text: String,
    #[serde(rename = "callback_data")]
    pub token: String,
}

impl ActionPayload {
    /// One row per snooze option, then a "postpone to tomorrow" row.
    pub fn for_reminder(reminder_id: &str, snooze_options: &[Duration]) -> Self {
        let mut rows: Vec<Vec<ActionButton>> = snooze_options
            .iter()
            .map(|option| {
                let token = CallbackToken {
                    reminder_id: reminder_id.to_string(),
                    action: CallbackAction::Snooze {
                        seconds: Some(option.num_seconds().max(0) as u64),
                    },
                };
                vec![ActionButton {
                    text: snooze_label(*option),
                    token: token.to_string(),
                }]
            })
            .collect();

        let tomorrow = CallbackToken {
            reminder_id: reminder_id.to_string(),
            action: CallbackAction::Reschedule(RescheduleTarget::Tomorrow),
        };
        rows.push(vec![ActionButton {
            text: RESCHEDULE_LABEL.to_string(),
            token: tomorrow.to_string(),
        }]);

        Self { rows }
    }

    /// All tokens in display order.
    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.rows.iter().flatten().map(|b| b.token.as_str())
    }
}

/// Button label for a snooze duration: minutes below one hour, whole hours above.
pub fn snooze_label(delay: Duration) -> String {
    let minutes = delay.num_minutes();
    if minutes < 60 {
        format!("Snooze {} min", minutes)
    } else {
        format!("Snooze {} h", minutes / 60)
    }
}

/// Target of a reschedule action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RescheduleTarget {
    /// Next day at the canonical time of day.
    Tomorrow,
    /// An absolute instant.
    At(DateTime<Utc>),
}

/// What a callback token asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackAction {
    /// Postpone by a number of seconds, or by the user's frequency if absent.
    Snooze { seconds: Option<u64> },
    Reschedule(RescheduleTarget),
    /// Syntactically valid but not understood.
    Other {
        action: String,
        param: Option<String>,
    },
}

/// A decoded callback token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackToken {
    pub reminder_id: String,
    pub action: CallbackAction,
}

impl FromStr for CallbackToken {
    type Err = ReminderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = |reason: &str| ReminderError::MalformedCallback(format!("{s:?}: {reason}"));

        let mut parts = s.splitn(3, ':');
        let action = parts.next().unwrap_or_default();
        let reminder_id = parts
            .next()
            .ok_or_else(|| malformed("expected <action>:<reminder_id>"))?;
        let param = parts.next();

        if action.is_empty() {
            return Err(malformed("empty action"));
        }
        if reminder_id.is_empty() {
            return Err(malformed("empty reminder id"));
        }

        let action = match action {
            SNOOZE_ACTION => {
                // Only the first segment counts; anything after another ':' is ignored
                let seconds = param
                    .map(|p| {
                        let raw = p.split(':').next().unwrap_or_default();
                        let secs = raw
                            .parse::<u64>()
                            .map_err(|_| malformed("snooze parameter must be whole seconds"))?;
                        snooze_delay(secs)
                            .map(|_| secs)
                            .ok_or_else(|| malformed("snooze parameter out of range"))
                    })
                    .transpose()?;
                CallbackAction::Snooze { seconds }
            }
            RESCHEDULE_ACTION => match param {
                None | Some(TOMORROW) => CallbackAction::Reschedule(RescheduleTarget::Tomorrow),
                Some(raw) => {
                    let at = parse_timestamp(raw)
                        .ok_or_else(|| malformed("reschedule target is not a timestamp"))?;
                    CallbackAction::Reschedule(RescheduleTarget::At(at))
                }
            },
            other => CallbackAction::Other {
                action: other.to_string(),
                param: param.map(str::to_string),
            },
        };

        Ok(Self {
            reminder_id: reminder_id.to_string(),
            action,
        })
    }
}

impl fmt::Display for CallbackToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = &self.reminder_id;
        match &self.action {
            CallbackAction::Snooze { seconds: Some(secs) } => {
                write!(f, "{SNOOZE_ACTION}:{id}:{secs}")
            }
            CallbackAction::Snooze { seconds: None } => write!(f, "{SNOOZE_ACTION}:{id}"),
            CallbackAction::Reschedule(RescheduleTarget::Tomorrow) => {
                write!(f, "{RESCHEDULE_ACTION}:{id}:{TOMORROW}")
            }
            CallbackAction::Reschedule(RescheduleTarget::At(at)) => {
                write!(f, "{RESCHEDULE_ACTION}:{id}:{}", at.to_rfc3339())
            }
            CallbackAction::Other {
                action,
                param: Some(param),
            } => write!(f, "{action}:{id}:{param}"),
            CallbackAction::Other {
                action,
                param: None,
            } => write!(f, "{action}:{id}"),
        }
    }
}

/// Snooze length for a number of seconds, if it fits in a `Duration`.
pub(crate) fn snooze_delay(secs: u64) -> Option<Duration> {
    i64::try_from(secs).ok().and_then(Duration::try_seconds)
}

/// Parse an ISO-8601 timestamp. Offsets are honored; naive values are UTC.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Some(at.with_timezone(&Utc));
    }
    NAIVE_TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}
