//! End-to-end tests for the notification service and scheduler.
//!
//! A recording transport stands in for the chat platform so every outgoing
//! message and callback answer can be inspected.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use pretty_assertions::assert_eq;

use recall_reminders::{
    ACK_NOT_FOUND, ACK_SNOOZED, ActionPayload, CallbackOutcome,
    InMemoryNotificationSettingsProvider, InMemoryReminderRepository, NotificationService,
    NotificationSettings, NotificationTransport, Reminder, ReminderError, ReminderRepository,
    ReminderScheduler, SchedulerConfig, TransportError,
};

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Send {
        chat_id: i64,
        text: String,
        actions: Option<ActionPayload>,
    },
    Answer {
        callback_id: String,
        text: Option<String>,
    },
}

#[derive(Default)]
struct RecordingTransport {
    calls: Mutex<Vec<Call>>,
}

impl RecordingTransport {
    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn sends(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Send { .. }))
            .count()
    }
}

#[async_trait]
impl NotificationTransport for RecordingTransport {
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        actions: Option<&ActionPayload>,
    ) -> Result<(), TransportError> {
        self.calls.lock().unwrap().push(Call::Send {
            chat_id,
            text: text.to_string(),
            actions: actions.cloned(),
        });
        Ok(())
    }

    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
    ) -> Result<(), TransportError> {
        self.calls.lock().unwrap().push(Call::Answer {
            callback_id: callback_id.to_string(),
            text: text.map(str::to_string),
        });
        Ok(())
    }
}

struct Fixture {
    repo: Arc<InMemoryReminderRepository>,
    transport: Arc<RecordingTransport>,
    service: Arc<NotificationService>,
}

fn ts(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
}

async fn fixture() -> Fixture {
    let repo = Arc::new(InMemoryReminderRepository::new());
    let transport = Arc::new(RecordingTransport::default());
    let settings = Arc::new(InMemoryNotificationSettingsProvider::new([
        NotificationSettings::new(1)
            .with_frequency(Duration::hours(6))
            .with_quiet_hours(
                NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
                NaiveTime::from_hms_opt(7, 0, 0).unwrap(),
            ),
    ]));
    let service = Arc::new(NotificationService::new(
        repo.clone(),
        transport.clone(),
        settings,
    ));

    service
        .add_reminder(Reminder::new(
            "rem-1",
            1,
            100,
            "Time to repeat your exercises",
            ts(2023, 1, 1, 21, 0),
        ))
        .await
        .unwrap();

    Fixture {
        repo,
        transport,
        service,
    }
}

async fn make_due(repo: &InMemoryReminderRepository, at: DateTime<Utc>) {
    let mut reminder = repo.get("rem-1").await.unwrap();
    reminder.postpone(at);
    repo.update(reminder).await.unwrap();
}

#[tokio::test]
async fn quiet_hours_defer_to_next_morning() {
    let f = fixture().await;

    let report = f.service.sweep(ts(2023, 1, 1, 23, 0)).await.unwrap();

    assert_eq!(report.deferred, 1);
    assert_eq!(report.sent, 0);
    assert!(f.transport.calls().is_empty());
    assert_eq!(
        f.repo.get("rem-1").await.unwrap().scheduled_at,
        ts(2023, 1, 2, 7, 0)
    );
}

#[tokio::test]
async fn deferred_reminder_is_sent_once_window_ends() {
    let f = fixture().await;

    f.service.sweep(ts(2023, 1, 1, 23, 0)).await.unwrap();
    // Still quiet and not yet due
    f.service.sweep(ts(2023, 1, 2, 3, 0)).await.unwrap();
    assert_eq!(f.transport.sends(), 0);

    let report = f.service.sweep(ts(2023, 1, 2, 7, 0)).await.unwrap();
    assert_eq!(report.sent, 1);
    assert_eq!(f.transport.sends(), 1);
}

#[tokio::test]
async fn due_reminder_sent_with_inline_actions() {
    let f = fixture().await;
    let now = ts(2023, 1, 2, 10, 0);
    make_due(&f.repo, now - Duration::minutes(1)).await;

    let report = f.service.sweep(now).await.unwrap();
    assert_eq!(report.sent, 1);

    let calls = f.transport.calls();
    assert_eq!(calls.len(), 1);
    let Call::Send {
        chat_id,
        text,
        actions,
    } = &calls[0]
    else {
        panic!("expected a send, got {:?}", calls[0]);
    };
    assert_eq!(*chat_id, 100);
    assert_eq!(text, "Time to repeat your exercises");

    let tokens: Vec<&str> = actions.as_ref().unwrap().tokens().collect();
    assert!(tokens.iter().any(|t| t.starts_with("snooze:rem-1:")));
    assert_eq!(tokens.last(), Some(&"reschedule:rem-1:tomorrow"));

    let stored = f.repo.get("rem-1").await.unwrap();
    assert_eq!(stored.scheduled_at, now + Duration::hours(6));
    assert_eq!(stored.actions.as_ref(), actions.as_ref());
}

#[tokio::test]
async fn second_sweep_at_same_instant_sends_nothing() {
    let f = fixture().await;
    let now = ts(2023, 1, 2, 10, 0);
    make_due(&f.repo, now).await;

    f.service.sweep(now).await.unwrap();
    let report = f.service.sweep(now).await.unwrap();

    assert_eq!(report.sent, 0);
    assert_eq!(f.transport.sends(), 1);
}

#[tokio::test]
async fn snooze_callback_postpones_and_answers_once() {
    let f = fixture().await;
    let now = ts(2023, 1, 2, 10, 0);

    let outcome = f
        .service
        .handle_callback("cbq", "snooze:rem-1:900", now)
        .await
        .unwrap();

    let until = now + Duration::seconds(900);
    assert_eq!(outcome, CallbackOutcome::Snoozed { until });
    assert_eq!(f.repo.get("rem-1").await.unwrap().scheduled_at, until);
    assert_eq!(
        f.transport.calls(),
        vec![Call::Answer {
            callback_id: "cbq".to_string(),
            text: Some(ACK_SNOOZED.to_string()),
        }]
    );
}

#[tokio::test]
async fn reschedule_tomorrow_lands_at_nine() {
    let f = fixture().await;

    for now in [
        ts(2023, 1, 2, 0, 5),
        ts(2023, 1, 2, 10, 0),
        Utc.with_ymd_and_hms(2023, 1, 2, 23, 59, 59).unwrap(),
    ] {
        f.service
            .handle_callback("cbq", "reschedule:rem-1:tomorrow", now)
            .await
            .unwrap();
        assert_eq!(
            f.repo.get("rem-1").await.unwrap().scheduled_at,
            ts(2023, 1, 3, 9, 0)
        );
    }
}

#[tokio::test]
async fn removed_reminder_is_skipped_by_sweep() {
    let f = fixture().await;
    let now = ts(2023, 1, 2, 10, 0);
    make_due(&f.repo, now).await;
    f.repo.remove("rem-1").await.unwrap();

    let report = f.service.sweep(now).await.unwrap();
    assert_eq!(report, Default::default());
}

/// Deletes one reminder the moment anyone tries to write it back, as an
/// external removal racing a sweep or a button tap would.
struct RemovedOnWrite {
    inner: InMemoryReminderRepository,
    doomed: String,
}

#[async_trait]
impl ReminderRepository for RemovedOnWrite {
    async fn add(&self, reminder: Reminder) -> Result<(), ReminderError> {
        self.inner.add(reminder).await
    }

    async fn get(&self, id: &str) -> Result<Reminder, ReminderError> {
        self.inner.get(id).await
    }

    async fn update(&self, reminder: Reminder) -> Result<(), ReminderError> {
        if reminder.id == self.doomed {
            self.inner.remove(&reminder.id).await?;
        }
        self.inner.update(reminder).await
    }

    async fn remove(&self, id: &str) -> Result<(), ReminderError> {
        self.inner.remove(id).await
    }

    async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<Reminder>, ReminderError> {
        self.inner.list_due(now).await
    }
}

async fn racing_fixture(
    now: DateTime<Utc>,
) -> (
    Arc<RemovedOnWrite>,
    Arc<RecordingTransport>,
    NotificationService,
) {
    let repo = Arc::new(RemovedOnWrite {
        inner: InMemoryReminderRepository::new(),
        doomed: "gone".to_string(),
    });
    repo.add(Reminder::new("gone", 1, 100, "Deleted meanwhile", now))
        .await
        .unwrap();
    repo.add(Reminder::new("kept", 1, 200, "Still here", now))
        .await
        .unwrap();

    let transport = Arc::new(RecordingTransport::default());
    let service = NotificationService::new(
        repo.clone(),
        transport.clone(),
        Arc::new(InMemoryNotificationSettingsProvider::default()),
    );
    (repo, transport, service)
}

#[tokio::test]
async fn reminder_removed_mid_sweep_is_counted_as_vanished() {
    let now = ts(2023, 1, 2, 10, 0);
    let (repo, transport, service) = racing_fixture(now).await;

    let report = service.sweep(now).await.unwrap();

    assert_eq!(report.vanished, 1);
    assert_eq!(report.sent, 1);
    assert!(report.failures.is_empty());
    assert!(
        transport
            .calls()
            .iter()
            .any(|c| matches!(c, Call::Send { chat_id: 200, .. }))
    );
    assert_eq!(
        repo.get("kept").await.unwrap().scheduled_at,
        now + Duration::days(1)
    );
    assert!(matches!(
        repo.get("gone").await,
        Err(ReminderError::NotFound(_))
    ));
}

#[tokio::test]
async fn callback_for_reminder_removed_mid_flight_reports_unknown() {
    let now = ts(2023, 1, 2, 10, 0);
    let (_, transport, service) = racing_fixture(now).await;

    let outcome = service
        .handle_callback("cbq", "snooze:gone:900", now)
        .await
        .unwrap();

    assert_eq!(
        outcome,
        CallbackOutcome::UnknownReminder {
            reminder_id: "gone".to_string()
        }
    );
    assert_eq!(
        transport.calls(),
        vec![Call::Answer {
            callback_id: "cbq".to_string(),
            text: Some(ACK_NOT_FOUND.to_string()),
        }]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn scheduler_sweeps_in_background_and_stops_cleanly() {
    let f = fixture().await;
    let now = ts(2023, 1, 2, 9, 0);
    make_due(&f.repo, now - Duration::minutes(1)).await;

    let sweeps = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&sweeps);
    let scheduler = ReminderScheduler::new(
        Arc::clone(&f.service),
        SchedulerConfig {
            poll_interval: StdDuration::from_millis(50),
        },
    )
    .with_clock(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        now
    });

    scheduler.start();
    tokio::time::sleep(StdDuration::from_millis(150)).await;
    scheduler.stop().await;

    let after_stop = sweeps.load(Ordering::SeqCst);
    assert!(after_stop >= 1, "scheduler did not sweep");
    assert_eq!(f.transport.sends(), 1);

    tokio::time::sleep(StdDuration::from_millis(150)).await;
    assert_eq!(sweeps.load(Ordering::SeqCst), after_stop);
    assert!(!scheduler.is_running());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn callbacks_run_concurrently_with_sweeps() {
    let f = fixture().await;
    let now = ts(2023, 1, 2, 10, 0);

    for i in 0..20 {
        f.service
            .add_reminder(Reminder::new(format!("bulk-{i}"), 1, 200 + i, "Practice", now))
            .await
            .unwrap();
    }

    let sweeper = {
        let service = Arc::clone(&f.service);
        tokio::spawn(async move { service.sweep(now).await })
    };
    let callbacks: Vec<_> = (0..20)
        .map(|i| {
            let service = Arc::clone(&f.service);
            tokio::spawn(async move {
                service
                    .handle_callback(&format!("cb-{i}"), &format!("snooze:bulk-{i}:60"), now)
                    .await
            })
        })
        .collect();

    let report = sweeper.await.unwrap().unwrap();
    for cb in callbacks {
        assert!(matches!(
            cb.await.unwrap().unwrap(),
            CallbackOutcome::Snoozed { .. }
        ));
    }

    assert!(report.failures.is_empty());
    assert_eq!(f.repo.len().await, 21);
    for reminder in f.repo.all().await {
        assert!(reminder.scheduled_at > now || reminder.id == "rem-1");
    }
}
