//! Reminder storage.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::{Reminder, ReminderError};

/// Owns the lifecycle of stored reminders.
///
/// Implementations must be safe to share between the scheduler task and
/// callback handlers running elsewhere.
#[async_trait]
pub trait ReminderRepository: Send + Sync {
    /// Store a reminder, replacing any existing one with the same id.
    async fn add(&self, reminder: Reminder) -> Result<(), ReminderError>;

    /// Fetch a reminder by id.
    async fn get(&self, id: &str) -> Result<Reminder, ReminderError>;

    /// Replace an already stored reminder. Fails with `NotFound` otherwise.
    async fn update(&self, reminder: Reminder) -> Result<(), ReminderError>;

    /// Delete a reminder. Missing ids are ignored.
    async fn remove(&self, id: &str) -> Result<(), ReminderError>;

    /// All reminders with `scheduled_at <= now`, in no particular order.
    async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<Reminder>, ReminderError>;
}

/// Lock-guarded in-memory repository.
#[derive(Default)]
pub struct InMemoryReminderRepository {
    reminders: RwLock<HashMap<String, Reminder>>,
}

impl InMemoryReminderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored reminder.
    pub async fn all(&self) -> Vec<Reminder> {
        self.reminders.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.reminders.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.reminders.read().await.is_empty()
    }
}

#[async_trait]
impl ReminderRepository for InMemoryReminderRepository {
    async fn add(&self, reminder: Reminder) -> Result<(), ReminderError> {
        self.reminders
            .write()
            .await
            .insert(reminder.id.clone(), reminder);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Reminder, ReminderError> {
        self.reminders
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| ReminderError::NotFound(id.to_string()))
    }

    async fn update(&self, reminder: Reminder) -> Result<(), ReminderError> {
        let mut reminders = self.reminders.write().await;
        match reminders.get_mut(&reminder.id) {
            Some(stored) => {
                *stored = reminder;
                Ok(())
            }
            None => Err(ReminderError::NotFound(reminder.id)),
        }
    }

    async fn remove(&self, id: &str) -> Result<(), ReminderError> {
        self.reminders.write().await.remove(id);
        Ok(())
    }

    async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<Reminder>, ReminderError> {
        Ok(self
            .reminders
            .read()
            .await
            .values()
            .filter(|r| r.is_due(now))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 1, 2, 10, 0, 0).unwrap()
    }

    fn reminder(id: &str, offset_mins: i64) -> Reminder {
        Reminder::new(id, 1, 100, "Time to practice", now() + Duration::minutes(offset_mins))
    }

    #[tokio::test]
    async fn test_add_is_upsert() {
        let repo = InMemoryReminderRepository::new();
        repo.add(reminder("a", -5)).await.unwrap();

        let mut replacement = reminder("a", -1);
        replacement.message = "replaced".to_string();
        repo.add(replacement.clone()).await.unwrap();

        assert_eq!(repo.len().await, 1);
        assert_eq!(repo.get("a").await.unwrap(), replacement);

        let due = repo.list_due(now()).await.unwrap();
        assert_eq!(due.len(), 1);
    }

    #[tokio::test]
    async fn test_get_missing() {
        let repo = InMemoryReminderRepository::new();
        assert!(matches!(
            repo.get("missing").await,
            Err(ReminderError::NotFound(id)) if id == "missing"
        ));
    }

    #[tokio::test]
    async fn test_update_requires_existing() {
        let repo = InMemoryReminderRepository::new();
        let result = repo.update(reminder("ghost", 0)).await;
        assert!(matches!(result, Err(ReminderError::NotFound(_))));
        assert!(repo.is_empty().await);
    }

    #[tokio::test]
    async fn test_update_then_get_returns_last_write() {
        let repo = InMemoryReminderRepository::new();
        repo.add(reminder("a", 0)).await.unwrap();

        let mut changed = repo.get("a").await.unwrap();
        changed.postpone(now() + Duration::hours(3));
        repo.update(changed.clone()).await.unwrap();

        assert_eq!(repo.get("a").await.unwrap(), changed);
    }

    #[tokio::test]
    async fn test_remove_is_noop_when_missing() {
        let repo = InMemoryReminderRepository::new();
        repo.add(reminder("a", 0)).await.unwrap();
        repo.remove("a").await.unwrap();
        repo.remove("a").await.unwrap();
        assert!(repo.is_empty().await);
    }

    #[tokio::test]
    async fn test_list_due_filters_by_time() {
        let repo = InMemoryReminderRepository::new();
        repo.add(reminder("past", -10)).await.unwrap();
        repo.add(reminder("exact", 0)).await.unwrap();
        repo.add(reminder("future", 10)).await.unwrap();

        let mut ids: Vec<String> = repo
            .list_due(now())
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        ids.sort();

        assert_eq!(ids, vec!["exact".to_string(), "past".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writers() {
        let repo = Arc::new(InMemoryReminderRepository::new());
        repo.add(reminder("shared", 0)).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..16 {
            let repo = Arc::clone(&repo);
            handles.push(tokio::spawn(async move {
                let mut r = repo.get("shared").await.unwrap();
                r.postpone(now() + Duration::minutes(i));
                repo.update(r).await.unwrap();
                repo.add(reminder(&format!("own-{i}"), 0)).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(repo.len().await, 17);
    }
}
