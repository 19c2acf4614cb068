//! JSON-file backed reminder repository.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::{Reminder, ReminderError, ReminderRepository};

/// Durable repository that keeps every reminder in a single JSON array.
///
/// The file is the source of truth: every operation re-reads it, and every
/// mutation rewrites the whole store (temp file, then rename). A daemon and a
/// one-shot `recall add` can therefore share one file without either
/// overwriting the other's changes from a stale snapshot.
pub struct FileReminderRepository {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process.
    lock: RwLock<()>,
}

impl FileReminderRepository {
    /// Open a store, checking that an existing file parses.
    #[tracing::instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, ReminderError> {
        let repo = Self {
            path: path.as_ref().to_path_buf(),
            lock: RwLock::new(()),
        };

        let reminders = repo.load().await?;
        info!(count = reminders.len(), "loaded reminders from file");
        Ok(repo)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<HashMap<String, Reminder>, ReminderError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => {
                let list: Vec<Reminder> = serde_json::from_slice(&bytes)?;
                Ok(list.into_iter().map(|r| (r.id.clone(), r)).collect())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(format!(".{}.tmp", std::process::id()));
        self.path.with_file_name(name)
    }

    async fn persist(&self, reminders: &HashMap<String, Reminder>) -> Result<(), ReminderError> {
        let mut list: Vec<&Reminder> = reminders.values().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        let bytes = serde_json::to_vec_pretty(&list)?;

        let tmp = self.tmp_path();
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        debug!(count = list.len(), "persisted reminders");
        Ok(())
    }

    /// Reload the file, apply a mutation, and write it back if anything changed.
    async fn mutate<F>(&self, f: F) -> Result<(), ReminderError>
    where
        F: FnOnce(&mut HashMap<String, Reminder>) -> Result<bool, ReminderError> + Send,
    {
        let _guard = self.lock.write().await;
        let mut reminders = self.load().await?;
        if !f(&mut reminders)? {
            return Ok(());
        }
        self.persist(&reminders).await
    }

    async fn snapshot(&self) -> Result<HashMap<String, Reminder>, ReminderError> {
        let _guard = self.lock.read().await;
        self.load().await
    }
}

#[async_trait]
impl ReminderRepository for FileReminderRepository {
    async fn add(&self, reminder: Reminder) -> Result<(), ReminderError> {
        self.mutate(|map| {
            map.insert(reminder.id.clone(), reminder);
            Ok(true)
        })
        .await
    }

    async fn get(&self, id: &str) -> Result<Reminder, ReminderError> {
        self.snapshot()
            .await?
            .remove(id)
            .ok_or_else(|| ReminderError::NotFound(id.to_string()))
    }

    async fn update(&self, reminder: Reminder) -> Result<(), ReminderError> {
        self.mutate(|map| match map.get_mut(&reminder.id) {
            Some(stored) => {
                *stored = reminder;
                Ok(true)
            }
            None => Err(ReminderError::NotFound(reminder.id)),
        })
        .await
    }

    async fn remove(&self, id: &str) -> Result<(), ReminderError> {
        self.mutate(|map| Ok(map.remove(id).is_some())).await
    }

    async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<Reminder>, ReminderError> {
        Ok(self
            .snapshot()
            .await?
            .into_values()
            .filter(|r| r.is_due(now))
            .collect())
    }
}
