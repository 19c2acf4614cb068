//! Per-user notification settings lookup.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::NotificationSettings;

/// Supplies delivery policy for a user.
///
/// Lookups are total: implementations decide what an unknown user gets.
#[async_trait]
pub trait NotificationSettingsProvider: Send + Sync {
    async fn get_settings(&self, user_id: i64) -> NotificationSettings;
}

/// In-memory settings keyed by user id.
///
/// Unknown users receive a copy of the default template (one-day frequency,
/// no quiet hours unless overridden with [`with_default`](Self::with_default)).
pub struct InMemoryNotificationSettingsProvider {
    settings: RwLock<HashMap<i64, NotificationSettings>>,
    default: NotificationSettings,
}

impl Default for InMemoryNotificationSettingsProvider {
    fn default() -> Self {
        Self {
            settings: RwLock::new(HashMap::new()),
            default: NotificationSettings::new(0),
        }
    }
}

impl InMemoryNotificationSettingsProvider {
    pub fn new(settings: impl IntoIterator<Item = NotificationSettings>) -> Self {
        Self {
            settings: RwLock::new(settings.into_iter().map(|s| (s.user_id, s)).collect()),
            ..Self::default()
        }
    }

    /// Template used for users without stored settings. Its `user_id` is ignored.
    pub fn with_default(mut self, default: NotificationSettings) -> Self {
        self.default = default;
        self
    }

    pub async fn upsert(&self, settings: NotificationSettings) {
        self.settings.write().await.insert(settings.user_id, settings);
    }
}

#[async_trait]
impl NotificationSettingsProvider for InMemoryNotificationSettingsProvider {
    async fn get_settings(&self, user_id: i64) -> NotificationSettings {
        if let Some(settings) = self.settings.read().await.get(&user_id) {
            return settings.clone();
        }
        NotificationSettings {
            user_id,
            ..self.default.clone()
        }
    }
}
