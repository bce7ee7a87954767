//! Per-type delivery settings and the TTL cache in front of them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use crate::error::NotificationResult;
use crate::models::{Channel, NotificationType};

/// Delivery settings for one notification type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub email_enabled: bool,
    pub sms_enabled: bool,
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before each retry. Empty means exponential backoff.
    pub retry_delays_seconds: Vec<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            email_enabled: true,
            sms_enabled: true,
            max_retries: 2,
            retry_delays_seconds: vec![30, 300],
        }
    }
}

impl Settings {
    pub fn channel_enabled(&self, channel: Channel) -> bool {
        match channel {
            Channel::Email => self.email_enabled,
            Channel::Sms => self.sms_enabled,
        }
    }

    pub fn with_channel(mut self, channel: Channel, enabled: bool) -> Self {
        match channel {
            Channel::Email => self.email_enabled = enabled,
            Channel::Sms => self.sms_enabled = enabled,
        }
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

/// Where settings are stored.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SettingsSource: Send + Sync {
    /// Settings for a type, `None` when none were saved.
    async fn get(
        &self,
        notification_type: NotificationType,
    ) -> NotificationResult<Option<Settings>>;

    async fn put(
        &self,
        notification_type: NotificationType,
        settings: Settings,
    ) -> NotificationResult<()>;
}

/// In-memory implementation of SettingsSource (for development/testing)
#[derive(Debug, Default, Clone)]
pub struct InMemorySettingsSource {
    settings: Arc<RwLock<HashMap<NotificationType, Settings>>>,
}

impl InMemorySettingsSource {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SettingsSource for InMemorySettingsSource {
    async fn get(
        &self,
        notification_type: NotificationType,
    ) -> NotificationResult<Option<Settings>> {
        Ok(self.settings.read().await.get(&notification_type).cloned())
    }

    async fn put(
        &self,
        notification_type: NotificationType,
        settings: Settings,
    ) -> NotificationResult<()> {
        self.settings
            .write()
            .await
            .insert(notification_type, settings);
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct CachedSettings {
    settings: Settings,
    loaded_at: Instant,
}

/// Read-through cache over a [`SettingsSource`].
///
/// Entries expire after the TTL. Writes through [`SettingsCache::update`]
/// invalidate the written type immediately.
pub struct SettingsCache {
    source: Arc<dyn SettingsSource>,
    ttl: Duration,
    defaults: Settings,
    entries: RwLock<HashMap<NotificationType, CachedSettings>>,
}

impl SettingsCache {
    pub fn new(source: Arc<dyn SettingsSource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            defaults: Settings::default(),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Settings used for types with nothing stored.
    pub fn with_defaults(mut self, defaults: Settings) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn defaults(&self) -> &Settings {
        &self.defaults
    }

    /// Settings for a type, falling back to the defaults.
    pub async fn get(&self, notification_type: NotificationType) -> NotificationResult<Settings> {
        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(&notification_type) {
                if entry.loaded_at.elapsed() < self.ttl {
                    return Ok(entry.settings.clone());
                }
            }
        }

        let settings = self
            .source
            .get(notification_type)
            .await?
            .unwrap_or_else(|| self.defaults.clone());

        debug!(notification_type = %notification_type, "Loaded notification settings");
        self.entries.write().await.insert(
            notification_type,
            CachedSettings {
                settings: settings.clone(),
                loaded_at: Instant::now(),
            },
        );
        Ok(settings)
    }

    /// Write settings and drop the cached entry.
    pub async fn update(
        &self,
        notification_type: NotificationType,
        settings: Settings,
    ) -> NotificationResult<()> {
        self.source.put(notification_type, settings).await?;
        self.invalidate(notification_type).await;
        Ok(())
    }

    pub async fn invalidate(&self, notification_type: NotificationType) {
        self.entries.write().await.remove(&notification_type);
    }

    pub async fn invalidate_all(&self) {
        self.entries.write().await.clear();
    }
}
