use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::Template;
use crate::error::{NotificationError, NotificationResult};
use crate::models::{Channel, NotificationType};

/// One row of the append-only template history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateVersion {
    pub template_id: Uuid,
    pub version: i32,
    pub snapshot: Template,
    pub created_at: DateTime<Utc>,
}

/// Template persistence.
///
/// The delivery path only calls [`TemplateStore::get_active`]. Writes belong to
/// the admin surface and always append a history row.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TemplateStore: Send + Sync {
    /// The active template for a trigger and channel.
    async fn get_active(
        &self,
        trigger: NotificationType,
        channel: Channel,
    ) -> NotificationResult<Option<Template>>;

    /// Save a template as the next version and make it the active one for its
    /// trigger and channel.
    async fn save(&self, template: Template) -> NotificationResult<Template>;

    /// History of a template, oldest first.
    async fn history(&self, template_id: Uuid) -> NotificationResult<Vec<TemplateVersion>>;

    /// Re-publish an earlier version as a new version.
    async fn rollback(&self, template_id: Uuid, version: i32) -> NotificationResult<Template>;
}

#[derive(Debug, Default)]
struct TemplateTables {
    templates: HashMap<Uuid, Template>,
    versions: Vec<TemplateVersion>,
}

/// In-memory implementation of TemplateStore (for development/testing)
#[derive(Debug, Default, Clone)]
pub struct InMemoryTemplateStore {
    inner: Arc<RwLock<TemplateTables>>,
}

impl InMemoryTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with active templates.
    pub async fn with_templates(
        templates: impl IntoIterator<Item = Template>,
    ) -> NotificationResult<Self> {
        let store = Self::new();
        for template in templates {
            store.save(template).await?;
        }
        Ok(store)
    }
}

fn publish(tables: &mut TemplateTables, mut template: Template) -> Template {
    let now = Utc::now();
    let next_version = tables
        .versions
        .iter()
        .filter(|v| v.template_id == template.id)
        .map(|v| v.version)
        .max()
        .map_or(1, |v| v + 1);

    // One active template per trigger and channel.
    for other in tables.templates.values_mut() {
        if other.id != template.id
            && other.trigger == template.trigger
            && other.channel == template.channel
        {
            other.is_active = false;
        }
    }

    template.version = next_version;
    template.is_active = true;
    template.updated_at = now;

    tables.versions.push(TemplateVersion {
        template_id: template.id,
        version: next_version,
        snapshot: template.clone(),
        created_at: now,
    });
    tables.templates.insert(template.id, template.clone());
    template
}

#[async_trait]
impl TemplateStore for InMemoryTemplateStore {
    async fn get_active(
        &self,
        trigger: NotificationType,
        channel: Channel,
    ) -> NotificationResult<Option<Template>> {
        let tables = self.inner.read().await;
        Ok(tables
            .templates
            .values()
            .find(|t| t.is_active && t.trigger == trigger && t.channel == channel)
            .cloned())
    }

    async fn save(&self, template: Template) -> NotificationResult<Template> {
        let mut tables = self.inner.write().await;
        let saved = publish(&mut tables, template);
        tracing::info!(template_id = %saved.id, version = saved.version, "Saved template");
        Ok(saved)
    }

    async fn history(&self, template_id: Uuid) -> NotificationResult<Vec<TemplateVersion>> {
        let tables = self.inner.read().await;
        Ok(tables
            .versions
            .iter()
            .filter(|v| v.template_id == template_id)
            .cloned()
            .collect())
    }

    async fn rollback(&self, template_id: Uuid, version: i32) -> NotificationResult<Template> {
        let mut tables = self.inner.write().await;
        let snapshot = tables
            .versions
            .iter()
            .find(|v| v.template_id == template_id && v.version == version)
            .map(|v| v.snapshot.clone())
            .ok_or_else(|| {
                NotificationError::Validation(format!(
                    "template {template_id} has no version {version}"
                ))
            })?;
        Ok(publish(&mut tables, snapshot))
    }
}
