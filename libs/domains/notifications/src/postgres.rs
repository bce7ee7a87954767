use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::entity::{
    NotificationLogsEntity, NotificationSettingsEntity, NotificationTemplateVersionsEntity,
    NotificationTemplatesEntity, notification_logs, notification_settings,
    notification_template_versions, notification_templates,
};
use crate::error::{NotificationError, NotificationResult};
use crate::models::{
    AttemptOutcome, AttemptStatus, Channel, FailureKind, LogFilter, NotificationAttempt,
    NotificationType,
};
use crate::repository::{NotificationLog, STALE_RECOVERY_MESSAGE};
use crate::settings::{Settings, SettingsSource};
use crate::templates::{Template, TemplateStore, TemplateVersion};

/// PostgreSQL implementation of NotificationLog
#[derive(Clone)]
pub struct PgNotificationLog {
    db: DatabaseConnection,
}

impl PgNotificationLog {
    /// Create a new PostgreSQL notification log
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

fn to_attempts(
    models: Vec<notification_logs::Model>,
) -> NotificationResult<Vec<NotificationAttempt>> {
    models.into_iter().map(TryInto::try_into).collect()
}

#[async_trait]
impl NotificationLog for PgNotificationLog {
    async fn insert(
        &self,
        attempt: NotificationAttempt,
    ) -> NotificationResult<NotificationAttempt> {
        let model: notification_logs::ActiveModel = attempt.try_into()?;
        model.insert(&self.db).await?.try_into()
    }

    async fn get(&self, id: Uuid) -> NotificationResult<Option<NotificationAttempt>> {
        NotificationLogsEntity::find_by_id(id)
            .one(&self.db)
            .await?
            .map(TryInto::try_into)
            .transpose()
    }

    async fn complete(&self, id: Uuid, outcome: AttemptOutcome) -> NotificationResult<bool> {
        let mut update = notification_logs::ActiveModel {
            status: Set(outcome.status.to_string()),
            retry_count: Set(i32::try_from(outcome.retry_count).map_err(|_| {
                NotificationError::Validation(format!(
                    "retry_count out of range: {}",
                    outcome.retry_count
                ))
            })?),
            retry_after: Set(outcome.retry_after.map(Into::into)),
            provider_message_id: Set(outcome.provider_message_id),
            error_message: Set(outcome.error_message),
            error_kind: Set(outcome.error_kind.map(|k| k.to_string())),
            sent_at: Set(outcome.sent_at.map(Into::into)),
            updated_at: Set(Utc::now().into()),
            ..Default::default()
        };
        if let Some(rendered) = outcome.rendered {
            update.rendered = Set(Some(serde_json::to_value(rendered)?));
        }

        let result = NotificationLogsEntity::update_many()
            .set(update)
            .filter(notification_logs::Column::Id.eq(id))
            .filter(notification_logs::Column::Status.eq(AttemptStatus::Pending.to_string()))
            .exec(&self.db)
            .await?;

        if result.rows_affected == 0 && self.get(id).await?.is_none() {
            return Err(NotificationError::AttemptNotFound(id));
        }
        Ok(result.rows_affected > 0)
    }

    async fn claim(
        &self,
        id: Uuid,
        expected_status: AttemptStatus,
        expected_retry_count: u32,
        now: DateTime<Utc>,
    ) -> NotificationResult<bool> {
        let expected_retry_count = i32::try_from(expected_retry_count).map_err(|_| {
            NotificationError::Validation(format!(
                "retry_count out of range: {expected_retry_count}"
            ))
        })?;
        let now_tz: chrono::DateTime<chrono::FixedOffset> = now.into();

        let update = notification_logs::ActiveModel {
            status: Set(AttemptStatus::Pending.to_string()),
            retry_after: Set(None),
            updated_at: Set(now_tz),
            ..Default::default()
        };

        let result = NotificationLogsEntity::update_many()
            .set(update)
            .filter(notification_logs::Column::Id.eq(id))
            .filter(notification_logs::Column::Status.eq(expected_status.to_string()))
            .filter(notification_logs::Column::RetryCount.eq(expected_retry_count))
            .filter(notification_logs::Column::RetryAfter.lte(now_tz))
            .exec(&self.db)
            .await?;

        Ok(result.rows_affected == 1)
    }

    async fn find_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> NotificationResult<Vec<NotificationAttempt>> {
        let now_tz: chrono::DateTime<chrono::FixedOffset> = now.into();
        let models = NotificationLogsEntity::find()
            .filter(notification_logs::Column::Status.is_in([
                AttemptStatus::Failed.to_string(),
                AttemptStatus::Scheduled.to_string(),
            ]))
            .filter(notification_logs::Column::RetryAfter.is_not_null())
            .filter(notification_logs::Column::RetryAfter.lte(now_tz))
            .order_by_asc(notification_logs::Column::CreatedAt)
            .order_by_asc(notification_logs::Column::Id)
            .limit(limit as u64)
            .all(&self.db)
            .await?;

        to_attempts(models)
    }

    async fn list(&self, filter: LogFilter) -> NotificationResult<Vec<NotificationAttempt>> {
        let mut query = NotificationLogsEntity::find();

        if let Some(status) = filter.status {
            query = query.filter(notification_logs::Column::Status.eq(status.to_string()));
        }

        if let Some(channel) = filter.channel {
            query = query.filter(notification_logs::Column::Channel.eq(channel.to_string()));
        }

        if let Some(notification_type) = filter.notification_type {
            query = query.filter(
                notification_logs::Column::NotificationType.eq(notification_type.to_string()),
            );
        }

        if let Some(after) = filter.created_after {
            let after_tz: chrono::DateTime<chrono::FixedOffset> = after.into();
            query = query.filter(notification_logs::Column::CreatedAt.gte(after_tz));
        }

        if let Some(before) = filter.created_before {
            let before_tz: chrono::DateTime<chrono::FixedOffset> = before.into();
            query = query.filter(notification_logs::Column::CreatedAt.lt(before_tz));
        }

        let models = query
            .order_by_desc(notification_logs::Column::CreatedAt)
            .order_by_desc(notification_logs::Column::Id)
            .offset(filter.offset as u64)
            .limit(filter.limit as u64)
            .all(&self.db)
            .await?;

        to_attempts(models)
    }

    async fn recover_stale(
        &self,
        older_than: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> NotificationResult<u64> {
        let older_than_tz: chrono::DateTime<chrono::FixedOffset> = older_than.into();
        let now_tz: chrono::DateTime<chrono::FixedOffset> = now.into();

        let update = notification_logs::ActiveModel {
            status: Set(AttemptStatus::Failed.to_string()),
            retry_after: Set(Some(now_tz)),
            error_kind: Set(Some(FailureKind::Transient.to_string())),
            error_message: Set(Some(STALE_RECOVERY_MESSAGE.to_string())),
            updated_at: Set(now_tz),
            ..Default::default()
        };

        let result = NotificationLogsEntity::update_many()
            .set(update)
            .filter(notification_logs::Column::Status.eq(AttemptStatus::Pending.to_string()))
            .filter(notification_logs::Column::UpdatedAt.lt(older_than_tz))
            .exec(&self.db)
            .await?;

        Ok(result.rows_affected)
    }
}

/// PostgreSQL implementation of TemplateStore
#[derive(Clone)]
pub struct PgTemplateStore {
    db: DatabaseConnection,
}

impl PgTemplateStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Write `template` as the next version inside one transaction.
    async fn publish(&self, mut template: Template) -> NotificationResult<Template> {
        let txn = self.db.begin().await?;
        let now = Utc::now();

        let latest = NotificationTemplateVersionsEntity::find()
            .filter(notification_template_versions::Column::TemplateId.eq(template.id))
            .order_by_desc(notification_template_versions::Column::Version)
            .one(&txn)
            .await?;
        template.version = latest.map_or(1, |v| v.version + 1);
        template.is_active = true;
        template.updated_at = now;

        // One active template per trigger and channel.
        NotificationTemplatesEntity::update_many()
            .set(notification_templates::ActiveModel {
                is_active: Set(false),
                updated_at: Set(now.into()),
                ..Default::default()
            })
            .filter(notification_templates::Column::Trigger.eq(template.trigger.to_string()))
            .filter(notification_templates::Column::Channel.eq(template.channel.to_string()))
            .filter(notification_templates::Column::Id.ne(template.id))
            .exec(&txn)
            .await?;

        let exists = NotificationTemplatesEntity::find_by_id(template.id)
            .one(&txn)
            .await?
            .is_some();
        let model: notification_templates::ActiveModel = template.clone().try_into()?;
        if exists {
            model.update(&txn).await?;
        } else {
            model.insert(&txn).await?;
        }

        let version = TemplateVersion {
            template_id: template.id,
            version: template.version,
            snapshot: template.clone(),
            created_at: now,
        };
        let version_model: notification_template_versions::ActiveModel = (&version).try_into()?;
        version_model.insert(&txn).await?;

        txn.commit().await?;
        tracing::info!(template_id = %template.id, version = template.version, "Saved template");
        Ok(template)
    }
}

#[async_trait]
impl TemplateStore for PgTemplateStore {
    async fn get_active(
        &self,
        trigger: NotificationType,
        channel: Channel,
    ) -> NotificationResult<Option<Template>> {
        NotificationTemplatesEntity::find()
            .filter(notification_templates::Column::Trigger.eq(trigger.to_string()))
            .filter(notification_templates::Column::Channel.eq(channel.to_string()))
            .filter(notification_templates::Column::IsActive.eq(true))
            .order_by_desc(notification_templates::Column::UpdatedAt)
            .one(&self.db)
            .await?
            .map(TryInto::try_into)
            .transpose()
    }

    async fn save(&self, template: Template) -> NotificationResult<Template> {
        self.publish(template).await
    }

    async fn history(&self, template_id: Uuid) -> NotificationResult<Vec<TemplateVersion>> {
        NotificationTemplateVersionsEntity::find()
            .filter(notification_template_versions::Column::TemplateId.eq(template_id))
            .order_by_asc(notification_template_versions::Column::Version)
            .all(&self.db)
            .await?
            .into_iter()
            .map(TryInto::try_into)
            .collect()
    }

    async fn rollback(&self, template_id: Uuid, version: i32) -> NotificationResult<Template> {
        let snapshot = NotificationTemplateVersionsEntity::find()
            .filter(notification_template_versions::Column::TemplateId.eq(template_id))
            .filter(notification_template_versions::Column::Version.eq(version))
            .one(&self.db)
            .await?
            .ok_or_else(|| {
                NotificationError::Validation(format!(
                    "template {template_id} has no version {version}"
                ))
            })?;

        let version: TemplateVersion = snapshot.try_into()?;
        self.publish(version.snapshot).await
    }
}

/// PostgreSQL implementation of SettingsSource
#[derive(Clone)]
pub struct PgSettingsSource {
    db: DatabaseConnection,
}

impl PgSettingsSource {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SettingsSource for PgSettingsSource {
    async fn get(
        &self,
        notification_type: NotificationType,
    ) -> NotificationResult<Option<Settings>> {
        NotificationSettingsEntity::find_by_id(notification_type.to_string())
            .one(&self.db)
            .await?
            .map(TryInto::try_into)
            .transpose()
    }

    async fn put(
        &self,
        notification_type: NotificationType,
        settings: Settings,
    ) -> NotificationResult<()> {
        let model = notification_settings::active_model(notification_type, &settings)?;

        NotificationSettingsEntity::insert(model)
            .on_conflict(
                OnConflict::column(notification_settings::Column::NotificationType)
                    .update_columns([
                        notification_settings::Column::EmailEnabled,
                        notification_settings::Column::SmsEnabled,
                        notification_settings::Column::MaxRetries,
                        notification_settings::Column::RetryDelaysSeconds,
                        notification_settings::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;

        Ok(())
    }
}
