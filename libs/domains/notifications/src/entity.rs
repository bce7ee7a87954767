use sea_orm::entity::prelude::*;
use sea_orm::ActiveValue::Set;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{NotificationError, NotificationResult};

/// Parse an enum stored as text.
fn parse_column<T: FromStr>(column: &str, value: &str) -> NotificationResult<T> {
    value
        .parse()
        .map_err(|_| NotificationError::DatabaseError(format!("invalid {column} value: {value}")))
}

fn to_i32(column: &str, value: u32) -> NotificationResult<i32> {
    i32::try_from(value)
        .map_err(|_| NotificationError::Validation(format!("{column} out of range: {value}")))
}

fn to_u32(column: &str, value: i32) -> NotificationResult<u32> {
    u32::try_from(value)
        .map_err(|_| NotificationError::DatabaseError(format!("invalid {column} value: {value}")))
}

// ===== Notification Logs Entity =====

pub mod notification_logs {
    use super::*;
    use crate::models::NotificationAttempt;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
    #[sea_orm(table_name = "notification_logs")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: Uuid,
        #[sea_orm(column_type = "String(StringLen::N(64))")]
        pub notification_type: String,
        #[sea_orm(column_type = "String(StringLen::N(16))")]
        pub channel: String,
        #[sea_orm(column_type = "JsonBinary")]
        pub recipient: serde_json::Value,
        #[sea_orm(column_type = "String(StringLen::N(255))")]
        pub recipient_address: String,
        #[sea_orm(column_type = "JsonBinary", nullable)]
        pub rendered: Option<serde_json::Value>,
        #[sea_orm(column_type = "JsonBinary")]
        pub variables: serde_json::Value,
        #[sea_orm(column_type = "String(StringLen::N(16))")]
        pub priority: String,
        #[sea_orm(column_type = "String(StringLen::N(32))")]
        pub status: String,
        pub retry_count: i32,
        pub retry_after: Option<DateTimeWithTimeZone>,
        #[sea_orm(column_type = "Text", nullable)]
        pub provider_message_id: Option<String>,
        #[sea_orm(column_type = "Text", nullable)]
        pub error_message: Option<String>,
        #[sea_orm(column_type = "String(StringLen::N(32))", nullable)]
        pub error_kind: Option<String>,
        pub is_test: bool,
        pub resend_of: Option<Uuid>,
        pub created_at: DateTimeWithTimeZone,
        pub updated_at: DateTimeWithTimeZone,
        pub sent_at: Option<DateTimeWithTimeZone>,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}

    impl TryFrom<Model> for NotificationAttempt {
        type Error = NotificationError;

        fn try_from(model: Model) -> NotificationResult<Self> {
            Ok(Self {
                id: model.id,
                notification_type: parse_column("notification_type", &model.notification_type)?,
                channel: parse_column("channel", &model.channel)?,
                recipient: serde_json::from_value(model.recipient)?,
                recipient_address: model.recipient_address,
                rendered: model.rendered.map(serde_json::from_value).transpose()?,
                variables: serde_json::from_value(model.variables)?,
                priority: parse_column("priority", &model.priority)?,
                status: parse_column("status", &model.status)?,
                retry_count: to_u32("retry_count", model.retry_count)?,
                retry_after: model.retry_after.map(Into::into),
                provider_message_id: model.provider_message_id,
                error_message: model.error_message,
                error_kind: model
                    .error_kind
                    .as_deref()
                    .map(|kind| parse_column("error_kind", kind))
                    .transpose()?,
                is_test: model.is_test,
                resend_of: model.resend_of,
                created_at: model.created_at.into(),
                updated_at: model.updated_at.into(),
                sent_at: model.sent_at.map(Into::into),
            })
        }
    }

    impl TryFrom<NotificationAttempt> for ActiveModel {
        type Error = NotificationError;

        fn try_from(attempt: NotificationAttempt) -> NotificationResult<Self> {
            let rendered = attempt
                .rendered
                .as_ref()
                .map(serde_json::to_value)
                .transpose()?;
            Ok(ActiveModel {
                id: Set(attempt.id),
                notification_type: Set(attempt.notification_type.to_string()),
                channel: Set(attempt.channel.to_string()),
                recipient: Set(serde_json::to_value(&attempt.recipient)?),
                recipient_address: Set(attempt.recipient_address),
                rendered: Set(rendered),
                variables: Set(serde_json::to_value(&attempt.variables)?),
                priority: Set(attempt.priority.to_string()),
                status: Set(attempt.status.to_string()),
                retry_count: Set(to_i32("retry_count", attempt.retry_count)?),
                retry_after: Set(attempt.retry_after.map(Into::into)),
                provider_message_id: Set(attempt.provider_message_id),
                error_message: Set(attempt.error_message),
                error_kind: Set(attempt.error_kind.map(|k| k.to_string())),
                is_test: Set(attempt.is_test),
                resend_of: Set(attempt.resend_of),
                created_at: Set(attempt.created_at.into()),
                updated_at: Set(attempt.updated_at.into()),
                sent_at: Set(attempt.sent_at.map(Into::into)),
            })
        }
    }
}

// ===== Notification Templates Entity =====

pub mod notification_templates {
    use super::*;
    use crate::templates::Template;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
    #[sea_orm(table_name = "notification_templates")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: Uuid,
        #[sea_orm(column_type = "String(StringLen::N(64))")]
        pub trigger: String,
        #[sea_orm(column_type = "String(StringLen::N(16))")]
        pub channel: String,
        #[sea_orm(column_type = "Text", nullable)]
        pub subject: Option<String>,
        #[sea_orm(column_type = "Text", nullable)]
        pub body_html: Option<String>,
        #[sea_orm(column_type = "Text")]
        pub body_text: String,
        #[sea_orm(column_type = "JsonBinary")]
        pub variables: serde_json::Value,
        pub is_active: bool,
        pub version: i32,
        pub created_at: DateTimeWithTimeZone,
        pub updated_at: DateTimeWithTimeZone,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {
        #[sea_orm(has_many = "super::notification_template_versions::Entity")]
        Versions,
    }

    impl Related<super::notification_template_versions::Entity> for Entity {
        fn to() -> RelationDef {
            Relation::Versions.def()
        }
    }

    impl ActiveModelBehavior for ActiveModel {}

    impl TryFrom<Model> for Template {
        type Error = NotificationError;

        fn try_from(model: Model) -> NotificationResult<Self> {
            Ok(Self {
                id: model.id,
                trigger: parse_column("trigger", &model.trigger)?,
                channel: parse_column("channel", &model.channel)?,
                subject: model.subject,
                body_html: model.body_html,
                body_text: model.body_text,
                variables: serde_json::from_value(model.variables)?,
                is_active: model.is_active,
                version: model.version,
                created_at: model.created_at.into(),
                updated_at: model.updated_at.into(),
            })
        }
    }

    impl TryFrom<Template> for ActiveModel {
        type Error = NotificationError;

        fn try_from(template: Template) -> NotificationResult<Self> {
            Ok(ActiveModel {
                id: Set(template.id),
                trigger: Set(template.trigger.to_string()),
                channel: Set(template.channel.to_string()),
                subject: Set(template.subject),
                body_html: Set(template.body_html),
                body_text: Set(template.body_text),
                variables: Set(serde_json::to_value(&template.variables)?),
                is_active: Set(template.is_active),
                version: Set(template.version),
                created_at: Set(template.created_at.into()),
                updated_at: Set(template.updated_at.into()),
            })
        }
    }
}

// ===== Notification Template Versions Entity =====

pub mod notification_template_versions {
    use super::*;
    use crate::templates::TemplateVersion;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
    #[sea_orm(table_name = "notification_template_versions")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: Uuid,
        pub template_id: Uuid,
        pub version: i32,
        #[sea_orm(column_type = "JsonBinary")]
        pub snapshot: serde_json::Value,
        pub created_at: DateTimeWithTimeZone,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {
        #[sea_orm(
            belongs_to = "super::notification_templates::Entity",
            from = "Column::TemplateId",
            to = "super::notification_templates::Column::Id"
        )]
        Template,
    }

    impl Related<super::notification_templates::Entity> for Entity {
        fn to() -> RelationDef {
            Relation::Template.def()
        }
    }

    impl ActiveModelBehavior for ActiveModel {}

    impl TryFrom<Model> for TemplateVersion {
        type Error = NotificationError;

        fn try_from(model: Model) -> NotificationResult<Self> {
            Ok(Self {
                template_id: model.template_id,
                version: model.version,
                snapshot: serde_json::from_value(model.snapshot)?,
                created_at: model.created_at.into(),
            })
        }
    }

    impl TryFrom<&TemplateVersion> for ActiveModel {
        type Error = NotificationError;

        fn try_from(version: &TemplateVersion) -> NotificationResult<Self> {
            Ok(ActiveModel {
                id: Set(Uuid::now_v7()),
                template_id: Set(version.template_id),
                version: Set(version.version),
                snapshot: Set(serde_json::to_value(&version.snapshot)?),
                created_at: Set(version.created_at.into()),
            })
        }
    }
}

// ===== Notification Settings Entity =====

pub mod notification_settings {
    use super::*;
    use crate::models::NotificationType;
    use crate::settings::Settings;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
    #[sea_orm(table_name = "notification_settings")]
    pub struct Model {
        #[sea_orm(
            primary_key,
            auto_increment = false,
            column_type = "String(StringLen::N(64))"
        )]
        pub notification_type: String,
        pub email_enabled: bool,
        pub sms_enabled: bool,
        pub max_retries: i32,
        #[sea_orm(column_type = "JsonBinary")]
        pub retry_delays_seconds: serde_json::Value,
        pub updated_at: DateTimeWithTimeZone,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}

    impl TryFrom<Model> for Settings {
        type Error = NotificationError;

        fn try_from(model: Model) -> NotificationResult<Self> {
            Ok(Self {
                email_enabled: model.email_enabled,
                sms_enabled: model.sms_enabled,
                max_retries: to_u32("max_retries", model.max_retries)?,
                retry_delays_seconds: serde_json::from_value(model.retry_delays_seconds)?,
            })
        }
    }

    /// Build a row for `notification_type`.
    pub fn active_model(
        notification_type: NotificationType,
        settings: &Settings,
    ) -> NotificationResult<ActiveModel> {
        Ok(ActiveModel {
            notification_type: Set(notification_type.to_string()),
            email_enabled: Set(settings.email_enabled),
            sms_enabled: Set(settings.sms_enabled),
            max_retries: Set(to_i32("max_retries", settings.max_retries)?),
            retry_delays_seconds: Set(serde_json::to_value(&settings.retry_delays_seconds)?),
            updated_at: Set(chrono::Utc::now().into()),
        })
    }
}

pub use notification_logs::Entity as NotificationLogsEntity;
pub use notification_settings::Entity as NotificationSettingsEntity;
pub use notification_template_versions::Entity as NotificationTemplateVersionsEntity;
pub use notification_templates::Entity as NotificationTemplatesEntity;
