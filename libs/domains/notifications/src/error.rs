//! Error types for the notifications domain.

use thiserror::Error;
use uuid::Uuid;

/// Result type for notification operations.
pub type NotificationResult<T> = Result<T, NotificationError>;

/// Errors that escape the delivery engine.
///
/// Delivery outcomes (opt-outs, provider failures, exhausted retries) are not
/// errors: they are recorded in the notification log and reported through
/// `DeliveryResult`. What remains here is what prevents the engine from
/// recording anything at all.
#[derive(Debug, Error)]
pub enum NotificationError {
    /// The persistent store could not be read or written.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// A notification attempt could not be found.
    #[error("Notification attempt not found: {0}")]
    AttemptNotFound(Uuid),

    /// Template could not be rendered.
    #[error("Template rendering error: {0}")]
    TemplateError(String),

    /// Request or stored snapshot failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Provider could not be constructed.
    #[error("Provider error: {0}")]
    ProviderError(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sea_orm::DbErr> for NotificationError {
    fn from(err: sea_orm::DbErr) -> Self {
        NotificationError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for NotificationError {
    fn from(err: serde_json::Error) -> Self {
        NotificationError::Internal(format!("JSON serialization error: {}", err))
    }
}

impl From<crate::config::ConfigError> for NotificationError {
    fn from(err: crate::config::ConfigError) -> Self {
        NotificationError::ConfigError(err.to_string())
    }
}
