//! Notifications Domain
//!
//! Multi-channel notification delivery: template rendering, email and SMS
//! dispatch, an auditable attempt log and automatic retry of transient
//! failures.
//!
//! # Features
//!
//! - `{{variable}}` templates with an injected business context
//! - Per-type channel toggles and retry budgets behind a TTL cache
//! - Recipient preference enforcement for non-transactional types
//! - Table-driven classification of transport failures
//! - Exponential backoff with jitter, or per-type delay schedules
//! - Retry sweeps that are safe to run concurrently
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐        ┌─────────────────┐
//! │ Business caller │        │  Notifier Worker│  ← periodic sweep
//! └────────┬────────┘        └────────┬────────┘
//!          │ send()                   │ process_due()
//!          │                 ┌────────▼────────┐
//!          │                 │  RetryManager   │  ← claim, then redeliver
//!          │                 └────────┬────────┘
//! ┌────────▼──────────────────────────▼────────┐
//! │            NotificationService             │  ← settings, preferences,
//! └───────┬──────────────┬──────────────┬──────┘    render, dispatch, classify
//!         │              │              │
//! ┌───────▼──────┐ ┌─────▼──────┐ ┌─────▼──────────┐
//! │TemplateEngine│ │ Providers  │ │NotificationLog │  ← Postgres or in-memory
//! └──────────────┘ └────────────┘ └────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use domain_notifications::{
//!     Channel, NotificationRequest, NotificationService, NotificationType, Recipient,
//! };
//!
//! let service = NotificationService::new(log, providers, templates, settings);
//!
//! let request = NotificationRequest::new(
//!     NotificationType::BookingConfirmation,
//!     Channel::Email,
//!     Recipient::email("jane@example.com"),
//! )
//! .with_variable("date", "Monday 10:00");
//!
//! let result = service.send(request).await?;
//! ```

pub mod backoff;
pub mod classifier;
pub mod config;
pub mod entity;
pub mod error;
pub mod metrics;
pub mod models;
pub mod postgres;
pub mod preferences;
pub mod providers;
pub mod repository;
pub mod retry;
pub mod service;
pub mod settings;
pub mod templates;

// Re-export commonly used types
pub use backoff::{BackoffPolicy, FixedJitter, JitterSource, ThreadJitter, next_delay};
pub use classifier::{ClassificationTable, ClassifiedError, ErrorKind};
pub use config::{DeliveryConfig, EmailTransport, ProviderMode};
pub use error::{NotificationError, NotificationResult};
pub use models::{
    AttemptStatus, Channel, DeliveryResult, DeliveryState, FailureKind, LogFilter,
    NotificationAttempt, NotificationRequest, NotificationType, Priority, Recipient,
    RenderedMessage, Variables,
};
pub use postgres::{PgNotificationLog, PgSettingsSource, PgTemplateStore};
pub use preferences::{AllowAll, InMemoryPreferences, PreferenceDecision, PreferenceSource};
pub use providers::{EmailProvider, Providers, SmsProvider, TransportError};
pub use repository::{InMemoryNotificationLog, NotificationLog};
pub use retry::{RetryConfig, RetryManager, RetrySweepResult};
pub use service::NotificationService;
pub use settings::{InMemorySettingsSource, Settings, SettingsCache, SettingsSource};
pub use templates::{InMemoryTemplateStore, Template, TemplateEngine, TemplateStore};
