//! Data models for the notifications domain.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum::{Display, EnumString};
use uuid::Uuid;
use validator::ValidateEmail;

/// Template variable bag supplied by the caller.
pub type Variables = BTreeMap<String, String>;

// ============================================================================
// Enums
// ============================================================================

/// Business triggers that produce notifications.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display,
    EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NotificationType {
    BookingConfirmation,
    BookingCancellation,
    BookingRescheduled,
    AppointmentReminder,
    StatusUpdate,
    PaymentReceived,
    PaymentFailed,
    ReviewRequest,
    RetentionReminder,
    PromotionalOffer,
}

impl NotificationType {
    pub const ALL: [NotificationType; 10] = [
        NotificationType::BookingConfirmation,
        NotificationType::BookingCancellation,
        NotificationType::BookingRescheduled,
        NotificationType::AppointmentReminder,
        NotificationType::StatusUpdate,
        NotificationType::PaymentReceived,
        NotificationType::PaymentFailed,
        NotificationType::ReviewRequest,
        NotificationType::RetentionReminder,
        NotificationType::PromotionalOffer,
    ];

    /// Transactional notifications are sent regardless of recipient preferences.
    pub fn is_transactional(&self) -> bool {
        matches!(
            self,
            NotificationType::BookingConfirmation
                | NotificationType::BookingCancellation
                | NotificationType::BookingRescheduled
                | NotificationType::StatusUpdate
                | NotificationType::PaymentReceived
                | NotificationType::PaymentFailed
        )
    }

    pub fn is_marketing(&self) -> bool {
        matches!(
            self,
            NotificationType::RetentionReminder | NotificationType::PromotionalOffer
        )
    }
}

/// Delivery medium.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display,
    EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Channel {
    Email,
    Sms,
}

/// Request priority. Recorded on the attempt, informational for providers.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

/// Status of a logged attempt.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AttemptStatus {
    /// Claimed by a sender, delivery in flight.
    #[default]
    Pending,
    Sent,
    Failed,
    /// Waiting for its schedule time.
    Scheduled,
}

/// Why a delivery did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FailureKind {
    /// Channel disabled in settings.
    Disabled,
    /// Recipient opted out.
    PreferenceOptOut,
    /// Bad request, missing template, or a provider validation error.
    Validation,
    Transient,
    RateLimited,
    Permanent,
    RetriesExhausted,
}

impl FailureKind {
    /// Kinds that the retry sweep may pick up again.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, FailureKind::Transient | FailureKind::RateLimited)
    }
}

/// Orchestrator states. A result reports the last state reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeliveryState {
    Created,
    PreferenceChecked,
    Rendered,
    Dispatched,
    Sent,
    Retryable,
    PermanentlyFailed,
    Scheduled,
}

// ============================================================================
// Request
// ============================================================================

/// Who a notification goes to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub email: Option<String>,
    pub phone: Option<String>,
    /// Identifier used for preference lookups.
    pub recipient_id: Option<String>,
    pub name: Option<String>,
}

impl Recipient {
    pub fn email(address: impl Into<String>) -> Self {
        Self {
            email: Some(address.into()),
            ..Default::default()
        }
    }

    pub fn phone(number: impl Into<String>) -> Self {
        Self {
            phone: Some(number.into()),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, recipient_id: impl Into<String>) -> Self {
        self.recipient_id = Some(recipient_id.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_phone(mut self, number: impl Into<String>) -> Self {
        self.phone = Some(number.into());
        self
    }

    /// The non-empty address for `channel`, if any.
    pub fn address_for(&self, channel: Channel) -> Option<&str> {
        let field = match channel {
            Channel::Email => self.email.as_deref(),
            Channel::Sms => self.phone.as_deref(),
        };
        field.map(str::trim).filter(|s| !s.is_empty())
    }
}

/// A logical notification to deliver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRequest {
    pub notification_type: NotificationType,
    pub channel: Channel,
    pub recipient: Recipient,
    #[serde(default)]
    pub variables: Variables,
    #[serde(default)]
    pub priority: Priority,
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Test sends bypass settings and preferences and are never retried.
    #[serde(default)]
    pub is_test: bool,
}

impl NotificationRequest {
    pub fn new(
        notification_type: NotificationType,
        channel: Channel,
        recipient: Recipient,
    ) -> Self {
        Self {
            notification_type,
            channel,
            recipient,
            variables: Variables::new(),
            priority: Priority::default(),
            scheduled_at: None,
            is_test: false,
        }
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }

    pub fn with_variables<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.variables
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn scheduled_for(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    pub fn as_test(mut self) -> Self {
        self.is_test = true;
        self
    }

    pub fn recipient_address(&self) -> Option<&str> {
        self.recipient.address_for(self.channel)
    }

    /// Check that the channel has a usable recipient field.
    pub fn validate_recipient(&self) -> Result<(), String> {
        let address = self
            .recipient_address()
            .ok_or_else(|| format!("missing {} recipient", self.channel))?;
        match self.channel {
            Channel::Email if !address.validate_email() => {
                Err(format!("invalid email address: {address}"))
            }
            Channel::Sms if address.chars().filter(char::is_ascii_digit).count() < 3 => {
                Err(format!("invalid phone number: {address}"))
            }
            _ => Ok(()),
        }
    }
}

// ============================================================================
// Rendered content
// ============================================================================

/// Character and segment counts for an SMS body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmsMetrics {
    pub char_count: usize,
    pub segments: u32,
}

/// Output of rendering a template against a variable bag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedMessage {
    pub subject: Option<String>,
    pub html_body: Option<String>,
    pub text_body: String,
    pub sms: Option<SmsMetrics>,
    /// Tokens left in the output because no variable matched them.
    #[serde(default)]
    pub unresolved: Vec<String>,
}

// ============================================================================
// Notification log record
// ============================================================================

/// One logged attempt to deliver a notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationAttempt {
    pub id: Uuid,
    pub notification_type: NotificationType,
    pub channel: Channel,
    /// Full recipient, kept for replay.
    pub recipient: Recipient,
    /// The address the channel delivers to.
    pub recipient_address: String,
    pub rendered: Option<RenderedMessage>,
    pub variables: Variables,
    pub priority: Priority,
    pub status: AttemptStatus,
    pub retry_count: u32,
    pub retry_after: Option<DateTime<Utc>>,
    pub provider_message_id: Option<String>,
    pub error_message: Option<String>,
    pub error_kind: Option<FailureKind>,
    pub is_test: bool,
    /// Set on manual resends, pointing at the original attempt.
    pub resend_of: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl NotificationAttempt {
    fn base(request: &NotificationRequest, status: AttemptStatus, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            notification_type: request.notification_type,
            channel: request.channel,
            recipient: request.recipient.clone(),
            recipient_address: request.recipient_address().unwrap_or_default().to_string(),
            rendered: None,
            variables: request.variables.clone(),
            priority: request.priority,
            status,
            retry_count: 0,
            retry_after: None,
            provider_message_id: None,
            error_message: None,
            error_kind: None,
            is_test: request.is_test,
            resend_of: None,
            created_at: now,
            updated_at: now,
            sent_at: None,
        }
    }

    /// A new in-flight attempt.
    pub fn pending(
        request: &NotificationRequest,
        rendered: RenderedMessage,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            rendered: Some(rendered),
            ..Self::base(request, AttemptStatus::Pending, now)
        }
    }

    /// A terminal failure recorded without contacting any transport.
    pub fn rejected(
        request: &NotificationRequest,
        kind: FailureKind,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            error_kind: Some(kind),
            error_message: Some(message.into()),
            ..Self::base(request, AttemptStatus::Failed, now)
        }
    }

    /// An attempt held until `at`.
    pub fn scheduled(
        request: &NotificationRequest,
        rendered: RenderedMessage,
        at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            rendered: Some(rendered),
            retry_after: Some(at),
            ..Self::base(request, AttemptStatus::Scheduled, now)
        }
    }

    /// Rebuild the request this attempt was created from.
    pub fn to_request(&self) -> NotificationRequest {
        NotificationRequest {
            notification_type: self.notification_type,
            channel: self.channel,
            recipient: self.recipient.clone(),
            variables: self.variables.clone(),
            priority: self.priority,
            scheduled_at: None,
            is_test: self.is_test,
        }
    }

    /// Failed-with-budget or scheduled attempts whose time has come.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            AttemptStatus::Failed | AttemptStatus::Scheduled => {
                self.retry_after.is_some_and(|at| at <= now)
            }
            _ => false,
        }
    }

    pub fn apply(&mut self, outcome: &AttemptOutcome, now: DateTime<Utc>) {
        self.status = outcome.status;
        self.retry_count = outcome.retry_count;
        self.retry_after = outcome.retry_after;
        self.provider_message_id = outcome.provider_message_id.clone();
        self.error_message = outcome.error_message.clone();
        self.error_kind = outcome.error_kind;
        self.sent_at = outcome.sent_at;
        if let Some(rendered) = &outcome.rendered {
            self.rendered = Some(rendered.clone());
        }
        self.updated_at = now;
    }
}

/// Final state written to a pending attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptOutcome {
    pub status: AttemptStatus,
    pub retry_count: u32,
    pub retry_after: Option<DateTime<Utc>>,
    pub provider_message_id: Option<String>,
    pub error_message: Option<String>,
    pub error_kind: Option<FailureKind>,
    pub sent_at: Option<DateTime<Utc>>,
    /// Replaces the stored render when the attempt was re-rendered.
    pub rendered: Option<RenderedMessage>,
}

impl AttemptOutcome {
    pub fn sent(provider_message_id: String, retry_count: u32, now: DateTime<Utc>) -> Self {
        Self {
            status: AttemptStatus::Sent,
            retry_count,
            retry_after: None,
            provider_message_id: Some(provider_message_id),
            error_message: None,
            error_kind: None,
            sent_at: Some(now),
            rendered: None,
        }
    }

    pub fn retry_scheduled(
        kind: FailureKind,
        message: impl Into<String>,
        retry_count: u32,
        retry_after: DateTime<Utc>,
    ) -> Self {
        Self {
            status: AttemptStatus::Failed,
            retry_count,
            retry_after: Some(retry_after),
            provider_message_id: None,
            error_message: Some(message.into()),
            error_kind: Some(kind),
            sent_at: None,
            rendered: None,
        }
    }

    pub fn failed(kind: FailureKind, message: impl Into<String>, retry_count: u32) -> Self {
        Self {
            status: AttemptStatus::Failed,
            retry_count,
            retry_after: None,
            provider_message_id: None,
            error_message: Some(message.into()),
            error_kind: Some(kind),
            sent_at: None,
            rendered: None,
        }
    }

    pub fn with_rendered(mut self, rendered: RenderedMessage) -> Self {
        self.rendered = Some(rendered);
        self
    }
}

// ============================================================================
// Results
// ============================================================================

/// Why a send did not succeed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryFailure {
    pub kind: FailureKind,
    pub message: String,
    /// When the retry sweep will try again, if it will.
    pub retry_at: Option<DateTime<Utc>>,
}

/// Outcome of a single `send`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryResult {
    pub success: bool,
    pub provider_id: Option<String>,
    pub log_id: Uuid,
    pub state: DeliveryState,
    pub failure: Option<DeliveryFailure>,
}

impl DeliveryResult {
    pub fn sent(log_id: Uuid, provider_id: String) -> Self {
        Self {
            success: true,
            provider_id: Some(provider_id),
            log_id,
            state: DeliveryState::Sent,
            failure: None,
        }
    }

    pub fn failed(
        log_id: Uuid,
        state: DeliveryState,
        kind: FailureKind,
        message: impl Into<String>,
        retry_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            success: false,
            provider_id: None,
            log_id,
            state,
            failure: Some(DeliveryFailure {
                kind,
                message: message.into(),
                retry_at,
            }),
        }
    }

    pub fn scheduled(log_id: Uuid) -> Self {
        Self {
            success: false,
            provider_id: None,
            log_id,
            state: DeliveryState::Scheduled,
            failure: None,
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.failure.as_ref().map(|f| f.kind)
    }

    /// True when the attempt is parked for the retry sweep.
    pub fn will_retry(&self) -> bool {
        self.failure.as_ref().is_some_and(|f| f.retry_at.is_some())
    }
}

/// Filters for listing attempts.
#[derive(Debug, Clone)]
pub struct LogFilter {
    pub status: Option<AttemptStatus>,
    pub channel: Option<Channel>,
    pub notification_type: Option<NotificationType>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub limit: usize,
    pub offset: usize,
}

impl Default for LogFilter {
    fn default() -> Self {
        Self {
            status: None,
            channel: None,
            notification_type: None,
            created_after: None,
            created_before: None,
            limit: 100,
            offset: 0,
        }
    }
}

impl LogFilter {
    pub fn matches(&self, attempt: &NotificationAttempt) -> bool {
        self.status.is_none_or(|s| attempt.status == s)
            && self.channel.is_none_or(|c| attempt.channel == c)
            && self
                .notification_type
                .is_none_or(|t| attempt.notification_type == t)
            && self.created_after.is_none_or(|t| attempt.created_at >= t)
            && self.created_before.is_none_or(|t| attempt.created_at < t)
    }
}
