//! Notification orchestrator.
//!
//! ```text
//! send(request)
//!   Created ──▶ PreferenceChecked ──▶ Rendered ──▶ Dispatched ──┬──▶ Sent
//!      │               │                  │                     ├──▶ Retryable
//!      └───────────────┴── short-circuit ─┴─▶ failed            └──▶ PermanentlyFailed
//! ```
//!
//! Every path writes exactly one log mutation and leaves the attempt out of
//! `pending` before returning. Failing to write the log is the only error a
//! caller sees.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::backoff::{BackoffPolicy, JitterSource, ThreadJitter};
use crate::classifier::ClassificationTable;
use crate::config::DeliveryConfig;
use crate::error::{NotificationError, NotificationResult};
use crate::metrics::DeliveryMetrics;
use crate::models::{
    AttemptOutcome, Channel, DeliveryResult, DeliveryState, FailureKind, LogFilter,
    NotificationAttempt, NotificationRequest, NotificationType, RenderedMessage, Variables,
};
use crate::preferences::{AllowAll, PreferenceSource};
use crate::providers::{EmailContent, Providers, TransportError};
use crate::repository::NotificationLog;
use crate::settings::{Settings, SettingsCache};
use crate::templates::{TemplateEngine, TemplateStore};

pub const DISABLED_MESSAGE: &str = "notification disabled";
pub const PREFERENCE_MESSAGE: &str = "customer preference";
pub const TEMPLATE_NOT_FOUND_MESSAGE: &str = "template not found";

/// A send stopped before reaching a transport.
#[derive(Debug, Clone)]
struct Blocked {
    state: DeliveryState,
    kind: FailureKind,
    message: String,
}

impl Blocked {
    fn new(state: DeliveryState, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            state,
            kind,
            message: message.into(),
        }
    }
}

enum Prepared {
    Ready(RenderedMessage),
    Blocked(Blocked),
}

/// What to write after a failure.
struct FailureDecision {
    outcome: AttemptOutcome,
    kind: FailureKind,
    retry_at: Option<DateTime<Utc>>,
}

/// Service for delivering notifications.
pub struct NotificationService<L: NotificationLog> {
    log: Arc<L>,
    providers: Providers,
    templates: Arc<dyn TemplateStore>,
    preferences: Arc<dyn PreferenceSource>,
    settings: Arc<SettingsCache>,
    engine: TemplateEngine,
    classifier: ClassificationTable,
    backoff: BackoffPolicy,
    jitter: Arc<dyn JitterSource>,
    transport_timeout: Duration,
    metrics: DeliveryMetrics,
}

impl<L: NotificationLog> NotificationService<L> {
    pub fn new(
        log: L,
        providers: Providers,
        templates: Arc<dyn TemplateStore>,
        settings: Arc<SettingsCache>,
    ) -> Self {
        Self {
            log: Arc::new(log),
            providers,
            templates,
            preferences: Arc::new(AllowAll),
            settings,
            engine: TemplateEngine::default(),
            classifier: ClassificationTable::default(),
            backoff: BackoffPolicy::default(),
            jitter: Arc::new(ThreadJitter),
            transport_timeout: Duration::from_secs(10),
            metrics: DeliveryMetrics,
        }
    }

    /// Apply the business context, backoff and timeout from `config`.
    pub fn with_config(mut self, config: &DeliveryConfig) -> Self {
        self.engine = TemplateEngine::new(config.business.clone());
        self.backoff = config.backoff;
        self.transport_timeout = config.transport_timeout;
        self
    }

    pub fn with_preferences(mut self, preferences: Arc<dyn PreferenceSource>) -> Self {
        self.preferences = preferences;
        self
    }

    pub fn with_engine(mut self, engine: TemplateEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_classifier(mut self, classifier: ClassificationTable) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_jitter(mut self, jitter: Arc<dyn JitterSource>) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_transport_timeout(mut self, timeout: Duration) -> Self {
        self.transport_timeout = timeout;
        self
    }

    pub fn log(&self) -> &Arc<L> {
        &self.log
    }

    pub fn settings(&self) -> &Arc<SettingsCache> {
        &self.settings
    }

    /// Upper bound for a single provider call.
    pub fn transport_timeout(&self) -> Duration {
        self.transport_timeout
    }

    /// Deliver a notification.
    #[instrument(
        skip(self, request),
        fields(notification_type = %request.notification_type, channel = %request.channel)
    )]
    pub async fn send(&self, request: NotificationRequest) -> NotificationResult<DeliveryResult> {
        self.deliver_new(request, None).await
    }

    /// Send a stored attempt again as a new attempt. The original row is not touched.
    #[instrument(skip(self), fields(attempt_id = %attempt_id))]
    pub async fn resend(&self, attempt_id: Uuid) -> NotificationResult<DeliveryResult> {
        let original = self
            .log
            .get(attempt_id)
            .await?
            .ok_or(NotificationError::AttemptNotFound(attempt_id))?;

        info!(
            notification_type = %original.notification_type,
            recipient = %original.recipient_address,
            "Resending notification"
        );
        self.deliver_new(original.to_request(), Some(attempt_id))
            .await
    }

    /// Render the active template without logging or sending anything.
    pub async fn preview(
        &self,
        notification_type: NotificationType,
        channel: Channel,
        variables: &Variables,
    ) -> NotificationResult<RenderedMessage> {
        let template = self
            .templates
            .get_active(notification_type, channel)
            .await?
            .ok_or_else(|| {
                NotificationError::TemplateError(format!(
                    "no active {channel} template for {notification_type}"
                ))
            })?;
        self.engine.render(&template, variables)
    }

    /// Deliver an attempt the retry sweep has claimed, updating the same row.
    #[instrument(
        skip(self, attempt),
        fields(attempt_id = %attempt.id, retry_count = attempt.retry_count)
    )]
    pub async fn redeliver(
        &self,
        attempt: NotificationAttempt,
    ) -> NotificationResult<DeliveryResult> {
        let request = attempt.to_request();
        let (settings, prepared) = match self.prepare(&request).await {
            Ok(prepared) => prepared,
            Err(e) => {
                // The row is already claimed; count this against its budget.
                warn!(attempt_id = %attempt.id, error = %e, "Could not prepare redelivery");
                let settings = self.load_settings(request.notification_type).await;
                let blocked = Blocked::new(
                    DeliveryState::PreferenceChecked,
                    FailureKind::Transient,
                    e.to_string(),
                );
                (settings, Prepared::Blocked(blocked))
            }
        };

        match prepared {
            Prepared::Ready(rendered) => {
                self.dispatch_and_complete(&attempt, rendered, &settings)
                    .await
            }
            Prepared::Blocked(blocked) => {
                let decision = self.decide_failure(
                    attempt.retry_count,
                    blocked.kind,
                    &blocked.message,
                    &settings,
                    attempt.is_test,
                    Utc::now(),
                );
                self.record_failure(attempt.channel, &decision);
                self.complete(attempt.id, decision.outcome).await?;

                let state = if decision.retry_at.is_some() {
                    DeliveryState::Retryable
                } else {
                    blocked.state
                };
                Ok(DeliveryResult::failed(
                    attempt.id,
                    state,
                    decision.kind,
                    blocked.message,
                    decision.retry_at,
                ))
            }
        }
    }

    pub async fn get_attempt(&self, id: Uuid) -> NotificationResult<NotificationAttempt> {
        self.log
            .get(id)
            .await?
            .ok_or(NotificationError::AttemptNotFound(id))
    }

    pub async fn list_attempts(
        &self,
        filter: LogFilter,
    ) -> NotificationResult<Vec<NotificationAttempt>> {
        self.log.list(filter).await
    }

    async fn deliver_new(
        &self,
        request: NotificationRequest,
        resend_of: Option<Uuid>,
    ) -> NotificationResult<DeliveryResult> {
        let (settings, prepared) = self.prepare(&request).await?;
        let now = Utc::now();

        let rendered = match prepared {
            Prepared::Ready(rendered) => rendered,
            Prepared::Blocked(blocked) => {
                let decision = self.decide_failure(
                    0,
                    blocked.kind,
                    &blocked.message,
                    &settings,
                    request.is_test,
                    now,
                );

                let mut attempt =
                    NotificationAttempt::rejected(&request, blocked.kind, &blocked.message, now);
                attempt.apply(&decision.outcome, now);
                attempt.resend_of = resend_of;
                let attempt = self.log.insert(attempt).await?;

                info!(
                    attempt_id = %attempt.id,
                    kind = %decision.kind,
                    reason = %blocked.message,
                    "Notification not sent"
                );
                self.record_failure(request.channel, &decision);

                let state = if decision.retry_at.is_some() {
                    DeliveryState::Retryable
                } else {
                    blocked.state
                };
                return Ok(DeliveryResult::failed(
                    attempt.id,
                    state,
                    decision.kind,
                    blocked.message,
                    decision.retry_at,
                ));
            }
        };

        if let Some(at) = request.scheduled_at.filter(|at| *at > now) {
            let mut attempt = NotificationAttempt::scheduled(&request, rendered, at, now);
            attempt.resend_of = resend_of;
            let attempt = self.log.insert(attempt).await?;
            info!(attempt_id = %attempt.id, scheduled_at = %at, "Notification scheduled");
            return Ok(DeliveryResult::scheduled(attempt.id));
        }

        let mut attempt = NotificationAttempt::pending(&request, rendered.clone(), now);
        attempt.resend_of = resend_of;
        let attempt = self.log.insert(attempt).await?;
        debug!(attempt_id = %attempt.id, "Attempt logged as pending");

        self.dispatch_and_complete(&attempt, rendered, &settings)
            .await
    }

    /// Run the checks ahead of dispatch and render the message.
    async fn prepare(
        &self,
        request: &NotificationRequest,
    ) -> NotificationResult<(Settings, Prepared)> {
        if let Err(reason) = request.validate_recipient() {
            return Ok((
                self.settings.defaults().clone(),
                Prepared::Blocked(Blocked::new(
                    DeliveryState::Created,
                    FailureKind::Validation,
                    reason,
                )),
            ));
        }

        let settings = self.load_settings(request.notification_type).await;

        if !request.is_test && !settings.channel_enabled(request.channel) {
            return Ok((
                settings,
                Prepared::Blocked(Blocked::new(
                    DeliveryState::Created,
                    FailureKind::Disabled,
                    DISABLED_MESSAGE,
                )),
            ));
        }

        if let Some(blocked) = self.check_preferences(request).await {
            return Ok((settings, Prepared::Blocked(blocked)));
        }

        let Some(template) = self
            .templates
            .get_active(request.notification_type, request.channel)
            .await?
        else {
            return Ok((
                settings,
                Prepared::Blocked(Blocked::new(
                    DeliveryState::PreferenceChecked,
                    FailureKind::Validation,
                    TEMPLATE_NOT_FOUND_MESSAGE,
                )),
            ));
        };

        let rendered = match self.engine.render(&template, &request.variables) {
            Ok(rendered) => rendered,
            Err(e) => {
                return Ok((
                    settings,
                    Prepared::Blocked(Blocked::new(
                        DeliveryState::PreferenceChecked,
                        FailureKind::Validation,
                        e.to_string(),
                    )),
                ));
            }
        };

        let missing = self.engine.missing_required(&template, &rendered);
        if !missing.is_empty() {
            warn!(
                template_id = %template.id,
                version = template.version,
                missing = ?missing,
                "Required template variables missing, sending as rendered"
            );
        }

        Ok((settings, Prepared::Ready(rendered)))
    }

    async fn load_settings(&self, notification_type: NotificationType) -> Settings {
        match self.settings.get(notification_type).await {
            Ok(settings) => settings,
            Err(e) => {
                warn!(error = %e, "Settings unavailable, using defaults");
                self.settings.defaults().clone()
            }
        }
    }

    async fn check_preferences(&self, request: &NotificationRequest) -> Option<Blocked> {
        if request.is_test || request.notification_type.is_transactional() {
            return None;
        }
        let recipient_id = request.recipient.recipient_id.as_deref()?;

        match self
            .preferences
            .is_allowed(recipient_id, request.notification_type, request.channel)
            .await
        {
            Ok(decision) if decision.allowed => None,
            Ok(decision) => {
                debug!(recipient_id, reason = ?decision.reason, "Blocked by recipient preference");
                Some(Blocked::new(
                    DeliveryState::Created,
                    FailureKind::PreferenceOptOut,
                    PREFERENCE_MESSAGE,
                ))
            }
            Err(e) => {
                warn!(recipient_id, error = %e, "Preference lookup failed");
                Some(Blocked::new(
                    DeliveryState::Created,
                    FailureKind::Transient,
                    format!("preference lookup failed: {e}"),
                ))
            }
        }
    }

    async fn dispatch_and_complete(
        &self,
        attempt: &NotificationAttempt,
        rendered: RenderedMessage,
        settings: &Settings,
    ) -> NotificationResult<DeliveryResult> {
        let started = Instant::now();
        let result = self.dispatch(attempt, &rendered).await;
        self.metrics
            .dispatch_duration(attempt.channel, started.elapsed());
        let now = Utc::now();

        match result {
            Ok(provider_id) => {
                info!(attempt_id = %attempt.id, provider_id = %provider_id, "Notification sent");
                self.metrics
                    .sent(attempt.notification_type, attempt.channel);
                let outcome = AttemptOutcome::sent(provider_id.clone(), attempt.retry_count, now)
                    .with_rendered(rendered);
                self.complete(attempt.id, outcome).await?;
                Ok(DeliveryResult::sent(attempt.id, provider_id))
            }
            Err(err) => {
                let classified = self.classifier.classify(&err);
                let decision = self.decide_failure(
                    attempt.retry_count,
                    classified.kind.failure_kind(),
                    &classified.message,
                    settings,
                    attempt.is_test,
                    now,
                );
                warn!(
                    attempt_id = %attempt.id,
                    error_kind = %classified.kind,
                    retry_count = decision.outcome.retry_count,
                    retry_at = ?decision.retry_at,
                    error = %classified.message,
                    "Notification dispatch failed"
                );
                self.record_failure(attempt.channel, &decision);
                self.complete(attempt.id, decision.outcome.with_rendered(rendered))
                    .await?;

                let state = if decision.retry_at.is_some() {
                    DeliveryState::Retryable
                } else {
                    DeliveryState::PermanentlyFailed
                };
                Ok(DeliveryResult::failed(
                    attempt.id,
                    state,
                    decision.kind,
                    classified.message,
                    decision.retry_at,
                ))
            }
        }
    }

    async fn dispatch(
        &self,
        attempt: &NotificationAttempt,
        rendered: &RenderedMessage,
    ) -> Result<String, TransportError> {
        let transport = match attempt.channel {
            Channel::Email => self.providers.email.name(),
            Channel::Sms => self.providers.sms.name(),
        };

        let call = async {
            match attempt.channel {
                Channel::Email => {
                    let email = EmailContent {
                        to_email: attempt.recipient_address.clone(),
                        to_name: attempt.recipient.name.clone().unwrap_or_default(),
                        subject: rendered.subject.clone().unwrap_or_default(),
                        html_body: rendered
                            .html_body
                            .clone()
                            .unwrap_or_else(|| rendered.text_body.clone()),
                        text_body: rendered.text_body.clone(),
                    };
                    self.providers.email.send(&email).await
                }
                Channel::Sms => {
                    let receipt = self
                        .providers
                        .sms
                        .send(&attempt.recipient_address, &rendered.text_body)
                        .await?;
                    debug!(segments = receipt.segments, "SMS accepted");
                    Ok::<_, TransportError>(receipt.message_id)
                }
            }
        };

        match tokio::time::timeout(self.transport_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::timeout(
                transport,
                format!("no response within {:?}", self.transport_timeout),
            )),
        }
    }

    /// Retry when the kind is recoverable and budget remains, otherwise fail for good.
    ///
    /// `max_retries` counts retries after the first try, so a row may carry
    /// `retry_count == max_retries` with `retry_after` set while its last retry is due.
    fn decide_failure(
        &self,
        retry_count: u32,
        kind: FailureKind,
        message: &str,
        settings: &Settings,
        is_test: bool,
        now: DateTime<Utc>,
    ) -> FailureDecision {
        let recoverable = kind.is_recoverable() && !is_test;

        if recoverable && retry_count < settings.max_retries {
            let retry_at = self.backoff.retry_at(
                now,
                retry_count,
                &settings.retry_delays_seconds,
                self.jitter.as_ref(),
            );
            return FailureDecision {
                outcome: AttemptOutcome::retry_scheduled(kind, message, retry_count + 1, retry_at),
                kind,
                retry_at: Some(retry_at),
            };
        }

        let kind = if recoverable {
            FailureKind::RetriesExhausted
        } else {
            kind
        };
        FailureDecision {
            outcome: AttemptOutcome::failed(kind, message, retry_count),
            kind,
            retry_at: None,
        }
    }

    fn record_failure(&self, channel: Channel, decision: &FailureDecision) {
        self.metrics.failed(channel, decision.kind);
        if decision.retry_at.is_some() {
            self.metrics.retry_scheduled(channel);
        }
    }

    async fn complete(&self, id: Uuid, outcome: AttemptOutcome) -> NotificationResult<()> {
        if !self.log.complete(id, outcome).await? {
            warn!(attempt_id = %id, "Attempt was no longer pending, outcome discarded");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::FixedJitter;
    use crate::classifier::ErrorKind;
    use crate::models::{AttemptStatus, Recipient};
    use crate::preferences::MockPreferenceSource;
    use crate::providers::{MockEmailProvider, MockSmsProvider};
    use crate::repository::{InMemoryNotificationLog, MockNotificationLog};
    use crate::settings::InMemorySettingsSource;
    use crate::templates::{InMemoryTemplateStore, Template};

    fn settings_cache() -> Arc<SettingsCache> {
        Arc::new(SettingsCache::new(
            Arc::new(InMemorySettingsSource::new()),
            Duration::from_secs(60),
        ))
    }

    async fn templates() -> Arc<dyn TemplateStore> {
        Arc::new(
            InMemoryTemplateStore::with_templates([
                Template::sms(NotificationType::RetentionReminder, "We miss you, {{name}}"),
                Template::email(
                    NotificationType::StatusUpdate,
                    "Update",
                    "<p>{{status}}</p>",
                    "{{status}}",
                ),
            ])
            .await
            .unwrap(),
        )
    }

    fn sms_request() -> NotificationRequest {
        NotificationRequest::new(
            NotificationType::RetentionReminder,
            Channel::Sms,
            Recipient::phone("+15550100").with_id("cust-1"),
        )
        .with_variable("name", "Jane")
    }

    #[tokio::test]
    async fn test_store_failure_propagates() {
        let mut log = MockNotificationLog::new();
        log.expect_insert()
            .returning(|_| Err(NotificationError::DatabaseError("connection refused".into())));

        let service =
            NotificationService::new(log, Providers::mock(), templates().await, settings_cache());
        let result = service.send(sms_request()).await;
        assert!(matches!(result, Err(NotificationError::DatabaseError(_))));
    }

    #[tokio::test]
    async fn test_preference_error_is_retried() {
        let mut prefs = MockPreferenceSource::new();
        prefs
            .expect_is_allowed()
            .returning(|_, _, _| Err(NotificationError::Internal("timeout".into())));

        let log = InMemoryNotificationLog::new();
        let sms = MockSmsProvider::new();
        let service = NotificationService::new(
            log.clone(),
            Providers::new(Arc::new(MockEmailProvider::new()), Arc::new(sms.clone())),
            templates().await,
            settings_cache(),
        )
        .with_preferences(Arc::new(prefs))
        .with_jitter(Arc::new(FixedJitter(0.5)));

        let result = service.send(sms_request()).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.state, DeliveryState::Retryable);
        assert_eq!(result.failure_kind(), Some(FailureKind::Transient));
        assert_eq!(sms.sent_count().await, 0);

        let attempt = log.get(result.log_id).await.unwrap().unwrap();
        assert_eq!(attempt.status, AttemptStatus::Failed);
        assert_eq!(attempt.retry_count, 1);
        assert!(attempt.retry_after.is_some());
    }

    #[tokio::test]
    async fn test_transactional_types_skip_preferences() {
        let mut prefs = MockPreferenceSource::new();
        prefs.expect_is_allowed().never();

        let service = NotificationService::new(
            InMemoryNotificationLog::new(),
            Providers::mock(),
            templates().await,
            settings_cache(),
        )
        .with_preferences(Arc::new(prefs));

        let request = NotificationRequest::new(
            NotificationType::StatusUpdate,
            Channel::Email,
            Recipient::email("jane@example.com").with_id("cust-1"),
        )
        .with_variable("status", "Ready for pickup");

        let result = service.send(request).await.unwrap();
        assert!(result.success);
    }

    #[tokio::test]
    async fn test_test_sends_are_never_retried() {
        let sms = MockSmsProvider::new();
        sms.fail_next(TransportError::status("mock", 503, "unavailable"))
            .await;
        let service = NotificationService::new(
            InMemoryNotificationLog::new(),
            Providers::new(Arc::new(MockEmailProvider::new()), Arc::new(sms.clone())),
            templates().await,
            settings_cache(),
        );

        let result = service.send(sms_request().as_test()).await.unwrap();
        assert_eq!(result.state, DeliveryState::PermanentlyFailed);
        assert_eq!(result.failure_kind(), Some(FailureKind::Transient));
        assert!(!result.will_retry());
    }

    #[tokio::test]
    async fn test_preview_leaves_unresolved_tokens() {
        let service = NotificationService::new(
            InMemoryNotificationLog::new(),
            Providers::mock(),
            templates().await,
            settings_cache(),
        );

        let no_vars = Variables::new();
        let rendered = service
            .preview(NotificationType::RetentionReminder, Channel::Sms, &no_vars)
            .await
            .unwrap();
        assert_eq!(rendered.text_body, "We miss you, {{name}}");
        assert_eq!(rendered.unresolved, vec!["name".to_string()]);
        assert!(service.log().is_empty().await);

        let missing = service
            .preview(NotificationType::PaymentFailed, Channel::Email, &no_vars)
            .await;
        assert!(matches!(missing, Err(NotificationError::TemplateError(_))));
    }

    #[tokio::test]
    async fn test_get_attempt() {
        let service = NotificationService::new(
            InMemoryNotificationLog::new(),
            Providers::mock(),
            templates().await,
            settings_cache(),
        );

        let result = service.send(sms_request()).await.unwrap();
        let attempt = service.get_attempt(result.log_id).await.unwrap();
        assert_eq!(attempt.status, AttemptStatus::Sent);
        assert_eq!(attempt.recipient_address, "+15550100");

        let missing = service.get_attempt(Uuid::now_v7()).await;
        assert!(matches!(missing, Err(NotificationError::AttemptNotFound(_))));
    }

    #[tokio::test]
    async fn test_custom_classifier_overrides_defaults() {
        let sms = MockSmsProvider::new();
        sms.fail_next(TransportError::status("mock", 503, "unavailable"))
            .await;
        let classifier = ClassificationTable::builder()
            .with_status(503, ErrorKind::Permanent)
            .build();
        let service = NotificationService::new(
            InMemoryNotificationLog::new(),
            Providers::new(Arc::new(MockEmailProvider::new()), Arc::new(sms.clone())),
            templates().await,
            settings_cache(),
        )
        .with_classifier(classifier);

        let result = service.send(sms_request()).await.unwrap();
        assert_eq!(result.state, DeliveryState::PermanentlyFailed);
        assert_eq!(result.failure_kind(), Some(FailureKind::Permanent));

        let attempt = service.get_attempt(result.log_id).await.unwrap();
        assert_eq!(attempt.retry_count, 0);
        assert!(attempt.retry_after.is_none());
    }

    #[tokio::test]
    async fn test_resend_unknown_attempt() {
        let service = NotificationService::new(
            InMemoryNotificationLog::new(),
            Providers::mock(),
            templates().await,
            settings_cache(),
        );
        let id = Uuid::now_v7();
        let err = service.resend(id).await.unwrap_err();
        assert!(matches!(err, NotificationError::AttemptNotFound(missing) if missing == id));
    }
}
