//! Delivery engine tests
//!
//! These tests drive the orchestrator and the retry sweep end to end with the
//! in-memory stores and the recording mock providers:
//! - Send outcomes (sent, retryable, permanent, short-circuited)
//! - Retry budget and backoff
//! - Sweep idempotence and concurrent sweeps
//! - Sweep budget and redelivery errors
//! - Manual resend, scheduled delivery and stale recovery

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use domain_notifications::models::AttemptOutcome;
use domain_notifications::providers::{MockEmailProvider, MockSmsProvider};
use domain_notifications::templates::{BusinessContext, TemplateVersion};
use domain_notifications::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use uuid::Uuid;

type Service = NotificationService<InMemoryNotificationLog>;

struct Harness {
    service: Arc<Service>,
    log: InMemoryNotificationLog,
    email: MockEmailProvider,
    sms: MockSmsProvider,
    settings: Arc<SettingsCache>,
    preferences: InMemoryPreferences,
}

impl Harness {
    async fn new() -> Self {
        Self::build(MockEmailProvider::new(), MockSmsProvider::new(), |s| s).await
    }

    async fn build(
        email: MockEmailProvider,
        sms: MockSmsProvider,
        configure: impl FnOnce(Service) -> Service,
    ) -> Self {
        let log = InMemoryNotificationLog::new();
        let templates = InMemoryTemplateStore::with_templates([
            Template::email(
                NotificationType::BookingConfirmation,
                "Booking confirmed for {{date}}",
                "<p>Hi {{name}}, see you on {{date}}. Questions? Call {{business.phone}}.</p>",
                "Hi {{name}}, see you on {{date}}.",
            )
            .with_variable("name", true)
            .with_variable("date", true),
            Template::sms(
                NotificationType::AppointmentReminder,
                "Reminder: {{service}} on {{date}} at {{business.name}}",
            )
            .with_variable("date", true),
            Template::sms(NotificationType::RetentionReminder, "We miss you {{name}}!"),
        ])
        .await
        .unwrap();

        let settings = Arc::new(SettingsCache::new(
            Arc::new(InMemorySettingsSource::new()),
            Duration::from_secs(60),
        ));
        let preferences = InMemoryPreferences::new();
        let business = BusinessContext {
            name: "Acme Salon".to_string(),
            phone: "+15550199".to_string(),
            ..Default::default()
        };

        let service = NotificationService::new(
            log.clone(),
            Providers::new(Arc::new(email.clone()), Arc::new(sms.clone())),
            Arc::new(templates),
            settings.clone(),
        )
        .with_preferences(Arc::new(preferences.clone()))
        .with_engine(TemplateEngine::new(business))
        .with_jitter(Arc::new(FixedJitter(0.5)));

        Self {
            service: Arc::new(configure(service)),
            log,
            email,
            sms,
            settings,
            preferences,
        }
    }

    fn sweeper(&self) -> RetryManager<InMemoryNotificationLog> {
        RetryManager::new(
            self.service.clone(),
            RetryConfig::default().with_stagger_max(Duration::ZERO),
        )
    }

    async fn attempt(&self, result: &DeliveryResult) -> NotificationAttempt {
        self.log.get(result.log_id).await.unwrap().unwrap()
    }
}

fn booking_email(address: &str) -> NotificationRequest {
    NotificationRequest::new(
        NotificationType::BookingConfirmation,
        Channel::Email,
        Recipient::email(address).with_name("Jane"),
    )
    .with_variable("name", "Jane")
    .with_variable("date", "Monday 10:00")
}

fn reminder_sms(phone: &str) -> NotificationRequest {
    NotificationRequest::new(
        NotificationType::AppointmentReminder,
        Channel::Sms,
        Recipient::phone(phone),
    )
    .with_variables([("service", "Haircut"), ("date", "Monday 10:00")])
}

fn unavailable() -> TransportError {
    TransportError::status("mock", 503, "service unavailable")
}

// ============================================================================
// Send outcomes
// ============================================================================

#[tokio::test]
async fn test_booking_confirmation_is_sent() {
    let h = Harness::build(
        MockEmailProvider::new().with_message_id("abc123"),
        MockSmsProvider::new(),
        |s| s,
    )
    .await;

    let jane = booking_email("jane@example.com");
    let result = h.service.send(jane).await.unwrap();

    assert!(result.success);
    assert_eq!(result.provider_id.as_deref(), Some("abc123"));
    assert_eq!(result.state, DeliveryState::Sent);

    let attempt = h.attempt(&result).await;
    assert_eq!(attempt.status, AttemptStatus::Sent);
    assert_eq!(attempt.provider_message_id.as_deref(), Some("abc123"));
    assert!(attempt.sent_at.is_some());
    assert!(attempt.retry_after.is_none());

    let rendered = attempt.rendered.unwrap();
    assert_eq!(
        rendered.subject.as_deref(),
        Some("Booking confirmed for Monday 10:00")
    );
    assert!(rendered.html_body.unwrap().contains("+15550199"));
    assert!(rendered.unresolved.is_empty());

    let sent = h.email.sent_emails().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to_email, "jane@example.com");
    assert_eq!(sent[0].to_name, "Jane");
}

#[tokio::test]
async fn test_transient_failure_schedules_retry() {
    let h = Harness::new().await;
    h.sms.fail_next(unavailable()).await;

    let before = Utc::now();
    let result = h.service.send(reminder_sms("+15550100")).await.unwrap();
    let after = Utc::now();

    assert!(!result.success);
    assert_eq!(result.state, DeliveryState::Retryable);
    assert_eq!(result.failure_kind(), Some(FailureKind::Transient));
    assert!(result.will_retry());

    let attempt = h.attempt(&result).await;
    assert_eq!(attempt.status, AttemptStatus::Failed);
    assert_eq!(attempt.retry_count, 1);
    let retry_after = attempt.retry_after.unwrap();
    assert!(retry_after >= before + ChronoDuration::seconds(21));
    assert!(retry_after <= after + ChronoDuration::seconds(39));
}

#[tokio::test]
async fn test_retries_stop_at_max_retries() {
    let h = Harness::new().await;
    for _ in 0..3 {
        h.sms.fail_next(unavailable()).await;
    }
    let sweeper = h.sweeper();

    let result = h.service.send(reminder_sms("+15550100")).await.unwrap();
    assert_eq!(h.attempt(&result).await.retry_count, 1);

    let first = sweeper
        .process_due(Utc::now() + ChronoDuration::hours(1), 100)
        .await
        .unwrap();
    assert_eq!(first.failed, 1);
    let attempt = h.attempt(&result).await;
    assert_eq!(attempt.retry_count, 2);
    assert!(attempt.retry_after.is_some());

    let second = sweeper
        .process_due(Utc::now() + ChronoDuration::hours(2), 100)
        .await
        .unwrap();
    assert_eq!(second.failed, 1);

    let attempt = h.attempt(&result).await;
    assert_eq!(attempt.status, AttemptStatus::Failed);
    assert_eq!(attempt.retry_count, 2);
    assert!(attempt.retry_after.is_none());
    assert_eq!(attempt.error_kind, Some(FailureKind::RetriesExhausted));

    let third = sweeper
        .process_due(Utc::now() + ChronoDuration::hours(3), 100)
        .await
        .unwrap();
    assert_eq!(third.processed, 0);
    assert_eq!(h.sms.sent_count().await, 3);
}

#[tokio::test]
async fn test_marketing_opt_out_blocks_transport() {
    let h = Harness::new().await;
    h.preferences.opt_out_of_marketing("cust-1").await;

    let request = NotificationRequest::new(
        NotificationType::RetentionReminder,
        Channel::Sms,
        Recipient::phone("+15550100").with_id("cust-1"),
    )
    .with_variable("name", "Jane");
    let result = h.service.send(request).await.unwrap();

    assert!(!result.success);
    assert_eq!(result.failure_kind(), Some(FailureKind::PreferenceOptOut));
    assert_eq!(h.sms.sent_count().await, 0);

    let attempt = h.attempt(&result).await;
    assert_eq!(attempt.status, AttemptStatus::Failed);
    assert_eq!(
        attempt.error_message.as_deref(),
        Some("customer preference")
    );
    assert!(attempt.retry_after.is_none());
}

#[tokio::test]
async fn test_long_sms_counts_two_segments() {
    let h = Harness::new().await;
    // "We miss you " + name + "!" is 165 characters.
    let request = NotificationRequest::new(
        NotificationType::RetentionReminder,
        Channel::Sms,
        Recipient::phone("+15550100"),
    )
    .with_variable("name", "x".repeat(152));

    let result = h.service.send(request).await.unwrap();
    assert!(result.success);

    let sms = h.attempt(&result).await.rendered.unwrap().sms.unwrap();
    assert_eq!(sms.char_count, 165);
    assert_eq!(sms.segments, 2);
    assert_eq!(h.sms.sent_messages().await[0].body.chars().count(), 165);
}

#[tokio::test]
async fn test_disabled_channel_is_not_dispatched() {
    let h = Harness::new().await;
    h.settings
        .update(
            NotificationType::AppointmentReminder,
            Settings::default().with_channel(Channel::Sms, false),
        )
        .await
        .unwrap();

    let result = h.service.send(reminder_sms("+15550100")).await.unwrap();

    assert!(!result.success);
    assert_eq!(result.failure_kind(), Some(FailureKind::Disabled));
    assert_eq!(h.sms.sent_count().await, 0);
    let attempt = h.attempt(&result).await;
    assert_eq!(attempt.status, AttemptStatus::Failed);
    assert_eq!(
        attempt.error_message.as_deref(),
        Some("notification disabled")
    );
}

#[tokio::test]
async fn test_missing_template_and_recipient_fail_validation() {
    let h = Harness::new().await;

    let no_template = NotificationRequest::new(
        NotificationType::PaymentFailed,
        Channel::Email,
        Recipient::email("jane@example.com"),
    );
    let result = h.service.send(no_template).await.unwrap();
    assert_eq!(result.failure_kind(), Some(FailureKind::Validation));
    assert_eq!(
        h.attempt(&result).await.error_message.as_deref(),
        Some("template not found")
    );

    let no_phone = NotificationRequest::new(
        NotificationType::AppointmentReminder,
        Channel::Sms,
        Recipient::email("jane@example.com"),
    );
    let result = h.service.send(no_phone).await.unwrap();
    assert_eq!(result.failure_kind(), Some(FailureKind::Validation));
    assert_eq!(result.state, DeliveryState::Created);
    assert_eq!(h.attempt(&result).await.status, AttemptStatus::Failed);

    assert_eq!(h.email.sent_count().await + h.sms.sent_count().await, 0);
    assert_eq!(h.log.len().await, 2);
}

#[tokio::test]
async fn test_missing_required_variable_still_sends() {
    let h = Harness::new().await;
    let request = NotificationRequest::new(
        NotificationType::BookingConfirmation,
        Channel::Email,
        Recipient::email("jane@example.com"),
    )
    .with_variable("name", "Jane");

    let result = h.service.send(request).await.unwrap();
    assert!(result.success);

    let rendered = h.attempt(&result).await.rendered.unwrap();
    assert_eq!(
        rendered.subject.as_deref(),
        Some("Booking confirmed for {{date}}")
    );
    assert_eq!(rendered.unresolved, vec!["date".to_string()]);
}

#[tokio::test]
async fn test_validation_error_is_permanent() {
    let h = Harness::new().await;
    h.sms
        .fail_next(TransportError::status("mock", 400, "Invalid 'To' number"))
        .await;

    let result = h.service.send(reminder_sms("+15550100")).await.unwrap();
    assert_eq!(result.state, DeliveryState::PermanentlyFailed);
    assert_eq!(result.failure_kind(), Some(FailureKind::Validation));

    let attempt = h.attempt(&result).await;
    assert_eq!(attempt.retry_count, 0);
    assert!(attempt.retry_after.is_none());

    let sweep = h
        .sweeper()
        .process_due(Utc::now() + ChronoDuration::hours(1), 100)
        .await
        .unwrap();
    assert_eq!(sweep.processed, 0);
}

#[tokio::test]
async fn test_transport_timeout_is_transient() {
    let h = Harness::build(
        MockEmailProvider::new(),
        MockSmsProvider::new().with_delay(Duration::from_millis(200)),
        |s| s.with_transport_timeout(Duration::from_millis(20)),
    )
    .await;

    let result = h.service.send(reminder_sms("+15550100")).await.unwrap();
    assert_eq!(result.state, DeliveryState::Retryable);
    assert_eq!(result.failure_kind(), Some(FailureKind::Transient));
    assert!(result.failure.unwrap().message.contains("no response"));
}

#[tokio::test]
async fn test_per_type_delay_schedule() {
    let h = Harness::new().await;
    h.settings
        .update(
            NotificationType::AppointmentReminder,
            Settings {
                retry_delays_seconds: vec![120],
                ..Settings::default()
            },
        )
        .await
        .unwrap();
    h.sms.fail_next(unavailable()).await;

    let before = Utc::now();
    let result = h.service.send(reminder_sms("+15550100")).await.unwrap();
    let retry_at = result.failure.unwrap().retry_at.unwrap();

    // FixedJitter(0.5) removes the jitter offset.
    assert!(retry_at >= before + ChronoDuration::seconds(119));
    assert!(retry_at <= Utc::now() + ChronoDuration::seconds(121));
}

// ============================================================================
// Retry sweep
// ============================================================================

#[tokio::test]
async fn test_process_due_is_idempotent() {
    let h = Harness::new().await;
    h.sms.fail_next(unavailable()).await;
    h.sms.fail_next(unavailable()).await;

    let first = h.service.send(reminder_sms("+15550100")).await.unwrap();
    let second = h.service.send(reminder_sms("+15550101")).await.unwrap();

    let later = Utc::now() + ChronoDuration::hours(1);
    let sweeper = h.sweeper();

    let sweep = sweeper.process_due(later, 100).await.unwrap();
    assert_eq!(sweep.processed, 2);
    assert_eq!(sweep.succeeded, 2);
    assert!(sweep.errors.is_empty());

    let again = sweeper.process_due(later, 100).await.unwrap();
    assert_eq!(again, RetrySweepResult::default());

    for result in [&first, &second] {
        let attempt = h.attempt(result).await;
        assert_eq!(attempt.status, AttemptStatus::Sent);
        assert_eq!(attempt.retry_count, 1);
    }
    assert_eq!(h.log.len().await, 2);
}

#[tokio::test]
async fn test_nothing_due_before_retry_after() {
    let h = Harness::new().await;
    h.sms.fail_next(unavailable()).await;
    h.service.send(reminder_sms("+15550100")).await.unwrap();

    let sweep = h.sweeper().process_due(Utc::now(), 100).await.unwrap();
    assert_eq!(sweep.processed, 0);
    assert_eq!(h.sms.sent_count().await, 1);
}

#[tokio::test]
async fn test_batch_limit_caps_sweep() {
    let h = Harness::new().await;
    for i in 0..3 {
        h.sms.fail_next(unavailable()).await;
        h.service
            .send(reminder_sms(&format!("+1555010{i}")))
            .await
            .unwrap();
    }

    let later = Utc::now() + ChronoDuration::hours(1);
    let sweeper = h.sweeper();
    assert_eq!(sweeper.process_due(later, 2).await.unwrap().succeeded, 2);
    assert_eq!(sweeper.process_due(later, 2).await.unwrap().succeeded, 1);
}

#[tokio::test]
async fn test_concurrent_sweeps_dispatch_once() {
    const ATTEMPTS: usize = 5;

    let h = Harness::build(
        MockEmailProvider::new(),
        MockSmsProvider::new().with_delay(Duration::from_millis(10)),
        |s| s,
    )
    .await;
    for i in 0..ATTEMPTS {
        h.sms.fail_next(unavailable()).await;
        h.service
            .send(reminder_sms(&format!("+1555020{i}")))
            .await
            .unwrap();
    }
    assert_eq!(h.sms.sent_count().await, ATTEMPTS);

    let later = Utc::now() + ChronoDuration::hours(1);
    let a = h.sweeper();
    let b = h.sweeper();
    let (ra, rb) = tokio::join!(a.process_due(later, 100), b.process_due(later, 100));
    let (ra, rb) = (ra.unwrap(), rb.unwrap());

    assert_eq!(ra.succeeded + rb.succeeded, ATTEMPTS);
    assert_eq!(h.sms.sent_count().await, ATTEMPTS * 2);
    assert!(h
        .log
        .all()
        .await
        .iter()
        .all(|a| a.status == AttemptStatus::Sent));
}

#[tokio::test]
async fn test_sweep_budget_defers_remaining_candidates() {
    let h = Harness::new().await;
    for i in 0..4 {
        h.sms.fail_next(unavailable()).await;
        h.service
            .send(reminder_sms(&format!("+1555030{i}")))
            .await
            .unwrap();
    }

    let later = Utc::now() + ChronoDuration::hours(1);
    let exhausted = RetryManager::new(
        h.service.clone(),
        RetryConfig::default()
            .with_stagger_max(Duration::ZERO)
            .with_budget(Duration::ZERO),
    );
    let sweep = exhausted.process_due(later, 100).await.unwrap();
    assert_eq!(sweep.deferred, 4);
    assert_eq!(sweep.processed, 0);
    assert_eq!(h.sms.sent_count().await, 4);

    let sweep = h.sweeper().process_due(later, 100).await.unwrap();
    assert_eq!(sweep.processed, 4);
    assert_eq!(sweep.succeeded, 4);
    assert_eq!(sweep.deferred, 0);
}

/// Template store that starts failing reads on demand.
struct FlakyTemplates {
    inner: InMemoryTemplateStore,
    failing: AtomicBool,
}

#[async_trait]
impl TemplateStore for FlakyTemplates {
    async fn get_active(
        &self,
        trigger: NotificationType,
        channel: Channel,
    ) -> NotificationResult<Option<Template>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotificationError::DatabaseError("connection reset".into()));
        }
        self.inner.get_active(trigger, channel).await
    }

    async fn save(&self, template: Template) -> NotificationResult<Template> {
        self.inner.save(template).await
    }

    async fn history(&self, template_id: Uuid) -> NotificationResult<Vec<TemplateVersion>> {
        self.inner.history(template_id).await
    }

    async fn rollback(&self, template_id: Uuid, version: i32) -> NotificationResult<Template> {
        self.inner.rollback(template_id, version).await
    }
}

#[tokio::test]
async fn test_redelivery_errors_use_up_retry_budget() {
    let templates = Arc::new(FlakyTemplates {
        inner: InMemoryTemplateStore::with_templates([Template::sms(
            NotificationType::AppointmentReminder,
            "Reminder: {{service}} on {{date}}",
        )])
        .await
        .unwrap(),
        failing: AtomicBool::new(false),
    });
    let log = InMemoryNotificationLog::new();
    let sms = MockSmsProvider::new();
    let service = Arc::new(
        NotificationService::new(
            log.clone(),
            Providers::new(Arc::new(MockEmailProvider::new()), Arc::new(sms.clone())),
            templates.clone(),
            Arc::new(SettingsCache::new(
                Arc::new(InMemorySettingsSource::new()),
                Duration::from_secs(60),
            )),
        )
        .with_jitter(Arc::new(FixedJitter(0.5))),
    );
    let sweeper = RetryManager::new(
        service.clone(),
        RetryConfig::default().with_stagger_max(Duration::ZERO),
    );

    sms.fail_next(unavailable()).await;
    let result = service.send(reminder_sms("+15550100")).await.unwrap();
    let stored = log.get(result.log_id).await.unwrap().unwrap();
    assert_eq!(stored.retry_count, 1);

    templates.failing.store(true, Ordering::SeqCst);

    let first = sweeper
        .run_once(Utc::now() + ChronoDuration::hours(1))
        .await
        .unwrap();
    assert_eq!(first.failed, 1);
    assert!(first.errors.is_empty());
    let attempt = log.get(result.log_id).await.unwrap().unwrap();
    assert_eq!(attempt.status, AttemptStatus::Failed);
    assert_eq!(attempt.retry_count, 2);
    assert!(attempt.retry_after.is_some());

    sweeper
        .run_once(Utc::now() + ChronoDuration::hours(2))
        .await
        .unwrap();
    let attempt = log.get(result.log_id).await.unwrap().unwrap();
    assert_eq!(attempt.status, AttemptStatus::Failed);
    assert!(attempt.retry_after.is_none());
    assert_eq!(attempt.error_kind, Some(FailureKind::RetriesExhausted));

    let third = sweeper
        .run_once(Utc::now() + ChronoDuration::hours(3))
        .await
        .unwrap();
    assert_eq!(third.processed, 0);
    assert_eq!(sms.sent_count().await, 1);
}

#[tokio::test]
async fn test_stale_pending_attempt_is_recovered() {
    let h = Harness::new().await;
    let long_ago = Utc::now() - ChronoDuration::minutes(30);
    let request = reminder_sms("+15550100");
    let stuck = NotificationAttempt::pending(&request, RenderedMessage::default(), long_ago);
    let stuck = h.log.insert(stuck).await.unwrap();

    let now = Utc::now();
    let sweep = h.sweeper().run_once(now).await.unwrap();
    assert_eq!(sweep.succeeded, 1);

    let attempt = h.log.get(stuck.id).await.unwrap().unwrap();
    assert_eq!(attempt.status, AttemptStatus::Sent);
    assert_eq!(
        attempt.rendered.unwrap().text_body,
        "Reminder: Haircut on Monday 10:00 at Acme Salon"
    );
}

#[tokio::test]
async fn test_in_flight_attempt_is_not_recovered_as_stale() {
    let h = Harness::build(
        MockEmailProvider::new(),
        MockSmsProvider::new().with_delay(Duration::from_millis(300)),
        |s| s,
    )
    .await;
    let sweeper = RetryManager::new(
        h.service.clone(),
        RetryConfig::default()
            .with_stagger_max(Duration::ZERO)
            .with_stale_after(Duration::from_millis(100)),
    );
    assert!(sweeper.config().stale_after > Duration::from_secs(10));

    let (sent, sweep) = tokio::join!(h.service.send(reminder_sms("+15550100")), async {
        tokio::time::sleep(Duration::from_millis(150)).await;
        sweeper.run_once(Utc::now()).await
    });

    assert!(sent.unwrap().success);
    assert_eq!(sweep.unwrap().processed, 0);
    assert_eq!(h.sms.sent_count().await, 1);
}

#[tokio::test]
async fn test_outcome_is_not_written_twice() {
    let h = Harness::new().await;
    let jane = booking_email("jane@example.com");
    let result = h.service.send(jane).await.unwrap();

    let overwritten = h
        .log
        .complete(
            result.log_id,
            AttemptOutcome::failed(FailureKind::Permanent, "late writer", 0),
        )
        .await
        .unwrap();
    assert!(!overwritten);
    assert_eq!(h.attempt(&result).await.status, AttemptStatus::Sent);
}

// ============================================================================
// Resend and scheduling
// ============================================================================

#[tokio::test]
async fn test_resend_creates_new_attempt() {
    let h = Harness::new().await;
    let jane = booking_email("jane@example.com");
    let original = h.service.send(jane).await.unwrap();

    let resent = h.service.resend(original.log_id).await.unwrap();

    assert!(resent.success);
    assert_ne!(resent.log_id, original.log_id);
    assert_eq!(h.log.len().await, 2);
    assert_eq!(h.email.sent_count().await, 2);

    let copy = h.attempt(&resent).await;
    assert_eq!(copy.resend_of, Some(original.log_id));
    let date = copy.variables.get("date").map(String::as_str);
    assert_eq!(date, Some("Monday 10:00"));

    let first = h.attempt(&original).await;
    assert_eq!(first.status, AttemptStatus::Sent);
    assert!(first.resend_of.is_none());
}

#[tokio::test]
async fn test_scheduled_send_waits_for_its_time() {
    let h = Harness::new().await;
    let at = Utc::now() + ChronoDuration::minutes(10);

    let result = h
        .service
        .send(booking_email("jane@example.com").scheduled_for(at))
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.state, DeliveryState::Scheduled);
    assert!(result.failure.is_none());
    assert_eq!(h.email.sent_count().await, 0);

    let attempt = h.attempt(&result).await;
    assert_eq!(attempt.status, AttemptStatus::Scheduled);
    assert_eq!(attempt.retry_after, Some(at));

    let sweeper = h.sweeper();
    let early = sweeper.process_due(Utc::now(), 100).await.unwrap();
    assert_eq!(early.processed, 0);

    let sweep = sweeper
        .process_due(at + ChronoDuration::minutes(1), 100)
        .await
        .unwrap();
    assert_eq!(sweep.succeeded, 1);

    let attempt = h.attempt(&result).await;
    assert_eq!(attempt.status, AttemptStatus::Sent);
    assert!(h.email.was_sent_to("jane@example.com").await);
    assert_eq!(h.log.len().await, 1);
}

#[tokio::test]
async fn test_list_attempts_filters_by_status() {
    let h = Harness::new().await;
    h.sms.fail_next(unavailable()).await;
    h.service.send(reminder_sms("+15550100")).await.unwrap();
    h.service
        .send(booking_email("jane@example.com"))
        .await
        .unwrap();

    let failed = h
        .service
        .list_attempts(LogFilter {
            status: Some(AttemptStatus::Failed),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].channel, Channel::Sms);

    let emails = h
        .service
        .list_attempts(LogFilter {
            channel: Some(Channel::Email),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(emails.len(), 1);
    assert_eq!(emails[0].status, AttemptStatus::Sent);
}
