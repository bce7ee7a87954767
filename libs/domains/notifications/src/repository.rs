use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{NotificationError, NotificationResult};
use crate::models::{AttemptOutcome, AttemptStatus, FailureKind, LogFilter, NotificationAttempt};

/// Message written to attempts recovered by [`NotificationLog::recover_stale`].
pub const STALE_RECOVERY_MESSAGE: &str = "recovered stale pending attempt";

/// Persistence for notification attempts.
///
/// Every state change on an existing row is a conditional update, so two
/// writers racing on the same attempt cannot both win.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationLog: Send + Sync {
    /// Insert a new attempt.
    async fn insert(&self, attempt: NotificationAttempt) -> NotificationResult<NotificationAttempt>;

    /// Get an attempt by ID
    async fn get(&self, id: Uuid) -> NotificationResult<Option<NotificationAttempt>>;

    /// Write the outcome of a dispatch. Only applies while the attempt is `pending`.
    async fn complete(&self, id: Uuid, outcome: AttemptOutcome) -> NotificationResult<bool>;

    /// Move a due attempt back to `pending` if it still has the expected
    /// status and retry count. Returns false when another sweep got there first.
    async fn claim(
        &self,
        id: Uuid,
        expected_status: AttemptStatus,
        expected_retry_count: u32,
        now: DateTime<Utc>,
    ) -> NotificationResult<bool>;

    /// Failed or scheduled attempts with `retry_after <= now`, oldest first.
    async fn find_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> NotificationResult<Vec<NotificationAttempt>>;

    /// List attempts, newest first.
    async fn list(&self, filter: LogFilter) -> NotificationResult<Vec<NotificationAttempt>>;

    /// Hand pending attempts last touched before `older_than` back to the
    /// retry sweep. Returns how many were recovered.
    async fn recover_stale(
        &self,
        older_than: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> NotificationResult<u64>;
}

/// In-memory implementation of NotificationLog (for development/testing)
#[derive(Debug, Default, Clone)]
pub struct InMemoryNotificationLog {
    attempts: Arc<RwLock<HashMap<Uuid, NotificationAttempt>>>,
}

impl InMemoryNotificationLog {
    pub fn new() -> Self {
        Self {
            attempts: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Number of stored attempts.
    pub async fn len(&self) -> usize {
        self.attempts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.attempts.read().await.is_empty()
    }

    /// All stored attempts, oldest first.
    pub async fn all(&self) -> Vec<NotificationAttempt> {
        let mut attempts: Vec<_> = self.attempts.read().await.values().cloned().collect();
        attempts.sort_by_key(|a| (a.created_at, a.id));
        attempts
    }
}

#[async_trait]
impl NotificationLog for InMemoryNotificationLog {
    async fn insert(
        &self,
        attempt: NotificationAttempt,
    ) -> NotificationResult<NotificationAttempt> {
        let mut attempts = self.attempts.write().await;
        if attempts.contains_key(&attempt.id) {
            return Err(NotificationError::DatabaseError(format!(
                "duplicate attempt id {}",
                attempt.id
            )));
        }
        attempts.insert(attempt.id, attempt.clone());
        Ok(attempt)
    }

    async fn get(&self, id: Uuid) -> NotificationResult<Option<NotificationAttempt>> {
        Ok(self.attempts.read().await.get(&id).cloned())
    }

    async fn complete(&self, id: Uuid, outcome: AttemptOutcome) -> NotificationResult<bool> {
        let mut attempts = self.attempts.write().await;
        match attempts.get_mut(&id) {
            Some(attempt) if attempt.status == AttemptStatus::Pending => {
                attempt.apply(&outcome, Utc::now());
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(NotificationError::AttemptNotFound(id)),
        }
    }

    async fn claim(
        &self,
        id: Uuid,
        expected_status: AttemptStatus,
        expected_retry_count: u32,
        now: DateTime<Utc>,
    ) -> NotificationResult<bool> {
        let mut attempts = self.attempts.write().await;
        let Some(attempt) = attempts.get_mut(&id) else {
            return Ok(false);
        };

        if attempt.status != expected_status
            || attempt.retry_count != expected_retry_count
            || !attempt.is_due(now)
        {
            return Ok(false);
        }

        attempt.status = AttemptStatus::Pending;
        attempt.retry_after = None;
        attempt.updated_at = now;
        Ok(true)
    }

    async fn find_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> NotificationResult<Vec<NotificationAttempt>> {
        let attempts = self.attempts.read().await;
        let mut due: Vec<_> = attempts
            .values()
            .filter(|a| a.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|a| (a.created_at, a.id));
        due.truncate(limit);
        Ok(due)
    }

    async fn list(&self, filter: LogFilter) -> NotificationResult<Vec<NotificationAttempt>> {
        let attempts = self.attempts.read().await;
        let mut result: Vec<_> = attempts
            .values()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect();

        result.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        Ok(result
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit)
            .collect())
    }

    async fn recover_stale(
        &self,
        older_than: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> NotificationResult<u64> {
        let mut attempts = self.attempts.write().await;
        let mut recovered = 0;
        for attempt in attempts
            .values_mut()
            .filter(|a| a.status == AttemptStatus::Pending && a.updated_at < older_than)
        {
            attempt.status = AttemptStatus::Failed;
            attempt.retry_after = Some(now);
            attempt.error_kind = Some(FailureKind::Transient);
            attempt.error_message = Some(STALE_RECOVERY_MESSAGE.to_string());
            attempt.updated_at = now;
            recovered += 1;
        }
        Ok(recovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Channel, NotificationRequest, NotificationType, Recipient, RenderedMessage};
    use chrono::Duration;

    fn request() -> NotificationRequest {
        NotificationRequest::new(
            NotificationType::AppointmentReminder,
            Channel::Email,
            Recipient::email("jane@example.com"),
        )
    }

    fn pending(now: DateTime<Utc>) -> NotificationAttempt {
        NotificationAttempt::pending(&request(), RenderedMessage::default(), now)
    }

    #[tokio::test]
    async fn test_complete_only_applies_to_pending() {
        let log = InMemoryNotificationLog::new();
        let now = Utc::now();
        let attempt = log.insert(pending(now)).await.unwrap();

        let sent = AttemptOutcome::sent("p-1".into(), 0, now);
        let late = AttemptOutcome::failed(FailureKind::Permanent, "late", 0);
        assert!(log.complete(attempt.id, sent).await.unwrap());
        assert!(!log.complete(attempt.id, late).await.unwrap());

        let stored = log.get(attempt.id).await.unwrap().unwrap();
        assert_eq!(stored.status, AttemptStatus::Sent);
        assert_eq!(stored.provider_message_id.as_deref(), Some("p-1"));
    }

    #[tokio::test]
    async fn test_complete_unknown_attempt_errors() {
        let log = InMemoryNotificationLog::new();
        let outcome = AttemptOutcome::failed(FailureKind::Permanent, "x", 0);
        let result = log.complete(Uuid::now_v7(), outcome).await;
        assert!(matches!(result, Err(NotificationError::AttemptNotFound(_))));
    }

    #[tokio::test]
    async fn test_claim_is_conditional() {
        let log = InMemoryNotificationLog::new();
        let now = Utc::now();
        let attempt = log.insert(pending(now)).await.unwrap();
        log.complete(
            attempt.id,
            AttemptOutcome::retry_scheduled(FailureKind::Transient, "503", 1, now),
        )
        .await
        .unwrap();

        let claim = |count, at| log.claim(attempt.id, AttemptStatus::Failed, count, at);

        // Wrong retry count loses.
        assert!(!claim(0, now).await.unwrap());
        // Not due yet loses.
        assert!(!claim(1, now - Duration::seconds(1)).await.unwrap());

        assert!(claim(1, now).await.unwrap());
        assert!(!claim(1, now).await.unwrap());

        let stored = log.get(attempt.id).await.unwrap().unwrap();
        assert_eq!(stored.status, AttemptStatus::Pending);
        assert!(stored.retry_after.is_none());
    }

    #[tokio::test]
    async fn test_find_due_orders_and_limits() {
        let log = InMemoryNotificationLog::new();
        let now = Utc::now();
        let mut ids = Vec::new();
        for offset in [3, 1, 2] {
            let at = now - Duration::minutes(offset);
            let scheduled =
                NotificationAttempt::scheduled(&request(), RenderedMessage::default(), at, at);
            let attempt = log.insert(scheduled).await.unwrap();
            ids.push((offset, attempt.id));
        }
        log.insert(NotificationAttempt::scheduled(
            &request(),
            RenderedMessage::default(),
            now + Duration::minutes(5),
            now,
        ))
        .await
        .unwrap();
        log.insert(NotificationAttempt::rejected(&request(), FailureKind::Permanent, "no", now))
            .await
            .unwrap();

        let due = log.find_due(now, 10).await.unwrap();
        assert_eq!(due.len(), 3);
        assert!(due.windows(2).all(|w| w[0].created_at <= w[1].created_at));

        let limited = log.find_due(now, 2).await.unwrap();
        assert_eq!(limited.len(), 2);
        let oldest = ids
            .iter()
            .find(|(o, _)| *o == 3)
            .map(|(_, id)| *id)
            .unwrap();
        assert_eq!(limited[0].id, oldest);
    }

    #[tokio::test]
    async fn test_list_newest_first_with_paging() {
        let log = InMemoryNotificationLog::new();
        let now = Utc::now();
        for minutes in 0..5 {
            log.insert(pending(now - Duration::minutes(minutes)))
                .await
                .unwrap();
        }

        let filter = LogFilter {
            limit: 2,
            offset: 1,
            ..Default::default()
        };
        let page = log.list(filter).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].created_at, now - Duration::minutes(1));
        assert_eq!(page[1].created_at, now - Duration::minutes(2));
    }

    #[tokio::test]
    async fn test_recover_stale_only_touches_old_pending() {
        let log = InMemoryNotificationLog::new();
        let now = Utc::now();
        let stale = log
            .insert(pending(now - Duration::minutes(10)))
            .await
            .unwrap();
        let fresh = log.insert(pending(now)).await.unwrap();

        let recovered = log
            .recover_stale(now - Duration::minutes(5), now)
            .await
            .unwrap();
        assert_eq!(recovered, 1);

        let stale = log.get(stale.id).await.unwrap().unwrap();
        assert_eq!(stale.status, AttemptStatus::Failed);
        assert_eq!(stale.retry_after, Some(now));
        assert_eq!(stale.error_kind, Some(FailureKind::Transient));
        assert!(stale.is_due(now));

        let fresh = log.get(fresh.id).await.unwrap().unwrap();
        assert_eq!(fresh.status, AttemptStatus::Pending);
    }
}
