//! Retry sweep.
//!
//! Finds failed and scheduled attempts whose `retry_after` has passed, claims
//! each one with a conditional update and hands it back to the orchestrator.
//! Attempts for the same recipient and type go out one after another; separate
//! groups run concurrently up to the configured limit.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::backoff::{JitterSource, ThreadJitter};
use crate::error::{NotificationError, NotificationResult};
use crate::metrics::DeliveryMetrics;
use crate::models::{NotificationAttempt, NotificationType};
use crate::repository::NotificationLog;
use crate::service::NotificationService;

/// Configuration for the retry sweep
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum candidates loaded per sweep
    pub batch_limit: usize,

    /// Wall-clock budget for one sweep
    pub budget: Duration,

    /// Upper bound of the random pause before each dispatch
    pub stagger_max: Duration,

    /// Recipient groups processed at the same time
    pub concurrency: usize,

    /// Pending attempts untouched for this long are handed back to the sweep
    pub stale_after: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            batch_limit: 100,
            budget: Duration::from_secs(60),
            stagger_max: Duration::from_millis(250),
            concurrency: 8,
            stale_after: Duration::from_secs(300),
        }
    }
}

impl RetryConfig {
    pub fn with_batch_limit(mut self, limit: usize) -> Self {
        self.batch_limit = limit;
        self
    }

    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_stagger_max(mut self, stagger: Duration) -> Self {
        self.stagger_max = stagger;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }
}

/// Counts from one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetrySweepResult {
    /// Attempts dispatched through the orchestrator.
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Candidates another sweep claimed first.
    pub skipped: usize,
    /// Candidates left for the next sweep because the budget ran out.
    pub deferred: usize,
    pub errors: Vec<String>,
}

enum SweepOutcome {
    Succeeded,
    Failed,
    Skipped,
    Error(String),
}

impl RetrySweepResult {
    fn record(&mut self, outcome: SweepOutcome) {
        match outcome {
            SweepOutcome::Succeeded => {
                self.processed += 1;
                self.succeeded += 1;
            }
            SweepOutcome::Failed => {
                self.processed += 1;
                self.failed += 1;
            }
            SweepOutcome::Skipped => self.skipped += 1,
            SweepOutcome::Error(message) => self.errors.push(message),
        }
    }
}

/// Runs retry sweeps against a notification service.
pub struct RetryManager<L: NotificationLog> {
    service: Arc<NotificationService<L>>,
    config: RetryConfig,
    jitter: Arc<dyn JitterSource>,
    metrics: DeliveryMetrics,
}

/// Slack added on top of the dispatch window when `stale_after` is too short.
const STALE_MARGIN: Duration = Duration::from_secs(1);

impl<L: NotificationLog> RetryManager<L> {
    /// Build a manager for `service`.
    ///
    /// `stale_after` is raised above the transport timeout plus the stagger so
    /// an attempt still in flight is never taken back and dispatched again.
    pub fn new(service: Arc<NotificationService<L>>, mut config: RetryConfig) -> Self {
        let in_flight = service.transport_timeout() + config.stagger_max;
        if config.stale_after <= in_flight {
            warn!(
                stale_after = ?config.stale_after,
                in_flight = ?in_flight,
                "Stale threshold shorter than a dispatch, raising it"
            );
            config.stale_after = in_flight + STALE_MARGIN;
        }
        Self {
            service,
            config,
            jitter: Arc::new(ThreadJitter),
            metrics: DeliveryMetrics,
        }
    }

    pub fn with_jitter(mut self, jitter: Arc<dyn JitterSource>) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Recover stale attempts, then sweep with the configured batch limit.
    pub async fn run_once(&self, now: DateTime<Utc>) -> NotificationResult<RetrySweepResult> {
        self.recover_stale(now).await?;
        self.process_due(now, self.config.batch_limit).await
    }

    /// Redeliver up to `batch_limit` due attempts.
    #[instrument(skip(self))]
    pub async fn process_due(
        &self,
        now: DateTime<Utc>,
        batch_limit: usize,
    ) -> NotificationResult<RetrySweepResult> {
        let deadline = Instant::now() + self.config.budget;
        let candidates = self.service.log().find_due(now, batch_limit).await?;
        if candidates.is_empty() {
            debug!("No attempts due");
            return Ok(RetrySweepResult::default());
        }

        let total = candidates.len();
        let groups = group_by_recipient(candidates);
        debug!(
            candidates = total,
            groups = groups.len(),
            "Starting retry sweep"
        );

        let tally = Mutex::new(RetrySweepResult::default());
        let tally_ref = &tally;
        stream::iter(groups)
            .for_each_concurrent(self.config.concurrency.max(1), |group| async move {
                for attempt in group {
                    if Instant::now() >= deadline {
                        tally_ref.lock().await.deferred += 1;
                        continue;
                    }
                    let outcome = self.retry_one(attempt, now).await;
                    tally_ref.lock().await.record(outcome);
                }
            })
            .await;

        let result = tally.into_inner();
        self.metrics.sweep_processed("succeeded", result.succeeded);
        self.metrics.sweep_processed("failed", result.failed);
        self.metrics.sweep_processed("skipped", result.skipped);
        self.metrics.sweep_processed("deferred", result.deferred);

        if result.errors.is_empty() {
            info!(
                processed = result.processed,
                succeeded = result.succeeded,
                failed = result.failed,
                skipped = result.skipped,
                deferred = result.deferred,
                "Retry sweep complete"
            );
        } else {
            warn!(
                processed = result.processed,
                errors = result.errors.len(),
                "Retry sweep completed with errors"
            );
        }
        Ok(result)
    }

    /// Hand pending attempts older than `stale_after` back to the sweep.
    pub async fn recover_stale(&self, now: DateTime<Utc>) -> NotificationResult<u64> {
        let stale_after = chrono::Duration::from_std(self.config.stale_after)
            .map_err(|e| NotificationError::ConfigError(format!("stale_after: {e}")))?;
        let recovered = self
            .service
            .log()
            .recover_stale(now - stale_after, now)
            .await?;
        if recovered > 0 {
            warn!(recovered, "Recovered stale pending attempts");
        }
        Ok(recovered)
    }

    async fn retry_one(&self, attempt: NotificationAttempt, now: DateTime<Utc>) -> SweepOutcome {
        self.stagger().await;

        let id = attempt.id;
        match self
            .service
            .log()
            .claim(id, attempt.status, attempt.retry_count, now)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                debug!(attempt_id = %id, "Attempt claimed elsewhere");
                return SweepOutcome::Skipped;
            }
            Err(e) => return SweepOutcome::Error(format!("claim {id}: {e}")),
        }

        match self.service.redeliver(attempt).await {
            Ok(result) if result.success => SweepOutcome::Succeeded,
            Ok(_) => SweepOutcome::Failed,
            Err(e) => SweepOutcome::Error(format!("redeliver {id}: {e}")),
        }
    }

    async fn stagger(&self) {
        let max_ms = self.config.stagger_max.as_millis() as f64;
        if max_ms > 0.0 {
            let delay = Duration::from_millis((self.jitter.sample() * max_ms) as u64);
            tokio::time::sleep(delay).await;
        }
    }
}

/// Split candidates into per (recipient, type) groups, keeping oldest-first order.
fn group_by_recipient(candidates: Vec<NotificationAttempt>) -> Vec<Vec<NotificationAttempt>> {
    let mut index: HashMap<(String, NotificationType), usize> = HashMap::new();
    let mut groups: Vec<Vec<NotificationAttempt>> = Vec::new();

    for attempt in candidates {
        let key = (attempt.recipient_address.clone(), attempt.notification_type);
        match index.get(&key) {
            Some(&i) => groups[i].push(attempt),
            None => {
                index.insert(key, groups.len());
                groups.push(vec![attempt]);
            }
        }
    }
    groups
}
