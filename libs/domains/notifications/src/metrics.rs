//! Delivery metrics
//!
//! Recorded through the `metrics` facade; the binary decides which exporter
//! receives them.

use metrics::{counter, histogram};
use std::time::Duration;

use crate::models::{Channel, FailureKind, NotificationType};

/// Metrics helper for notification delivery
#[derive(Debug, Clone, Copy, Default)]
pub struct DeliveryMetrics;

impl DeliveryMetrics {
    /// Record a notification accepted by a provider
    pub fn sent(&self, notification_type: NotificationType, channel: Channel) {
        counter!(
            "notifications_sent_total",
            "type" => notification_type.to_string(),
            "channel" => channel.to_string()
        )
        .increment(1);
    }

    /// Record a failure, terminal or not
    pub fn failed(&self, channel: Channel, kind: FailureKind) {
        counter!(
            "notifications_failed_total",
            "channel" => channel.to_string(),
            "kind" => kind.to_string()
        )
        .increment(1);
    }

    /// Record an attempt parked for the retry sweep
    pub fn retry_scheduled(&self, channel: Channel) {
        counter!(
            "notifications_retry_scheduled_total",
            "channel" => channel.to_string()
        )
        .increment(1);
    }

    /// Record the time spent inside a provider call
    pub fn dispatch_duration(&self, channel: Channel, duration: Duration) {
        histogram!(
            "notification_dispatch_duration_seconds",
            "channel" => channel.to_string()
        )
        .record(duration.as_secs_f64());
    }

    /// Record attempts handled by one sweep
    pub fn sweep_processed(&self, outcome: &'static str, count: usize) {
        counter!("notification_sweep_processed_total", "outcome" => outcome)
            .increment(count as u64);
    }
}
