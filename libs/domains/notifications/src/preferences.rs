//! Recipient preference lookups.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::NotificationResult;
use crate::models::{Channel, NotificationType};

/// Answer from a preference source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreferenceDecision {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl PreferenceDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

/// Whether a recipient currently accepts a notification type on a channel.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PreferenceSource: Send + Sync {
    async fn is_allowed(
        &self,
        recipient_id: &str,
        notification_type: NotificationType,
        channel: Channel,
    ) -> NotificationResult<PreferenceDecision>;
}

/// Accepts everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

#[async_trait]
impl PreferenceSource for AllowAll {
    async fn is_allowed(
        &self,
        _: &str,
        _: NotificationType,
        _: Channel,
    ) -> NotificationResult<PreferenceDecision> {
        Ok(PreferenceDecision::allow())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum OptOut {
    Type(String, NotificationType, Option<Channel>),
    Marketing(String),
    All(String),
}

/// In-memory opt-out list (for development/testing)
#[derive(Debug, Default, Clone)]
pub struct InMemoryPreferences {
    opt_outs: Arc<RwLock<HashSet<OptOut>>>,
}

impl InMemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opt out of one type, on one channel or on all of them.
    pub async fn opt_out(
        &self,
        recipient_id: &str,
        notification_type: NotificationType,
        channel: Option<Channel>,
    ) {
        self.opt_outs.write().await.insert(OptOut::Type(
            recipient_id.to_string(),
            notification_type,
            channel,
        ));
    }

    pub async fn opt_out_of_marketing(&self, recipient_id: &str) {
        self.opt_outs
            .write()
            .await
            .insert(OptOut::Marketing(recipient_id.to_string()));
    }

    pub async fn opt_out_of_all(&self, recipient_id: &str) {
        self.opt_outs
            .write()
            .await
            .insert(OptOut::All(recipient_id.to_string()));
    }

    pub async fn clear(&self, recipient_id: &str) {
        self.opt_outs.write().await.retain(|o| match o {
            OptOut::Type(id, ..) | OptOut::Marketing(id) | OptOut::All(id) => id != recipient_id,
        });
    }
}

#[async_trait]
impl PreferenceSource for InMemoryPreferences {
    async fn is_allowed(
        &self,
        recipient_id: &str,
        notification_type: NotificationType,
        channel: Channel,
    ) -> NotificationResult<PreferenceDecision> {
        let opt_outs = self.opt_outs.read().await;
        let id = recipient_id.to_string();

        if opt_outs.contains(&OptOut::All(id.clone())) {
            return Ok(PreferenceDecision::deny("opted out of all notifications"));
        }
        if notification_type.is_marketing() && opt_outs.contains(&OptOut::Marketing(id.clone())) {
            return Ok(PreferenceDecision::deny("opted out of marketing"));
        }
        if opt_outs.contains(&OptOut::Type(id.clone(), notification_type, None))
            || opt_outs.contains(&OptOut::Type(id, notification_type, Some(channel)))
        {
            return Ok(PreferenceDecision::deny(format!("opted out of {notification_type}")));
        }
        Ok(PreferenceDecision::allow())
    }
}
