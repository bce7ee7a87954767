//! Mock providers that capture sends and replay scripted failures.

use super::{EmailContent, EmailProvider, SmsProvider, SmsReceipt, TransportError};
use crate::templates::sms_segments;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

/// Queue of outcomes; an empty queue means success.
#[derive(Clone, Default)]
struct Script {
    failures: Arc<Mutex<VecDeque<Option<TransportError>>>>,
    delay: Option<Duration>,
    counter: Arc<AtomicU64>,
}

impl Script {
    async fn next(&self) -> Result<String, TransportError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let outcome = self.failures.lock().await.pop_front().flatten();
        match outcome {
            Some(err) => Err(err),
            None => {
                let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(format!("mock-{n}"))
            }
        }
    }
}

/// Mock email provider that captures sent emails.
#[derive(Clone, Default)]
pub struct MockEmailProvider {
    sent_emails: Arc<Mutex<Vec<EmailContent>>>,
    script: Script,
    message_id: Option<String>,
}

impl MockEmailProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always answer with this message id.
    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    /// Sleep before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.script.delay = Some(delay);
        self
    }

    /// Fail the next send with `err`.
    pub async fn fail_next(&self, err: TransportError) {
        self.script.failures.lock().await.push_back(Some(err));
    }

    /// Let the next send succeed, then continue with the queued failures.
    pub async fn succeed_next(&self) {
        self.script.failures.lock().await.push_back(None);
    }

    /// Get all sent emails, including failed attempts.
    pub async fn sent_emails(&self) -> Vec<EmailContent> {
        self.sent_emails.lock().await.clone()
    }

    /// Number of send calls received.
    pub async fn sent_count(&self) -> usize {
        self.sent_emails.lock().await.len()
    }

    pub async fn was_sent_to(&self, email: &str) -> bool {
        self.sent_emails
            .lock()
            .await
            .iter()
            .any(|e| e.to_email == email)
    }
}

#[async_trait]
impl EmailProvider for MockEmailProvider {
    async fn send(&self, email: &EmailContent) -> Result<String, TransportError> {
        self.sent_emails.lock().await.push(email.clone());
        let id = self.script.next().await?;
        Ok(self.message_id.clone().unwrap_or(id))
    }

    fn name(&self) -> &'static str {
        "mock"
    }

    async fn health_check(&self) -> Result<bool, TransportError> {
        Ok(true)
    }
}

/// A captured SMS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentSms {
    pub to: String,
    pub body: String,
}

/// Mock SMS provider that captures sent messages.
#[derive(Clone, Default)]
pub struct MockSmsProvider {
    sent: Arc<Mutex<Vec<SentSms>>>,
    script: Script,
}

impl MockSmsProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.script.delay = Some(delay);
        self
    }

    pub async fn fail_next(&self, err: TransportError) {
        self.script.failures.lock().await.push_back(Some(err));
    }

    pub async fn succeed_next(&self) {
        self.script.failures.lock().await.push_back(None);
    }

    pub async fn sent_messages(&self) -> Vec<SentSms> {
        self.sent.lock().await.clone()
    }

    pub async fn sent_count(&self) -> usize {
        self.sent.lock().await.len()
    }
}

#[async_trait]
impl SmsProvider for MockSmsProvider {
    async fn send(&self, to: &str, body: &str) -> Result<SmsReceipt, TransportError> {
        self.sent.lock().await.push(SentSms {
            to: to.to_string(),
            body: body.to_string(),
        });
        let message_id = self.script.next().await?;
        Ok(SmsReceipt {
            message_id,
            segments: sms_segments(body.chars().count()),
        })
    }

    fn name(&self) -> &'static str {
        "mock"
    }

    async fn health_check(&self) -> Result<bool, TransportError> {
        Ok(true)
    }
}
