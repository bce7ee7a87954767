//! Provider implementations.
//!
//! This module contains the `EmailProvider` and `SmsProvider` traits and the
//! transports behind them. Which implementation is used is decided once, when
//! [`Providers`] is built from configuration.

mod mock;
mod sendgrid;
mod sms_gateway;
mod smtp;

pub use mock::{MockEmailProvider, MockSmsProvider};
pub use sendgrid::{SendGridConfig, SendGridProvider};
pub use sms_gateway::{SmsGatewayConfig, SmsGatewayProvider};
pub use smtp::{SmtpConfig, SmtpProvider};

use crate::config::{EmailTransport, ProviderMode};
use crate::error::NotificationResult;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Shape of a transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The call did not complete in time.
    Timeout,
    /// Connection refused, reset, or otherwise unusable.
    Connection,
    /// The provider answered with a status code.
    Status(u16),
    Other,
}

/// Structured failure returned by a transport.
#[derive(Debug, Clone, Error)]
#[error("{transport}: {message}")]
pub struct TransportError {
    /// Name of the reporting transport.
    pub transport: String,
    pub kind: TransportErrorKind,
    /// Provider-specific error code, when the provider reports one.
    pub code: Option<String>,
    pub message: String,
}

impl TransportError {
    pub fn new(
        transport: impl Into<String>,
        kind: TransportErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            transport: transport.into(),
            kind,
            code: None,
            message: message.into(),
        }
    }

    pub fn timeout(transport: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(transport, TransportErrorKind::Timeout, message)
    }

    pub fn connection(transport: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(transport, TransportErrorKind::Connection, message)
    }

    pub fn status(transport: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        Self::new(transport, TransportErrorKind::Status(status), message)
    }

    pub fn other(transport: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(transport, TransportErrorKind::Other, message)
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Map a reqwest failure that happened before a response was read.
    pub fn from_reqwest(transport: &str, err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::timeout(transport, err.to_string())
        } else if err.is_connect() {
            Self::connection(transport, err.to_string())
        } else if let Some(status) = err.status() {
            Self::status(transport, status.as_u16(), err.to_string())
        } else {
            Self::other(transport, err.to_string())
        }
    }
}

/// Email content ready for sending.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmailContent {
    /// Recipient email address.
    pub to_email: String,
    /// Recipient name.
    pub to_name: String,
    /// Email subject.
    pub subject: String,
    /// HTML body content.
    pub html_body: String,
    /// Plain text body content.
    pub text_body: String,
}

/// Accepted SMS, as reported by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmsReceipt {
    pub message_id: String,
    pub segments: u32,
}

/// Trait for email sending providers.
#[async_trait]
pub trait EmailProvider: Send + Sync {
    /// Send an email, returning the provider message id.
    async fn send(&self, email: &EmailContent) -> Result<String, TransportError>;

    /// Get the provider name for logging.
    fn name(&self) -> &'static str;

    /// Check if the provider is healthy/configured.
    async fn health_check(&self) -> Result<bool, TransportError>;
}

/// Trait for SMS sending providers.
#[async_trait]
pub trait SmsProvider: Send + Sync {
    async fn send(&self, to: &str, body: &str) -> Result<SmsReceipt, TransportError>;

    fn name(&self) -> &'static str;

    async fn health_check(&self) -> Result<bool, TransportError>;
}

/// The transports a delivery engine dispatches through.
#[derive(Clone)]
pub struct Providers {
    pub email: Arc<dyn EmailProvider>,
    pub sms: Arc<dyn SmsProvider>,
}

impl Providers {
    pub fn new(email: Arc<dyn EmailProvider>, sms: Arc<dyn SmsProvider>) -> Self {
        Self { email, sms }
    }

    /// Recording mocks for both channels.
    pub fn mock() -> Self {
        Self::new(
            Arc::new(MockEmailProvider::new()),
            Arc::new(MockSmsProvider::new()),
        )
    }

    /// Build the providers selected by `mode`.
    ///
    /// Live transports read their settings from the environment.
    pub fn from_mode(
        mode: ProviderMode,
        email_transport: EmailTransport,
    ) -> NotificationResult<Self> {
        let providers = match mode {
            ProviderMode::Mock => Self::mock(),
            ProviderMode::Live => {
                let email: Arc<dyn EmailProvider> = match email_transport {
                    EmailTransport::Smtp => Arc::new(SmtpProvider::new(SmtpConfig::from_env())?),
                    EmailTransport::SendGrid => Arc::new(SendGridProvider::from_env()?),
                };
                let sms = Arc::new(SmsGatewayProvider::from_env()?);
                Self::new(email, sms)
            }
        };

        info!(
            mode = %mode,
            email = providers.email.name(),
            sms = providers.sms.name(),
            "Notification providers initialized"
        );
        Ok(providers)
    }

    /// Ask both transports whether they can accept messages.
    ///
    /// Returns `false` when either one reports a problem.
    pub async fn check_health(&self) -> bool {
        let email = self.email.health_check().await;
        let sms = self.sms.health_check().await;

        let mut healthy = true;
        for (name, result) in [(self.email.name(), email), (self.sms.name(), sms)] {
            match result {
                Ok(true) => {}
                Ok(false) => {
                    warn!(transport = name, "Provider reports unhealthy");
                    healthy = false;
                }
                Err(e) => {
                    warn!(transport = name, error = %e, "Provider health check failed");
                    healthy = false;
                }
            }
        }
        healthy
    }
}
