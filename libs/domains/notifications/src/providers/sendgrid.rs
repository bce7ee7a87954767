//! SendGrid email provider implementation.

use super::{EmailContent, EmailProvider, TransportError};
use crate::error::NotificationError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

const TRANSPORT: &str = "SendGrid";

/// SendGrid API configuration.
#[derive(Debug, Clone)]
pub struct SendGridConfig {
    /// SendGrid API key.
    pub api_key: String,
    /// Sender email address.
    pub from_email: String,
    /// Sender name.
    pub from_name: String,
    /// SendGrid API base URL (defaults to production).
    pub api_url: String,
}

impl SendGridConfig {
    pub fn new(api_key: String, from_email: String, from_name: String) -> Self {
        Self {
            api_key,
            from_email,
            from_name,
            api_url: "https://api.sendgrid.com/v3".to_string(),
        }
    }

    /// Create configuration from environment variables.
    pub fn from_env() -> Result<Self, NotificationError> {
        let api_key = std::env::var("SENDGRID_API_KEY")
            .map_err(|_| NotificationError::ConfigError("SENDGRID_API_KEY not set".to_string()))?;
        let from_email = std::env::var("SENDGRID_FROM_EMAIL").map_err(|_| {
            NotificationError::ConfigError("SENDGRID_FROM_EMAIL not set".to_string())
        })?;
        let from_name =
            std::env::var("SENDGRID_FROM_NAME").unwrap_or_else(|_| "Notifications".to_string());

        Ok(Self::new(api_key, from_email, from_name))
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }
}

/// SendGrid email provider.
pub struct SendGridProvider {
    config: SendGridConfig,
    client: Client,
}

impl SendGridProvider {
    pub fn new(config: SendGridConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }

    pub fn from_env() -> Result<Self, NotificationError> {
        Ok(Self::new(SendGridConfig::from_env()?))
    }

    fn build_request(&self, email: &EmailContent) -> SendGridRequest {
        SendGridRequest {
            personalizations: vec![Personalization {
                to: vec![EmailAddress {
                    email: email.to_email.clone(),
                    name: (!email.to_name.is_empty()).then(|| email.to_name.clone()),
                }],
            }],
            from: EmailAddress {
                email: self.config.from_email.clone(),
                name: Some(self.config.from_name.clone()),
            },
            subject: email.subject.clone(),
            content: vec![
                Content {
                    content_type: "text/plain".to_string(),
                    value: email.text_body.clone(),
                },
                Content {
                    content_type: "text/html".to_string(),
                    value: email.html_body.clone(),
                },
            ],
        }
    }
}

// SendGrid API request/response structures

#[derive(Debug, Serialize)]
struct SendGridRequest {
    personalizations: Vec<Personalization>,
    from: EmailAddress,
    subject: String,
    content: Vec<Content>,
}

#[derive(Debug, Serialize)]
struct Personalization {
    to: Vec<EmailAddress>,
}

#[derive(Debug, Serialize)]
struct EmailAddress {
    email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

#[derive(Debug, Serialize)]
struct Content {
    #[serde(rename = "type")]
    content_type: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct SendGridError {
    errors: Vec<SendGridErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct SendGridErrorDetail {
    message: String,
}

fn error_message(body: String) -> String {
    match serde_json::from_str::<SendGridError>(&body) {
        Ok(parsed) if !parsed.errors.is_empty() => parsed
            .errors
            .into_iter()
            .map(|e| e.message)
            .collect::<Vec<_>>()
            .join(", "),
        _ => body,
    }
}

#[async_trait]
impl EmailProvider for SendGridProvider {
    async fn send(&self, email: &EmailContent) -> Result<String, TransportError> {
        let request = self.build_request(email);

        debug!(to = %email.to_email, subject = %email.subject, "Sending email via SendGrid");

        let response = self
            .client
            .post(format!("{}/mail/send", self.config.api_url))
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(TRANSPORT, &e))?;

        let status = response.status();
        let message_id = response
            .headers()
            .get("x-message-id")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        if status.is_success() {
            let message_id = message_id.unwrap_or_default();
            info!(to = %email.to_email, message_id = %message_id, "Email sent via SendGrid");
            Ok(message_id)
        } else {
            let error_body = response.text().await.unwrap_or_default();
            error!(
                to = %email.to_email,
                status = %status,
                error = %error_body,
                "Failed to send email via SendGrid"
            );
            Err(TransportError::status(TRANSPORT, status.as_u16(), error_message(error_body)))
        }
    }

    fn name(&self) -> &'static str {
        TRANSPORT
    }

    async fn health_check(&self) -> Result<bool, TransportError> {
        // No dedicated health endpoint; check the key format.
        if self.config.api_key.starts_with("SG.") {
            Ok(true)
        } else {
            Err(TransportError::other(TRANSPORT, "invalid SendGrid API key format"))
        }
    }
}
