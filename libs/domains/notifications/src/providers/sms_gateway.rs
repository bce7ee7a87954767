//! HTTP SMS gateway provider.
//!
//! Posts `{ "to", "from", "message" }` as JSON with a bearer key and expects a
//! JSON body carrying the gateway's message id.

use super::{SmsProvider, SmsReceipt, TransportError};
use crate::error::NotificationError;
use crate::templates::sms_segments;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

const TRANSPORT: &str = "SmsGateway";

/// SMS gateway configuration.
#[derive(Debug, Clone)]
pub struct SmsGatewayConfig {
    /// Full URL of the send endpoint.
    pub gateway_url: String,
    pub api_key: String,
    /// Sender id or number shown to the recipient.
    pub sender_id: String,
}

impl SmsGatewayConfig {
    pub fn new(gateway_url: String, api_key: String, sender_id: String) -> Self {
        Self {
            gateway_url,
            api_key,
            sender_id,
        }
    }

    pub fn from_env() -> Result<Self, NotificationError> {
        let gateway_url = std::env::var("SMS_GATEWAY_URL")
            .map_err(|_| NotificationError::ConfigError("SMS_GATEWAY_URL not set".to_string()))?;
        let api_key = std::env::var("SMS_GATEWAY_API_KEY").map_err(|_| {
            NotificationError::ConfigError("SMS_GATEWAY_API_KEY not set".to_string())
        })?;
        let sender_id = std::env::var("SMS_SENDER_ID").unwrap_or_else(|_| "NOTIFY".to_string());

        Ok(Self::new(gateway_url, api_key, sender_id))
    }
}

#[derive(Debug, Serialize)]
struct SendSmsRequest<'a> {
    to: &'a str,
    from: &'a str,
    message: &'a str,
}

#[derive(Debug, Deserialize)]
struct SendSmsResponse {
    #[serde(alias = "id")]
    message_id: String,
    #[serde(default)]
    segments: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct GatewayError {
    #[serde(default)]
    code: Option<String>,
    message: String,
}

/// SMS provider backed by a generic HTTP gateway.
pub struct SmsGatewayProvider {
    config: SmsGatewayConfig,
    client: Client,
}

impl SmsGatewayProvider {
    pub fn new(config: SmsGatewayConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }

    pub fn from_env() -> Result<Self, NotificationError> {
        Ok(Self::new(SmsGatewayConfig::from_env()?))
    }
}

fn gateway_error(status: u16, body: &str) -> TransportError {
    match serde_json::from_str::<GatewayError>(body) {
        Ok(GatewayError {
            code: Some(code),
            message,
        }) => TransportError::status(TRANSPORT, status, message).with_code(code),
        Ok(GatewayError { message, .. }) => TransportError::status(TRANSPORT, status, message),
        Err(_) => TransportError::status(TRANSPORT, status, format!("HTTP {status}: {body}")),
    }
}

#[async_trait]
impl SmsProvider for SmsGatewayProvider {
    async fn send(&self, to: &str, body: &str) -> Result<SmsReceipt, TransportError> {
        debug!(to = %to, chars = body.chars().count(), "Sending SMS via gateway");

        let response = self
            .client
            .post(&self.config.gateway_url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&SendSmsRequest {
                to,
                from: &self.config.sender_id,
                message: body,
            })
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(TRANSPORT, &e))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            error!(to = %to, status = %status, error = %error_body, "SMS gateway rejected message");
            return Err(gateway_error(status.as_u16(), &error_body));
        }

        let parsed: SendSmsResponse = response
            .json()
            .await
            .map_err(|e| {
                TransportError::other(TRANSPORT, format!("unreadable gateway response: {e}"))
            })?;

        info!(to = %to, message_id = %parsed.message_id, "SMS sent via gateway");
        Ok(SmsReceipt {
            segments: parsed
                .segments
                .unwrap_or_else(|| sms_segments(body.chars().count())),
            message_id: parsed.message_id,
        })
    }

    fn name(&self) -> &'static str {
        TRANSPORT
    }

    async fn health_check(&self) -> Result<bool, TransportError> {
        if self.config.api_key.is_empty() {
            return Err(TransportError::other(TRANSPORT, "missing gateway API key"));
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::TransportErrorKind;

    #[test]
    fn test_gateway_error_with_code() {
        let err = gateway_error(400, r#"{"code":"21211","message":"Invalid 'To' number"}"#);
        assert_eq!(err.kind, TransportErrorKind::Status(400));
        assert_eq!(err.code.as_deref(), Some("21211"));
        assert_eq!(err.message, "Invalid 'To' number");
    }

    #[test]
    fn test_gateway_error_with_plain_body() {
        let err = gateway_error(502, "Bad Gateway");
        assert_eq!(err.kind, TransportErrorKind::Status(502));
        assert!(err.code.is_none());
        assert!(err.message.contains("Bad Gateway"));
    }

    #[test]
    fn test_response_accepts_id_alias() {
        let parsed: SendSmsResponse = serde_json::from_str(r#"{"id":"sm_1"}"#).unwrap();
        assert_eq!(parsed.message_id, "sm_1");
        assert_eq!(parsed.segments, None);
    }

    #[test]
    fn test_from_env_requires_url() {
        temp_env::with_vars_unset(["SMS_GATEWAY_URL", "SMS_GATEWAY_API_KEY"], || {
            assert!(SmsGatewayConfig::from_env().is_err());
        });
    }
}
