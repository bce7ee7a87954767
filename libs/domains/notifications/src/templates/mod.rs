//! Template rendering and validation.
//!
//! Templates use `{{name}}` placeholders, with dotted keys for the business
//! context that is merged into every variable bag (`{{business.phone}}`).
//! Rendering never fails on a missing variable: the placeholder is left in
//! the output and reported in [`RenderedMessage::unresolved`].

mod store;

pub use store::{InMemoryTemplateStore, TemplateStore, TemplateVersion};

#[cfg(test)]
pub use store::MockTemplateStore;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;
use uuid::Uuid;

use crate::error::{NotificationError, NotificationResult};
use crate::models::{Channel, NotificationType, RenderedMessage, SmsMetrics, Variables};

static TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z0-9_]+(?:\.[A-Za-z0-9_]+)*)\s*\}\}").expect("valid token regex")
});

/// Prefix of the always-available business context keys.
pub const BUSINESS_PREFIX: &str = "business.";

/// Characters in a single-part SMS.
pub const SMS_SINGLE_SEGMENT_CHARS: usize = 160;
/// Usable characters per part of a concatenated SMS.
pub const SMS_CONCAT_SEGMENT_CHARS: usize = 153;

/// Number of SMS parts needed for `char_count` characters.
pub fn sms_segments(char_count: usize) -> u32 {
    if char_count <= SMS_SINGLE_SEGMENT_CHARS {
        1
    } else {
        char_count.div_ceil(SMS_CONCAT_SEGMENT_CHARS) as u32
    }
}

/// A variable a template declares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateVariable {
    pub name: String,
    pub required: bool,
    #[serde(default)]
    pub description: Option<String>,
}

/// A message template for one trigger and channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub id: Uuid,
    pub trigger: NotificationType,
    pub channel: Channel,
    /// Email only.
    pub subject: Option<String>,
    /// Email only.
    pub body_html: Option<String>,
    /// Plain-text email body, or the SMS body.
    pub body_text: String,
    pub variables: Vec<TemplateVariable>,
    pub is_active: bool,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Template {
    fn new(trigger: NotificationType, channel: Channel) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            trigger,
            channel,
            subject: None,
            body_html: None,
            body_text: String::new(),
            variables: Vec::new(),
            is_active: true,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn email(
        trigger: NotificationType,
        subject: impl Into<String>,
        body_html: impl Into<String>,
        body_text: impl Into<String>,
    ) -> Self {
        Self {
            subject: Some(subject.into()),
            body_html: Some(body_html.into()),
            body_text: body_text.into(),
            ..Self::new(trigger, Channel::Email)
        }
    }

    pub fn sms(trigger: NotificationType, body: impl Into<String>) -> Self {
        Self {
            body_text: body.into(),
            ..Self::new(trigger, Channel::Sms)
        }
    }

    pub fn with_variable(mut self, name: impl Into<String>, required: bool) -> Self {
        self.variables.push(TemplateVariable {
            name: name.into(),
            required,
            description: None,
        });
        self
    }

    pub fn required_variables(&self) -> impl Iterator<Item = &str> {
        self.variables
            .iter()
            .filter(|v| v.required && !v.name.starts_with(BUSINESS_PREFIX))
            .map(|v| v.name.as_str())
    }

    fn patterns(&self) -> impl Iterator<Item = &str> {
        self.subject
            .as_deref()
            .into_iter()
            .chain(self.body_html.as_deref())
            .chain(std::iter::once(self.body_text.as_str()))
    }
}

/// Business contact details injected into every render.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessContext {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub address: String,
    pub website: String,
}

impl BusinessContext {
    pub fn from_env() -> Self {
        let var = |key: &str| std::env::var(key).unwrap_or_default();
        Self {
            name: var("BUSINESS_NAME"),
            email: var("BUSINESS_EMAIL"),
            phone: var("BUSINESS_PHONE"),
            address: var("BUSINESS_ADDRESS"),
            website: var("BUSINESS_WEBSITE"),
        }
    }

    /// The context as `business.*` variables.
    pub fn variables(&self) -> Variables {
        [
            ("name", &self.name),
            ("email", &self.email),
            ("phone", &self.phone),
            ("address", &self.address),
            ("website", &self.website),
        ]
        .into_iter()
        .map(|(key, value)| (format!("{BUSINESS_PREFIX}{key}"), value.clone()))
        .collect()
    }
}

/// Problems found by [`TemplateEngine::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateIssue {
    #[error("required variable '{0}' is not used by any pattern")]
    UnusedRequiredVariable(String),
    #[error("email template has no subject")]
    MissingSubject,
    #[error("template has no body")]
    MissingBody,
}

/// Renders and validates templates.
#[derive(Debug, Clone, Default)]
pub struct TemplateEngine {
    business: BusinessContext,
}

impl TemplateEngine {
    pub fn new(business: BusinessContext) -> Self {
        Self { business }
    }

    pub fn business(&self) -> &BusinessContext {
        &self.business
    }

    /// Render `template` against `variables`.
    pub fn render(
        &self,
        template: &Template,
        variables: &Variables,
    ) -> NotificationResult<RenderedMessage> {
        if !template.is_active {
            return Err(NotificationError::TemplateError(format!(
                "template {} v{} is not active",
                template.id, template.version
            )));
        }

        let mut bag = self.business.variables();
        bag.extend(variables.iter().map(|(k, v)| (k.clone(), v.clone())));

        let mut unresolved = BTreeSet::new();
        let mut render = |text: &str| substitute(text, &bag, &mut unresolved);

        let subject = template.subject.as_deref().map(&mut render);
        let html_body = template.body_html.as_deref().map(&mut render);
        let text_body = render(&template.body_text);

        let sms = (template.channel == Channel::Sms).then(|| {
            let char_count = text_body.chars().count();
            SmsMetrics {
                char_count,
                segments: sms_segments(char_count),
            }
        });

        Ok(RenderedMessage {
            subject,
            html_body,
            text_body,
            sms,
            unresolved: unresolved.into_iter().collect(),
        })
    }

    /// Check that required variables are referenced and the channel's fields exist.
    pub fn validate(&self, template: &Template) -> Vec<TemplateIssue> {
        let referenced: BTreeSet<String> = template.patterns().flat_map(tokens).collect();

        let mut issues: Vec<TemplateIssue> = template
            .required_variables()
            .filter(|name| !referenced.contains(*name))
            .map(|name| TemplateIssue::UnusedRequiredVariable(name.to_string()))
            .collect();

        let blank = |s: Option<&str>| s.is_none_or(|s| s.trim().is_empty());
        match template.channel {
            Channel::Email => {
                if blank(template.subject.as_deref()) {
                    issues.push(TemplateIssue::MissingSubject);
                }
                if blank(template.body_html.as_deref())
                    && blank(Some(template.body_text.as_str()))
                {
                    issues.push(TemplateIssue::MissingBody);
                }
            }
            Channel::Sms => {
                if blank(Some(template.body_text.as_str())) {
                    issues.push(TemplateIssue::MissingBody);
                }
            }
        }

        issues
    }

    /// Required variables the render could not fill.
    pub fn missing_required<'a>(
        &self,
        template: &'a Template,
        rendered: &RenderedMessage,
    ) -> Vec<&'a str> {
        template
            .required_variables()
            .filter(|name| rendered.unresolved.iter().any(|u| u == name))
            .collect()
    }
}

/// Names referenced by placeholders in `text`.
pub fn tokens(text: &str) -> Vec<String> {
    TOKEN
        .captures_iter(text)
        .map(|caps| caps[1].to_string())
        .collect()
}

fn substitute(text: &str, bag: &Variables, unresolved: &mut BTreeSet<String>) -> String {
    TOKEN
        .replace_all(text, |caps: &Captures| match bag.get(&caps[1]) {
            Some(value) => value.clone(),
            None => {
                unresolved.insert(caps[1].to_string());
                caps[0].to_string()
            }
        })
        .into_owned()
}
