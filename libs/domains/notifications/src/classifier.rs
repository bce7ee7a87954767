//! Transport failure classification
//!
//! Failures are categorized to determine retry behavior:
//! - **Transient**: network trouble or provider 5xx, retried with backoff
//! - **RateLimit**: provider throttling (429), retried with backoff
//! - **Validation**: the request itself is wrong, never retried
//! - **Permanent**: everything else, never retried
//!
//! The mapping is a table fixed at construction. Transports register their own
//! status or provider-code rules through [`ClassificationTable::builder`].

use std::collections::HashMap;
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};
use strum::Display;

use crate::models::FailureKind;
use crate::providers::{TransportError, TransportErrorKind};

/// Category of a transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    Transient,
    RateLimit,
    Validation,
    Permanent,
}

impl ErrorKind {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Transient | ErrorKind::RateLimit)
    }

    pub fn failure_kind(&self) -> FailureKind {
        match self {
            ErrorKind::Transient => FailureKind::Transient,
            ErrorKind::RateLimit => FailureKind::RateLimited,
            ErrorKind::Validation => FailureKind::Validation,
            ErrorKind::Permanent => FailureKind::Permanent,
        }
    }
}

/// A classified transport failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub retryable: bool,
    pub message: String,
}

impl ClassifiedError {
    fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            retryable: kind.is_retryable(),
            message: message.into(),
        }
    }
}

/// Rules mapping transport failures onto [`ErrorKind`].
///
/// Lookup order: provider code for the reporting transport, then the failure
/// kind (timeout, connection, exact status, status range), then message
/// keywords, then the fallback.
#[derive(Debug, Clone)]
pub struct ClassificationTable {
    codes: HashMap<(String, String), ErrorKind>,
    statuses: HashMap<u16, ErrorKind>,
    status_ranges: Vec<(RangeInclusive<u16>, ErrorKind)>,
    keywords: Vec<(String, ErrorKind)>,
    on_timeout: ErrorKind,
    on_connection: ErrorKind,
    fallback: ErrorKind,
}

impl Default for ClassificationTable {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ClassificationTable {
    /// A builder seeded with the default rules.
    pub fn builder() -> ClassificationTableBuilder {
        ClassificationTableBuilder {
            table: ClassificationTable {
                codes: HashMap::from([
                    (("smtp".to_string(), "transient".to_string()), ErrorKind::Transient),
                    (("smtp".to_string(), "permanent".to_string()), ErrorKind::Permanent),
                ]),
                statuses: HashMap::from([
                    (400, ErrorKind::Validation),
                    (404, ErrorKind::Validation),
                    (429, ErrorKind::RateLimit),
                ]),
                status_ranges: vec![(500..=599, ErrorKind::Transient)],
                keywords: vec![
                    ("invalid".to_string(), ErrorKind::Validation),
                    ("required".to_string(), ErrorKind::Validation),
                ],
                on_timeout: ErrorKind::Transient,
                on_connection: ErrorKind::Transient,
                fallback: ErrorKind::Permanent,
            },
        }
    }

    pub fn classify(&self, err: &TransportError) -> ClassifiedError {
        ClassifiedError::new(self.kind_of(err), err.to_string())
    }

    fn kind_of(&self, err: &TransportError) -> ErrorKind {
        if let Some(code) = &err.code {
            let key = (err.transport.to_ascii_lowercase(), code.to_ascii_lowercase());
            if let Some(kind) = self.codes.get(&key) {
                return *kind;
            }
        }

        match err.kind {
            TransportErrorKind::Timeout => return self.on_timeout,
            TransportErrorKind::Connection => return self.on_connection,
            TransportErrorKind::Status(status) => {
                if let Some(kind) = self.statuses.get(&status) {
                    return *kind;
                }
                if let Some((_, kind)) = self
                    .status_ranges
                    .iter()
                    .find(|(range, _)| range.contains(&status))
                {
                    return *kind;
                }
            }
            TransportErrorKind::Other => {}
        }

        let message = err.message.to_lowercase();
        self.keywords
            .iter()
            .find(|(word, _)| message.contains(word.as_str()))
            .map(|(_, kind)| *kind)
            .unwrap_or(self.fallback)
    }
}

/// Extends the default table before it is frozen.
pub struct ClassificationTableBuilder {
    table: ClassificationTable,
}

impl ClassificationTableBuilder {
    pub fn with_status(mut self, status: u16, kind: ErrorKind) -> Self {
        self.table.statuses.insert(status, kind);
        self
    }

    pub fn with_status_range(mut self, range: RangeInclusive<u16>, kind: ErrorKind) -> Self {
        // Later ranges are consulted first.
        self.table.status_ranges.insert(0, (range, kind));
        self
    }

    /// Map a provider-specific error code reported by `transport`.
    pub fn with_code(mut self, transport: &str, code: &str, kind: ErrorKind) -> Self {
        self.table.codes.insert(
            (transport.to_ascii_lowercase(), code.to_ascii_lowercase()),
            kind,
        );
        self
    }

    pub fn with_keyword(mut self, keyword: &str, kind: ErrorKind) -> Self {
        self.table.keywords.push((keyword.to_lowercase(), kind));
        self
    }

    pub fn with_fallback(mut self, kind: ErrorKind) -> Self {
        self.table.fallback = kind;
        self
    }

    pub fn build(self) -> ClassificationTable {
        self.table
    }
}
