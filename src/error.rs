use std::time::Duration;

use thiserror::Error;

/// Malformed scrobble input. Always fatal, raised before any network activity.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("input is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("input must be a JSON array of track objects")]
    NotAnArray,

    #[error("record {index}: expected a JSON object")]
    NotAnObject { index: usize },

    #[error("record {index}: missing required field `{field}`")]
    MissingField { index: usize, field: &'static str },

    #[error("record {index}: field `{field}` has an invalid value: {reason}")]
    InvalidField {
        index: usize,
        field: &'static str,
        reason: String,
    },
}

/// How the pipeline must react to an [`ApiError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Transient, worth another attempt after a backoff.
    Retryable,
    /// The whole run must stop.
    Fatal,
    /// This request will never succeed, but other requests may.
    Permanent,
}

/// Failure of a call to the destination service.
#[derive(Error, Debug, Clone)]
pub enum ApiError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("rate limited by the service")]
    RateLimited { retry_after: Option<Duration> },

    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("cancelled: {0}")]
    Cancelled(String),
}

impl ApiError {
    pub fn severity(&self) -> Severity {
        match self {
            Self::Auth(_) => Severity::Fatal,
            Self::RateLimited { .. } | Self::Timeout | Self::Network(_) | Self::Server { .. } => {
                Severity::Retryable
            }
            Self::Rejected { .. } | Self::InvalidResponse(_) | Self::Cancelled(_) => {
                Severity::Permanent
            }
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }

    pub fn is_retryable(&self) -> bool {
        self.severity() == Severity::Retryable
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_decode() {
            Self::InvalidResponse(e.to_string())
        } else if let Some(status) = e.status() {
            Self::from_status(status.as_u16(), e.to_string(), None)
        } else {
            Self::Network(e.to_string())
        }
    }
}

impl ApiError {
    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, message: String, retry_after: Option<Duration>) -> Self {
        match status {
            401 | 403 => Self::Auth(format!("{status}: {message}")),
            429 => Self::RateLimited { retry_after },
            500..=599 => Self::Server { status, message },
            _ => Self::Rejected { status, message },
        }
    }
}

/// Logic errors in outcome bookkeeping. These indicate a bug, never bad input.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum LedgerError {
    #[error("record {0} already has an outcome")]
    DuplicateOutcome(usize),

    #[error("record {0} is not part of this run")]
    UnknownRecord(usize),

    #[error("{} record(s) finished without an outcome, first is {}", .0.len(), .0[0])]
    MissingOutcomes(Vec<usize>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(ApiError::from_status(401, "expired".into(), None).is_fatal());
        assert!(ApiError::from_status(403, "scope".into(), None).is_fatal());
        assert!(ApiError::from_status(429, String::new(), None).is_retryable());
        assert!(ApiError::from_status(503, "down".into(), None).is_retryable());
        assert_eq!(
            ApiError::from_status(400, "bad id".into(), None).severity(),
            Severity::Permanent
        );
    }

    #[test]
    fn rate_limit_keeps_retry_after() {
        let e = ApiError::from_status(429, String::new(), Some(Duration::from_secs(7)));
        match e {
            ApiError::RateLimited { retry_after } => {
                assert_eq!(retry_after, Some(Duration::from_secs(7)))
            }
            other => panic!("expected rate limit, got {other:?}"),
        }
    }
}
