//! Capability backend error types with retry classification.
//!
//! Distinguishes transport failures (the call did not produce output) from
//! parse failures (output arrived but did not match the expected shape).

use std::time::Duration;

use crate::retry::{CallPolicy, Retryable};

/// Error from a capability backend call.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendError {
    /// The kind of error
    pub kind: BackendErrorKind,
    /// Error message
    pub message: String,
    /// Delay requested by the backend, if any
    pub retry_after: Option<Duration>,
}

impl BackendError {
    /// Create a rate limit error.
    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self {
            kind: BackendErrorKind::RateLimited,
            message: message.into(),
            retry_after,
        }
    }

    /// Create a server-side failure.
    pub fn server_error(message: impl Into<String>) -> Self {
        Self::of(BackendErrorKind::ServerError, message)
    }

    /// Create a rejected-request error (bad request, auth, quota).
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::of(BackendErrorKind::Rejected, message)
    }

    /// Create a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::of(BackendErrorKind::Transport, message)
    }

    /// Create a parse error.
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::of(BackendErrorKind::ParseError, message)
    }

    fn of(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
        }
    }

    /// Check if this error is transient and should be retried.
    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }

    pub fn is_parse_failure(&self) -> bool {
        self.kind == BackendErrorKind::ParseError
    }
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for BackendError {}

impl Retryable for BackendError {
    // Malformed output is retried too: a fresh generation usually parses
    fn is_retryable(&self) -> bool {
        self.kind.is_transient() || self.kind == BackendErrorKind::ParseError
    }

    fn timed_out(after: Duration) -> Self {
        Self::of(
            BackendErrorKind::Timeout,
            format!("no response after {}ms", after.as_millis()),
        )
    }

    fn retry_delay(&self, attempt: u32, policy: &CallPolicy) -> Duration {
        if let Some(retry_after) = self.retry_after {
            return retry_after.min(Duration::from_secs(60));
        }
        match self.kind {
            // Start higher for rate limits
            BackendErrorKind::RateLimited => policy.backoff(attempt.saturating_add(1)),
            _ => policy.backoff(attempt),
        }
    }
}

/// Classification of backend errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    /// Rate limited - transient, retry with backoff
    RateLimited,
    /// Backend failed internally - transient
    ServerError,
    /// Request refused (bad request, auth, quota) - permanent
    Rejected,
    /// Connection failed or dropped - transient
    Transport,
    /// Call exceeded the per-call timeout - transient
    Timeout,
    /// Output did not match the requested structure
    ParseError,
}

impl BackendErrorKind {
    /// Check if this error kind is transient (same request may succeed).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::ServerError | Self::Transport | Self::Timeout
        )
    }
}

impl std::fmt::Display for BackendErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RateLimited => write!(f, "Rate limited"),
            Self::ServerError => write!(f, "Server error"),
            Self::Rejected => write!(f, "Rejected"),
            Self::Transport => write!(f, "Transport error"),
            Self::Timeout => write!(f, "Timeout"),
            Self::ParseError => write!(f, "Parse error"),
        }
    }
}
