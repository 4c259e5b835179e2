//! Error categorization for retry handling.
//!
//! Every provider call returns a [`ProviderResult`]. The error carries an
//! [`ErrorKind`] whose [`ErrorCategory`] tells the retry controller whether
//! another attempt may succeed:
//! - Retryable: transient failures (network timeout, rate limiting, 5xx)
//! - Fatal: permanent failures (auth, quota, malformed request, not found)

use std::fmt;
use std::io;

use serde::{Deserialize, Serialize};

/// Category of a provider error for retry decision-making.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Transient error - retry may succeed.
    Retryable,
    /// Permanent error - retry will never succeed.
    Fatal,
}

/// What went wrong, as far as the engine cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    RateLimited,
    ServerError,
    Network,
    /// The destination no longer recognizes an upload session token.
    SessionExpired,
    Auth,
    QuotaExceeded,
    InvalidRequest,
    NotFound,
    /// Byte counts disagree between source, transfer and destination.
    Integrity,
    ContentRead,
    Cancelled,
    Other,
}

impl ErrorKind {
    pub fn category(self) -> ErrorCategory {
        match self {
            ErrorKind::Timeout
            | ErrorKind::RateLimited
            | ErrorKind::ServerError
            | ErrorKind::Network
            | ErrorKind::SessionExpired => ErrorCategory::Retryable,
            ErrorKind::Auth
            | ErrorKind::QuotaExceeded
            | ErrorKind::InvalidRequest
            | ErrorKind::NotFound
            | ErrorKind::Integrity
            | ErrorKind::ContentRead
            | ErrorKind::Cancelled
            | ErrorKind::Other => ErrorCategory::Fatal,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::ServerError => "server_error",
            ErrorKind::Network => "network",
            ErrorKind::SessionExpired => "session_expired",
            ErrorKind::Auth => "auth",
            ErrorKind::QuotaExceeded => "quota_exceeded",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Integrity => "integrity",
            ErrorKind::ContentRead => "content_read",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Other => "other",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A provider error with its kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderError {
    /// What kind of failure this is.
    pub kind: ErrorKind,
    /// The underlying error message.
    pub message: String,
    /// The source path that failed (if applicable).
    pub path: Option<String>,
    /// Number of attempts made before this error was surfaced.
    pub attempts: u32,
}

impl ProviderError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            path: None,
            attempts: 0,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn integrity(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Integrity, message)
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequest, message)
    }

    pub fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Retryable
    }

    /// Attach the source path, keeping an existing one.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        if self.path.is_none() {
            self.path = Some(path.into());
        }
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref path) = self.path {
            write!(f, "{}: {} ({})", path, self.message, self.kind)
        } else {
            write!(f, "{} ({})", self.message, self.kind)
        }
    }
}

impl std::error::Error for ProviderError {}

impl From<io::Error> for ProviderError {
    fn from(err: io::Error) -> Self {
        ProviderError::new(categorize_io_error(&err), err.to_string())
    }
}

/// Categorize an IO error into a provider error kind.
pub fn categorize_io_error(err: &io::Error) -> ErrorKind {
    match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ErrorKind::Timeout,

        io::ErrorKind::Interrupted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe => ErrorKind::Network,

        io::ErrorKind::PermissionDenied => ErrorKind::Auth,
        io::ErrorKind::NotFound => ErrorKind::NotFound,
        io::ErrorKind::InvalidInput | io::ErrorKind::AlreadyExists => ErrorKind::InvalidRequest,
        io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => ErrorKind::ContentRead,

        // Unknown errors - default to fatal to avoid retry loops
        _ => ErrorKind::Other,
    }
}

/// Map an HTTP status returned by a cloud API onto an error kind.
pub fn classify_http_status(status: u16) -> ErrorKind {
    match status {
        401 | 403 => ErrorKind::Auth,
        404 => ErrorKind::NotFound,
        408 => ErrorKind::Timeout,
        410 => ErrorKind::SessionExpired,
        429 => ErrorKind::RateLimited,
        507 => ErrorKind::QuotaExceeded,
        500..=599 => ErrorKind::ServerError,
        400..=499 => ErrorKind::InvalidRequest,
        _ => ErrorKind::Other,
    }
}

/// Classify a free-form error message from an SDK that only exposes strings.
pub fn classify_message(raw: &str) -> ErrorKind {
    let lower = raw.to_lowercase();

    if lower.contains("timeout") || lower.contains("timed out") {
        ErrorKind::Timeout
    } else if lower.contains("rate limit") || lower.contains("too many requests") {
        ErrorKind::RateLimited
    } else if lower.contains("quota") || lower.contains("storage full") || lower.contains("insufficient storage") {
        ErrorKind::QuotaExceeded
    } else if lower.contains("unauthorized")
        || lower.contains("invalid token")
        || lower.contains("expired token")
        || lower.contains("credential")
    {
        ErrorKind::Auth
    } else if lower.contains("not found") || lower.contains("no such file") {
        ErrorKind::NotFound
    } else if lower.contains("connection") || lower.contains("reset") || lower.contains("dns") {
        ErrorKind::Network
    } else if lower.contains("internal server error") || lower.contains("service unavailable") {
        ErrorKind::ServerError
    } else {
        ErrorKind::Other
    }
}

/// Result type for provider operations.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;
