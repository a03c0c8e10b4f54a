//! Skald error types

use std::time::Duration;

/// Coarse failure classification, used for log fields and metric labels.
///
/// Every kind is handled identically by the fallback loop; the distinction
/// exists so operators can tell a slow provider from a revoked key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Timeout,
    Quota,
    Auth,
    Transport,
    Audio,
    Other,
}

impl FailureKind {
    /// Stable label for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Timeout => "timeout",
            FailureKind::Quota => "quota",
            FailureKind::Auth => "auth",
            FailureKind::Transport => "transport",
            FailureKind::Audio => "audio",
            FailureKind::Other => "other",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Skald error types
#[derive(Debug, thiserror::Error)]
pub enum SkaldError {
    // Backend/network errors
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The remote provider rejected the request for quota reasons.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    /// The local sliding-window limiter refused the request.
    #[error("quota exceeded for backend '{backend}', retry after {retry_after:?}")]
    QuotaExceeded {
        backend: String,
        retry_after: Option<Duration>,
    },

    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("backend timed out after {0:?}")]
    Timeout(Duration),

    // Streaming errors
    #[error("stream error: {0}")]
    Stream(String),

    // Audio errors
    #[error("backend returned no audio")]
    EmptyAudio,

    /// A local engine process failed to start or exited unsuccessfully.
    #[error("speech engine process error: {0}")]
    Process(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Data errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    // Configuration errors
    #[error("no synthesis backend configured")]
    NoBackend,

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("operation not implemented: {0}")]
    NotImplemented(&'static str),
}

impl SkaldError {
    /// Whether retrying the same backend could plausibly succeed.
    ///
    /// Transport failures, timeouts, provider rate limits and 5xx responses
    /// are transient. Auth failures, bad input and 4xx responses are not.
    pub fn is_transient(&self) -> bool {
        match self {
            SkaldError::Http(_)
            | SkaldError::Timeout(_)
            | SkaldError::RateLimited { .. }
            | SkaldError::Stream(_) => true,
            SkaldError::Api { status, .. } => *status >= 500 || *status == 408,
            _ => false,
        }
    }

    /// Retry hint carried by quota errors, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            SkaldError::RateLimited { retry_after }
            | SkaldError::QuotaExceeded { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Classify this error for logging.
    pub fn kind(&self) -> FailureKind {
        match self {
            SkaldError::Timeout(_) => FailureKind::Timeout,
            SkaldError::RateLimited { .. } | SkaldError::QuotaExceeded { .. } => {
                FailureKind::Quota
            }
            SkaldError::AuthenticationFailed => FailureKind::Auth,
            SkaldError::Api { status, .. } if *status == 401 || *status == 403 => {
                FailureKind::Auth
            }
            SkaldError::Api { status, .. } if *status == 429 => FailureKind::Quota,
            SkaldError::Http(_) | SkaldError::Api { .. } | SkaldError::Stream(_) => {
                FailureKind::Transport
            }
            SkaldError::EmptyAudio | SkaldError::Process(_) | SkaldError::Io(_) => {
                FailureKind::Audio
            }
            _ => FailureKind::Other,
        }
    }
}

impl From<reqwest::Error> for SkaldError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            // reqwest does not expose the configured duration
            SkaldError::Timeout(Duration::ZERO)
        } else {
            SkaldError::Http(err.to_string())
        }
    }
}

/// Result type alias for Skald operations
pub type Result<T> = std::result::Result<T, SkaldError>;
