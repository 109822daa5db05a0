//! Error types for the vitals_core library.

use std::io;
use std::time::Duration;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Why an active session was torn down
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExpiryReason {
    /// No activity within the idle threshold
    Idle,
    /// Token renewal was rejected or could not reach the service
    RenewalFailed,
    /// The user logged out
    Logout,
    /// Monitoring was stopped; the persisted session is kept for a later resume
    Stopped,
}

impl std::fmt::Display for ExpiryReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExpiryReason::Idle => write!(f, "idle timeout"),
            ExpiryReason::RenewalFailed => write!(f, "token renewal failed"),
            ExpiryReason::Logout => write!(f, "logged out"),
            ExpiryReason::Stopped => write!(f, "monitoring stopped"),
        }
    }
}

/// Core error type for vitals_core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed step input; recovered locally, the step is re-presented
    #[error("Validation error: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// Credentials or one-time code were refused by the service
    #[error("Authentication rejected: {0}")]
    AuthenticationRejected(String),

    /// Credential submission is blocked until the cooldown elapses
    #[error("Locked out for another {}s", remaining.as_secs())]
    LockedOut { remaining: Duration },

    /// The session is gone and the caller must return to an unauthenticated state
    #[error("Session expired: {0}")]
    SessionExpired(ExpiryReason),

    /// Transport-level failure talking to the service
    #[error("Network failure: {0}")]
    Network(String),

    /// A step was submitted out of order, or to a finished wizard
    #[error("Invalid transition: expected step '{expected}', got '{actual}'")]
    InvalidTransition { expected: String, actual: String },

    /// A code resend was requested before the cooldown elapsed
    #[error("Resend available in {}s", remaining.as_secs())]
    ResendCooldown { remaining: Duration },

    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Single-message validation error
    pub fn invalid(message: impl Into<String>) -> Self {
        Error::Validation(vec![message.into()])
    }

    /// Whether this failure counts against the lockout budget when it
    /// comes out of a credentials step.
    ///
    /// The service cannot be told apart from an unreachable one, so network
    /// failures count the same as a refusal. Malformed input never reaches
    /// the service and does not count.
    pub fn is_credential_failure(&self) -> bool {
        matches!(self, Error::AuthenticationRejected(_) | Error::Network(_))
    }
}
