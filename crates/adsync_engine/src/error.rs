//! Error types for the sync engine.

use adsync_model::ErrorCode;
use adsync_store::StoreError;
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur during sync operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The remote API rejected or failed a request.
    #[error("remote API error ({status}): {message}")]
    Remote {
        /// HTTP status code, or 0 when no response was received.
        status: u16,
        /// Error message from the platform or transport.
        message: String,
    },

    /// A required related entity is not yet resolvable to a remote id.
    #[error("dependency not resolvable: {reference}")]
    Dependency {
        /// The unresolvable reference, for diagnostics.
        reference: String,
    },

    /// A name collision that could not be resolved to a linkable id.
    #[error("duplicate \"{name}\" could not be linked to a remote id")]
    Duplicate {
        /// The colliding name.
        name: String,
    },

    /// The payload was malformed before transmission.
    #[error("invalid payload: {message}")]
    Validation {
        /// Description of the problem.
        message: String,
    },

    /// A task spent longer than the configured queue timeout waiting for
    /// a dispatch slot.
    #[error("task timed out after {waited_ms} ms in the rate limiter queue")]
    QueueTimeout {
        /// How long the task waited before eviction.
        waited_ms: u64,
    },

    /// The rate limiter was shut down while the task was queued.
    #[error("rate limiter stopped before the task could run")]
    LimiterStopped,

    /// The task's completion channel closed without a result.
    #[error("task dropped before settling")]
    TaskDropped,

    /// Local store error.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EngineError {
    /// Creates a remote API error.
    pub fn remote(status: u16, message: impl Into<String>) -> Self {
        Self::Remote {
            status,
            message: message.into(),
        }
    }

    /// Creates a rate-limited remote error (HTTP 429).
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::Remote {
            status: 429,
            message: message.into(),
        }
    }

    /// Creates a dependency error for an unresolvable reference.
    pub fn dependency(reference: impl Into<String>) -> Self {
        Self::Dependency {
            reference: reference.into(),
        }
    }

    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Returns true if this failure is classified as rate limiting and
    /// therefore eligible for limiter-level retry.
    ///
    /// Classification: HTTP 429, or an error message indicating rate
    /// limiting. Nothing else is retried by the limiter.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            EngineError::Remote { status: 429, .. } => true,
            EngineError::Remote { message, .. } => {
                let lower = message.to_ascii_lowercase();
                lower.contains("rate limit") || lower.contains("too many requests")
            }
            _ => false,
        }
    }

    /// Maps this error onto the reporting taxonomy.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            EngineError::Dependency { .. } => ErrorCode::Dependency,
            EngineError::Duplicate { .. } => ErrorCode::Duplicate,
            EngineError::Validation { .. } => ErrorCode::Validation,
            _ => ErrorCode::Network,
        }
    }

    /// Returns true if this error aborts a whole run rather than a
    /// single entity. Only store-connectivity failures qualify.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::Store(StoreError::Unavailable { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_classification() {
        assert!(EngineError::rate_limited("slow down").is_rate_limited());
        assert!(EngineError::remote(503, "rate limit exceeded").is_rate_limited());
        assert!(EngineError::remote(400, "Too Many Requests").is_rate_limited());
        assert!(!EngineError::remote(500, "internal error").is_rate_limited());
        assert!(!EngineError::dependency("local:adv-1").is_rate_limited());
        assert!(!EngineError::validation("empty name").is_rate_limited());
    }

    #[test]
    fn error_code_mapping() {
        assert_eq!(
            EngineError::dependency("local:x").error_code(),
            ErrorCode::Dependency
        );
        assert_eq!(
            EngineError::Duplicate { name: "Acme".into() }.error_code(),
            ErrorCode::Duplicate
        );
        assert_eq!(
            EngineError::validation("bad").error_code(),
            ErrorCode::Validation
        );
        assert_eq!(
            EngineError::remote(500, "boom").error_code(),
            ErrorCode::Network
        );
        assert_eq!(
            EngineError::QueueTimeout { waited_ms: 100 }.error_code(),
            ErrorCode::Network
        );
    }

    #[test]
    fn only_store_unavailable_is_fatal() {
        let fatal = EngineError::Store(StoreError::Unavailable {
            message: "down".into(),
        });
        assert!(fatal.is_fatal());

        let not_fatal = EngineError::Store(StoreError::EntityNotFound { key: "k".into() });
        assert!(!not_fatal.is_fatal());
        assert!(!EngineError::remote(500, "boom").is_fatal());
    }
}
