//! Error types for leased message handling.

use std::fmt;
use thiserror::Error;

/// Error categories tell callers whether retrying can help.
///
/// # Categories
///
/// - **Transient**: Temporary failure (broker timeout, connection reset)
/// - **Permanent**: Retrying the same input fails the same way (bad payload,
///   missing argument, lost lock)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Temporary failure, the operation may succeed if repeated
    Transient,

    /// Unrecoverable for this message
    Permanent,
}

impl ErrorCategory {
    /// Check if an operation failing with this category is worth repeating.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCategory::Transient)
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Transient => write!(f, "transient"),
            ErrorCategory::Permanent => write!(f, "permanent"),
        }
    }
}

/// Error raised by the serializer, the lease renewer, the processing
/// pipeline and the drain loop.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// A required input was absent (null payload, message without a lease)
    #[error("missing required argument: {0}")]
    MissingArgument(&'static str),

    /// The payload type has no data contract, or the body was written under
    /// a different contract than the one requested
    #[error("type '{type_name}' is not a valid data contract: {reason}")]
    SchemaViolation {
        type_name: &'static str,
        reason: String,
    },

    /// The handler result did not satisfy the success predicate
    #[error("process did not complete successfully")]
    ProcessingFailed,

    /// The message body has already been read
    #[error("message body has already been consumed")]
    BodyConsumed,

    /// JSON encoding or decoding failed
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Binary encoding or decoding failed
    #[error("binary encoding error: {0}")]
    Binary(#[from] bincode::Error),

    /// The body is declared as text but is not valid UTF-8
    #[error("message body is not valid utf-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// The lock on the message expired or was taken by another receiver
    #[error("lock lost for message {0}")]
    LockLost(String),

    /// Broker transport failure
    #[error("transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Timed out waiting on the broker
    #[error("timeout: {0}")]
    Timeout(String),
}

impl BrokerError {
    /// Create a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            source: None,
        }
    }

    /// Create a transport error with a source.
    pub fn transport_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transport {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a schema violation for the given type.
    pub fn schema_violation(type_name: &'static str, reason: impl Into<String>) -> Self {
        Self::SchemaViolation {
            type_name,
            reason: reason.into(),
        }
    }

    /// Get the error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            BrokerError::Transport { .. } => ErrorCategory::Transient,
            BrokerError::Timeout(_) => ErrorCategory::Transient,

            BrokerError::MissingArgument(_)
            | BrokerError::SchemaViolation { .. }
            | BrokerError::ProcessingFailed
            | BrokerError::BodyConsumed
            | BrokerError::Json(_)
            | BrokerError::Binary(_)
            | BrokerError::Utf8(_)
            | BrokerError::LockLost(_) => ErrorCategory::Permanent,
        }
    }

    /// Check if this error should be retried.
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category() {
        assert_eq!(
            BrokerError::transport("connection reset").category(),
            ErrorCategory::Transient
        );
        assert_eq!(
            BrokerError::Timeout("renew".to_string()).category(),
            ErrorCategory::Transient
        );
        assert_eq!(
            BrokerError::LockLost("msg-1".to_string()).category(),
            ErrorCategory::Permanent
        );
        assert_eq!(
            BrokerError::MissingArgument("payload").category(),
            ErrorCategory::Permanent
        );
    }

    #[test]
    fn test_is_retryable() {
        assert!(BrokerError::transport("reset").is_retryable());
        assert!(!BrokerError::ProcessingFailed.is_retryable());
        assert!(!BrokerError::schema_violation("Foo", "no contract").is_retryable());
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            BrokerError::ProcessingFailed.to_string(),
            "process did not complete successfully"
        );
        assert_eq!(
            BrokerError::MissingArgument("message").to_string(),
            "missing required argument: message"
        );

        let err = BrokerError::schema_violation("Foo2", "no data contract declared");
        assert!(err.to_string().contains("Foo2"));
        assert!(err.to_string().contains("no data contract declared"));
    }

    #[test]
    fn test_transport_with_source() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        let err = BrokerError::transport_with_source("renew lock failed", io);

        assert_eq!(err.category(), ErrorCategory::Transient);
        assert!(std::error::Error::source(&err).is_some());
    }
}
