//! Unified error handling for the hybrid RAG system
//!
//! This module provides the single error type shared by the merge engine, the
//! retrieval context builder and the orchestration layer around them.

use std::fmt;
use std::time::Duration;

/// Main error type for the hybrid RAG system
#[derive(Debug)]
pub enum RagError {
    /// Configuration-related errors
    Config {
        /// Error message
        message: String,
    },

    /// Invalid input handed to an operation (empty text, empty batch item)
    Validation {
        /// Error message
        message: String,
    },

    /// I/O errors from file operations
    Io(std::io::Error),

    /// Serde JSON errors
    SerdeJson(serde_json::Error),

    /// Storage backend errors
    Storage {
        /// Error message
        message: String,
    },

    /// Embedding service errors
    Embedding {
        /// Error message
        message: String,
    },

    /// Language model errors
    LanguageModel {
        /// Error message
        message: String,
    },

    /// Entity and relationship extraction errors
    Extraction {
        /// Error message
        message: String,
    },

    /// Malformed collaborator responses
    Parse {
        /// Error message
        message: String,
    },

    /// Retrieval system errors
    Retrieval {
        /// Error message
        message: String,
    },

    /// Rerank service errors
    Rerank {
        /// Error message
        message: String,
    },

    /// Answer generation errors
    Generation {
        /// Error message
        message: String,
    },

    /// Rate limiting errors reported by a collaborator
    RateLimit {
        /// Error message
        message: String,
    },

    /// Operation timeout errors
    Timeout {
        /// Operation name
        operation: String,
        /// Timeout duration
        duration: Duration,
    },

    /// Resource not found errors
    NotFound {
        /// Resource type
        resource: String,
        /// Resource identifier
        id: String,
    },

    /// The operation observed a cancellation signal
    Cancelled {
        /// Pipeline stage that observed the signal
        stage: String,
    },

    /// One or more keys failed to merge for a document
    Merge {
        /// Document whose merge failed
        document_id: String,
        /// Identity keys that could not be merged
        failed_keys: Vec<String>,
        /// Joined failure messages
        message: String,
    },

    /// A chunk failed during embedding or extraction
    ChunkProcessing {
        /// Chunk that failed
        chunk_id: String,
        /// Underlying failure
        source: Box<RagError>,
    },
}

impl fmt::Display for RagError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RagError::Config { message } => {
                write!(
                    f,
                    "Configuration error: {message}. \
                          Solution: Check your config file or start from RagConfig::default()"
                )
            },
            RagError::Validation { message } => write!(f, "Validation error: {message}"),
            RagError::Io(err) => {
                write!(
                    f,
                    "I/O error: {err}. \
                          Solution: Check file permissions and that paths exist"
                )
            },
            RagError::SerdeJson(err) => write!(f, "JSON serialization error: {err}"),
            RagError::Storage { message } => write!(f, "Storage error: {message}"),
            RagError::Embedding { message } => write!(f, "Embedding error: {message}"),
            RagError::LanguageModel { message } => write!(f, "Language model error: {message}"),
            RagError::Extraction { message } => write!(f, "Extraction error: {message}"),
            RagError::Parse { message } => write!(f, "Parse error: {message}"),
            RagError::Retrieval { message } => write!(f, "Retrieval error: {message}"),
            RagError::Rerank { message } => write!(f, "Rerank error: {message}"),
            RagError::Generation { message } => write!(f, "Answer generation error: {message}"),
            RagError::RateLimit { message } => write!(f, "Rate limit error: {message}"),
            RagError::Timeout {
                operation,
                duration,
            } => {
                write!(f, "Operation '{operation}' timed out after {duration:?}")
            },
            RagError::NotFound { resource, id } => write!(f, "{resource} not found: {id}"),
            RagError::Cancelled { stage } => write!(f, "Operation cancelled during {stage}"),
            RagError::Merge {
                document_id,
                failed_keys,
                message,
            } => {
                write!(
                    f,
                    "Merge failed for document {document_id} ({} keys): {message}",
                    failed_keys.len()
                )
            },
            RagError::ChunkProcessing { chunk_id, source } => {
                write!(f, "Chunk {chunk_id} failed: {source}")
            },
        }
    }
}

impl std::error::Error for RagError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RagError::Io(err) => Some(err),
            RagError::SerdeJson(err) => Some(err),
            RagError::ChunkProcessing { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for RagError {
    fn from(err: std::io::Error) -> Self {
        RagError::Io(err)
    }
}

impl From<serde_json::Error> for RagError {
    fn from(err: serde_json::Error) -> Self {
        RagError::SerdeJson(err)
    }
}

impl From<regex::Error> for RagError {
    fn from(err: regex::Error) -> Self {
        RagError::Validation {
            message: format!("Regex error: {err}"),
        }
    }
}

/// Convenient Result type alias
pub type Result<T> = std::result::Result<T, RagError>;

/// Trait for adding context to errors
pub trait ErrorContext<T> {
    /// Add context to an error
    fn with_context(self, context: &str) -> Result<T>;

    /// Add context using a closure
    fn with_context_lazy<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: Into<RagError>,
{
    fn with_context(self, context: &str) -> Result<T> {
        self.map_err(|e| e.into().prefixed(context))
    }

    fn with_context_lazy<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        match self {
            Ok(value) => Ok(value),
            Err(e) => {
                let context = f();
                Err(e).with_context(&context)
            },
        }
    }
}

/// Creates a storage error with a message
#[macro_export]
macro_rules! storage_error {
    ($msg:expr) => {
        $crate::RagError::Storage {
            message: $msg.to_string(),
        }
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::RagError::Storage {
            message: format!($fmt, $($arg)*),
        }
    };
}

/// Creates a validation error with a message
#[macro_export]
macro_rules! validation_error {
    ($msg:expr) => {
        $crate::RagError::Validation {
            message: $msg.to_string(),
        }
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::RagError::Validation {
            message: format!($fmt, $($arg)*),
        }
    };
}

/// Creates a retrieval error with a message
#[macro_export]
macro_rules! retrieval_error {
    ($msg:expr) => {
        $crate::RagError::Retrieval {
            message: $msg.to_string(),
        }
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::RagError::Retrieval {
            message: format!($fmt, $($arg)*),
        }
    };
}

/// Error severity levels for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Informational - not actually an error
    Info,
    /// Warning - something unexpected but recoverable
    Warning,
    /// Error - operation failed but system can continue
    Error,
    /// Critical - graph invariants may be at risk
    Critical,
}

impl RagError {
    /// Prefix the message of a message-carrying variant with `context`
    fn prefixed(self, context: &str) -> Self {
        let wrap = |message: String| format!("{context}: {message}");
        match self {
            RagError::Config { message } => RagError::Config {
                message: wrap(message),
            },
            RagError::Validation { message } => RagError::Validation {
                message: wrap(message),
            },
            RagError::Storage { message } => RagError::Storage {
                message: wrap(message),
            },
            RagError::Embedding { message } => RagError::Embedding {
                message: wrap(message),
            },
            RagError::LanguageModel { message } => RagError::LanguageModel {
                message: wrap(message),
            },
            RagError::Extraction { message } => RagError::Extraction {
                message: wrap(message),
            },
            RagError::Parse { message } => RagError::Parse {
                message: wrap(message),
            },
            RagError::Retrieval { message } => RagError::Retrieval {
                message: wrap(message),
            },
            RagError::Rerank { message } => RagError::Rerank {
                message: wrap(message),
            },
            RagError::Generation { message } => RagError::Generation {
                message: wrap(message),
            },
            RagError::RateLimit { message } => RagError::RateLimit {
                message: wrap(message),
            },
            other => other,
        }
    }

    /// Whether a retry with backoff may succeed (rate limiting, timeouts)
    pub fn is_transient(&self) -> bool {
        matches!(self, RagError::RateLimit { .. } | RagError::Timeout { .. })
    }

    /// Get the severity level of this error
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            RagError::Config { .. } => ErrorSeverity::Critical,
            RagError::Validation { .. } => ErrorSeverity::Error,
            RagError::Io(_) | RagError::SerdeJson(_) => ErrorSeverity::Error,
            RagError::Storage { .. } => ErrorSeverity::Error,
            RagError::Embedding { .. } | RagError::LanguageModel { .. } => ErrorSeverity::Warning,
            RagError::Extraction { .. } | RagError::Parse { .. } => ErrorSeverity::Warning,
            RagError::Retrieval { .. } | RagError::Rerank { .. } => ErrorSeverity::Warning,
            RagError::Generation { .. } => ErrorSeverity::Warning,
            RagError::RateLimit { .. } | RagError::Timeout { .. } => ErrorSeverity::Warning,
            RagError::NotFound { .. } => ErrorSeverity::Warning,
            RagError::Cancelled { .. } => ErrorSeverity::Info,
            RagError::Merge { .. } => ErrorSeverity::Critical,
            RagError::ChunkProcessing { source, .. } => source.severity(),
        }
    }

    /// Get error category for structured log fields
    pub fn category(&self) -> &'static str {
        match self {
            RagError::Config { .. } => "config",
            RagError::Validation { .. } => "validation",
            RagError::Io(_) => "io",
            RagError::SerdeJson(_) => "serialization",
            RagError::Storage { .. } => "storage",
            RagError::Embedding { .. } => "embedding",
            RagError::LanguageModel { .. } => "language_model",
            RagError::Extraction { .. } => "extraction",
            RagError::Parse { .. } => "parse",
            RagError::Retrieval { .. } => "retrieval",
            RagError::Rerank { .. } => "rerank",
            RagError::Generation { .. } => "generation",
            RagError::RateLimit { .. } => "rate_limit",
            RagError::Timeout { .. } => "timeout",
            RagError::NotFound { .. } => "not_found",
            RagError::Cancelled { .. } => "cancelled",
            RagError::Merge { .. } => "merge",
            RagError::ChunkProcessing { .. } => "chunk_processing",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_context_prefixes_message() {
        let result: std::result::Result<(), RagError> = Err(RagError::Storage {
            message: "disk full".to_string(),
        });

        let error = result.with_context("upserting chunks").unwrap_err();
        match error {
            RagError::Storage { message } => assert_eq!(message, "upserting chunks: disk full"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_error_context_from_io() {
        let result: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "file not found",
        ));

        let error = result.with_context("loading configuration").unwrap_err();
        assert!(matches!(error, RagError::Io(_)));
    }

    #[test]
    fn test_error_macros() {
        let error = storage_error!("test {} {}", "formatted", "message");
        assert!(matches!(error, RagError::Storage { .. }));

        let error = validation_error!("empty text");
        assert_eq!(error.category(), "validation");
    }

    #[test]
    fn test_transient_classification() {
        assert!(RagError::RateLimit {
            message: "429".to_string()
        }
        .is_transient());
        assert!(RagError::Timeout {
            operation: "embed".to_string(),
            duration: Duration::from_secs(1),
        }
        .is_transient());
        assert!(!RagError::Embedding {
            message: "bad model".to_string()
        }
        .is_transient());
    }

    #[test]
    fn test_chunk_error_exposes_source() {
        use std::error::Error;

        let error = RagError::ChunkProcessing {
            chunk_id: "chunk-1".to_string(),
            source: Box::new(RagError::Extraction {
                message: "no completion sentinel".to_string(),
            }),
        };
        assert!(error.to_string().contains("chunk-1"));
        assert!(error.source().is_some());
        assert_eq!(error.severity(), ErrorSeverity::Warning);
    }
}
