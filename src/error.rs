//! Unified error handling for the urlfrontier crate
//!
//! Cache misses are not errors: `next_url` reports them as `Ok(None)`.
//! The variants below cover the failures callers can actually act on.
//!
//! # Architecture
//!
//! - [`FrontierErrorTrait`] - Common interface for error classification
//! - [`ErrorCategory`] - Classification of errors for handling strategies
//! - [`Error`] - Unified error enum
//!
//! # Usage
//!
//! ```rust,ignore
//! use urlfrontier::error::{Error, FrontierErrorTrait};
//!
//! fn handle_error(err: Error) {
//!     if err.is_recoverable() {
//!         tracing::warn!(error = %err, "retrying later");
//!     } else {
//!         tracing::error!(error = %err, "giving up");
//!     }
//! }
//! ```

use thiserror::Error;

/// Common trait for frontier error types
pub trait FrontierErrorTrait: std::error::Error {
    /// Check if this error is recoverable (the operation may be retried)
    fn is_recoverable(&self) -> bool;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Persistent store and I/O errors
    Storage,
    /// Partition lifecycle races (teardown while waiting)
    Concurrency,
    /// Configuration errors
    Config,
    /// Invalid caller input (rule sets, records)
    Validation,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Short label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Storage => "storage",
            Self::Concurrency => "concurrency",
            Self::Config => "config",
            Self::Validation => "validation",
            Self::Other => "other",
        }
    }
}

/// Unified error type for the urlfrontier crate
#[derive(Error, Debug)]
pub enum Error {
    /// The persistent store rejected or failed a request
    #[error("Store error: {0}")]
    Store(String),

    /// The partition was terminated while the caller was waiting on it
    #[error("Partition {fingerprint} was closed while waiting")]
    PartitionClosed { fingerprint: String },

    /// A rule set names a field the store cannot sort by
    #[error("Invalid sort field: {0}")]
    InvalidSortField(String),

    /// TOML configuration parse errors
    #[error("TOML error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl FrontierErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Store(_) => true, // stores come back
            Self::PartitionClosed { .. } => true,
            Self::InvalidSortField(_) => false,
            Self::TomlParse(_) => false,
            Self::Config(_) => false,
            Self::Other { .. } => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Store(_) => ErrorCategory::Storage,
            Self::PartitionClosed { .. } => ErrorCategory::Concurrency,
            Self::InvalidSortField(_) => ErrorCategory::Validation,
            Self::TomlParse(_) | Self::Config(_) => ErrorCategory::Config,
            Self::Other { .. } => ErrorCategory::Other,
        }
    }
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a store error from any displayable failure
    pub fn store(err: impl std::fmt::Display) -> Self {
        Self::Store(err.to_string())
    }

    /// Create a partition-closed error for a fingerprint
    pub fn partition_closed(fingerprint: impl Into<String>) -> Self {
        Self::PartitionClosed {
            fingerprint: fingerprint.into(),
        }
    }

    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    /// Create a generic error with context and source
    pub fn with_source(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Other {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }
}

// Store implementations report through anyhow; keep the full context chain.
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Store(format!("{err:#}"))
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category() {
        let store_err = Error::store("connection refused");
        assert_eq!(store_err.category(), ErrorCategory::Storage);

        let closed = Error::partition_closed("abc");
        assert_eq!(closed.category(), ErrorCategory::Concurrency);

        let sort = Error::InvalidSortField("color".to_string());
        assert_eq!(sort.category(), ErrorCategory::Validation);
    }

    #[test]
    fn test_is_recoverable() {
        assert!(Error::store("timeout").is_recoverable());
        assert!(Error::partition_closed("abc").is_recoverable());
        assert!(!Error::InvalidSortField("color".to_string()).is_recoverable());
    }

    #[test]
    fn test_anyhow_conversion_keeps_context() {
        let err = anyhow::anyhow!("disk full").context("Failed to upsert URL");
        let unified: Error = err.into();
        let message = unified.to_string();
        assert!(message.contains("Failed to upsert URL"));
        assert!(message.contains("disk full"));
    }

    #[test]
    fn test_partition_closed_message() {
        let err = Error::partition_closed("deadbeef");
        assert_eq!(err.to_string(), "Partition deadbeef was closed while waiting");
    }

    #[test]
    fn test_config_error() {
        let err = Error::config("max_size must be greater than 0");
        assert_eq!(err.category(), ErrorCategory::Config);
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_sqlite_failure_surfaces_as_store_error() {
        let err = anyhow::Error::new(rusqlite::Error::QueryReturnedNoRows)
            .context("Failed to get URL record");
        let unified: Error = err.into();
        assert!(matches!(unified, Error::Store(_)));
        assert_eq!(unified.category(), ErrorCategory::Storage);
        assert!(unified.is_recoverable());
    }

    #[test]
    fn test_other_error() {
        let err = Error::other("Something went wrong");
        assert_eq!(err.category(), ErrorCategory::Other);
        assert_eq!(ErrorCategory::Other.as_str(), "other");
    }
}
