//! Unified error type for the weft container runtime
//!
//! One enum, one variant per taxonomy bucket. Fatal buckets (corruption,
//! processing, internal consistency) propagate to the outer runtime, which
//! decides whether to close the container; the rest are returned to the
//! caller or swallowed with telemetry.

use serde::{Deserialize, Serialize};

/// Result alias used across the workspace.
pub type WeftResult<T> = Result<T, WeftError>;

/// Unified error type for channel collection operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
pub enum WeftError {
    /// The container's persisted or sequenced data is corrupt. Fatal.
    #[error("Data corruption: {message}")]
    DataCorruption {
        /// What was corrupt.
        message: String,
    },

    /// Processing an inbound message failed. Fatal to processing.
    #[error("Data processing error: {message}")]
    DataProcessing {
        /// What failed.
        message: String,
    },

    /// A programmer-error invariant was violated. Assert-like.
    #[error("Internal consistency violation: {message}")]
    InternalConsistency {
        /// The violated invariant.
        message: String,
    },

    /// The caller passed something invalid. Returned, never fatal.
    #[error("Usage error: {message}")]
    Usage {
        /// What was invalid.
        message: String,
    },

    /// A request addressed a nonexistent or deleted store. 404-shaped.
    #[error("Not found: {url}")]
    NotFound {
        /// The requested url.
        url: String,
    },

    /// A recoverable condition, swallowed with telemetry.
    #[error("Transient: {message}")]
    Transient {
        /// What happened.
        message: String,
    },
}

impl WeftError {
    /// Create a data corruption error
    pub fn data_corruption(message: impl Into<String>) -> Self {
        Self::DataCorruption {
            message: message.into(),
        }
    }

    /// Create a data processing error
    pub fn data_processing(message: impl Into<String>) -> Self {
        Self::DataProcessing {
            message: message.into(),
        }
    }

    /// Create an internal consistency error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::InternalConsistency {
            message: message.into(),
        }
    }

    /// Create a usage error
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage {
            message: message.into(),
        }
    }

    /// Create a 404-shaped not-found error
    pub fn not_found(url: impl Into<String>) -> Self {
        Self::NotFound { url: url.into() }
    }

    /// Create a transient error
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    /// Whether this error must propagate to the outer runtime.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::DataCorruption { .. }
                | Self::DataProcessing { .. }
                | Self::InternalConsistency { .. }
        )
    }

    /// Whether this error is swallowed with telemetry only.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Error category as a stable string, for telemetry.
    pub fn category(&self) -> &'static str {
        match self {
            Self::DataCorruption { .. } => "dataCorruption",
            Self::DataProcessing { .. } => "dataProcessing",
            Self::InternalConsistency { .. } => "internalConsistency",
            Self::Usage { .. } => "usage",
            Self::NotFound { .. } => "notFound",
            Self::Transient { .. } => "transient",
        }
    }
}
