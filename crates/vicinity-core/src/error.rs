//! Error types for Vicinity.
//!
//! This module provides a unified error type for all Vicinity operations.
//! Validation happens at API boundaries; I/O and invariant violations are
//! never swallowed.

use thiserror::Error;

/// Result type alias for Vicinity operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Vicinity operations.
///
/// Each variant includes a descriptive error message suitable for end-users.
/// Error codes follow the pattern `VCN-XXX` for easy debugging.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid argument (VCN-001).
    ///
    /// Null/empty/out-of-range inputs: empty vectors, `k <= 0`, `r <= 0`.
    #[error("[VCN-001] Invalid argument: {0}")]
    InvalidArgument(String),

    /// Dimension mismatch (VCN-002).
    #[error("[VCN-002] Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected dimension.
        expected: usize,
        /// Actual dimension.
        actual: usize,
    },

    /// Invalid file format (VCN-003).
    ///
    /// Bad file version or corrupt entry. Loading refuses to continue.
    #[error("[VCN-003] Invalid format: {0}")]
    InvalidFormat(String),

    /// Unsupported operation (VCN-004).
    ///
    /// Algorithm/operation combination that no index implements, e.g. a
    /// range query against the LSH index.
    #[error("[VCN-004] Unsupported operation: {0}")]
    Unsupported(String),

    /// IO error (VCN-005).
    #[error("[VCN-005] IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation cancelled (VCN-006).
    ///
    /// An async build/save/load observed its cancellation token. Partially
    /// built state is consistent but must be treated as "no index built".
    #[error("[VCN-006] Operation cancelled: {0}")]
    Cancelled(String),

    /// Embedding generation failed (VCN-007).
    #[error("[VCN-007] Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    /// Configuration error (VCN-008).
    #[error("[VCN-008] Configuration error: {0}")]
    Config(String),

    /// Serialization error (VCN-009).
    #[error("[VCN-009] Serialization error: {0}")]
    Serialization(String),

    /// Internal error (VCN-010).
    ///
    /// Indicates an unexpected internal error. Please report if encountered.
    #[error("[VCN-010] Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns the error code (e.g., "VCN-001").
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "VCN-001",
            Self::DimensionMismatch { .. } => "VCN-002",
            Self::InvalidFormat(_) => "VCN-003",
            Self::Unsupported(_) => "VCN-004",
            Self::Io(_) => "VCN-005",
            Self::Cancelled(_) => "VCN-006",
            Self::EmbeddingFailed(_) => "VCN-007",
            Self::Config(_) => "VCN-008",
            Self::Serialization(_) => "VCN-009",
            Self::Internal(_) => "VCN-010",
        }
    }

    /// Returns true if this error is recoverable.
    ///
    /// Non-recoverable errors include corrupt files and internal errors.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        !matches!(self, Self::InvalidFormat(_) | Self::Internal(_))
    }
}
