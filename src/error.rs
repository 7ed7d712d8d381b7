//! Error types for the index engine.
//!
//! A single hierarchical enum so callers can pattern-match on the error
//! kind rather than parsing strings. Mirrors the taxonomy the coordinator
//! uses to decide whether a failure is local to one file, aborts a batch,
//! or is an invariant violation.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type for all index-engine operations.
#[derive(Debug, Error)]
pub enum CodePlaneError {
    /// The ignore file or project config could not be parsed, or the state
    /// directory is not writable.
    #[error("configuration error: {details}")]
    Configuration {
        /// What's wrong with the configuration.
        details: String,
    },

    /// Discovery hit a manifest it couldn't parse, or a symlink cycle.
    /// Non-fatal: the affected context degrades rather than aborting.
    #[error("discovery error: {details}")]
    Discovery {
        /// Human-readable description.
        details: String,
    },

    /// A single file failed to parse. The rest of the batch is unaffected.
    #[error("parse error for {path}: {message}")]
    Parse {
        /// Path to the file that failed to parse.
        path: PathBuf,
        /// Human-readable error description.
        message: String,
    },

    /// The lexical store and structural store disagreed about which paths
    /// exist at open time. Handled by recovery; not normally surfaced.
    #[error("index consistency error: {details}")]
    IndexConsistency {
        /// Diagnostic details.
        details: String,
    },

    /// A write retried past its busy-timeout bound. The batch that produced
    /// this is aborted; the caller may retry.
    #[error("write contention: {details}")]
    Concurrency {
        /// Diagnostic details.
        details: String,
    },

    /// The requested entity (def, file, context) does not exist at the
    /// current epoch.
    #[error("not found: {entity}")]
    NotFound {
        /// Description of what was not found.
        entity: String,
    },

    /// A query parameter was malformed.
    #[error("invalid input: {details}")]
    InvalidInput {
        /// What's wrong with the input.
        details: String,
    },

    /// The operation's deadline was exceeded, or the caller disconnected.
    #[error("cancelled: {reason}")]
    Cancelled {
        /// Why the operation was cancelled.
        reason: String,
    },

    /// An invariant was violated. Should not occur; signals a bug.
    #[error("internal error: {0}")]
    Internal(String),

    /// SQLite error from the structural store.
    #[error("structural store error: {0}")]
    Structural(#[from] rusqlite::Error),

    /// Tantivy error from the lexical store.
    #[error("lexical store error: {0}")]
    Lexical(#[from] tantivy::TantivyError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience type alias for Results in this crate.
pub type CodePlaneResult<T> = Result<T, CodePlaneError>;
