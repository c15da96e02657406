//! Typed error kinds for the snapshot search.
//!
//! Core modules (catalog, search) return `FixError` directly. Collaborators and the
//! session driver work with `anyhow::Result` and wrap these kinds, so callers can
//! `downcast_ref::<FixError>()` to tell "no good snapshot" apart from an I/O fault.

use thiserror::Error;

/// Result alias for core operations.
pub type FixResult<T> = std::result::Result<T, FixError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FixError {
    /// Identifier does not carry a `<prefix>-YYYYMMDD.HHMM[-suffix]` stamp.
    #[error("malformed snapshot identifier '{id}': {reason}")]
    MalformedIdentifier { id: String, reason: String },

    /// Input was non-empty but not a single identifier could be parsed.
    #[error("all {count} snapshot identifier(s) are malformed")]
    AllMalformed { count: usize },

    #[error("snapshot catalog is empty")]
    EmptyCatalog,

    /// Search walked the whole catalog without a good snapshot.
    #[error("no good snapshot found after {probes} probe(s)")]
    NotFound { probes: usize },

    /// The oracle itself failed (sync, attach, signal). Not a BAD verdict.
    #[error("verification of '{snapshot}' failed after {attempts} attempt(s): {message}")]
    Verification {
        snapshot: String,
        attempts: u32,
        message: String,
    },

    #[error("remote unavailable: {0}")]
    RemoteUnavailable(String),

    /// `advance` called on an engine that already reached `Done`.
    #[error("search session already finished")]
    SessionFinished,

    #[error("invalid coarse step: {0}")]
    InvalidStep(String),
}
