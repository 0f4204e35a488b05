//! # Error Handling
//!
//! A single error enum covers every failure mode of the persistence engine.
//! The variants map onto the caller-facing taxonomy:
//!
//! | Variant | Caller expectation |
//! |---------|--------------------|
//! | `DuplicateCommit` | The identical commit is already durable; treat as success |
//! | `Concurrency` | Another writer claimed the sequence; re-read and rebase |
//! | `Storage` | Opaque backend failure; retry after delay |
//! | `InvalidCommit` | Structural precondition violated; do not retry |
//! | `Serialization` | Payload translation failed; do not retry |
//! | `Shutdown` | The async handle was closed before the request completed |
//!
//! Backend exceptions from queries translate uniformly to `Storage`.
//! Stream-head maintenance failures never reach the caller at all; they are
//! logged and swallowed by the maintainer.

use thiserror::Error;

use crate::types::{CommitId, StreamId};

// =============================================================================
// Error Type
// =============================================================================

/// All errors surfaced by engine operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A commit with the same `(stream_id, commit_sequence)` key but a
    /// different commit id already exists: another writer got there first.
    ///
    /// The caller holds a stale view of the stream; it must re-read the
    /// stream, rebase its changes, and retry with the next free sequence.
    #[error("concurrency conflict on stream {stream_id} at sequence {commit_sequence}: a competing commit is already persisted")]
    Concurrency {
        /// The stream on which the collision happened.
        stream_id: StreamId,
        /// The contested commit sequence.
        commit_sequence: u64,
    },

    /// The identical commit (same commit id) is already durable in the log.
    ///
    /// Raised on transport-level retries of an append that in fact
    /// succeeded. The log holds exactly one copy; the retry changed nothing.
    #[error("duplicate commit {commit_id}: already persisted")]
    DuplicateCommit {
        /// The commit id that is already in the log.
        commit_id: CommitId,
    },

    /// The storage backend failed.
    ///
    /// Wraps any driver error not classified as a concurrency or duplicate
    /// condition: locked database file, full disk, corruption, malformed
    /// statement. Opaque to callers; retrying after a delay may succeed.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// An append attempt violated a structural precondition: nil ids, a
    /// zero sequence, no events, or a revision span that cannot cover the
    /// event count.
    #[error("invalid commit: {0}")]
    InvalidCommit(String),

    /// The serializer port failed to translate a payload.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The async store handle was shut down before the request completed.
    #[error("event store is shut down")]
    Shutdown,
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// A `Result` alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CommitId, StreamId};

    #[test]
    fn test_error_display() {
        let stream_id = StreamId::random();
        let conflict = Error::Concurrency {
            stream_id,
            commit_sequence: 2,
        };
        assert_eq!(
            conflict.to_string(),
            format!(
                "concurrency conflict on stream {stream_id} at sequence 2: a competing commit is already persisted"
            )
        );

        let commit_id = CommitId::random();
        let duplicate = Error::DuplicateCommit { commit_id };
        assert_eq!(
            duplicate.to_string(),
            format!("duplicate commit {commit_id}: already persisted")
        );

        let invalid = Error::InvalidCommit("no events".to_string());
        assert_eq!(invalid.to_string(), "invalid commit: no events");
    }

    #[test]
    fn test_sqlite_error_converts_to_storage() {
        let sqlite_err = rusqlite::Error::InvalidParameterName("test".to_string());
        let err: Error = sqlite_err.into();
        assert!(matches!(err, Error::Storage(_)));
        assert!(err.to_string().contains("storage error"));
    }
}
