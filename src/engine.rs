//! # Persistence Engine Contract
//!
//! The public surface of the commit log. Every backend implements this one
//! trait; callers never see a connection, a dialect, or a record shape.
//!
//! ## Contract
//!
//! - The commit log is the only authority. Snapshots and stream heads are
//!   derived data and may lag it.
//! - Optimistic concurrency is delegated to backend unique constraints; the
//!   engine holds no in-process coordination state and is callable from any
//!   number of threads.
//! - Every operation blocks the caller until the backend responds, except
//!   stream-head maintenance, which is fire-and-forget.

use crate::error::Result;
use crate::types::{Commit, CommitStamp, Snapshot, StreamHead, StreamId, StreamRevision};

/// The storage protocol of the commit log.
pub trait PersistenceEngine: Send + Sync {
    /// Ensures schema and indexes exist. Idempotent: "already exists" is
    /// success, and calling this repeatedly is harmless.
    fn initialize(&self) -> Result<()>;

    /// Appends one commit to the log.
    ///
    /// On success the commit is durable and a stream-head update has been
    /// enqueued (it may not be visible yet). On a key collision the engine
    /// discriminates by commit id:
    ///
    /// - same commit id already persisted → [`Error::DuplicateCommit`]
    ///   (an idempotent retry; the prior write stands),
    /// - different commit id at the same `(stream, sequence)` →
    ///   [`Error::Concurrency`] (another writer got there first).
    ///
    /// [`Error::DuplicateCommit`]: crate::error::Error::DuplicateCommit
    /// [`Error::Concurrency`]: crate::error::Error::Concurrency
    fn commit(&self, attempt: Commit) -> Result<()>;

    /// Commits on `stream_id` whose revision span
    /// `[starting_revision, stream_revision]` intersects
    /// `[min_revision, max_revision]`, ascending by commit sequence.
    fn get_from(
        &self,
        stream_id: StreamId,
        min_revision: StreamRevision,
        max_revision: StreamRevision,
    ) -> Result<Vec<Commit>>;

    /// All commits across all streams with `commit_stamp >= start`,
    /// ascending by stamp. The order among equal stamps is backend-defined
    /// but stable within one call.
    fn get_from_stamp(&self, start: CommitStamp) -> Result<Vec<Commit>>;

    /// All commits not yet handed to the external publisher, ascending by
    /// stamp. May return a commit whose dispatch is in flight; never omits
    /// one whose flag is still false at observation time.
    fn get_undispatched_commits(&self) -> Result<Vec<Commit>>;

    /// Monotonically sets `dispatched = true` on the identified commit.
    /// Idempotent: repeating the call succeeds and changes nothing.
    fn mark_commit_as_dispatched(&self, commit: &Commit) -> Result<()>;

    /// The snapshot with the greatest revision ≤ `max_revision` for the
    /// stream, or `None` if the stream has no snapshot in that range.
    fn get_snapshot(
        &self,
        stream_id: StreamId,
        max_revision: StreamRevision,
    ) -> Result<Option<Snapshot>>;

    /// Inserts a snapshot and enqueues a stream-head update.
    ///
    /// Returns `false` (never an error) when the backend rejects the write
    /// as a duplicate `(stream_id, stream_revision)` key.
    fn add_snapshot(&self, snapshot: Snapshot) -> Result<bool>;

    /// Stream heads whose snapshot age is at least `max_threshold`.
    /// Advisory: reads the best-effort head summary, which may lag the log.
    fn get_streams_to_snapshot(&self, max_threshold: u64) -> Result<Vec<StreamHead>>;

    /// Drops every commit, snapshot, and stream head. Intended for tests
    /// and operational resets.
    fn purge(&self) -> Result<()>;
}
