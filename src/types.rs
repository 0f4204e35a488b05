//! # Domain Types
//!
//! The entities of the commit log: streams, commits, snapshots, and stream
//! heads, plus the newtypes that keep their identifiers and counters from
//! being mixed up.
//!
//! ## Invariants
//!
//! These types encode the core invariants of the log:
//!
//! - [`CommitSequence`]: 1-based, contiguous per stream, no gaps
//! - [`StreamRevision`]: 1-based, strictly increasing per stream; 0 is the
//!   "none" sentinel (no snapshot, empty stream)
//! - [`Commit`]: immutable once persisted, except the monotonic
//!   false→true `dispatched` transition
//! - A commit's event count always equals
//!   `stream_revision - starting_revision + 1`

use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

// =============================================================================
// Identifiers
// =============================================================================

/// Identifies one event stream.
///
/// Opaque 128-bit value; the engine never interprets it beyond equality and
/// key ordering. Stored as a 16-byte blob by the relational backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StreamId(Uuid);

impl StreamId {
    /// Creates a stream id from an existing uuid.
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    /// Generates a fresh random stream id.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying uuid.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// True for the all-zero uuid, which is never a valid stream id.
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for StreamId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// Identifies one commit.
///
/// Client-generated and globally unique. Two commit attempts carrying the
/// same `CommitId` are the same logical append; the engine uses this to tell
/// an idempotent retry apart from a genuine concurrency conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CommitId(Uuid);

impl CommitId {
    /// Creates a commit id from an existing uuid.
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    /// Generates a fresh random commit id.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying uuid.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// True for the all-zero uuid, which is never a valid commit id.
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for CommitId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

// =============================================================================
// Sequences, Revisions, Stamps
// =============================================================================

/// The n-th commit on a stream, 1-based.
///
/// For any stream the persisted sequences form a contiguous `1..N` run in
/// insertion order; `(stream_id, commit_sequence)` is the commit key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CommitSequence(u64);

impl CommitSequence {
    /// The first sequence on any stream (1).
    pub const FIRST: CommitSequence = CommitSequence(1);

    /// Creates a sequence from a raw value.
    pub fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    pub fn as_raw(&self) -> u64 {
        self.0
    }

    /// Returns the next sequence.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for CommitSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A revision number within a stream, 1-based.
///
/// The revision after applying a commit's events is the commit's
/// `stream_revision`; 0 is the sentinel meaning "none" (an empty stream, or
/// a stream with no snapshot yet).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StreamRevision(u64);

impl StreamRevision {
    /// Sentinel meaning "no revision".
    pub const NONE: StreamRevision = StreamRevision(0);

    /// The first revision in a stream (1).
    pub const FIRST: StreamRevision = StreamRevision(1);

    /// Creates a revision from a raw value.
    pub fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    pub fn as_raw(&self) -> u64 {
        self.0
    }

    /// Adds an offset to this revision.
    pub fn add(&self, count: u64) -> Self {
        Self(self.0 + count)
    }

    /// True if this is the "none" sentinel.
    pub fn is_none(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for StreamRevision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            write!(f, "none")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Wall-clock instant of an append, in milliseconds since the Unix epoch.
///
/// Stamps give a best-effort temporal order across streams; within a stream
/// the authoritative order is [`CommitSequence`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CommitStamp(u64);

impl CommitStamp {
    /// The current wall-clock instant.
    pub fn now() -> Self {
        let ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self(ms)
    }

    /// Creates a stamp from raw epoch milliseconds.
    pub fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    /// Returns the raw epoch milliseconds.
    pub fn as_millis(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CommitStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

// =============================================================================
// Events and Headers
// =============================================================================

/// Header metadata attached to a commit, serialized as one opaque blob.
pub type Headers = BTreeMap<String, serde_json::Value>;

/// One event record inside a commit.
///
/// The engine never inspects the body; it is bytes in whatever format the
/// producing side chose. The optional `event_type` tag and `metadata` travel
/// with the body through the serializer port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventData {
    /// Optional classification tag (e.g. "OrderPlaced").
    pub event_type: Option<String>,

    /// The event payload bytes.
    pub body: Vec<u8>,

    /// Optional side-channel bytes (correlation ids, causation ids, ...).
    pub metadata: Option<Vec<u8>>,
}

impl EventData {
    /// Creates an event with just a body.
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            event_type: None,
            body: body.into(),
            metadata: None,
        }
    }

    /// Creates an event with a type tag.
    pub fn with_type(event_type: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            event_type: Some(event_type.into()),
            body: body.into(),
            metadata: None,
        }
    }

    /// Attaches metadata to this event.
    pub fn with_metadata(mut self, metadata: impl Into<Vec<u8>>) -> Self {
        self.metadata = Some(metadata.into());
        self
    }
}

// =============================================================================
// Commit
// =============================================================================

/// An immutable append of one or more events to a single stream.
///
/// A fully-formed commit is built by the caller (including its id and
/// sequence) and handed to the engine; on success it is durable in the log
/// and never changes again, apart from the `dispatched` flag flipping
/// false→true once the external publisher has taken it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    /// The stream this commit appends to.
    pub stream_id: StreamId,

    /// Client-generated, globally unique commit identity.
    pub commit_id: CommitId,

    /// The n-th commit on this stream.
    pub commit_sequence: CommitSequence,

    /// The stream revision after applying this commit's events.
    pub stream_revision: StreamRevision,

    /// Wall-clock instant at append time.
    pub commit_stamp: CommitStamp,

    /// Header metadata, serialized as one blob.
    pub headers: Headers,

    /// The events, in order, serialized as one blob.
    pub events: Vec<EventData>,

    /// Whether the external publisher has taken this commit. Monotonic.
    pub dispatched: bool,
}

impl Commit {
    /// Builds a commit attempt stamped with the current wall-clock time and
    /// `dispatched = false`.
    pub fn new(
        stream_id: StreamId,
        commit_id: CommitId,
        commit_sequence: CommitSequence,
        stream_revision: StreamRevision,
        headers: Headers,
        events: Vec<EventData>,
    ) -> Self {
        Self {
            stream_id,
            commit_id,
            commit_sequence,
            stream_revision,
            commit_stamp: CommitStamp::now(),
            headers,
            events,
            dispatched: false,
        }
    }

    /// The revision immediately after the previous commit on this stream.
    ///
    /// Always `stream_revision - event_count + 1`; for a valid commit this
    /// is ≥ 1.
    pub fn starting_revision(&self) -> StreamRevision {
        let span = self.events.len().saturating_sub(1) as u64;
        StreamRevision::from_raw(self.stream_revision.as_raw().saturating_sub(span))
    }

    /// Number of events carried by this commit.
    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// Checks the structural preconditions of an append attempt.
    ///
    /// Violations are programming errors on the calling side, not transient
    /// storage conditions; retrying an invalid commit cannot succeed.
    pub fn validate(&self) -> Result<()> {
        if self.stream_id.is_nil() {
            return Err(Error::InvalidCommit("stream id must not be nil".into()));
        }
        if self.commit_id.is_nil() {
            return Err(Error::InvalidCommit("commit id must not be nil".into()));
        }
        if self.commit_sequence.as_raw() < 1 {
            return Err(Error::InvalidCommit(format!(
                "commit sequence must be >= 1, got {}",
                self.commit_sequence
            )));
        }
        if self.events.is_empty() {
            return Err(Error::InvalidCommit(
                "a commit must carry at least one event".into(),
            ));
        }
        if self.stream_revision.as_raw() < self.events.len() as u64 {
            return Err(Error::InvalidCommit(format!(
                "stream revision {} cannot cover {} events",
                self.stream_revision,
                self.events.len()
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Snapshot
// =============================================================================

/// A materialised view of a stream's state at a specific revision.
///
/// `(stream_id, stream_revision)` is the snapshot key; multiple snapshots
/// per stream are allowed and the latest at or below a target revision wins
/// on lookup. The payload is opaque serialized bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// The stream this snapshot summarizes.
    pub stream_id: StreamId,

    /// The revision at which the state was captured.
    pub stream_revision: StreamRevision,

    /// Opaque serialized state bytes.
    pub payload: Vec<u8>,
}

impl Snapshot {
    /// Creates a snapshot value.
    pub fn new(
        stream_id: StreamId,
        stream_revision: StreamRevision,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            stream_id,
            stream_revision,
            payload: payload.into(),
        }
    }
}

// =============================================================================
// Stream Head
// =============================================================================

/// Best-effort per-stream summary: latest committed revision and latest
/// snapshot revision.
///
/// Heads are derived from the commit log by a background maintainer and may
/// lag it. They exist to answer "which streams are overdue for a snapshot";
/// they must never be used for concurrency checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamHead {
    /// The stream this head summarizes.
    pub stream_id: StreamId,

    /// Highest committed stream revision the maintainer has seen.
    pub head_revision: StreamRevision,

    /// Highest snapshot revision the maintainer has seen; `NONE` if the
    /// stream has never been snapshotted.
    pub snapshot_revision: StreamRevision,
}

impl StreamHead {
    /// Creates a stream head value.
    pub fn new(
        stream_id: StreamId,
        head_revision: StreamRevision,
        snapshot_revision: StreamRevision,
    ) -> Self {
        Self {
            stream_id,
            head_revision,
            snapshot_revision,
        }
    }

    /// How many revisions the stream has advanced past its latest snapshot.
    pub fn snapshot_age(&self) -> u64 {
        self.head_revision
            .as_raw()
            .saturating_sub(self.snapshot_revision.as_raw())
    }
}

// =============================================================================
// Tests
// =============================================================================
