//! # Storage Dialect
//!
//! Parameterises the relational engine over a concrete SQL flavor. The
//! dialect supplies the storage-initialization batch and the parameterised
//! statement for each engine operation; the engine supplies parameter values
//! and row mapping. Statement and parameter lifetimes ride on RAII: a
//! prepared statement, its bound parameters, and the operation's connection
//! guard release in reverse acquisition order as they drop.
//!
//! ## Schema Overview (SQLite flavor)
//!
//! ```text
//!  commits                        snapshots              stream_heads
//!  ┌─────────────────────┐        ┌──────────────────┐   ┌───────────────────┐
//!  │ stream_id        PK─┤        │ stream_id     PK─┤   │ stream_id      PK │
//!  │ commit_sequence  PK─┤        │ stream_revision ─┤   │ head_revision     │
//!  │ commit_id    UNIQUE │        │ payload BLOB     │   │ snapshot_revision │
//!  │ stream_revision  U* │        └──────────────────┘   └───────────────────┘
//!  │ starting_revision   │        * unique per stream
//!  │ commit_stamp        │
//!  │ headers BLOB        │
//!  │ events  BLOB        │
//!  │ dispatched          │
//!  └─────────────────────┘
//! ```
//!
//! The commit table carries three uniqueness guarantees (the
//! `(stream_id, commit_sequence)` primary key, `(stream_id,
//! stream_revision)`, and the global `commit_id`), so optimistic concurrency
//! needs nothing beyond constraint violations.

// =============================================================================
// Dialect Trait
// =============================================================================

/// SQL statements for each engine operation.
///
/// Positional parameters, in the order the engine binds them, are listed on
/// each method.
pub trait SqlDialect: Send + Sync + 'static {
    /// DDL batch executed by `initialize()`. Every statement tolerates
    /// "already exists"; running the batch repeatedly is success.
    fn initialize_storage(&self) -> &[&str];

    /// Inserts one commit row.
    /// Params: stream_id, commit_id, commit_sequence, starting_revision,
    /// stream_revision, commit_stamp, headers, events, dispatched.
    fn persist_commit(&self) -> &str;

    /// Reads back the commit id at a `(stream_id, commit_sequence)` key.
    /// Params: stream_id, commit_sequence.
    fn get_commit_id_at_sequence(&self) -> &str;

    /// Counts rows carrying a commit id.
    /// Params: commit_id.
    fn commit_id_exists(&self) -> &str;

    /// Commits on one stream whose revision span intersects a window,
    /// ascending by sequence.
    /// Params: stream_id, min_revision, max_revision.
    fn get_commits_in_range(&self) -> &str;

    /// Commits across all streams stamped at or after an instant, ascending
    /// by stamp (ties broken stably by insertion order).
    /// Params: commit_stamp.
    fn get_commits_from_stamp(&self) -> &str;

    /// All commits still awaiting dispatch, ascending by stamp.
    fn get_undispatched_commits(&self) -> &str;

    /// Flips the dispatched flag to true.
    /// Params: stream_id, commit_sequence.
    fn mark_commit_as_dispatched(&self) -> &str;

    /// Latest snapshot at or below a revision.
    /// Params: stream_id, max_revision.
    fn get_snapshot(&self) -> &str;

    /// Inserts one snapshot row.
    /// Params: stream_id, stream_revision, payload.
    fn add_snapshot(&self) -> &str;

    /// Last-write-wins head upsert after a commit.
    /// Params: stream_id, head_revision.
    fn upsert_head_after_commit(&self) -> &str;

    /// Last-write-wins head upsert after a snapshot.
    /// Params: stream_id, snapshot_revision.
    fn upsert_head_after_snapshot(&self) -> &str;

    /// Heads whose snapshot age reaches a threshold, oldest first.
    /// Params: max_threshold.
    fn get_streams_to_snapshot(&self) -> &str;

    /// Statements that drop all persisted state, in execution order.
    fn purge_storage(&self) -> &[&str];
}

// =============================================================================
// SQLite DDL
// =============================================================================

/// The commit log. One row per commit; headers and events are opaque blobs
/// produced by the serializer port.
///
/// `starting_revision` is denormalized so revision-window queries never
/// decode the event blob.
const CREATE_COMMITS: &str = r#"
CREATE TABLE IF NOT EXISTS commits (
    stream_id         BLOB NOT NULL,
    commit_id         BLOB NOT NULL,
    commit_sequence   INTEGER NOT NULL,
    starting_revision INTEGER NOT NULL,
    stream_revision   INTEGER NOT NULL,
    commit_stamp      INTEGER NOT NULL,
    headers           BLOB NOT NULL,
    events            BLOB NOT NULL,
    dispatched        INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (stream_id, commit_sequence)
)
"#;

/// Unique guard against two commits claiming the same revision on a stream.
const CREATE_COMMITS_STREAM_REVISION: &str = r#"
CREATE UNIQUE INDEX IF NOT EXISTS commits_stream_revision
ON commits(stream_id, stream_revision)
"#;

/// Global commit-id uniqueness; the key for duplicate-retry detection.
const CREATE_COMMITS_COMMIT_ID: &str = r#"
CREATE UNIQUE INDEX IF NOT EXISTS commits_commit_id
ON commits(commit_id)
"#;

/// Temporal scans (`get_from_stamp`).
const CREATE_COMMITS_STAMP: &str = r#"
CREATE INDEX IF NOT EXISTS commits_stamp
ON commits(commit_stamp)
"#;

/// Dispatch scans; the stamp column keeps the scan in output order.
const CREATE_COMMITS_DISPATCHED: &str = r#"
CREATE INDEX IF NOT EXISTS commits_dispatched
ON commits(dispatched, commit_stamp)
"#;

/// Revision-window intersection (`get_from`).
const CREATE_COMMITS_REVISION_RANGE: &str = r#"
CREATE INDEX IF NOT EXISTS commits_revision_range
ON commits(stream_id, starting_revision, stream_revision)
"#;

/// Snapshots. `(stream_id, stream_revision)` is the snapshot key; multiple
/// snapshots per stream are expected.
const CREATE_SNAPSHOTS: &str = r#"
CREATE TABLE IF NOT EXISTS snapshots (
    stream_id       BLOB NOT NULL,
    stream_revision INTEGER NOT NULL,
    payload         BLOB NOT NULL,
    PRIMARY KEY (stream_id, stream_revision)
)
"#;

/// Descending scan for "latest snapshot at or below revision".
const CREATE_SNAPSHOTS_LATEST: &str = r#"
CREATE INDEX IF NOT EXISTS snapshots_latest
ON snapshots(stream_id, stream_revision DESC)
"#;

/// Best-effort stream heads, maintained by the background worker.
const CREATE_STREAM_HEADS: &str = r#"
CREATE TABLE IF NOT EXISTS stream_heads (
    stream_id         BLOB PRIMARY KEY,
    head_revision     INTEGER NOT NULL,
    snapshot_revision INTEGER NOT NULL DEFAULT 0
)
"#;

/// Expression index over snapshot age for `get_streams_to_snapshot`.
const CREATE_STREAM_HEADS_SNAPSHOT_AGE: &str = r#"
CREATE INDEX IF NOT EXISTS stream_heads_snapshot_age
ON stream_heads(head_revision - snapshot_revision)
"#;

const INITIALIZE_STORAGE: &[&str] = &[
    CREATE_COMMITS,
    CREATE_COMMITS_STREAM_REVISION,
    CREATE_COMMITS_COMMIT_ID,
    CREATE_COMMITS_STAMP,
    CREATE_COMMITS_DISPATCHED,
    CREATE_COMMITS_REVISION_RANGE,
    CREATE_SNAPSHOTS,
    CREATE_SNAPSHOTS_LATEST,
    CREATE_STREAM_HEADS,
    CREATE_STREAM_HEADS_SNAPSHOT_AGE,
];

// =============================================================================
// SQLite DML
// =============================================================================

const PERSIST_COMMIT: &str = r#"
INSERT INTO commits (stream_id, commit_id, commit_sequence, starting_revision,
                     stream_revision, commit_stamp, headers, events, dispatched)
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
"#;

const GET_COMMIT_ID_AT_SEQUENCE: &str = r#"
SELECT commit_id FROM commits WHERE stream_id = ? AND commit_sequence = ?
"#;

const COMMIT_ID_EXISTS: &str = r#"
SELECT COUNT(*) FROM commits WHERE commit_id = ?
"#;

const GET_COMMITS_IN_RANGE: &str = r#"
SELECT stream_id, commit_id, commit_sequence, starting_revision,
       stream_revision, commit_stamp, headers, events, dispatched
FROM commits
WHERE stream_id = ? AND stream_revision >= ? AND starting_revision <= ?
ORDER BY commit_sequence
"#;

const GET_COMMITS_FROM_STAMP: &str = r#"
SELECT stream_id, commit_id, commit_sequence, starting_revision,
       stream_revision, commit_stamp, headers, events, dispatched
FROM commits
WHERE commit_stamp >= ?
ORDER BY commit_stamp, rowid
"#;

const GET_UNDISPATCHED_COMMITS: &str = r#"
SELECT stream_id, commit_id, commit_sequence, starting_revision,
       stream_revision, commit_stamp, headers, events, dispatched
FROM commits
WHERE dispatched = 0
ORDER BY commit_stamp, rowid
"#;

const MARK_COMMIT_AS_DISPATCHED: &str = r#"
UPDATE commits SET dispatched = 1 WHERE stream_id = ? AND commit_sequence = ?
"#;

const GET_SNAPSHOT: &str = r#"
SELECT stream_revision, payload
FROM snapshots
WHERE stream_id = ? AND stream_revision <= ?
ORDER BY stream_revision DESC
LIMIT 1
"#;

const ADD_SNAPSHOT: &str = r#"
INSERT INTO snapshots (stream_id, stream_revision, payload) VALUES (?, ?, ?)
"#;

const UPSERT_HEAD_AFTER_COMMIT: &str = r#"
INSERT INTO stream_heads (stream_id, head_revision, snapshot_revision)
VALUES (?, ?, 0)
ON CONFLICT(stream_id) DO UPDATE SET head_revision = excluded.head_revision
"#;

const UPSERT_HEAD_AFTER_SNAPSHOT: &str = r#"
INSERT INTO stream_heads (stream_id, head_revision, snapshot_revision)
VALUES (?, 0, ?)
ON CONFLICT(stream_id) DO UPDATE SET snapshot_revision = excluded.snapshot_revision
"#;

const GET_STREAMS_TO_SNAPSHOT: &str = r#"
SELECT stream_id, head_revision, snapshot_revision
FROM stream_heads
WHERE head_revision - snapshot_revision >= ?
ORDER BY head_revision - snapshot_revision DESC
"#;

const PURGE_STORAGE: &[&str] = &[
    "DELETE FROM commits",
    "DELETE FROM snapshots",
    "DELETE FROM stream_heads",
];

// =============================================================================
// SQLite Dialect
// =============================================================================

/// The SQLite flavor of the storage dialect.
///
/// Single-statement writes are atomic in SQLite, so no statement opens an
/// explicit transaction; the operation-scoped connection guard is the whole
/// session.
#[derive(Debug, Default, Clone, Copy)]
pub struct SqliteDialect;

impl SqlDialect for SqliteDialect {
    fn initialize_storage(&self) -> &[&str] {
        INITIALIZE_STORAGE
    }

    fn persist_commit(&self) -> &str {
        PERSIST_COMMIT
    }

    fn get_commit_id_at_sequence(&self) -> &str {
        GET_COMMIT_ID_AT_SEQUENCE
    }

    fn commit_id_exists(&self) -> &str {
        COMMIT_ID_EXISTS
    }

    fn get_commits_in_range(&self) -> &str {
        GET_COMMITS_IN_RANGE
    }

    fn get_commits_from_stamp(&self) -> &str {
        GET_COMMITS_FROM_STAMP
    }

    fn get_undispatched_commits(&self) -> &str {
        GET_UNDISPATCHED_COMMITS
    }

    fn mark_commit_as_dispatched(&self) -> &str {
        MARK_COMMIT_AS_DISPATCHED
    }

    fn get_snapshot(&self) -> &str {
        GET_SNAPSHOT
    }

    fn add_snapshot(&self) -> &str {
        ADD_SNAPSHOT
    }

    fn upsert_head_after_commit(&self) -> &str {
        UPSERT_HEAD_AFTER_COMMIT
    }

    fn upsert_head_after_snapshot(&self) -> &str {
        UPSERT_HEAD_AFTER_SNAPSHOT
    }

    fn get_streams_to_snapshot(&self) -> &str {
        GET_STREAMS_TO_SNAPSHOT
    }

    fn purge_storage(&self) -> &[&str] {
        PURGE_STORAGE
    }
}

// =============================================================================
// Tests
// =============================================================================
