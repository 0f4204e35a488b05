//! # SQLite Persistence Engine
//!
//! The relational implementation of the engine contract, parameterised by a
//! [`SqlDialect`]. All coordination is delegated to the schema's unique
//! constraints; the engine itself holds no mutable state beyond the
//! connection.
//!
//! ## Sessions
//!
//! Every operation acquires the connection mutex for exactly its own
//! duration. The guard is the operation-scoped session: it is released on
//! every exit path (success, backend error, translation error) because it is
//! a stack value, and prepared statements drop before it does. Writes are
//! single statements, atomic in SQLite without an explicit transaction.
//!
//! ## Concurrency discrimination
//!
//! An insert that trips a uniqueness constraint is classified by reading
//! back the log, never by inspecting the constraint name: the commit id at
//! the contested `(stream, sequence)` key decides between an idempotent
//! retry and a genuine conflict.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;
use uuid::Uuid;

use crate::dialect::{SqlDialect, SqliteDialect};
use crate::engine::PersistenceEngine;
use crate::error::{Error, Result};
use crate::heads::{HeadMaintainer, HeadStore, HeadUpdate};
use crate::records::CommitRecord;
use crate::serializer::{JsonSerializer, Serializer};
use crate::types::{
    Commit, CommitId, CommitStamp, Snapshot, StreamHead, StreamId, StreamRevision,
};

// =============================================================================
// Helpers
// =============================================================================

/// Clamps a u64 counter into SQLite's signed integer domain.
///
/// Revisions near `u64::MAX` only appear as "unbounded" query arguments, so
/// saturating at `i64::MAX` preserves the query's meaning.
fn to_sql_u64(value: u64) -> i64 {
    value.min(i64::MAX as u64) as i64
}

/// True when the driver reports a uniqueness/constraint violation.
fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// Maps one commit row into its persisted record shape.
///
/// Column order is fixed by the dialect's SELECT statements.
fn record_from_row(row: &Row<'_>) -> rusqlite::Result<CommitRecord> {
    Ok(CommitRecord {
        stream_id: StreamId::new(row.get::<_, Uuid>(0)?),
        commit_id: CommitId::new(row.get::<_, Uuid>(1)?),
        commit_sequence: row.get::<_, i64>(2)? as u64,
        starting_revision: row.get::<_, i64>(3)? as u64,
        stream_revision: row.get::<_, i64>(4)? as u64,
        commit_stamp: CommitStamp::from_millis(row.get::<_, i64>(5)? as u64),
        headers: row.get(6)?,
        events: row.get(7)?,
        dispatched: row.get::<_, i64>(8)? != 0,
    })
}

// =============================================================================
// Engine
// =============================================================================

struct SqliteInner {
    conn: Mutex<Connection>,
    dialect: Box<dyn SqlDialect>,
    serializer: Box<dyn Serializer>,
}

/// The relational persistence engine.
///
/// Owns its connection for its lifetime; dropping the engine joins the
/// stream-head worker and closes the connection exactly once.
pub struct SqliteEngine {
    inner: Arc<SqliteInner>,
    heads: HeadMaintainer,
}

impl SqliteEngine {
    /// Opens (creating if necessary) a database file and initializes the
    /// schema, with the default dialect and JSON serializer.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn, Box::new(SqliteDialect), Box::new(JsonSerializer))
    }

    /// Opens an in-memory database. State lives as long as the engine.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, Box::new(SqliteDialect), Box::new(JsonSerializer))
    }

    /// Builds an engine over an existing connection with explicit dialect
    /// and serializer choices, and initializes the schema.
    pub fn from_connection(
        conn: Connection,
        dialect: Box<dyn SqlDialect>,
        serializer: Box<dyn Serializer>,
    ) -> Result<Self> {
        // WAL keeps readers off the writer's back; NORMAL syncs the WAL on
        // commit but not on every write.
        conn.execute_batch("PRAGMA journal_mode = WAL")?;
        conn.execute_batch("PRAGMA synchronous = NORMAL")?;

        let inner = Arc::new(SqliteInner {
            conn: Mutex::new(conn),
            dialect,
            serializer,
        });
        let head_store: Arc<dyn HeadStore> = inner.clone();
        let heads = HeadMaintainer::spawn(head_store);
        let engine = Self { inner, heads };
        engine.initialize()?;
        Ok(engine)
    }

    /// Blocks until every enqueued stream-head update has been applied.
    ///
    /// The engine never needs this itself; tests and shutdown paths use it
    /// to wait for head quiescence.
    pub fn flush_heads(&self) -> Result<()> {
        self.heads.flush()
    }

    /// Classifies a constraint violation raised by a commit insert.
    fn classify_collision(&self, attempt: &Commit) -> Error {
        let conn = self.inner.conn.lock();

        let existing: std::result::Result<Option<Uuid>, rusqlite::Error> = conn
            .query_row(
                self.inner.dialect.get_commit_id_at_sequence(),
                params![
                    attempt.stream_id.as_uuid(),
                    to_sql_u64(attempt.commit_sequence.as_raw())
                ],
                |row| row.get(0),
            )
            .optional();

        match existing {
            Ok(Some(commit_id)) if commit_id == attempt.commit_id.as_uuid() => {
                Error::DuplicateCommit {
                    commit_id: attempt.commit_id,
                }
            }
            Ok(Some(_)) => Error::Concurrency {
                stream_id: attempt.stream_id,
                commit_sequence: attempt.commit_sequence.as_raw(),
            },
            Ok(None) => {
                // The violation hit the commit-id or stream-revision
                // constraint instead of the commit key.
                let duplicate: std::result::Result<i64, rusqlite::Error> = conn.query_row(
                    self.inner.dialect.commit_id_exists(),
                    params![attempt.commit_id.as_uuid()],
                    |row| row.get(0),
                );
                match duplicate {
                    Ok(count) if count > 0 => Error::DuplicateCommit {
                        commit_id: attempt.commit_id,
                    },
                    Ok(_) => Error::Concurrency {
                        stream_id: attempt.stream_id,
                        commit_sequence: attempt.commit_sequence.as_raw(),
                    },
                    Err(err) => Error::Storage(err),
                }
            }
            Err(err) => Error::Storage(err),
        }
    }

    /// Runs a commit-returning query and inflates every row.
    fn query_commits(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<Commit>> {
        let records = {
            let conn = self.inner.conn.lock();
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt.query_map(params, record_from_row)?;
            rows.collect::<std::result::Result<Vec<_>, _>>()?
        };

        records
            .into_iter()
            .map(|record| record.into_commit(self.inner.serializer.as_ref()))
            .collect()
    }
}

impl PersistenceEngine for SqliteEngine {
    fn initialize(&self) -> Result<()> {
        let conn = self.inner.conn.lock();
        for statement in self.inner.dialect.initialize_storage() {
            conn.execute_batch(statement)?;
        }
        debug!("storage initialized");
        Ok(())
    }

    fn commit(&self, attempt: Commit) -> Result<()> {
        attempt.validate()?;
        let record = CommitRecord::from_commit(&attempt, self.inner.serializer.as_ref())?;

        let inserted = {
            let conn = self.inner.conn.lock();
            conn.execute(
                self.inner.dialect.persist_commit(),
                params![
                    record.stream_id.as_uuid(),
                    record.commit_id.as_uuid(),
                    to_sql_u64(record.commit_sequence),
                    to_sql_u64(record.starting_revision),
                    to_sql_u64(record.stream_revision),
                    to_sql_u64(record.commit_stamp.as_millis()),
                    record.headers,
                    record.events,
                    record.dispatched as i64,
                ],
            )
        };

        match inserted {
            Ok(_) => {
                self.heads.enqueue(HeadUpdate::Committed {
                    stream_id: attempt.stream_id,
                    head_revision: attempt.stream_revision,
                });
                Ok(())
            }
            Err(err) if is_constraint_violation(&err) => Err(self.classify_collision(&attempt)),
            Err(err) => Err(err.into()),
        }
    }

    fn get_from(
        &self,
        stream_id: StreamId,
        min_revision: StreamRevision,
        max_revision: StreamRevision,
    ) -> Result<Vec<Commit>> {
        self.query_commits(
            self.inner.dialect.get_commits_in_range(),
            &[
                &stream_id.as_uuid(),
                &to_sql_u64(min_revision.as_raw()),
                &to_sql_u64(max_revision.as_raw()),
            ],
        )
    }

    fn get_from_stamp(&self, start: CommitStamp) -> Result<Vec<Commit>> {
        self.query_commits(
            self.inner.dialect.get_commits_from_stamp(),
            &[&to_sql_u64(start.as_millis())],
        )
    }

    fn get_undispatched_commits(&self) -> Result<Vec<Commit>> {
        self.query_commits(self.inner.dialect.get_undispatched_commits(), &[])
    }

    fn mark_commit_as_dispatched(&self, commit: &Commit) -> Result<()> {
        let conn = self.inner.conn.lock();
        conn.execute(
            self.inner.dialect.mark_commit_as_dispatched(),
            params![
                commit.stream_id.as_uuid(),
                to_sql_u64(commit.commit_sequence.as_raw())
            ],
        )?;
        Ok(())
    }

    fn get_snapshot(
        &self,
        stream_id: StreamId,
        max_revision: StreamRevision,
    ) -> Result<Option<Snapshot>> {
        let conn = self.inner.conn.lock();
        let snapshot = conn
            .query_row(
                self.inner.dialect.get_snapshot(),
                params![stream_id.as_uuid(), to_sql_u64(max_revision.as_raw())],
                |row| {
                    let revision: i64 = row.get(0)?;
                    let payload: Vec<u8> = row.get(1)?;
                    Ok(Snapshot::new(
                        stream_id,
                        StreamRevision::from_raw(revision as u64),
                        payload,
                    ))
                },
            )
            .optional()?;
        Ok(snapshot)
    }

    fn add_snapshot(&self, snapshot: Snapshot) -> Result<bool> {
        let inserted = {
            let conn = self.inner.conn.lock();
            conn.execute(
                self.inner.dialect.add_snapshot(),
                params![
                    snapshot.stream_id.as_uuid(),
                    to_sql_u64(snapshot.stream_revision.as_raw()),
                    snapshot.payload,
                ],
            )
        };

        match inserted {
            Ok(_) => {
                self.heads.enqueue(HeadUpdate::Snapshotted {
                    stream_id: snapshot.stream_id,
                    snapshot_revision: snapshot.stream_revision,
                });
                Ok(true)
            }
            Err(err) if is_constraint_violation(&err) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    fn get_streams_to_snapshot(&self, max_threshold: u64) -> Result<Vec<StreamHead>> {
        let conn = self.inner.conn.lock();
        let mut stmt = conn.prepare(self.inner.dialect.get_streams_to_snapshot())?;
        let rows = stmt.query_map(params![to_sql_u64(max_threshold)], |row| {
            Ok(StreamHead::new(
                StreamId::new(row.get::<_, Uuid>(0)?),
                StreamRevision::from_raw(row.get::<_, i64>(1)? as u64),
                StreamRevision::from_raw(row.get::<_, i64>(2)? as u64),
            ))
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    fn purge(&self) -> Result<()> {
        let conn = self.inner.conn.lock();
        for statement in self.inner.dialect.purge_storage() {
            conn.execute(statement, [])?;
        }
        Ok(())
    }
}

impl HeadStore for SqliteInner {
    fn apply_head_update(&self, update: &HeadUpdate) -> Result<()> {
        let conn = self.conn.lock();
        match update {
            HeadUpdate::Committed {
                stream_id,
                head_revision,
            } => {
                conn.execute(
                    self.dialect.upsert_head_after_commit(),
                    params![stream_id.as_uuid(), to_sql_u64(head_revision.as_raw())],
                )?;
            }
            HeadUpdate::Snapshotted {
                stream_id,
                snapshot_revision,
            } => {
                conn.execute(
                    self.dialect.upsert_head_after_snapshot(),
                    params![stream_id.as_uuid(), to_sql_u64(snapshot_revision.as_raw())],
                )?;
            }
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CommitSequence, EventData, Headers};

    fn commit_attempt(
        stream_id: StreamId,
        commit_id: CommitId,
        sequence: u64,
        revision: u64,
        events: usize,
    ) -> Commit {
        Commit::new(
            stream_id,
            commit_id,
            CommitSequence::from_raw(sequence),
            StreamRevision::from_raw(revision),
            Headers::new(),
            (0..events)
                .map(|i| EventData::new(format!("event-{i}").into_bytes()))
                .collect(),
        )
    }

    #[test]
    fn test_commit_then_read_back() {
        let engine = SqliteEngine::open_in_memory().unwrap();
        let stream = StreamId::random();
        let attempt = commit_attempt(stream, CommitId::random(), 1, 3, 3);

        engine.commit(attempt.clone()).unwrap();

        let commits = engine
            .get_from(stream, StreamRevision::FIRST, StreamRevision::from_raw(10))
            .unwrap();
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0], attempt);
    }

    #[test]
    fn test_same_commit_id_is_a_duplicate() {
        let engine = SqliteEngine::open_in_memory().unwrap();
        let attempt = commit_attempt(StreamId::random(), CommitId::random(), 1, 1, 1);

        engine.commit(attempt.clone()).unwrap();
        let err = engine.commit(attempt).unwrap_err();
        assert!(matches!(err, Error::DuplicateCommit { .. }));
    }

    #[test]
    fn test_different_commit_id_at_same_sequence_is_a_conflict() {
        let engine = SqliteEngine::open_in_memory().unwrap();
        let stream = StreamId::random();

        engine
            .commit(commit_attempt(stream, CommitId::random(), 1, 1, 1))
            .unwrap();
        let err = engine
            .commit(commit_attempt(stream, CommitId::random(), 1, 1, 1))
            .unwrap_err();
        assert!(matches!(err, Error::Concurrency { .. }));
    }

    #[test]
    fn test_revision_collision_with_different_sequence_is_a_conflict() {
        let engine = SqliteEngine::open_in_memory().unwrap();
        let stream = StreamId::random();

        // One three-event commit reaches revision 3 at sequence 1; a
        // competing writer that saw an empty stream claims revision 3 with
        // a different sequence numbering.
        engine
            .commit(commit_attempt(stream, CommitId::random(), 1, 3, 3))
            .unwrap();
        let err = engine
            .commit(commit_attempt(stream, CommitId::random(), 3, 3, 1))
            .unwrap_err();
        assert!(matches!(err, Error::Concurrency { .. }));
    }

    #[test]
    fn test_duplicate_snapshot_returns_false() {
        let engine = SqliteEngine::open_in_memory().unwrap();
        let stream = StreamId::random();
        let snapshot = Snapshot::new(stream, StreamRevision::from_raw(3), b"state".to_vec());

        assert!(engine.add_snapshot(snapshot.clone()).unwrap());
        assert!(!engine.add_snapshot(snapshot).unwrap());
    }

    #[test]
    fn test_mark_dispatched_is_idempotent() {
        let engine = SqliteEngine::open_in_memory().unwrap();
        let attempt = commit_attempt(StreamId::random(), CommitId::random(), 1, 1, 1);
        engine.commit(attempt.clone()).unwrap();

        engine.mark_commit_as_dispatched(&attempt).unwrap();
        engine.mark_commit_as_dispatched(&attempt).unwrap();
        assert!(engine.get_undispatched_commits().unwrap().is_empty());
    }

    #[test]
    fn test_heads_catch_up_after_flush() {
        let engine = SqliteEngine::open_in_memory().unwrap();
        let stream = StreamId::random();
        engine
            .commit(commit_attempt(stream, CommitId::random(), 1, 3, 3))
            .unwrap();
        engine.flush_heads().unwrap();

        let heads = engine.get_streams_to_snapshot(0).unwrap();
        let head = heads.iter().find(|h| h.stream_id == stream).unwrap();
        assert_eq!(head.head_revision.as_raw(), 3);
        assert!(head.snapshot_revision.is_none());
    }

    #[test]
    fn test_purge_drops_everything() {
        let engine = SqliteEngine::open_in_memory().unwrap();
        let stream = StreamId::random();
        engine
            .commit(commit_attempt(stream, CommitId::random(), 1, 1, 1))
            .unwrap();
        engine
            .add_snapshot(Snapshot::new(stream, StreamRevision::FIRST, b"s".to_vec()))
            .unwrap();
        engine.flush_heads().unwrap();

        engine.purge().unwrap();

        assert!(engine
            .get_from(stream, StreamRevision::FIRST, StreamRevision::from_raw(10))
            .unwrap()
            .is_empty());
        assert!(engine
            .get_snapshot(stream, StreamRevision::from_raw(10))
            .unwrap()
            .is_none());
        assert!(engine.get_streams_to_snapshot(0).unwrap().is_empty());
    }
}
