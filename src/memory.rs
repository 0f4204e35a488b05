//! # In-Memory Persistence Engine
//!
//! The ordered-key implementation of the engine contract: commits live in a
//! `BTreeMap` keyed by `(stream_id, commit_sequence)`, which is the same
//! primary-key shape a document store would use. Snapshots and heads get
//! their own maps.
//!
//! Useful on its own for tests of anything layered above the engine, and as
//! the reference answer for what the relational engine must do: both
//! backends run the identical discrimination and query semantics.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;
use std::sync::Arc;

use parking_lot::RwLock;
use uuid::Uuid;

use crate::engine::PersistenceEngine;
use crate::error::{Error, Result};
use crate::heads::{HeadMaintainer, HeadStore, HeadUpdate};
use crate::records::CommitRecord;
use crate::serializer::{JsonSerializer, Serializer};
use crate::types::{
    Commit, CommitStamp, Snapshot, StreamHead, StreamId, StreamRevision,
};

#[derive(Default)]
struct MemoryState {
    /// The commit log, ordered by its primary key.
    commits: BTreeMap<(Uuid, u64), CommitRecord>,

    /// Mirror of the `(stream_id, stream_revision)` unique constraint.
    revisions: HashSet<(Uuid, u64)>,

    /// Mirror of the global commit-id unique constraint.
    commit_ids: HashSet<Uuid>,

    /// Snapshots by `(stream_id, stream_revision)`.
    snapshots: BTreeMap<(Uuid, u64), Vec<u8>>,

    /// Best-effort heads: stream → (head_revision, snapshot_revision).
    heads: HashMap<Uuid, (u64, u64)>,
}

struct MemoryInner {
    state: RwLock<MemoryState>,
    serializer: Box<dyn Serializer>,
}

/// The in-memory persistence engine.
pub struct MemoryEngine {
    inner: Arc<MemoryInner>,
    heads: HeadMaintainer,
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEngine {
    /// Creates an empty engine with the JSON serializer.
    pub fn new() -> Self {
        Self::with_serializer(Box::new(JsonSerializer))
    }

    /// Creates an empty engine with an explicit serializer.
    pub fn with_serializer(serializer: Box<dyn Serializer>) -> Self {
        let inner = Arc::new(MemoryInner {
            state: RwLock::new(MemoryState::default()),
            serializer,
        });
        let head_store: Arc<dyn HeadStore> = inner.clone();
        let heads = HeadMaintainer::spawn(head_store);
        Self { inner, heads }
    }

    /// Blocks until every enqueued stream-head update has been applied.
    pub fn flush_heads(&self) -> Result<()> {
        self.heads.flush()
    }

    fn inflate(&self, records: Vec<CommitRecord>) -> Result<Vec<Commit>> {
        records
            .into_iter()
            .map(|record| record.into_commit(self.inner.serializer.as_ref()))
            .collect()
    }
}

impl PersistenceEngine for MemoryEngine {
    fn initialize(&self) -> Result<()> {
        // Nothing to create; repeat calls are success by definition.
        Ok(())
    }

    fn commit(&self, attempt: Commit) -> Result<()> {
        attempt.validate()?;
        let record = CommitRecord::from_commit(&attempt, self.inner.serializer.as_ref())?;

        {
            let mut state = self.inner.state.write();
            let key = (record.stream_id.as_uuid(), record.commit_sequence);

            if let Some(existing) = state.commits.get(&key) {
                if existing.commit_id == attempt.commit_id {
                    return Err(Error::DuplicateCommit {
                        commit_id: attempt.commit_id,
                    });
                }
                return Err(Error::Concurrency {
                    stream_id: attempt.stream_id,
                    commit_sequence: attempt.commit_sequence.as_raw(),
                });
            }
            if state.commit_ids.contains(&record.commit_id.as_uuid()) {
                return Err(Error::DuplicateCommit {
                    commit_id: attempt.commit_id,
                });
            }
            let revision_key = (record.stream_id.as_uuid(), record.stream_revision);
            if state.revisions.contains(&revision_key) {
                return Err(Error::Concurrency {
                    stream_id: attempt.stream_id,
                    commit_sequence: attempt.commit_sequence.as_raw(),
                });
            }

            state.commit_ids.insert(record.commit_id.as_uuid());
            state.revisions.insert(revision_key);
            state.commits.insert(key, record);
        }

        self.heads.enqueue(HeadUpdate::Committed {
            stream_id: attempt.stream_id,
            head_revision: attempt.stream_revision,
        });
        Ok(())
    }

    fn get_from(
        &self,
        stream_id: StreamId,
        min_revision: StreamRevision,
        max_revision: StreamRevision,
    ) -> Result<Vec<Commit>> {
        let records: Vec<CommitRecord> = {
            let state = self.inner.state.read();
            state
                .commits
                .range((
                    Bound::Included((stream_id.as_uuid(), 0)),
                    Bound::Included((stream_id.as_uuid(), u64::MAX)),
                ))
                .map(|(_, record)| record)
                .filter(|record| {
                    record.stream_revision >= min_revision.as_raw()
                        && record.starting_revision <= max_revision.as_raw()
                })
                .cloned()
                .collect()
        };
        self.inflate(records)
    }

    fn get_from_stamp(&self, start: CommitStamp) -> Result<Vec<Commit>> {
        let mut records: Vec<CommitRecord> = {
            let state = self.inner.state.read();
            state
                .commits
                .values()
                .filter(|record| record.commit_stamp >= start)
                .cloned()
                .collect()
        };
        records.sort_by_key(|r| (r.commit_stamp, r.stream_id, r.commit_sequence));
        self.inflate(records)
    }

    fn get_undispatched_commits(&self) -> Result<Vec<Commit>> {
        let mut records: Vec<CommitRecord> = {
            let state = self.inner.state.read();
            state
                .commits
                .values()
                .filter(|record| !record.dispatched)
                .cloned()
                .collect()
        };
        records.sort_by_key(|r| (r.commit_stamp, r.stream_id, r.commit_sequence));
        self.inflate(records)
    }

    fn mark_commit_as_dispatched(&self, commit: &Commit) -> Result<()> {
        let mut state = self.inner.state.write();
        let key = (commit.stream_id.as_uuid(), commit.commit_sequence.as_raw());
        if let Some(record) = state.commits.get_mut(&key) {
            record.dispatched = true;
        }
        Ok(())
    }

    fn get_snapshot(
        &self,
        stream_id: StreamId,
        max_revision: StreamRevision,
    ) -> Result<Option<Snapshot>> {
        let state = self.inner.state.read();
        let snapshot = state
            .snapshots
            .range((
                Bound::Included((stream_id.as_uuid(), 0)),
                Bound::Included((stream_id.as_uuid(), max_revision.as_raw())),
            ))
            .next_back()
            .map(|((_, revision), payload)| {
                Snapshot::new(stream_id, StreamRevision::from_raw(*revision), payload.clone())
            });
        Ok(snapshot)
    }

    fn add_snapshot(&self, snapshot: Snapshot) -> Result<bool> {
        {
            let mut state = self.inner.state.write();
            let key = (snapshot.stream_id.as_uuid(), snapshot.stream_revision.as_raw());
            if state.snapshots.contains_key(&key) {
                return Ok(false);
            }
            state.snapshots.insert(key, snapshot.payload.clone());
        }

        self.heads.enqueue(HeadUpdate::Snapshotted {
            stream_id: snapshot.stream_id,
            snapshot_revision: snapshot.stream_revision,
        });
        Ok(true)
    }

    fn get_streams_to_snapshot(&self, max_threshold: u64) -> Result<Vec<StreamHead>> {
        let state = self.inner.state.read();
        let mut heads: Vec<StreamHead> = state
            .heads
            .iter()
            .map(|(stream_id, (head, snapshot))| {
                StreamHead::new(
                    StreamId::new(*stream_id),
                    StreamRevision::from_raw(*head),
                    StreamRevision::from_raw(*snapshot),
                )
            })
            .filter(|head| head.snapshot_age() >= max_threshold)
            .collect();
        heads.sort_by_key(|head| std::cmp::Reverse(head.snapshot_age()));
        Ok(heads)
    }

    fn purge(&self) -> Result<()> {
        let mut state = self.inner.state.write();
        *state = MemoryState::default();
        Ok(())
    }
}

impl HeadStore for MemoryInner {
    fn apply_head_update(&self, update: &HeadUpdate) -> Result<()> {
        let mut state = self.state.write();
        match update {
            HeadUpdate::Committed {
                stream_id,
                head_revision,
            } => {
                let entry = state.heads.entry(stream_id.as_uuid()).or_insert((0, 0));
                entry.0 = head_revision.as_raw();
            }
            HeadUpdate::Snapshotted {
                stream_id,
                snapshot_revision,
            } => {
                let entry = state.heads.entry(stream_id.as_uuid()).or_insert((0, 0));
                entry.1 = snapshot_revision.as_raw();
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
    use crate::types::{CommitId, CommitSequence, EventData, Headers};

    fn commit_attempt(
        stream_id: StreamId,
        sequence: u64,
        starting: u64,
        revision: u64,
    ) -> Commit {
        let events = (starting..=revision)
            .map(|r| EventData::new(format!("event-{r}").into_bytes()))
            .collect();
        Commit::new(
            stream_id,
            CommitId::random(),
            CommitSequence::from_raw(sequence),
            StreamRevision::from_raw(revision),
            Headers::new(),
            events,
        )
    }

    #[test]
    fn test_range_query_intersects_revision_spans() {
        let engine = MemoryEngine::new();
        let stream = StreamId::random();

        engine.commit(commit_attempt(stream, 1, 1, 3)).unwrap();
        engine.commit(commit_attempt(stream, 2, 4, 5)).unwrap();
        engine.commit(commit_attempt(stream, 3, 6, 9)).unwrap();

        // Window [4, 6] touches the second and third commits only.
        let commits = engine
            .get_from(
                stream,
                StreamRevision::from_raw(4),
                StreamRevision::from_raw(6),
            )
            .unwrap();
        assert_eq!(commits.len(), 2);
        assert_eq!(commits[0].commit_sequence.as_raw(), 2);
        assert_eq!(commits[1].commit_sequence.as_raw(), 3);
    }

    #[test]
    fn test_duplicate_and_conflict_discrimination() {
        let engine = MemoryEngine::new();
        let stream = StreamId::random();

        let first = commit_attempt(stream, 1, 1, 1);
        engine.commit(first.clone()).unwrap();

        assert!(matches!(
            engine.commit(first.clone()),
            Err(Error::DuplicateCommit { .. })
        ));

        let competing = commit_attempt(stream, 1, 1, 1);
        assert!(matches!(
            engine.commit(competing),
            Err(Error::Concurrency { .. })
        ));
    }

    #[test]
    fn test_same_commit_id_at_other_sequence_is_a_duplicate() {
        let engine = MemoryEngine::new();
        let stream = StreamId::random();

        let first = commit_attempt(stream, 1, 1, 1);
        engine.commit(first.clone()).unwrap();

        let mut replay = commit_attempt(stream, 2, 2, 2);
        replay.commit_id = first.commit_id;
        assert!(matches!(
            engine.commit(replay),
            Err(Error::DuplicateCommit { .. })
        ));
    }

    #[test]
    fn test_snapshot_selection_picks_greatest_at_or_below() {
        let engine = MemoryEngine::new();
        let stream = StreamId::random();

        engine
            .add_snapshot(Snapshot::new(stream, StreamRevision::from_raw(3), b"r3".to_vec()))
            .unwrap();
        engine
            .add_snapshot(Snapshot::new(stream, StreamRevision::from_raw(5), b"r5".to_vec()))
            .unwrap();

        let chosen = engine
            .get_snapshot(stream, StreamRevision::from_raw(6))
            .unwrap()
            .unwrap();
        assert_eq!(chosen.stream_revision.as_raw(), 5);
        assert_eq!(chosen.payload, b"r5");

        assert!(engine
            .get_snapshot(stream, StreamRevision::from_raw(2))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_heads_reflect_commits_and_snapshots() {
        let engine = MemoryEngine::new();
        let stream = StreamId::random();

        engine.commit(commit_attempt(stream, 1, 1, 4)).unwrap();
        engine
            .add_snapshot(Snapshot::new(stream, StreamRevision::from_raw(2), b"s".to_vec()))
            .unwrap();
        engine.flush_heads().unwrap();

        let heads = engine.get_streams_to_snapshot(2).unwrap();
        let head = heads.iter().find(|h| h.stream_id == stream).unwrap();
        assert_eq!(head.head_revision.as_raw(), 4);
        assert_eq!(head.snapshot_revision.as_raw(), 2);
        assert_eq!(head.snapshot_age(), 2);

        // Threshold above the age excludes the stream.
        assert!(engine.get_streams_to_snapshot(3).unwrap().is_empty());
    }
}
