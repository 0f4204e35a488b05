//! # Record Mappers
//!
//! The backend-neutral persisted shape of a commit, with headers and events
//! already flattened to blobs by the serializer port. Backends store
//! [`CommitRecord`] values (as rows, or as map entries keyed by
//! `(stream_id, commit_sequence)`) and never look inside the blobs.

use crate::error::Result;
use crate::serializer::Serializer;
use crate::types::{Commit, CommitId, CommitSequence, CommitStamp, StreamId, StreamRevision};

/// The persisted layout of one commit.
///
/// `starting_revision` is stored denormalized so range queries can intersect
/// a revision window without decoding the event blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRecord {
    pub stream_id: StreamId,
    pub commit_id: CommitId,
    pub commit_sequence: u64,
    pub starting_revision: u64,
    pub stream_revision: u64,
    pub commit_stamp: CommitStamp,
    pub headers: Vec<u8>,
    pub events: Vec<u8>,
    pub dispatched: bool,
}

impl CommitRecord {
    /// Flattens a commit entity into its persisted shape.
    pub fn from_commit(commit: &Commit, serializer: &dyn Serializer) -> Result<Self> {
        Ok(Self {
            stream_id: commit.stream_id,
            commit_id: commit.commit_id,
            commit_sequence: commit.commit_sequence.as_raw(),
            starting_revision: commit.starting_revision().as_raw(),
            stream_revision: commit.stream_revision.as_raw(),
            commit_stamp: commit.commit_stamp,
            headers: serializer.serialize_headers(&commit.headers)?,
            events: serializer.serialize_events(&commit.events)?,
            dispatched: commit.dispatched,
        })
    }

    /// Inflates the persisted shape back into a commit entity.
    pub fn into_commit(self, serializer: &dyn Serializer) -> Result<Commit> {
        Ok(Commit {
            stream_id: self.stream_id,
            commit_id: self.commit_id,
            commit_sequence: CommitSequence::from_raw(self.commit_sequence),
            stream_revision: StreamRevision::from_raw(self.stream_revision),
            commit_stamp: self.commit_stamp,
            headers: serializer.deserialize_headers(&self.headers)?,
            events: serializer.deserialize_events(&self.events)?,
            dispatched: self.dispatched,
        })
    }
}
