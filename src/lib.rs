//! # eventvault: commit-log persistence core
//!
//! An append-only log of immutable *commits* against logical *streams*, a
//! snapshotting sidecar that summarizes a stream's state at a revision, and
//! *dispatch* tracking so an out-of-process publisher can reliably pick up
//! newly persisted commits.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    EventStore (async facade)                    │
//! │                 commit, get_from, snapshots, ...                │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                 PersistenceEngine (the contract)                │
//! │                                                                 │
//! │   ┌──────────────┐   ┌───────────────┐   ┌──────────────────┐   │
//! │   │  Serializer  │   │ Record mapper │   │ Head maintainer  │   │
//! │   │    (port)    │   │ (blob layout) │   │ (fire-and-forget)│   │
//! │   └──────────────┘   └───────────────┘   └──────────────────┘   │
//! └──────────────┬──────────────────────────────────┬───────────────┘
//!                │                                  │
//!                ▼                                  ▼
//!        ┌──────────────┐                   ┌──────────────┐
//!        │ SqliteEngine │                   │ MemoryEngine │
//!        │  (dialect-   │                   │ (ordered-key │
//!        │ parameterised│                   │   BTreeMap)  │
//!        └──────────────┘                   └──────────────┘
//! ```
//!
//! ## Core Invariants
//!
//! 1. **The commit log owns the truth**: snapshots and stream heads are
//!    derived, rebuildable, and allowed to lag.
//! 2. **Per-stream sequences are contiguous**: commit sequences on a stream
//!    form `1..N` with no gaps; `(stream_id, commit_sequence)` is unique.
//! 3. **Optimistic concurrency**: collisions are detected by unique
//!    constraints, then discriminated by commit id: the same id is an
//!    idempotent retry, a different id is a losing writer.
//! 4. **Commits never change**: the only in-place mutations anywhere are
//!    the monotonic dispatched flag and head-summary advances.
//!
//! ## Example
//!
//! ```rust,no_run
//! use eventvault::{
//!     Commit, CommitId, CommitSequence, EventData, Headers, PersistenceEngine,
//!     SqliteEngine, StreamId, StreamRevision,
//! };
//!
//! # fn main() -> eventvault::Result<()> {
//! let engine = SqliteEngine::open("events.db")?;
//!
//! let stream = StreamId::random();
//! engine.commit(Commit::new(
//!     stream,
//!     CommitId::random(),
//!     CommitSequence::FIRST,
//!     StreamRevision::from_raw(2),
//!     Headers::new(),
//!     vec![
//!         EventData::with_type("OrderPlaced", b"{}".to_vec()),
//!         EventData::with_type("OrderPaid", b"{}".to_vec()),
//!     ],
//! ))?;
//!
//! let commits = engine.get_from(stream, StreamRevision::FIRST, StreamRevision::from_raw(10))?;
//! assert_eq!(commits.len(), 1);
//! # Ok(())
//! # }
//! ```

/// Error taxonomy shared by every engine operation.
pub mod error;

/// Domain entities: commits, snapshots, stream heads, and their newtypes.
pub mod types;

/// The serializer port: entity payloads ↔ opaque blobs.
pub mod serializer;

/// The backend-neutral persisted record shape and its mappers.
pub mod records;

/// The persistence engine contract.
pub mod engine;

/// Background stream-head maintenance.
pub mod heads;

/// SQL dialect: schema and parameterised statements for relational engines.
pub mod dialect;

/// The relational (SQLite) engine.
pub mod sqlite;

/// The in-memory ordered-key engine.
pub mod memory;

/// Async facade over any engine.
pub mod store;

pub use engine::PersistenceEngine;
pub use error::{Error, Result};
pub use memory::MemoryEngine;
pub use serializer::{JsonSerializer, Serializer};
pub use sqlite::SqliteEngine;
pub use store::EventStore;

pub use types::{
    Commit, CommitId, CommitSequence, CommitStamp, EventData, Headers, Snapshot, StreamHead,
    StreamId, StreamRevision,
};
