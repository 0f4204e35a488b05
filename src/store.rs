//! # Async Event Store Facade
//!
//! A non-blocking wrapper over any [`PersistenceEngine`]. The engine
//! contract is deliberately synchronous (every operation blocks until the
//! backend answers), so async hosts need an external wrapper, and this is
//! it.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Async Tasks                           │
//! │   task1 ─┐                                    ┌─ task4      │
//! │   task2 ─┼── tokio::sync::mpsc ───────────────┼─ task5      │
//! │   task3 ─┘     (one request queue)            └─ task6      │
//! └─────────────────────────┬───────────────────────────────────┘
//!                           │
//!             ┌─────────────┼─────────────┐
//!             ▼             ▼             ▼
//!      ┌───────────┐ ┌───────────┐ ┌───────────┐
//!      │ worker 0  │ │ worker 1  │ │ worker N  │   dedicated OS
//!      │ (thread)  │ │ (thread)  │ │ (thread)  │   threads
//!      └─────┬─────┘ └─────┬─────┘ └─────┬─────┘
//!            └─────────────┼─────────────┘
//!                          ▼
//!                 Arc<dyn PersistenceEngine>
//! ```
//!
//! Workers compete for requests off the shared queue, so a slow query on
//! one thread does not stall appends on another. Each request carries a
//! oneshot responder; dropping the store after `shutdown()` drains and
//! joins every worker.

use std::sync::Arc;
use std::thread::{self, available_parallelism, JoinHandle};

use tokio::sync::{mpsc, oneshot, Mutex};

use crate::engine::PersistenceEngine;
use crate::error::{Error, Result};
use crate::types::{Commit, CommitStamp, Snapshot, StreamHead, StreamId, StreamRevision};

// =============================================================================
// Configuration
// =============================================================================

/// Size of the request channel.
const REQUEST_CHANNEL_SIZE: usize = 1024;

/// Minimum number of worker threads.
const MIN_WORKERS: usize = 1;

/// Maximum number of worker threads.
const MAX_WORKERS: usize = 16;

// =============================================================================
// Request Types
// =============================================================================

enum Request {
    Commit {
        attempt: Commit,
        response: oneshot::Sender<Result<()>>,
    },
    GetFrom {
        stream_id: StreamId,
        min_revision: StreamRevision,
        max_revision: StreamRevision,
        response: oneshot::Sender<Result<Vec<Commit>>>,
    },
    GetFromStamp {
        start: CommitStamp,
        response: oneshot::Sender<Result<Vec<Commit>>>,
    },
    GetUndispatched {
        response: oneshot::Sender<Result<Vec<Commit>>>,
    },
    MarkDispatched {
        commit: Box<Commit>,
        response: oneshot::Sender<Result<()>>,
    },
    GetSnapshot {
        stream_id: StreamId,
        max_revision: StreamRevision,
        response: oneshot::Sender<Result<Option<Snapshot>>>,
    },
    AddSnapshot {
        snapshot: Snapshot,
        response: oneshot::Sender<Result<bool>>,
    },
    StreamsToSnapshot {
        max_threshold: u64,
        response: oneshot::Sender<Result<Vec<StreamHead>>>,
    },
    Shutdown,
}

// =============================================================================
// EventStore
// =============================================================================

/// Cloneable async handle over a persistence engine.
///
/// All clones share the same worker pool and engine. After [`shutdown`]
/// completes (on any clone), every operation fails with [`Error::Shutdown`].
///
/// [`shutdown`]: EventStore::shutdown
#[derive(Clone)]
pub struct EventStore {
    tx: mpsc::Sender<Request>,
    workers: Arc<Mutex<Vec<JoinHandle<()>>>>,
    worker_count: usize,
}

impl EventStore {
    /// Spawns a worker pool over the engine. Worker count follows available
    /// parallelism, clamped to `1..=16`.
    pub fn new(engine: Arc<dyn PersistenceEngine>) -> Self {
        let worker_count = available_parallelism()
            .map(|n| n.get())
            .unwrap_or(MIN_WORKERS)
            .clamp(MIN_WORKERS, MAX_WORKERS);
        Self::with_workers(engine, worker_count)
    }

    /// Spawns a worker pool of an explicit size.
    pub fn with_workers(engine: Arc<dyn PersistenceEngine>, worker_count: usize) -> Self {
        let worker_count = worker_count.clamp(MIN_WORKERS, MAX_WORKERS);
        let (tx, rx) = mpsc::channel(REQUEST_CHANNEL_SIZE);

        // Workers compete for requests off one shared receiver.
        let rx = Arc::new(std::sync::Mutex::new(rx));
        let mut workers = Vec::with_capacity(worker_count);
        for i in 0..worker_count {
            let rx = Arc::clone(&rx);
            let engine = Arc::clone(&engine);
            let handle = thread::Builder::new()
                .name(format!("eventvault-worker-{i}"))
                .spawn(move || run_worker(engine, rx))
                .expect("spawn event store worker");
            workers.push(handle);
        }

        Self {
            tx,
            workers: Arc::new(Mutex::new(workers)),
            worker_count,
        }
    }

    /// Number of worker threads serving this store.
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T>>) -> Request,
    ) -> Result<T> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(build(response_tx))
            .await
            .map_err(|_| Error::Shutdown)?;
        response_rx.await.map_err(|_| Error::Shutdown)?
    }

    /// Appends one commit. See [`PersistenceEngine::commit`].
    pub async fn commit(&self, attempt: Commit) -> Result<()> {
        self.request(|response| Request::Commit { attempt, response })
            .await
    }

    /// Reads commits on a stream within a revision window.
    pub async fn get_from(
        &self,
        stream_id: StreamId,
        min_revision: StreamRevision,
        max_revision: StreamRevision,
    ) -> Result<Vec<Commit>> {
        self.request(|response| Request::GetFrom {
            stream_id,
            min_revision,
            max_revision,
            response,
        })
        .await
    }

    /// Reads all commits stamped at or after an instant.
    pub async fn get_from_stamp(&self, start: CommitStamp) -> Result<Vec<Commit>> {
        self.request(|response| Request::GetFromStamp { start, response })
            .await
    }

    /// Reads all commits awaiting dispatch.
    pub async fn get_undispatched_commits(&self) -> Result<Vec<Commit>> {
        self.request(|response| Request::GetUndispatched { response })
            .await
    }

    /// Marks one commit as dispatched.
    pub async fn mark_commit_as_dispatched(&self, commit: Commit) -> Result<()> {
        self.request(|response| Request::MarkDispatched {
            commit: Box::new(commit),
            response,
        })
        .await
    }

    /// Reads the latest snapshot at or below a revision.
    pub async fn get_snapshot(
        &self,
        stream_id: StreamId,
        max_revision: StreamRevision,
    ) -> Result<Option<Snapshot>> {
        self.request(|response| Request::GetSnapshot {
            stream_id,
            max_revision,
            response,
        })
        .await
    }

    /// Adds a snapshot; `false` means the backend refused a duplicate.
    pub async fn add_snapshot(&self, snapshot: Snapshot) -> Result<bool> {
        self.request(|response| Request::AddSnapshot { snapshot, response })
            .await
    }

    /// Reads stream heads whose snapshot age reaches the threshold.
    pub async fn get_streams_to_snapshot(&self, max_threshold: u64) -> Result<Vec<StreamHead>> {
        self.request(|response| Request::StreamsToSnapshot {
            max_threshold,
            response,
        })
        .await
    }

    /// Shuts the pool down gracefully: every worker finishes its current
    /// request, then exits and is joined.
    pub async fn shutdown(self) {
        for _ in 0..self.worker_count {
            let _ = self.tx.send(Request::Shutdown).await;
        }
        let handles = std::mem::take(&mut *self.workers.lock().await);
        for handle in handles {
            let _ = handle.join();
        }
    }
}

// =============================================================================
// Worker Loop
// =============================================================================

fn run_worker(
    engine: Arc<dyn PersistenceEngine>,
    rx: Arc<std::sync::Mutex<mpsc::Receiver<Request>>>,
) {
    loop {
        // Hold the receiver lock only while waiting; execute after release
        // so other workers keep draining the queue.
        let request = {
            let mut guard = rx.lock().expect("receiver mutex poisoned");
            guard.blocking_recv()
        };

        match request {
            Some(Request::Commit { attempt, response }) => {
                let _ = response.send(engine.commit(attempt));
            }
            Some(Request::GetFrom {
                stream_id,
                min_revision,
                max_revision,
                response,
            }) => {
                let _ = response.send(engine.get_from(stream_id, min_revision, max_revision));
            }
            Some(Request::GetFromStamp { start, response }) => {
                let _ = response.send(engine.get_from_stamp(start));
            }
            Some(Request::GetUndispatched { response }) => {
                let _ = response.send(engine.get_undispatched_commits());
            }
            Some(Request::MarkDispatched { commit, response }) => {
                let _ = response.send(engine.mark_commit_as_dispatched(&commit));
            }
            Some(Request::GetSnapshot {
                stream_id,
                max_revision,
                response,
            }) => {
                let _ = response.send(engine.get_snapshot(stream_id, max_revision));
            }
            Some(Request::AddSnapshot { snapshot, response }) => {
                let _ = response.send(engine.add_snapshot(snapshot));
            }
            Some(Request::StreamsToSnapshot {
                max_threshold,
                response,
            }) => {
                let _ = response.send(engine.get_streams_to_snapshot(max_threshold));
            }
            Some(Request::Shutdown) | None => break,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
