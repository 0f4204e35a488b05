//! # Stream-Head Maintenance
//!
//! A background worker keeps the per-stream head summary roughly in step
//! with the commit log. The contract is deliberately weak:
//!
//! - enqueueing an update **never blocks** the committing caller,
//! - a failed update **never raises** into the caller; heads are derived
//!   data and can always be rebuilt by scanning commits,
//! - writes are last-write-wins; readers treat head values as advisory.
//!
//! ## Architecture
//!
//! ```text
//!  commit() / add_snapshot()          HeadMaintainer
//!  ┌────────────────────┐   enqueue   ┌──────────────────┐
//!  │  engine operation  │ ──────────► │ unbounded channel│
//!  └────────────────────┘  (no wait)  └────────┬─────────┘
//!                                              │ drain
//!                                              ▼
//!                                     ┌──────────────────┐
//!                                     │ dedicated thread │
//!                                     │ HeadStore upsert │
//!                                     └──────────────────┘
//! ```
//!
//! One worker per engine drains updates in enqueue order. Failures are
//! logged at `warn` and dropped.

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Sender};
use tracing::warn;

use crate::error::Result;
use crate::types::{StreamId, StreamRevision};

// =============================================================================
// Updates
// =============================================================================

/// One pending stream-head mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeadUpdate {
    /// A commit reached `head_revision`; the first commit of a stream
    /// inserts the head row with `snapshot_revision = none`.
    Committed {
        stream_id: StreamId,
        head_revision: StreamRevision,
    },

    /// A snapshot was added at `snapshot_revision`.
    Snapshotted {
        stream_id: StreamId,
        snapshot_revision: StreamRevision,
    },
}

impl HeadUpdate {
    /// The stream this update touches.
    pub fn stream_id(&self) -> StreamId {
        match self {
            HeadUpdate::Committed { stream_id, .. } => *stream_id,
            HeadUpdate::Snapshotted { stream_id, .. } => *stream_id,
        }
    }
}

/// Backend-side application of head updates.
///
/// Implementations use non-optimistic last-write-wins upserts; monotonic
/// advancement is not enforced at the backend.
pub trait HeadStore: Send + Sync + 'static {
    /// Applies one update. Errors are the maintainer's to swallow.
    fn apply_head_update(&self, update: &HeadUpdate) -> Result<()>;
}

// =============================================================================
// Maintainer
// =============================================================================

enum Message {
    Update(HeadUpdate),
    /// Ack once every update enqueued before this message has been applied.
    Flush(Sender<()>),
}

/// Handle to the background head worker.
///
/// Dropping the handle disconnects the channel; the worker drains what it
/// already holds, then exits, and the drop joins it best-effort.
pub struct HeadMaintainer {
    tx: Option<Sender<Message>>,
    worker: Option<JoinHandle<()>>,
}

impl HeadMaintainer {
    /// Spawns the worker thread over the given head store.
    pub fn spawn(store: Arc<dyn HeadStore>) -> Self {
        let (tx, rx) = unbounded::<Message>();

        let worker = std::thread::Builder::new()
            .name("stream-head-maintainer".to_string())
            .spawn(move || {
                while let Ok(message) = rx.recv() {
                    match message {
                        Message::Update(update) => {
                            if let Err(err) = store.apply_head_update(&update) {
                                warn!(
                                    stream_id = %update.stream_id(),
                                    error = %err,
                                    "stream head update failed; head will lag until rebuilt"
                                );
                            }
                        }
                        Message::Flush(ack) => {
                            let _ = ack.send(());
                        }
                    }
                }
            })
            .expect("spawn stream-head maintainer thread");

        Self {
            tx: Some(tx),
            worker: Some(worker),
        }
    }

    /// Queues an update without blocking. A disconnected worker (engine
    /// already shutting down) silently drops the update.
    pub fn enqueue(&self, update: HeadUpdate) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(Message::Update(update));
        }
    }

    /// Blocks until every previously enqueued update has been applied.
    /// Test and shutdown aid; engine operations never call this.
    pub fn flush(&self) -> Result<()> {
        if let Some(tx) = &self.tx {
            let (ack_tx, ack_rx) = unbounded();
            if tx.send(Message::Flush(ack_tx)).is_ok() {
                let _ = ack_rx.recv();
            }
        }
        Ok(())
    }
}

impl Drop for HeadMaintainer {
    fn drop(&mut self) {
        // Disconnect first so the worker's recv loop ends after draining.
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
