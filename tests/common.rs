#![allow(dead_code)]

use std::path::PathBuf;
use std::time::{Duration, Instant};

use eventvault::{
    Commit, CommitId, CommitSequence, CommitStamp, EventData, Headers, MemoryEngine,
    PersistenceEngine, SqliteEngine, StreamId, StreamRevision,
};
use serde_json::json;

/// Runs a test body against both backends. The second argument blocks until
/// the backend's stream-head worker has drained its queue.
pub fn each_engine(test: impl Fn(&dyn PersistenceEngine, &dyn Fn())) {
    let sqlite = SqliteEngine::open_in_memory().expect("open sqlite engine");
    test(&sqlite, &|| sqlite.flush_heads().expect("flush heads"));

    let memory = MemoryEngine::new();
    test(&memory, &|| memory.flush_heads().expect("flush heads"));
}

/// Opens a file-backed engine in a fresh temp directory.
pub fn create_temp_engine(name: &str) -> (tempfile::TempDir, PathBuf, SqliteEngine) {
    let dir = tempfile::TempDir::new().expect("create temp dir");
    let path = dir.path().join(name);
    let engine = SqliteEngine::open(&path).expect("open engine");
    (dir, path, engine)
}

/// Builds a commit whose events span `starting..=revision`, with headers
/// and per-event metadata populated so round-trip assertions cover every
/// field.
pub fn commit_with(
    stream_id: StreamId,
    commit_id: CommitId,
    sequence: u64,
    starting: u64,
    revision: u64,
) -> Commit {
    let mut headers = Headers::new();
    headers.insert("origin".to_string(), json!("tests"));
    headers.insert("attempt".to_string(), json!(sequence));

    let events = (starting..=revision)
        .map(|r| {
            EventData::with_type("Recorded", format!("event-{r}").into_bytes())
                .with_metadata(format!("meta-{r}").into_bytes())
        })
        .collect();

    Commit::new(
        stream_id,
        commit_id,
        CommitSequence::from_raw(sequence),
        StreamRevision::from_raw(revision),
        headers,
        events,
    )
}

/// Like [`commit_with`] but with a fresh random commit id.
pub fn commit_at(stream_id: StreamId, sequence: u64, starting: u64, revision: u64) -> Commit {
    commit_with(stream_id, CommitId::random(), sequence, starting, revision)
}

/// Like [`commit_at`] but with an explicit commit stamp.
pub fn commit_stamped(
    stream_id: StreamId,
    sequence: u64,
    starting: u64,
    revision: u64,
    stamp_ms: u64,
) -> Commit {
    let mut commit = commit_at(stream_id, sequence, starting, revision);
    commit.commit_stamp = CommitStamp::from_millis(stamp_ms);
    commit
}

/// Polls until the condition yields a value or the timeout expires.
pub fn eventually<T>(timeout: Duration, interval: Duration, mut f: impl FnMut() -> Option<T>) -> T {
    let start = Instant::now();
    loop {
        if let Some(v) = f() {
            return v;
        }
        if start.elapsed() > timeout {
            panic!("condition not met within {timeout:?}");
        }
        std::thread::sleep(interval);
    }
}
