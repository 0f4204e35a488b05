mod common;

use eventvault::{Snapshot, StreamId, StreamRevision};

/// The snapshot of greatest revision at or below the target wins; below the
/// earliest snapshot the null indicator comes back.
#[test]
fn latest_snapshot_at_or_below_target_wins() {
    common::each_engine(|engine, _flush| {
        let stream = StreamId::random();
        // Stream at revision 7, snapshotted at 3 and 5.
        engine.commit(common::commit_at(stream, 1, 1, 7)).unwrap();
        assert!(engine
            .add_snapshot(Snapshot::new(stream, StreamRevision::from_raw(3), b"rev-3".to_vec()))
            .unwrap());
        assert!(engine
            .add_snapshot(Snapshot::new(stream, StreamRevision::from_raw(5), b"rev-5".to_vec()))
            .unwrap());

        let chosen = engine
            .get_snapshot(stream, StreamRevision::from_raw(6))
            .unwrap()
            .expect("snapshot at or below 6 exists");
        assert_eq!(chosen.stream_revision.as_raw(), 5);
        assert_eq!(chosen.payload, b"rev-5");

        let exact = engine
            .get_snapshot(stream, StreamRevision::from_raw(3))
            .unwrap()
            .expect("snapshot at exactly 3 exists");
        assert_eq!(exact.stream_revision.as_raw(), 3);

        assert!(
            engine
                .get_snapshot(stream, StreamRevision::from_raw(2))
                .unwrap()
                .is_none(),
            "no snapshot exists at or below 2"
        );
    });
}

/// Adding a snapshot at an occupied revision reports false and leaves the
/// original payload in place.
#[test]
fn duplicate_snapshot_is_refused_without_error() {
    common::each_engine(|engine, _flush| {
        let stream = StreamId::random();
        let original = Snapshot::new(stream, StreamRevision::from_raw(4), b"first".to_vec());
        assert!(engine.add_snapshot(original).unwrap());

        let replacement = Snapshot::new(stream, StreamRevision::from_raw(4), b"second".to_vec());
        assert!(!engine.add_snapshot(replacement).unwrap());

        let stored = engine
            .get_snapshot(stream, StreamRevision::from_raw(4))
            .unwrap()
            .unwrap();
        assert_eq!(stored.payload, b"first");
    });
}

/// Streams whose snapshot age reaches the threshold show up in the advisory
/// head listing once the maintainer has caught up.
#[test]
fn snapshot_age_threshold_selects_streams() {
    common::each_engine(|engine, flush| {
        let lagging = StreamId::random();
        let fresh = StreamId::random();

        // lagging: head 9, snapshot 3 → age 6
        engine.commit(common::commit_at(lagging, 1, 1, 9)).unwrap();
        engine
            .add_snapshot(Snapshot::new(lagging, StreamRevision::from_raw(3), b"s".to_vec()))
            .unwrap();

        // fresh: head 4, snapshot 4 → age 0
        engine.commit(common::commit_at(fresh, 1, 1, 4)).unwrap();
        engine
            .add_snapshot(Snapshot::new(fresh, StreamRevision::from_raw(4), b"s".to_vec()))
            .unwrap();

        flush();

        let overdue = engine.get_streams_to_snapshot(5).unwrap();
        assert!(overdue.iter().any(|h| h.stream_id == lagging));
        assert!(!overdue.iter().any(|h| h.stream_id == fresh));

        let head = overdue.iter().find(|h| h.stream_id == lagging).unwrap();
        assert_eq!(head.head_revision.as_raw(), 9);
        assert_eq!(head.snapshot_revision.as_raw(), 3);
        assert_eq!(head.snapshot_age(), 6);

        // Threshold zero lists every known stream.
        let all = engine.get_streams_to_snapshot(0).unwrap();
        assert!(all.iter().any(|h| h.stream_id == fresh));
    });
}

/// A snapshot append advances only the snapshot side of the head; later
/// commits advance only the head side.
#[test]
fn head_tracks_commits_and_snapshots_independently() {
    common::each_engine(|engine, flush| {
        let stream = StreamId::random();

        engine.commit(common::commit_at(stream, 1, 1, 4)).unwrap();
        engine
            .add_snapshot(Snapshot::new(stream, StreamRevision::from_raw(4), b"s4".to_vec()))
            .unwrap();
        engine.commit(common::commit_at(stream, 2, 5, 6)).unwrap();
        flush();

        let heads = engine.get_streams_to_snapshot(0).unwrap();
        let head = heads.iter().find(|h| h.stream_id == stream).unwrap();
        assert_eq!(head.head_revision.as_raw(), 6);
        assert_eq!(head.snapshot_revision.as_raw(), 4);
        assert_eq!(head.snapshot_age(), 2);
    });
}
