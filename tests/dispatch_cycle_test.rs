mod common;

use eventvault::{StreamId, StreamRevision};

/// The full dispatch cycle: a fresh commit is listed as undispatched,
/// marking it removes it from the listing, and marking again is harmless.
#[test]
fn dispatch_cycle_is_monotonic_and_idempotent() {
    common::each_engine(|engine, _flush| {
        let stream = StreamId::random();
        let attempt = common::commit_at(stream, 1, 1, 3);
        engine.commit(attempt.clone()).unwrap();

        let pending = engine.get_undispatched_commits().unwrap();
        assert!(pending.iter().any(|c| c.commit_id == attempt.commit_id));
        assert!(pending.iter().all(|c| !c.dispatched));

        engine.mark_commit_as_dispatched(&attempt).unwrap();
        let pending = engine.get_undispatched_commits().unwrap();
        assert!(!pending.iter().any(|c| c.commit_id == attempt.commit_id));

        // Marking twice changes nothing and raises nothing.
        engine.mark_commit_as_dispatched(&attempt).unwrap();

        // The flag reads back true through the normal query path.
        let commits = engine
            .get_from(stream, StreamRevision::FIRST, StreamRevision::from_raw(10))
            .unwrap();
        assert!(commits[0].dispatched);
    });
}

/// Undispatched commits come back in ascending stamp order and dispatching
/// one commit leaves its neighbours listed.
#[test]
fn undispatched_listing_orders_by_stamp_and_is_selective() {
    common::each_engine(|engine, _flush| {
        let s1 = StreamId::random();
        let s2 = StreamId::random();

        let first = common::commit_stamped(s1, 1, 1, 1, 1_000);
        let second = common::commit_stamped(s2, 1, 1, 1, 2_000);
        let third = common::commit_stamped(s1, 2, 2, 2, 3_000);
        engine.commit(first.clone()).unwrap();
        engine.commit(second.clone()).unwrap();
        engine.commit(third.clone()).unwrap();

        let pending = engine.get_undispatched_commits().unwrap();
        let stamps: Vec<u64> = pending.iter().map(|c| c.commit_stamp.as_millis()).collect();
        assert_eq!(stamps, vec![1_000, 2_000, 3_000]);

        engine.mark_commit_as_dispatched(&second).unwrap();
        let pending = engine.get_undispatched_commits().unwrap();
        assert_eq!(pending.len(), 2);
        assert!(pending.iter().any(|c| c.commit_id == first.commit_id));
        assert!(pending.iter().any(|c| c.commit_id == third.commit_id));
    });
}
