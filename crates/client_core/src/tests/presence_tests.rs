use super::*;

#[test]
fn online_signals_are_idempotent() {
    let mut presence = PresenceSet::new();
    assert!(presence.add_many([UserId(1)]));
    assert!(!presence.add_many([UserId(1)]));
    assert!(presence.contains(UserId(1)));
    assert_eq!(presence.len(), 1);

    assert!(presence.remove(UserId(1)));
    assert!(!presence.contains(UserId(1)));
}

#[test]
fn offline_for_an_absent_participant_is_a_no_op() {
    let mut presence = PresenceSet::new();
    assert!(!presence.remove(UserId(42)));
    assert!(presence.is_empty());
}

#[test]
fn join_snapshot_and_single_signals_share_one_path() {
    let mut presence = PresenceSet::new();
    assert!(presence.add_many([UserId(3), UserId(1), UserId(2)]));
    // A late duplicate of the snapshot changes nothing.
    assert!(!presence.add_many([UserId(2), UserId(3)]));
    assert_eq!(presence.snapshot(), vec![UserId(1), UserId(2), UserId(3)]);
}

#[test]
fn reset_clears_everything_between_rooms() {
    let mut presence = PresenceSet::new();
    presence.add_many([UserId(1), UserId(2)]);
    presence.reset();
    assert!(presence.is_empty());
    assert_eq!(presence.snapshot(), Vec::<UserId>::new());
}
