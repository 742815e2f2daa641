use super::*;

#[test]
fn gate_requires_granted_permission_and_a_live_session() {
    assert!(evaluate(PermissionState::Granted, true));
    assert!(!evaluate(PermissionState::Granted, false));
    assert!(!evaluate(PermissionState::Denied, true));
    assert!(!evaluate(PermissionState::Default, true));
}

#[test]
fn drain_is_empty_until_permission_is_granted() {
    let mut gate = NotificationGate::new();
    gate.offer(NotificationIntent::new(
        AccountEventKind::Project,
        "meeting changed",
    ));
    assert!(gate.drain(true).is_empty());

    // The suppressed intent was dropped, not held back.
    gate.set_permission(PermissionState::Granted);
    assert!(gate.drain(true).is_empty());
}

#[test]
fn a_dead_session_suppresses_delivery() {
    let mut gate = NotificationGate::new();
    gate.set_permission(PermissionState::Granted);
    gate.offer(NotificationIntent::new(AccountEventKind::User, "profile"));
    assert!(gate.drain(false).is_empty());
}

#[test]
fn same_kind_burst_collapses_to_the_latest() {
    let mut gate = NotificationGate::new();
    gate.set_permission(PermissionState::Granted);
    gate.offer(NotificationIntent::new(AccountEventKind::Message, "first"));
    gate.offer(NotificationIntent::new(AccountEventKind::Message, "second"));
    gate.offer(NotificationIntent::new(AccountEventKind::Message, "third"));

    let intents = gate.drain(true);
    assert_eq!(intents.len(), 1);
    assert_eq!(intents[0].text, "third");
    assert_eq!(intents[0].tag, "chat-message");
}

#[test]
fn distinct_kinds_do_not_collapse() {
    let mut gate = NotificationGate::new();
    gate.set_permission(PermissionState::Granted);
    gate.offer(NotificationIntent::new(AccountEventKind::Project, "rooms"));
    gate.offer(NotificationIntent::new(AccountEventKind::Message, "chat"));

    let intents = gate.drain(true);
    assert_eq!(intents.len(), 2);
    // Drained in deterministic tag order.
    assert_eq!(intents[0].tag, "chat-message");
    assert_eq!(intents[1].tag, "chat-project");

    // Drain empties the gate.
    assert!(gate.drain(true).is_empty());
}
