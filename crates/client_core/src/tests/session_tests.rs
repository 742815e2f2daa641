use super::*;

fn credential(expires_at: i64) -> Credential {
    Credential {
        token: "bearer-token".into(),
        expires_at,
    }
}

#[test]
fn validity_uses_the_safety_margin() {
    let now = 1_000;
    // Exactly at the margin is already invalid.
    assert!(!credential(now + 5).is_valid_at(now));
    assert!(credential(now + 6).is_valid_at(now));
    assert!(!credential(now).is_valid_at(now));
    assert!(!credential(now - 100).is_valid_at(now));
}

#[test]
fn refresh_fires_two_minutes_before_expiry() {
    let now = 1_000;
    assert_eq!(
        credential(now + 130).refresh_delay_at(now),
        Duration::from_secs(10)
    );
    assert_eq!(
        credential(now + 3_600).refresh_delay_at(now),
        Duration::from_secs(3_480)
    );
}

#[test]
fn refresh_fires_immediately_inside_the_margin() {
    let now = 1_000;
    assert_eq!(
        credential(now + 60).refresh_delay_at(now),
        Duration::from_secs(0)
    );
    assert_eq!(
        credential(now - 10).refresh_delay_at(now),
        Duration::from_secs(0)
    );
}

#[test]
fn from_grant_anchors_expiry_at_issuance() {
    let issued = Credential::from_grant("tok", 3_600, 1_000);
    assert_eq!(issued.expires_at, 4_600);
    assert_eq!(
        issued.refresh_delay_at(1_000),
        Duration::from_secs(3_480)
    );
    // A refresh at the scheduled instant re-derives the same relative delay.
    let rotated = Credential::from_grant("tok2", 3_600, 4_480);
    assert_eq!(rotated.refresh_delay_at(4_480), Duration::from_secs(3_480));
}

#[test]
fn session_replacement_is_wholesale_and_observable() {
    let session = Session::new();
    let mut watched = session.watch();
    assert!(!session.is_present());
    assert!(!session.is_valid());

    let now = Utc::now().timestamp();
    session.replace(credential(now + 3_600));
    assert!(watched.has_changed().unwrap());
    watched.mark_unchanged();
    assert!(session.is_valid());
    assert!(session.valid_credential().is_some());

    session.replace(credential(now + 7_200));
    assert_eq!(
        session.current().map(|credential| credential.expires_at),
        Some(now + 7_200)
    );

    assert!(session.clear());
    assert!(!session.is_present());
    // Clearing an absent credential reports nothing to signal.
    assert!(!session.clear());
}

#[test]
fn expired_credential_is_present_but_not_valid() {
    let session = Session::new();
    let now = Utc::now().timestamp();
    session.replace(credential(now - 1));
    assert!(session.is_present());
    assert!(!session.is_valid());
    assert!(session.valid_credential().is_none());
}
