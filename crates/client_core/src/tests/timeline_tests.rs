use super::*;
use chrono::{TimeZone, Utc};
use shared::{domain::UserId, protocol::UserSummary};

fn sender() -> UserSummary {
    UserSummary {
        id: UserId(5),
        username: "alice".into(),
        first_name: "Alice".into(),
        last_name: "Liddell".into(),
        avatar: None,
    }
}

fn message(id: i64) -> MessagePayload {
    MessagePayload {
        id: MessageId(id),
        content: Some(format!("message {id}")),
        file_name: None,
        file_base64: None,
        sender: sender(),
        receiver: None,
        created_at: Utc.timestamp_opt(1_700_000_000 + id, 0).unwrap(),
    }
}

fn page(ids: &[i64], has_next: bool, next: Option<&str>) -> Page<MessagePayload> {
    Page {
        data: ids.iter().copied().map(message).collect(),
        has_next,
        next: next.map(str::to_string),
    }
}

#[test]
fn empty_history_disables_backward_pagination_permanently() {
    let mut timeline = Timeline::new();
    timeline.apply_initial_page(page(&[], false, None));
    assert!(timeline.is_loaded());
    assert!(timeline.is_empty());
    assert!(!timeline.can_fetch_older());
    assert_eq!(timeline.begin_older_fetch(), None);
    assert_eq!(timeline.begin_older_fetch(), None);
}

#[test]
fn only_one_backward_fetch_can_be_outstanding() {
    let mut timeline = Timeline::new();
    timeline.apply_initial_page(page(&[30, 29], true, Some("/page/2")));

    let first = timeline.begin_older_fetch();
    assert_eq!(first.as_deref(), Some("/page/2"));
    // A second scroll signal before the response arrives is a no-op.
    assert_eq!(timeline.begin_older_fetch(), None);

    timeline.apply_older_page(page(&[28, 27], false, None));
    // The consumed cursor was replaced; history is now exhausted.
    assert_eq!(timeline.begin_older_fetch(), None);
    assert_eq!(timeline.len(), 4);
}

#[test]
fn failed_backward_fetch_keeps_the_cursor_for_retry() {
    let mut timeline = Timeline::new();
    timeline.apply_initial_page(page(&[10], true, Some("/page/2")));

    assert_eq!(timeline.begin_older_fetch().as_deref(), Some("/page/2"));
    timeline.abort_older_fetch();
    assert_eq!(timeline.begin_older_fetch().as_deref(), Some("/page/2"));
}

#[test]
fn live_echo_of_a_paged_message_is_not_duplicated() {
    let mut timeline = Timeline::new();
    timeline.apply_initial_page(page(&[7, 6], false, None));
    assert!(!timeline.prepend_live(message(7)));
    assert_eq!(timeline.len(), 2);
}

#[test]
fn live_message_arriving_before_the_initial_page_survives_the_merge() {
    let mut timeline = Timeline::new();
    // The join raced the page fetch: the live message lands first.
    assert!(timeline.prepend_live(message(31)));
    timeline.apply_initial_page(page(&[31, 30, 29], true, Some("/page/2")));

    assert_eq!(timeline.len(), 3);
    let newest: Vec<i64> = timeline
        .newest_first()
        .iter()
        .map(|message| message.id.0)
        .collect();
    assert_eq!(newest, vec![31, 30, 29]);
}

#[test]
fn rendering_order_is_oldest_first() {
    let mut timeline = Timeline::new();
    timeline.apply_initial_page(page(&[3, 2, 1], false, None));
    timeline.prepend_live(message(4));
    let rendered: Vec<i64> = timeline.oldest_first().map(|message| message.id.0).collect();
    assert_eq!(rendered, vec![1, 2, 3, 4]);
}

#[test]
fn scroll_intent_tracks_arrivals_and_rendering() {
    let mut timeline = Timeline::new();
    assert!(!timeline.to_scroll());

    timeline.apply_initial_page(page(&[1], false, None));
    assert!(timeline.to_scroll());
    timeline.mark_rendered_to_bottom();
    assert!(!timeline.to_scroll());

    timeline.prepend_live(message(2));
    assert!(timeline.to_scroll());
    // A duplicate does not re-trigger the intent.
    timeline.mark_rendered_to_bottom();
    timeline.prepend_live(message(2));
    assert!(!timeline.to_scroll());
}

#[test]
fn older_pages_never_resurrect_known_messages() {
    let mut timeline = Timeline::new();
    timeline.apply_initial_page(page(&[5, 4], true, Some("/page/2")));
    assert!(timeline.begin_older_fetch().is_some());
    // The server page overlaps what live delivery already appended.
    timeline.apply_older_page(page(&[4, 3], false, None));
    assert_eq!(timeline.len(), 3);
    assert!(timeline.is_loaded());
    assert!(!timeline.has_more());
}
