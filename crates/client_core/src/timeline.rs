use std::collections::HashSet;

use shared::{
    domain::MessageId,
    protocol::{MessagePayload, Page},
};

/// Backward-pagination cursor. A consumed link is replaced by the next
/// page's link, never reused.
#[derive(Debug, Clone, Default)]
pub struct Cursor {
    pub has_next: bool,
    pub next: Option<String>,
}

/// Message history of the open room, newest-first internally and rendered
/// oldest-first. Merges are idempotent on message identifier so a live echo
/// racing the initial page fetch cannot duplicate an entry.
#[derive(Debug, Default)]
pub struct Timeline {
    messages: Vec<MessagePayload>,
    seen: HashSet<MessageId>,
    cursor: Cursor,
    loaded: bool,
    fetch_in_flight: bool,
    to_scroll: bool,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn newest_first(&self) -> &[MessagePayload] {
        &self.messages
    }

    pub fn oldest_first(&self) -> impl Iterator<Item = &MessagePayload> {
        self.messages.iter().rev()
    }

    /// Applies the newest page. Live messages that won the race against this
    /// fetch are already present and are kept; page entries they duplicate
    /// are dropped.
    pub fn apply_initial_page(&mut self, page: Page<MessagePayload>) {
        for message in page.data {
            if self.seen.insert(message.id) {
                self.messages.push(message);
            }
        }
        self.cursor = Cursor {
            has_next: page.has_next,
            next: page.next,
        };
        self.loaded = true;
        self.fetch_in_flight = false;
        self.to_scroll = true;
    }

    pub fn can_fetch_older(&self) -> bool {
        self.loaded && !self.fetch_in_flight && self.cursor.has_next
    }

    /// Whether the server still holds pages older than what was fetched,
    /// regardless of any fetch currently in flight.
    pub fn has_more(&self) -> bool {
        self.cursor.has_next
    }

    /// Guard against duplicate backward fetches from repeated scroll
    /// signals: returns the next-page link and marks a fetch outstanding,
    /// or `None` while one is already outstanding or the history is
    /// exhausted.
    pub fn begin_older_fetch(&mut self) -> Option<String> {
        if !self.can_fetch_older() {
            return None;
        }
        let Some(link) = self.cursor.next.clone() else {
            self.cursor.has_next = false;
            return None;
        };
        self.fetch_in_flight = true;
        Some(link)
    }

    pub fn apply_older_page(&mut self, page: Page<MessagePayload>) {
        self.fetch_in_flight = false;
        self.cursor = Cursor {
            has_next: page.has_next,
            next: page.next,
        };
        for message in page.data {
            if self.seen.insert(message.id) {
                self.messages.push(message);
            }
        }
    }

    /// Re-arms backward pagination after a failed fetch; the unconsumed
    /// link stays valid for a retry.
    pub fn abort_older_fetch(&mut self) {
        self.fetch_in_flight = false;
    }

    /// Inserts a live-arrived message at the newest end. Returns whether it
    /// was actually new.
    pub fn prepend_live(&mut self, message: MessagePayload) -> bool {
        if !self.seen.insert(message.id) {
            return false;
        }
        self.messages.insert(0, message);
        self.to_scroll = true;
        true
    }

    /// UX intent, not a correctness invariant: whether the renderer should
    /// scroll to the newest message.
    pub fn to_scroll(&self) -> bool {
        self.to_scroll
    }

    pub fn mark_rendered_to_bottom(&mut self) {
        self.to_scroll = false;
    }
}

#[cfg(test)]
#[path = "tests/timeline_tests.rs"]
mod tests;
