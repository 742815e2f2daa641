use std::collections::BTreeSet;

use shared::domain::UserId;

/// Connected participants of the open room. Connect/disconnect signals
/// arrive unordered and duplicated; every operation is idempotent.
#[derive(Debug, Clone, Default)]
pub struct PresenceSet {
    connected: BTreeSet<UserId>,
}

impl PresenceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Used for both the join snapshot and individual online signals.
    /// Returns whether the set changed.
    pub fn add_many<I>(&mut self, ids: I) -> bool
    where
        I: IntoIterator<Item = UserId>,
    {
        let mut changed = false;
        for id in ids {
            changed |= self.connected.insert(id);
        }
        changed
    }

    pub fn remove(&mut self, id: UserId) -> bool {
        self.connected.remove(&id)
    }

    pub fn contains(&self, id: UserId) -> bool {
        self.connected.contains(&id)
    }

    /// Called on join/leave transitions so presence never leaks across rooms.
    pub fn reset(&mut self) {
        self.connected.clear();
    }

    pub fn len(&self) -> usize {
        self.connected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connected.is_empty()
    }

    pub fn snapshot(&self) -> Vec<UserId> {
        self.connected.iter().copied().collect()
    }
}

#[cfg(test)]
#[path = "tests/presence_tests.rs"]
mod tests;
