use std::collections::HashMap;

use async_trait::async_trait;
use shared::protocol::AccountEventKind;
use tracing::debug;

/// Resolved browser/system notification permission. Prompting the user is a
/// host concern; the gate only consumes the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionState {
    Granted,
    Denied,
    /// Not yet decided.
    Default,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationIntent {
    pub kind: AccountEventKind,
    pub text: String,
    /// Per-kind dedup tag: a rapid burst of the same kind collapses to the
    /// latest intent.
    pub tag: &'static str,
}

impl NotificationIntent {
    pub fn new(kind: AccountEventKind, text: impl Into<String>) -> Self {
        let tag = match kind {
            AccountEventKind::Project => "chat-project",
            AccountEventKind::Message => "chat-message",
            AccountEventKind::User => "chat-user",
        };
        Self {
            kind,
            text: text.into(),
            tag,
        }
    }
}

/// A notification must never reference a dead session.
pub fn evaluate(permission: PermissionState, credential_valid: bool) -> bool {
    permission == PermissionState::Granted && credential_valid
}

#[derive(Debug)]
pub struct NotificationGate {
    permission: PermissionState,
    pending: HashMap<&'static str, NotificationIntent>,
}

impl NotificationGate {
    pub fn new() -> Self {
        Self {
            permission: PermissionState::Default,
            pending: HashMap::new(),
        }
    }

    pub fn permission(&self) -> PermissionState {
        self.permission
    }

    pub fn set_permission(&mut self, permission: PermissionState) {
        self.permission = permission;
    }

    /// Queues an intent; a pending intent with the same tag is replaced.
    pub fn offer(&mut self, intent: NotificationIntent) {
        self.pending.insert(intent.tag, intent);
    }

    /// Takes everything pending. Intents are ephemeral: when the gate
    /// suppresses, they are dropped, not held for later.
    pub fn drain(&mut self, credential_valid: bool) -> Vec<NotificationIntent> {
        let pending = std::mem::take(&mut self.pending);
        if !evaluate(self.permission, credential_valid) {
            return Vec::new();
        }
        let mut intents: Vec<NotificationIntent> = pending.into_values().collect();
        intents.sort_by_key(|intent| intent.tag);
        intents
    }
}

impl Default for NotificationGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Delivery mechanism for surfaced intents; system notification API,
/// in-app banner, or anything else the host plugs in.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, intent: NotificationIntent);
}

pub struct MissingNotificationSink;

#[async_trait]
impl NotificationSink for MissingNotificationSink {
    async fn deliver(&self, intent: NotificationIntent) {
        debug!(tag = intent.tag, "no notification sink installed; dropping intent");
    }
}

#[cfg(test)]
#[path = "tests/notify_tests.rs"]
mod tests;
