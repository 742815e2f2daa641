use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;

/// A credential is treated as expired slightly before its real expiry so a
/// request signed at the margin cannot arrive at the server dead.
pub const VALIDITY_MARGIN: Duration = Duration::from_secs(5);

/// Proactive rotation fires this long before expiry; a credential whose
/// remaining lifetime is already inside the margin refreshes immediately.
pub const REFRESH_MARGIN: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub token: String,
    /// Absolute expiry, epoch seconds.
    pub expires_at: i64,
}

impl Credential {
    pub fn from_grant(token: impl Into<String>, expires_in: i64, now: i64) -> Self {
        Self {
            token: token.into(),
            expires_at: now + expires_in,
        }
    }

    pub fn is_valid_at(&self, now: i64) -> bool {
        self.expires_at - now > VALIDITY_MARGIN.as_secs() as i64
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now().timestamp())
    }

    /// Delay until the proactive refresh should fire.
    pub fn refresh_delay_at(&self, now: i64) -> Duration {
        let remaining = self.expires_at - now - REFRESH_MARGIN.as_secs() as i64;
        Duration::from_secs(remaining.max(0) as u64)
    }
}

/// Single owner of the live credential. Only the auth flows write; every
/// other component observes through [`Session::watch`] or reads at the
/// moment of use, never caching a "signed in" boolean.
#[derive(Debug)]
pub struct Session {
    credential: watch::Sender<Option<Credential>>,
}

impl Session {
    pub fn new() -> Self {
        let (credential, _) = watch::channel(None);
        Self { credential }
    }

    pub fn watch(&self) -> watch::Receiver<Option<Credential>> {
        self.credential.subscribe()
    }

    pub fn current(&self) -> Option<Credential> {
        self.credential.borrow().clone()
    }

    pub fn is_present(&self) -> bool {
        self.credential.borrow().is_some()
    }

    pub fn is_valid(&self) -> bool {
        self.credential
            .borrow()
            .as_ref()
            .is_some_and(Credential::is_valid)
    }

    /// Returns the credential only while it is still valid.
    pub fn valid_credential(&self) -> Option<Credential> {
        self.current().filter(Credential::is_valid)
    }

    /// Wholesale replacement; credentials are never patched in place.
    pub(crate) fn replace(&self, credential: Credential) {
        self.credential.send_replace(Some(credential));
    }

    /// Clears the credential. Returns whether one was present, so the
    /// caller can emit the session-ended signal exactly once.
    pub(crate) fn clear(&self) -> bool {
        self.credential.send_replace(None).is_some()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
