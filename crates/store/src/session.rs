use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::StoreError;

/// The authenticated identity a store operation runs under.
///
/// Passed explicitly into every store call rather than looked up from a
/// global, so tests (and a future multi-account mode) can run several
/// sessions side by side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: String,
    #[serde(default)]
    pub display_name: String,
    /// Bearer token for the remote document store. Absent for local storage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

impl Session {
    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
            id_token: None,
        }
    }

    pub fn with_token(mut self, id_token: impl Into<String>) -> Self {
        self.id_token = Some(id_token.into());
        self
    }

    /// The implicit single-user identity of local-only storage.
    pub fn local() -> Self {
        Self::new("local", "")
    }
}

/// Sign-in state as an ordered event stream.
///
/// Consumers subscribe for `Option<Session>` transitions (signed in /
/// signed out) instead of polling a global. Dropping the receiver
/// unsubscribes.
#[derive(Debug, Clone)]
pub struct AuthState {
    tx: watch::Sender<Option<Session>>,
}

impl AuthState {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    pub fn signed_in(session: Session) -> Self {
        let (tx, _) = watch::channel(Some(session));
        Self { tx }
    }

    pub fn sign_in(&self, session: Session) {
        let _ = self.tx.send(Some(session));
    }

    pub fn sign_out(&self) {
        let _ = self.tx.send(None);
    }

    pub fn current(&self) -> Option<Session> {
        self.tx.borrow().clone()
    }

    /// The signed-in session, or [`StoreError::Unauthenticated`].
    pub fn require_session(&self) -> Result<Session, StoreError> {
        self.current().ok_or(StoreError::Unauthenticated)
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Session>> {
        self.tx.subscribe()
    }
}

impl Default for AuthState {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
