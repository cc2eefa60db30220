//! Explicit session context.
//!
//! The "current session" is an injected object with a lifecycle
//! (`init` on start, `set` on sign-in, `clear` on sign-out) instead of ambient
//! global state. Every identity change bumps a generation counter; resolution
//! work started under an older generation must be discarded.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tidyops_core::UserId;

/// An authenticated user principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: UserId,
    pub email: String,
}

/// A signed-in session as handed out by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub identity: Identity,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn user_id(&self) -> UserId {
        self.identity.id
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Identity + generation captured at the start of a piece of async work.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub user_id: UserId,
    pub generation: u64,
}

#[derive(Debug, Default)]
pub struct SessionContext {
    current: RwLock<Option<Session>>,
    generation: AtomicU64,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// App start: adopt a restored session (if any).
    pub fn init(&self, restored: Option<Session>) {
        match restored {
            Some(session) => self.set(session),
            None => self.clear(),
        }
    }

    /// Install a session. Replacing it with a *different* identity bumps the
    /// generation; a token refresh for the same identity does not.
    pub fn set(&self, session: Session) {
        let mut guard = self.write();
        let same_identity = guard
            .as_ref()
            .is_some_and(|s| s.identity.id == session.identity.id);
        if !same_identity {
            self.generation.fetch_add(1, Ordering::SeqCst);
        }
        *guard = Some(session);
    }

    /// Sign-out / teardown.
    pub fn clear(&self) {
        if self.write().take().is_some() {
            self.generation.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn current(&self) -> Option<Session> {
        self.read().as_ref().cloned()
    }

    pub fn is_authenticated(&self) -> bool {
        self.read().is_some()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> Option<SessionSnapshot> {
        let guard = self.read();
        let session = guard.as_ref()?;
        Some(SessionSnapshot {
            user_id: session.identity.id,
            generation: self.generation(),
        })
    }

    /// Is work started under `snapshot` still allowed to apply its results?
    pub fn is_current(&self, snapshot: &SessionSnapshot) -> bool {
        self.snapshot().is_some_and(|now| now == *snapshot)
    }

    // The guarded value is a plain `Option<Session>`, valid even after a panic
    // in another holder, so poisoning is recovered rather than propagated.
    fn read(&self) -> RwLockReadGuard<'_, Option<Session>> {
        self.current.read().unwrap_or_else(|poisoned| {
            tracing::warn!("session lock poisoned; recovering");
            PoisonError::into_inner(poisoned)
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, Option<Session>> {
        self.current.write().unwrap_or_else(|poisoned| {
            tracing::warn!("session lock poisoned; recovering");
            PoisonError::into_inner(poisoned)
        })
    }
}
