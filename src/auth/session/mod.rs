//! Login sessions and their storage.
//!
//! A [`Session`] holds the provider tokens of one browser login. Stores hand out
//! an opaque cookie value for each session: [`cookie::CookieSessionStore`] seals
//! the whole session into it, [`memory::MemorySessionStore`] keeps sessions
//! server-side and uses a random session id.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub mod codec;
pub mod cookie;
pub mod memory;

pub use codec::{CodecError, CookieCodec};
pub use cookie::CookieSessionStore;
pub use memory::MemorySessionStore;

/// Absolute lifetime of a session that can be silently refreshed.
pub const REFRESHABLE_SESSION_MAX_AGE_SECONDS: i64 = 7 * 24 * 60 * 60;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session not found")]
    NotFound,

    #[error("invalid session cookie: {0}")]
    Invalid(#[from] CodecError),

    #[error("session store unavailable")]
    Unavailable,
}

/// Only the token sent to the cluster is kept: the ID token in `oidc` mode,
/// the access token in `openshift` mode. The other one is left empty.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id_token: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub issued_at: i64,
    pub last_activity_at: i64,
    pub expires_at: i64,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &"***")
            .field("id_token", &"***")
            .field("access_token", &"***")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "***"))
            .field("issued_at", &self.issued_at)
            .field("last_activity_at", &self.last_activity_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl Session {
    /// Whether no request was seen for `inactivity_timeout_seconds`. A timeout of
    /// zero disables idle tracking.
    #[must_use]
    pub fn is_idle(&self, now: i64, inactivity_timeout_seconds: u64) -> bool {
        if inactivity_timeout_seconds == 0 {
            return false;
        }
        let timeout = i64::try_from(inactivity_timeout_seconds).unwrap_or(i64::MAX);
        now.saturating_sub(self.last_activity_at) >= timeout
    }

    /// Whether the provider token has expired.
    #[must_use]
    pub fn token_expired(&self, now: i64) -> bool {
        now >= self.expires_at
    }

    /// Whether the session must be treated as logged out, either because it has
    /// been idle for too long or because its token has expired.
    #[must_use]
    pub fn is_expired(&self, now: i64, inactivity_timeout_seconds: u64) -> bool {
        self.is_idle(now, inactivity_timeout_seconds) || self.token_expired(now)
    }

    /// Last instant at which the session may still be used, refreshes included.
    #[must_use]
    pub fn retention_deadline(&self) -> i64 {
        if self.refresh_token.is_some() {
            self.issued_at
                .saturating_add(REFRESHABLE_SESSION_MAX_AGE_SECONDS)
        } else {
            self.expires_at
        }
    }

    /// Whether the session can no longer be used even after a refresh.
    #[must_use]
    pub fn is_retired(&self, now: i64) -> bool {
        now >= self.retention_deadline()
    }

    pub fn touch(&mut self, now: i64) {
        self.last_activity_at = self.last_activity_at.max(now);
    }
}

/// Storage for login sessions.
///
/// Every method takes the session cookie value as the handle.
pub trait SessionStore: Send + Sync + fmt::Debug {
    /// Persist a new session and return the cookie value referencing it.
    ///
    /// # Errors
    /// Returns an error if the session cannot be stored.
    fn create(&self, session: &Session) -> Result<String, SessionError>;

    /// Load the session referenced by a cookie value.
    ///
    /// # Errors
    /// Returns [`SessionError::NotFound`] or [`SessionError::Invalid`] when the
    /// cookie does not reference a usable session.
    fn load(&self, cookie_value: &str) -> Result<Session, SessionError>;

    /// Replace a stored session. Returns the new cookie value when it changed.
    ///
    /// # Errors
    /// Returns an error if the session cannot be stored.
    fn save(&self, cookie_value: &str, session: &Session) -> Result<Option<String>, SessionError>;

    /// Record activity on a session. Returns the new cookie value when it changed.
    ///
    /// # Errors
    /// Returns an error if the session cannot be stored.
    fn touch(
        &self,
        cookie_value: &str,
        session: &mut Session,
        now: i64,
    ) -> Result<Option<String>, SessionError> {
        session.touch(now);
        self.save(cookie_value, session)
    }

    fn delete(&self, cookie_value: &str);
}

#[cfg(test)]
pub(crate) fn test_session(now: i64) -> Session {
    Session {
        session_id: "session-id".to_string(),
        id_token: "id-token".to_string(),
        access_token: "access-token".to_string(),
        refresh_token: None,
        issued_at: now,
        last_activity_at: now,
        expires_at: now + 3600,
    }
}
