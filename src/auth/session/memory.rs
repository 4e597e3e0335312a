use super::{Session, SessionError, SessionStore};
use crate::auth::random_token;
use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};
use tracing::debug;

/// Random bytes behind each server-side session id.
const SESSION_ID_BYTES: usize = 32;

/// Server-side store keyed by a random session id.
///
/// Expired sessions are pruned whenever a new one is created.
#[derive(Debug)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<String, Session>>,
    inactivity_timeout_seconds: u64,
    clock: fn() -> i64,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new(inactivity_timeout_seconds: u64) -> Self {
        Self::with_clock(inactivity_timeout_seconds, crate::auth::unix_now)
    }

    #[must_use]
    pub fn with_clock(inactivity_timeout_seconds: u64, clock: fn() -> i64) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            inactivity_timeout_seconds,
            clock,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().map_or(0, |sessions| sessions.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Session>>, SessionError> {
        self.sessions.lock().map_err(|_| SessionError::Unavailable)
    }
}

impl SessionStore for MemorySessionStore {
    fn create(&self, session: &Session) -> Result<String, SessionError> {
        let id = random_token(SESSION_ID_BYTES).map_err(|_| SessionError::Unavailable)?;
        let now = (self.clock)();
        let timeout = self.inactivity_timeout_seconds;

        let mut sessions = self.lock()?;
        let before = sessions.len();
        sessions.retain(|_, stored| !stored.is_idle(now, timeout) && !stored.is_retired(now));
        let pruned = before - sessions.len();
        if pruned > 0 {
            debug!(pruned, "pruned expired sessions");
        }

        let mut session = session.clone();
        session.session_id.clone_from(&id);
        sessions.insert(id.clone(), session);
        Ok(id)
    }

    fn load(&self, cookie_value: &str) -> Result<Session, SessionError> {
        self.lock()?
            .get(cookie_value)
            .cloned()
            .ok_or(SessionError::NotFound)
    }

    fn save(&self, cookie_value: &str, session: &Session) -> Result<Option<String>, SessionError> {
        let mut sessions = self.lock()?;
        let stored = sessions
            .get_mut(cookie_value)
            .ok_or(SessionError::NotFound)?;
        *stored = session.clone();
        Ok(None)
    }

    fn delete(&self, cookie_value: &str) {
        if let Ok(mut sessions) = self.lock() {
            sessions.remove(cookie_value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::session::test_session;

    const NOW: i64 = 1_700_000_000;

    fn fixed_now() -> i64 {
        NOW
    }

    #[test]
    fn create_assigns_random_ids() -> anyhow::Result<()> {
        let store = MemorySessionStore::with_clock(0, fixed_now);
        let first = store.create(&test_session(NOW))?;
        let second = store.create(&test_session(NOW))?;
        assert_ne!(first, second);
        assert_eq!(first.len(), 43);
        assert_eq!(store.load(&first)?.session_id, first);
        assert_eq!(store.len(), 2);
        Ok(())
    }

    #[test]
    fn load_unknown_is_not_found() {
        let store = MemorySessionStore::new(0);
        assert!(matches!(store.load("nope"), Err(SessionError::NotFound)));
    }

    #[test]
    fn touch_updates_in_place() -> anyhow::Result<()> {
        let store = MemorySessionStore::with_clock(300, fixed_now);
        let id = store.create(&test_session(NOW))?;
        let mut session = store.load(&id)?;
        assert!(store.touch(&id, &mut session, NOW + 100)?.is_none());
        assert_eq!(store.load(&id)?.last_activity_at, NOW + 100);
        Ok(())
    }

    #[test]
    fn delete_removes_session() -> anyhow::Result<()> {
        let store = MemorySessionStore::new(0);
        let id = store.create(&test_session(NOW))?;
        store.delete(&id);
        assert!(matches!(store.load(&id), Err(SessionError::NotFound)));
        assert!(matches!(
            store.save(&id, &test_session(NOW)),
            Err(SessionError::NotFound)
        ));
        Ok(())
    }

    #[test]
    fn create_prunes_expired_sessions() -> anyhow::Result<()> {
        let store = MemorySessionStore::with_clock(300, fixed_now);

        let mut idle = test_session(NOW);
        idle.last_activity_at = NOW - 301;
        let mut expired = test_session(NOW);
        expired.expires_at = NOW - 1;
        let mut refreshable = test_session(NOW);
        refreshable.expires_at = NOW - 1;
        refreshable.refresh_token = Some("refresh".to_string());

        let idle = store.create(&idle)?;
        let expired = store.create(&expired)?;
        let refreshable = store.create(&refreshable)?;
        let fresh = store.create(&test_session(NOW))?;

        assert!(matches!(store.load(&idle), Err(SessionError::NotFound)));
        assert!(matches!(store.load(&expired), Err(SessionError::NotFound)));
        assert!(store.load(&refreshable).is_ok());
        assert!(store.load(&fresh).is_ok());
        assert_eq!(store.len(), 2);
        Ok(())
    }
}
