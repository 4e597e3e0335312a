use super::{CookieCodec, Session, SessionError, SessionStore};
use crate::auth::cookies::SESSION_COOKIE_NAME;
use std::sync::Arc;

/// Stateless store: the sealed session is the cookie value.
#[derive(Debug)]
pub struct CookieSessionStore {
    codec: Arc<CookieCodec>,
    track_activity: bool,
}

impl CookieSessionStore {
    /// With `track_activity` set, every touch re-seals the cookie so the new
    /// last-activity time reaches the browser.
    #[must_use]
    pub fn new(codec: Arc<CookieCodec>, track_activity: bool) -> Self {
        Self {
            codec,
            track_activity,
        }
    }
}

impl SessionStore for CookieSessionStore {
    fn create(&self, session: &Session) -> Result<String, SessionError> {
        Ok(self.codec.seal_json(SESSION_COOKIE_NAME, session)?)
    }

    fn load(&self, cookie_value: &str) -> Result<Session, SessionError> {
        Ok(self.codec.open_json(SESSION_COOKIE_NAME, cookie_value)?)
    }

    fn save(&self, _cookie_value: &str, session: &Session) -> Result<Option<String>, SessionError> {
        Ok(Some(self.codec.seal_json(SESSION_COOKIE_NAME, session)?))
    }

    fn touch(
        &self,
        cookie_value: &str,
        session: &mut Session,
        now: i64,
    ) -> Result<Option<String>, SessionError> {
        if !self.track_activity {
            return Ok(None);
        }
        session.touch(now);
        self.save(cookie_value, session)
    }

    // Nothing is kept server-side; the caller expires the cookie.
    fn delete(&self, _cookie_value: &str) {}
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::auth::session::test_session;

    const NOW: i64 = 1_700_000_000;

    fn store(track_activity: bool) -> CookieSessionStore {
        let codec = CookieCodec::new(b"enc", b"auth").unwrap();
        CookieSessionStore::new(Arc::new(codec), track_activity)
    }

    #[test]
    fn create_then_load() -> anyhow::Result<()> {
        let store = store(false);
        let session = test_session(NOW);
        let cookie = store.create(&session)?;
        assert_eq!(store.load(&cookie)?, session);
        Ok(())
    }

    #[test]
    fn load_rejects_foreign_cookie() {
        let cookie = store(false).create(&test_session(NOW)).unwrap();
        let other = CookieSessionStore::new(
            Arc::new(CookieCodec::new(b"other", b"auth").unwrap()),
            false,
        );
        assert!(matches!(other.load(&cookie), Err(SessionError::Invalid(_))));
    }

    #[test]
    fn touch_reseals_only_when_tracking() -> anyhow::Result<()> {
        let mut session = test_session(NOW);
        let cookie = store(false).create(&session)?;
        assert!(store(false).touch(&cookie, &mut session, NOW + 5)?.is_none());
        assert_eq!(session.last_activity_at, NOW);

        let tracking = store(true);
        let reissued = tracking.touch(&cookie, &mut session, NOW + 5)?;
        let reissued = reissued.ok_or_else(|| anyhow::anyhow!("expected a new cookie"))?;
        assert_eq!(tracking.load(&reissued)?.last_activity_at, NOW + 5);
        Ok(())
    }
}
