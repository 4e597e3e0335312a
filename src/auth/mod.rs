//! User authentication, sessions and CSRF protection.
//!
//! The [`Authenticator`] resolves the end user behind a request (from a session
//! cookie or a static token), drives the authorization-code login flow against
//! the identity provider and tears sessions down on logout. [`AuthState`] bundles
//! it with the [`csrf::CsrfVerifier`] so the gateway middleware can guard every
//! protected route with a single extension.
//!
//! ## Flow Overview
//! 1) `GET {base}auth/login` seals a random `state` plus a PKCE verifier into a
//!    short-lived login-state cookie and redirects to the provider.
//! 2) `{base}auth/callback` checks `state` against that cookie in constant time
//!    before exchanging the code, then stores a [`session::Session`] and sets the
//!    session and CSRF cookies.
//! 3) Protected routes go through [`middleware::require_auth`], which resolves the
//!    user, verifies CSRF, touches the session and injects a [`User`].

use axum::{
    extract::FromRequestParts,
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{LOCATION, SET_COOKIE},
        request::Parts,
    },
    response::{IntoResponse, Response},
};
use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{RngCore, rngs::OsRng};
use secrecy::{ExposeSecret, SecretString};
use std::{
    fmt,
    time::{SystemTime, UNIX_EPOCH},
};
use tracing::error;
use url::Url;

pub mod cookies;
pub mod csrf;
pub mod disabled;
mod error;
pub mod middleware;
pub mod oauth2;
pub mod oidc;
pub mod options;
pub mod session;
pub mod verifier;

pub use error::AuthError;

use self::{
    csrf::CsrfVerifier, disabled::DisabledAuthenticator, oauth2::OAuth2Authenticator,
    session::Session,
};

/// The authenticated end user of a request.
///
/// Only the bearer token is carried: it is what the cluster API server uses to
/// authorize the user's requests.
#[derive(Clone)]
pub struct User {
    token: SecretString,
}

impl User {
    #[must_use]
    pub fn new(token: SecretString) -> Self {
        Self { token }
    }

    #[must_use]
    pub fn token(&self) -> &str {
        self.token.expose_secret()
    }
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User").field("token", &"***").finish()
    }
}

impl<S> FromRequestParts<S> for User
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Self>()
            .cloned()
            .ok_or(StatusCode::UNAUTHORIZED)
    }
}

/// A session that was loaded for the current request.
#[derive(Debug)]
pub(crate) struct ActiveSession {
    pub(crate) cookie: String,
    pub(crate) session: Session,
    pub(crate) reissue: bool,
    /// Number of cookies the session value arrived in.
    pub(crate) chunks: usize,
}

/// Outcome of resolving the user behind a request.
#[derive(Debug)]
pub struct Resolved {
    user: User,
    active: Option<ActiveSession>,
}

impl Resolved {
    pub(crate) fn new(user: User, active: Option<ActiveSession>) -> Self {
        Self { user, active }
    }

    #[must_use]
    pub fn user(&self) -> &User {
        &self.user
    }

    /// Whether a new session cookie has to be sent with the response.
    #[must_use]
    pub fn reissues_session(&self) -> bool {
        self.active.as_ref().is_some_and(|active| active.reissue)
    }
}

/// Authentication strategy selected at startup.
#[derive(Debug)]
pub enum Authenticator {
    Disabled(DisabledAuthenticator),
    OAuth2(Box<OAuth2Authenticator>),
}

impl Authenticator {
    /// Resolve the user behind a request.
    ///
    /// # Errors
    /// Returns [`AuthError::Unauthenticated`] when there is no valid session, or
    /// [`AuthError::RefreshFailed`] when an expired token could not be refreshed.
    pub async fn resolve_user(&self, headers: &HeaderMap, now: i64) -> Result<Resolved, AuthError> {
        match self {
            Self::Disabled(disabled) => Ok(disabled.resolve_user()),
            Self::OAuth2(oauth2) => oauth2.resolve_user(headers, now).await,
        }
    }

    /// Record activity on the resolved session.
    ///
    /// # Errors
    /// Returns an error if the session store fails.
    pub fn touch(&self, resolved: &mut Resolved, now: i64) -> Result<(), AuthError> {
        match self {
            Self::Disabled(_) => Ok(()),
            Self::OAuth2(oauth2) => oauth2.touch(resolved, now),
        }
    }

    /// `Set-Cookie` headers carrying a reissued session, if any.
    #[must_use]
    pub fn session_cookies(&self, resolved: &Resolved, now: i64) -> Vec<HeaderValue> {
        match self {
            Self::Disabled(_) => Vec::new(),
            Self::OAuth2(oauth2) => oauth2.session_cookies(resolved, now),
        }
    }

    /// Start the login flow.
    pub async fn login(&self, then: Option<&str>) -> Response {
        match self {
            Self::Disabled(disabled) => disabled.login(),
            Self::OAuth2(oauth2) => oauth2.login(then).await,
        }
    }

    /// Complete the login flow.
    pub async fn callback(&self, headers: &HeaderMap, params: oauth2::CallbackParams) -> Response {
        match self {
            Self::Disabled(disabled) => disabled.login(),
            Self::OAuth2(oauth2) => oauth2.callback(headers, params).await,
        }
    }

    /// Terminate the current session and return the cookies to expire.
    #[must_use]
    pub fn logout(&self, headers: &HeaderMap) -> Vec<HeaderValue> {
        match self {
            Self::Disabled(disabled) => disabled.logout(),
            Self::OAuth2(oauth2) => oauth2.logout(headers),
        }
    }

    /// Where the browser goes after logout, when configured.
    #[must_use]
    pub fn logout_redirect(&self) -> Option<&Url> {
        match self {
            Self::Disabled(_) => None,
            Self::OAuth2(oauth2) => oauth2.logout_redirect(),
        }
    }

    /// Cookies to expire when a request is rejected as unauthenticated.
    #[must_use]
    pub fn clear_session_cookies(&self, headers: &HeaderMap) -> Vec<HeaderValue> {
        match self {
            Self::Disabled(_) => Vec::new(),
            Self::OAuth2(oauth2) => oauth2.clear_session_cookies(headers),
        }
    }
}

/// Everything the auth endpoints and the gateway middleware need.
#[derive(Debug)]
pub struct AuthState {
    authenticator: Authenticator,
    csrf: CsrfVerifier,
    base_path: String,
}

impl AuthState {
    #[must_use]
    pub fn new(authenticator: Authenticator, csrf: CsrfVerifier, base_path: String) -> Self {
        Self {
            authenticator,
            csrf,
            base_path,
        }
    }

    #[must_use]
    pub fn authenticator(&self) -> &Authenticator {
        &self.authenticator
    }

    #[must_use]
    pub fn csrf(&self) -> &CsrfVerifier {
        &self.csrf
    }

    #[must_use]
    pub fn base_path(&self) -> &str {
        &self.base_path
    }
}

/// Seconds since the Unix epoch.
#[must_use]
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| {
            i64::try_from(duration.as_secs()).unwrap_or(i64::MAX)
        })
}

/// Generate `len` random bytes encoded as URL-safe base64 without padding.
///
/// # Errors
/// Returns an error if the operating system RNG fails.
pub fn random_token(len: usize) -> anyhow::Result<String> {
    let mut bytes = vec![0u8; len];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|err| anyhow::anyhow!("failed to generate random bytes: {err}"))?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}

/// Post-login target: `then` when it stays under `base_path`, otherwise `base_path`.
#[must_use]
pub fn safe_redirect_target(then: Option<&str>, base_path: &str) -> String {
    match then {
        Some(target)
            if target.starts_with(base_path)
                && !target.starts_with("//")
                && !target.contains('\\')
                && !target.chars().any(char::is_control) =>
        {
            target.to_string()
        }
        _ => base_path.to_string(),
    }
}

pub(crate) fn redirect_response(
    status: StatusCode,
    location: &str,
    cookies: Vec<HeaderValue>,
) -> Response {
    let location = match HeaderValue::from_str(location) {
        Ok(location) => location,
        Err(err) => {
            error!(error = %err, "invalid redirect location");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    let mut response = status.into_response();
    let headers = response.headers_mut();
    headers.insert(LOCATION, location);
    for cookie in cookies {
        headers.append(SET_COOKIE, cookie);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redirect_targets_stay_under_base_path() {
        let cases = [
            (Some("/console/k8s/pods"), "/console/", "/console/k8s/pods"),
            (Some("/console/"), "/console/", "/console/"),
            (Some("https://evil.test/"), "/console/", "/console/"),
            (Some("/other/"), "/console/", "/console/"),
            (Some("//evil.test/"), "/", "/"),
            (Some("/\\evil.test"), "/", "/"),
            (Some("/ok\r\nSet-Cookie: x"), "/", "/"),
            (Some("/dashboards"), "/", "/dashboards"),
            (None, "/console/", "/console/"),
        ];
        for (then, base, expected) in cases {
            assert_eq!(safe_redirect_target(then, base), expected, "{then:?}");
        }
    }

    #[test]
    fn redirect_response_sets_location_and_cookies() {
        let response = redirect_response(
            StatusCode::SEE_OTHER,
            "/console/",
            vec![HeaderValue::from_static("a=1"), HeaderValue::from_static("b=2")],
        );
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(
            response.headers().get(LOCATION),
            Some(&HeaderValue::from_static("/console/"))
        );
        assert_eq!(response.headers().get_all(SET_COOKIE).iter().count(), 2);
    }

    #[test]
    fn random_token_length_and_alphabet() -> anyhow::Result<()> {
        let token = random_token(32)?;
        assert_eq!(token.len(), 43);
        assert!(
            token
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
        assert_ne!(token, random_token(32)?);
        Ok(())
    }

    #[test]
    fn user_debug_redacts_token() {
        let user = User::new(SecretString::from("secret-token".to_string()));
        let debug = format!("{user:?}");
        assert!(!debug.contains("secret-token"));
        assert_eq!(user.token(), "secret-token");
    }

    #[test]
    fn unix_now_is_positive() {
        assert!(unix_now() > 1_600_000_000);
    }
}
