//! Authorization-code login for the `oidc` and `openshift` modes.

use super::{
    ActiveSession, AuthError, Resolved, User,
    cookies::{
        CookieAttributes, LOGIN_STATE_COOKIE_NAME, SESSION_COOKIE_NAME, SameSite, chunk_count,
        chunked_cookie_value, clear_chunked_cookie, clear_cookie, cookie_value,
        set_chunked_cookie, set_cookie,
    },
    csrf::CsrfVerifier,
    oidc::{ProviderClient, ProviderKind, TokenResponse},
    random_token, redirect_response, safe_redirect_target,
    session::{CookieCodec, Session, SessionError, SessionStore},
    unix_now,
    verifier::IdTokenError,
};
use axum::{
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use base64ct::{Base64UrlUnpadded, Encoding};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{debug, error, info, warn};
use url::Url;
use utoipa::{IntoParams, ToSchema};

/// Lifetime of the login-state cookie.
pub const LOGIN_STATE_TTL_SECONDS: i64 = 300;

/// Used when the provider does not report `expires_in`.
const DEFAULT_TOKEN_LIFETIME_SECONDS: i64 = 24 * 60 * 60;

const STATE_BYTES: usize = 32;
const CODE_VERIFIER_BYTES: usize = 32;
const SESSION_ID_BYTES: usize = 32;

/// Query (or form) parameters of the provider redirect.
#[derive(Debug, Default, Deserialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Travels in the sealed login-state cookie between login and callback.
#[derive(Serialize, Deserialize)]
struct LoginState {
    state: String,
    code_verifier: String,
    then: String,
    issued_at: i64,
}

#[derive(Debug, Clone)]
pub struct OAuth2Settings {
    pub base_url: Url,
    pub scopes: Vec<String>,
    pub inactivity_timeout_seconds: u64,
    pub logout_redirect_url: Option<Url>,
}

#[derive(Debug)]
pub struct OAuth2Authenticator {
    provider: ProviderClient,
    codec: Arc<CookieCodec>,
    store: Arc<dyn SessionStore>,
    csrf: CsrfVerifier,
    base_path: String,
    secure_cookies: bool,
    scopes: Vec<String>,
    inactivity_timeout_seconds: u64,
    logout_redirect_url: Option<Url>,
}

impl OAuth2Authenticator {
    #[must_use]
    pub fn new(
        provider: ProviderClient,
        codec: Arc<CookieCodec>,
        store: Arc<dyn SessionStore>,
        csrf: CsrfVerifier,
        settings: OAuth2Settings,
    ) -> Self {
        Self {
            provider,
            codec,
            store,
            csrf,
            base_path: settings.base_url.path().to_string(),
            secure_cookies: settings.base_url.scheme() == "https",
            scopes: settings.scopes,
            inactivity_timeout_seconds: settings.inactivity_timeout_seconds,
            logout_redirect_url: settings.logout_redirect_url,
        }
    }

    #[must_use]
    pub fn logout_redirect(&self) -> Option<&Url> {
        self.logout_redirect_url.as_ref()
    }

    pub(crate) async fn resolve_user(
        &self,
        headers: &HeaderMap,
        now: i64,
    ) -> Result<Resolved, AuthError> {
        let cookie = chunked_cookie_value(headers, SESSION_COOKIE_NAME)
            .filter(|value| !value.is_empty())
            .ok_or(AuthError::Unauthenticated)?;
        let chunks = chunk_count(headers, SESSION_COOKIE_NAME);

        let session = self.store.load(&cookie).map_err(|err| {
            debug!(error = %err, "session lookup failed");
            AuthError::Unauthenticated
        })?;

        if session.is_idle(now, self.inactivity_timeout_seconds) || session.is_retired(now) {
            debug!("session expired");
            self.store.delete(&cookie);
            return Err(AuthError::Unauthenticated);
        }

        let mut active = ActiveSession {
            cookie,
            session,
            reissue: false,
            chunks,
        };

        if active.session.token_expired(now) {
            self.refresh_session(&mut active, now).await?;
        } else if self.provider.kind() == ProviderKind::Oidc
            && let Err(err) = self
                .provider
                .verify_id_token(&active.session.id_token, now)
                .await
        {
            // The session stays valid while the provider's keys cannot be fetched.
            if err.is_transient() {
                warn!(error = %err, "could not verify session id token");
                return Err(AuthError::UpstreamIdp(err.to_string()));
            }
            warn!(error = %err, "session id token rejected");
            self.store.delete(&active.cookie);
            return Err(AuthError::Unauthenticated);
        }

        let user = User::new(SecretString::from(
            self.bearer_token(&active.session).to_string(),
        ));
        Ok(Resolved::new(user, Some(active)))
    }

    pub(crate) fn touch(&self, resolved: &mut Resolved, now: i64) -> Result<(), AuthError> {
        let Some(active) = resolved.active.as_mut() else {
            return Ok(());
        };
        if let Some(cookie) = self
            .store
            .touch(&active.cookie, &mut active.session, now)?
        {
            active.cookie = cookie;
            active.reissue = true;
        }
        Ok(())
    }

    pub(crate) fn session_cookies(&self, resolved: &Resolved, now: i64) -> Vec<HeaderValue> {
        let Some(active) = resolved.active.as_ref().filter(|active| active.reissue) else {
            return Vec::new();
        };
        match self.session_cookie(&active.cookie, &active.session, now, active.chunks) {
            Ok(cookies) => cookies,
            Err(err) => {
                error!(error = %err, "failed to build session cookie");
                Vec::new()
            }
        }
    }

    pub(crate) async fn login(&self, then: Option<&str>) -> Response {
        match self.begin_login(then, unix_now()).await {
            Ok(response) => response,
            Err(AuthError::InvalidAuthUrl(reason)) => {
                error!(reason = %reason, "invalid auth code URL");
                (StatusCode::INTERNAL_SERVER_ERROR, "invalid auth code URL").into_response()
            }
            Err(err) => {
                error!(error = %err, "failed to start login");
                self.error_redirect("oauth_error", Vec::new())
            }
        }
    }

    pub(crate) async fn callback(&self, headers: &HeaderMap, params: CallbackParams) -> Response {
        let now = unix_now();
        // The login state is single-use whatever the outcome.
        let mut cookies: Vec<HeaderValue> = self.clear_login_state_cookie().into_iter().collect();

        if let Some(error) = params.error.as_deref() {
            warn!(
                error,
                description = params.error_description.as_deref().unwrap_or_default(),
                "identity provider returned an error"
            );
            return self.error_redirect("oauth_error", cookies);
        }

        let Some(code) = params.code.as_deref().filter(|code| !code.is_empty()) else {
            debug!("callback without an authorization code");
            cookies.extend(self.clear_session_cookies(headers));
            return redirect_response(StatusCode::SEE_OTHER, &self.base_path, cookies);
        };

        match self
            .complete_login(headers, code, params.state.as_deref(), now)
            .await
        {
            Ok((then, session_cookies)) => {
                cookies.extend(session_cookies);
                info!("login completed");
                redirect_response(StatusCode::SEE_OTHER, &then, cookies)
            }
            Err(err) => {
                warn!(error = %err, "login callback failed");
                self.error_redirect(err.code(), cookies)
            }
        }
    }

    pub(crate) fn logout(&self, headers: &HeaderMap) -> Vec<HeaderValue> {
        if let Some(cookie) = chunked_cookie_value(headers, SESSION_COOKIE_NAME) {
            self.store.delete(&cookie);
        }

        let mut cookies = self.clear_session_cookie(chunk_count(headers, SESSION_COOKIE_NAME));
        cookies.extend(self.clear_login_state_cookie());
        match self.csrf.clear_cookie() {
            Ok(cookie) => cookies.push(cookie),
            Err(err) => error!(error = %err, "failed to build csrf cookie"),
        }
        cookies
    }

    pub(crate) fn clear_session_cookies(&self, headers: &HeaderMap) -> Vec<HeaderValue> {
        match chunk_count(headers, SESSION_COOKIE_NAME) {
            0 => Vec::new(),
            chunks => self.clear_session_cookie(chunks),
        }
    }

    async fn begin_login(&self, then: Option<&str>, now: i64) -> Result<Response, AuthError> {
        let state = random_token(STATE_BYTES).map_err(|err| AuthError::Internal(err.to_string()))?;
        let code_verifier =
            random_token(CODE_VERIFIER_BYTES).map_err(|err| AuthError::Internal(err.to_string()))?;

        let url = self
            .provider
            .authorization_url(&self.scopes, &state, &pkce_challenge(&code_verifier))
            .await?;

        let login_state = LoginState {
            state,
            code_verifier,
            then: safe_redirect_target(then, &self.base_path),
            issued_at: now,
        };
        let sealed = self
            .codec
            .seal_json(LOGIN_STATE_COOKIE_NAME, &login_state)
            .map_err(SessionError::from)?;
        let cookie = set_cookie(
            LOGIN_STATE_COOKIE_NAME,
            &sealed,
            &self.login_state_attributes(Some(LOGIN_STATE_TTL_SECONDS)),
        )
        .map_err(|err| AuthError::Internal(err.to_string()))?;

        Ok(redirect_response(
            StatusCode::FOUND,
            url.as_str(),
            vec![cookie],
        ))
    }

    async fn complete_login(
        &self,
        headers: &HeaderMap,
        code: &str,
        state: Option<&str>,
        now: i64,
    ) -> Result<(String, Vec<HeaderValue>), AuthError> {
        let login_state = self.login_state(headers, now)?;

        // Checked before the code is exchanged.
        let state = state.unwrap_or_default();
        if state.is_empty() || !bool::from(state.as_bytes().ct_eq(login_state.state.as_bytes())) {
            return Err(AuthError::InvalidLoginState);
        }

        let tokens = self
            .provider
            .exchange_code(code, &login_state.code_verifier)
            .await?;
        let session = self.session_from_tokens(tokens, None, now).await?;
        let cookie_value = self.store.create(&session)?;

        let mut cookies = self.session_cookie(
            &cookie_value,
            &session,
            now,
            chunk_count(headers, SESSION_COOKIE_NAME),
        )?;
        let csrf_cookie = self
            .csrf
            .issue_cookie()
            .map_err(|err| AuthError::Internal(err.to_string()))?;
        cookies.push(csrf_cookie);

        Ok((login_state.then, cookies))
    }

    async fn refresh_session(&self, active: &mut ActiveSession, now: i64) -> Result<(), AuthError> {
        let Some(refresh_token) = active.session.refresh_token.clone() else {
            self.store.delete(&active.cookie);
            return Err(AuthError::Unauthenticated);
        };

        let refreshed = async {
            let tokens = self.provider.refresh(&refresh_token).await?;
            self.session_from_tokens(tokens, Some(&active.session), now)
                .await
        }
        .await;

        match refreshed {
            Ok(session) => {
                active.session = session;
                if let Some(cookie) = self.store.save(&active.cookie, &active.session)? {
                    active.cookie = cookie;
                }
                active.reissue = true;
                debug!("session tokens refreshed");
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "token refresh failed");
                self.store.delete(&active.cookie);
                Err(AuthError::RefreshFailed(err.to_string()))
            }
        }
    }

    async fn session_from_tokens(
        &self,
        tokens: TokenResponse,
        previous: Option<&Session>,
        now: i64,
    ) -> Result<Session, AuthError> {
        // Only the token forwarded to the cluster is kept.
        let (id_token, access_token, expires_at) = match self.provider.kind() {
            ProviderKind::Oidc => {
                let id_token = tokens
                    .id_token
                    .ok_or(AuthError::IdToken(IdTokenError::Malformed))?;
                let claims = self.provider.verify_id_token(&id_token, now).await?;
                (id_token, String::new(), claims.exp)
            }
            ProviderKind::OpenShift => {
                let lifetime = tokens
                    .expires_in
                    .filter(|seconds| *seconds > 0)
                    .unwrap_or(DEFAULT_TOKEN_LIFETIME_SECONDS);
                (
                    String::new(),
                    tokens.access_token,
                    now.saturating_add(lifetime),
                )
            }
        };

        let session_id = match previous {
            Some(previous) => previous.session_id.clone(),
            None => random_token(SESSION_ID_BYTES)
                .map_err(|err| AuthError::Internal(err.to_string()))?,
        };

        Ok(Session {
            session_id,
            id_token,
            access_token,
            refresh_token: tokens
                .refresh_token
                .or_else(|| previous.and_then(|previous| previous.refresh_token.clone())),
            issued_at: previous.map_or(now, |previous| previous.issued_at),
            last_activity_at: now,
            expires_at,
        })
    }

    fn login_state(&self, headers: &HeaderMap, now: i64) -> Result<LoginState, AuthError> {
        let sealed =
            cookie_value(headers, LOGIN_STATE_COOKIE_NAME).ok_or(AuthError::InvalidLoginState)?;
        let login_state: LoginState = self
            .codec
            .open_json(LOGIN_STATE_COOKIE_NAME, &sealed)
            .map_err(|err| {
                debug!(error = %err, "login state cookie rejected");
                AuthError::InvalidLoginState
            })?;
        if now.saturating_sub(login_state.issued_at) > LOGIN_STATE_TTL_SECONDS {
            return Err(AuthError::InvalidLoginState);
        }
        Ok(login_state)
    }

    fn bearer_token<'a>(&self, session: &'a Session) -> &'a str {
        match self.provider.kind() {
            ProviderKind::Oidc => &session.id_token,
            ProviderKind::OpenShift => &session.access_token,
        }
    }

    /// `previous_chunks` is how many session cookies the browser sent, so
    /// chunks a smaller value no longer needs are expired.
    fn session_cookie(
        &self,
        value: &str,
        session: &Session,
        now: i64,
        previous_chunks: usize,
    ) -> Result<Vec<HeaderValue>, AuthError> {
        set_chunked_cookie(
            SESSION_COOKIE_NAME,
            value,
            &self.session_attributes(Some(session.retention_deadline().saturating_sub(now))),
            previous_chunks,
        )
        .map_err(|err| AuthError::Internal(err.to_string()))
    }

    fn clear_session_cookie(&self, chunks: usize) -> Vec<HeaderValue> {
        clear_chunked_cookie(SESSION_COOKIE_NAME, &self.session_attributes(None), chunks)
            .unwrap_or_default()
    }

    fn session_attributes(&self, max_age: Option<i64>) -> CookieAttributes<'_> {
        CookieAttributes {
            path: &self.base_path,
            secure: self.secure_cookies,
            http_only: true,
            same_site: SameSite::Strict,
            max_age,
        }
    }

    fn clear_login_state_cookie(&self) -> Option<HeaderValue> {
        clear_cookie(LOGIN_STATE_COOKIE_NAME, &self.login_state_attributes(None)).ok()
    }

    // The cookie must come back on the provider's cross-site redirect, which may
    // be a form POST. Browsers accept SameSite=None only with Secure.
    fn login_state_attributes(&self, max_age: Option<i64>) -> CookieAttributes<'_> {
        CookieAttributes {
            path: &self.base_path,
            secure: self.secure_cookies,
            http_only: true,
            same_site: if self.secure_cookies {
                SameSite::None
            } else {
                SameSite::Lax
            },
            max_age,
        }
    }

    fn error_redirect(&self, code: &str, cookies: Vec<HeaderValue>) -> Response {
        let location = format!("{}error?error={code}", self.base_path);
        redirect_response(StatusCode::SEE_OTHER, &location, cookies)
    }
}

/// Scopes requested from the provider.
#[must_use]
pub fn scopes_for(kind: ProviderKind, extra_scopes: &[String]) -> Vec<String> {
    match kind {
        ProviderKind::OpenShift => vec!["user:full".to_string()],
        ProviderKind::Oidc => {
            let mut scopes = vec!["openid".to_string()];
            for scope in extra_scopes {
                let scope = scope.trim();
                if !scope.is_empty() && !scopes.iter().any(|s| s == scope) {
                    scopes.push(scope.to_string());
                }
            }
            scopes
        }
    }
}

/// PKCE `S256` code challenge.
#[must_use]
pub fn pkce_challenge(code_verifier: &str) -> String {
    Base64UrlUnpadded::encode_string(&Sha256::digest(code_verifier.as_bytes()))
}
