//! Identity provider client.
//!
//! Provider metadata is discovered lazily on first use and cached for the life
//! of the process; a failed discovery is retried on the next login. ID token
//! signing keys are cached with a TTL and refreshed early (with a cooldown) when
//! a token names an unknown `kid`.

use super::{
    AuthError,
    verifier::{IdTokenClaims, Jwks, IdTokenError, verify_rs256},
};
use anyhow::{Context, Result};
use reqwest::{Client, header::CONTENT_TYPE};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::{
    fmt,
    path::PathBuf,
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};
use tokio::sync::{OnceCell, RwLock};
use tracing::{Instrument, debug, info, info_span, warn};
use url::Url;

const HTTP_TIMEOUT_SECONDS: u64 = 30;
const JWKS_CACHE_TTL_SECONDS: u64 = 300;
const JWKS_REFRESH_COOLDOWN_SECONDS: u64 = 30;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderKind {
    /// Generic `OpenID Connect` issuer.
    Oidc,
    /// The cluster's built-in `OAuth` server.
    OpenShift,
}

impl ProviderKind {
    const fn discovery_path(self) -> &'static str {
        match self {
            Self::Oidc => ".well-known/openid-configuration",
            Self::OpenShift => ".well-known/oauth-authorization-server",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderMetadata {
    #[serde(default)]
    pub issuer: Option<String>,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(default)]
    pub jwks_uri: Option<String>,
}

#[derive(Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "***"))
            .field("id_token", &self.id_token.as_ref().map(|_| "***"))
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    /// Issuer URL (`oidc`) or cluster API endpoint (`openshift`).
    pub issuer: Url,
    pub client_id: String,
    pub client_secret: SecretString,
    pub redirect_uri: Url,
    pub ca_file: Option<PathBuf>,
}

#[derive(Debug)]
struct JwksCache {
    jwks: Jwks,
    fetched_at: Option<Instant>,
}

impl JwksCache {
    fn is_fresh(&self) -> bool {
        self.fetched_at
            .is_some_and(|at| at.elapsed() < Duration::from_secs(JWKS_CACHE_TTL_SECONDS))
    }
}

#[derive(Debug)]
pub struct ProviderClient {
    kind: ProviderKind,
    issuer: Url,
    client_id: String,
    client_secret: SecretString,
    redirect_uri: Url,
    http: Client,
    metadata: OnceCell<ProviderMetadata>,
    jwks: RwLock<JwksCache>,
    last_refresh_unix: AtomicU64,
}

impl ProviderClient {
    /// Build the client. No request is made until the first login.
    ///
    /// # Errors
    /// Returns an error if the CA file cannot be loaded or the HTTP client cannot be built.
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let mut builder = Client::builder()
            .use_rustls_tls()
            .user_agent(crate::APP_USER_AGENT)
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECONDS));

        if let Some(ca_file) = &config.ca_file {
            builder = builder.add_root_certificate(crate::tls::load_reqwest_ca(ca_file)?);
        }

        let http = builder
            .build()
            .context("Failed to build identity provider HTTP client")?;

        Ok(Self {
            kind: config.kind,
            issuer: config.issuer,
            client_id: config.client_id,
            client_secret: config.client_secret,
            redirect_uri: config.redirect_uri,
            http,
            metadata: OnceCell::new(),
            jwks: RwLock::new(JwksCache {
                jwks: Jwks { keys: Vec::new() },
                fetched_at: None,
            }),
            last_refresh_unix: AtomicU64::new(0),
        })
    }

    #[must_use]
    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[must_use]
    pub fn discovery_url(&self) -> String {
        format!(
            "{}/{}",
            self.issuer.as_str().trim_end_matches('/'),
            self.kind.discovery_path()
        )
    }

    /// Provider metadata, discovered on first use.
    ///
    /// # Errors
    /// Returns [`AuthError::UpstreamIdp`] if discovery fails.
    pub async fn metadata(&self) -> Result<&ProviderMetadata, AuthError> {
        self.metadata
            .get_or_try_init(|| async {
                let metadata = self.discover().await.map_err(|err| {
                    warn!(error = %err, url = %self.discovery_url(), "provider discovery failed");
                    AuthError::UpstreamIdp(format!("discovery failed: {err}"))
                })?;
                info!(
                    authorization_endpoint = %metadata.authorization_endpoint,
                    token_endpoint = %metadata.token_endpoint,
                    "provider metadata discovered"
                );
                Ok(metadata)
            })
            .await
    }

    /// Build the URL the browser is sent to for login.
    ///
    /// # Errors
    /// Returns [`AuthError::InvalidAuthUrl`] if the discovered authorization
    /// endpoint is not an absolute URL with a host.
    pub async fn authorization_url(
        &self,
        scopes: &[String],
        state: &str,
        code_challenge: &str,
    ) -> Result<Url, AuthError> {
        let metadata = self.metadata().await?;
        let mut url = Url::parse(&metadata.authorization_endpoint)
            .map_err(|err| AuthError::InvalidAuthUrl(err.to_string()))?;
        if url.host_str().is_none_or(str::is_empty) {
            return Err(AuthError::InvalidAuthUrl(
                "authorization endpoint has no host".to_string(),
            ));
        }

        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", self.redirect_uri.as_str())
            .append_pair("scope", &scopes.join(" "))
            .append_pair("state", state)
            .append_pair("code_challenge", code_challenge)
            .append_pair("code_challenge_method", "S256");
        Ok(url)
    }

    /// Exchange an authorization code for tokens.
    ///
    /// # Errors
    /// Returns [`AuthError::UpstreamIdp`] if the provider rejects the exchange.
    pub async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
    ) -> Result<TokenResponse, AuthError> {
        self.token_request(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("client_id", &self.client_id),
            ("code_verifier", code_verifier),
        ])
        .instrument(info_span!("idp.token", grant_type = "authorization_code"))
        .await
    }

    /// Obtain fresh tokens with a refresh token.
    ///
    /// # Errors
    /// Returns [`AuthError::UpstreamIdp`] if the provider rejects the refresh.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, AuthError> {
        self.token_request(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", &self.client_id),
        ])
        .instrument(info_span!("idp.token", grant_type = "refresh_token"))
        .await
    }

    /// Verify an ID token against the provider's signing keys.
    ///
    /// Flow: use the cached key set; on unknown `kid`, refresh (with cooldown)
    /// and retry once.
    ///
    /// # Errors
    /// Returns an error if the token is invalid or the keys cannot be fetched.
    pub async fn verify_id_token(&self, token: &str, now: i64) -> Result<IdTokenClaims, IdTokenError> {
        let issuer = self.expected_issuer().await?;
        let jwks = self.jwks_snapshot().await?;

        match verify_rs256(token, &jwks, &issuer, &self.client_id, now) {
            Err(IdTokenError::UnknownKid(kid)) => {
                if !self.refresh_on_unknown_kid().await? {
                    warn!(kid = %kid, "id token kid not found and refresh suppressed");
                    return Err(IdTokenError::UnknownKid(kid));
                }
                let jwks = self.jwks.read().await.jwks.clone();
                verify_rs256(token, &jwks, &issuer, &self.client_id, now)
            }
            result => result,
        }
    }

    async fn expected_issuer(&self) -> Result<String, IdTokenError> {
        let metadata = self
            .metadata()
            .await
            .map_err(|err| IdTokenError::KeysUnavailable(err.to_string()))?;
        Ok(metadata
            .issuer
            .clone()
            .unwrap_or_else(|| self.issuer.to_string()))
    }

    async fn discover(&self) -> Result<ProviderMetadata> {
        let url = self.discovery_url();
        let response = self
            .http
            .get(&url)
            .send()
            .instrument(info_span!("idp.discovery", http.method = "GET", url = %url))
            .await?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("discovery request returned {status}");
        }
        let metadata: ProviderMetadata = response
            .json()
            .await
            .context("Invalid provider metadata JSON")?;

        if self.kind == ProviderKind::Oidc {
            let issuer = metadata.issuer.as_deref().unwrap_or_default();
            if issuer.trim_end_matches('/') != self.issuer.as_str().trim_end_matches('/') {
                anyhow::bail!("issuer mismatch: discovered {issuer}, configured {}", self.issuer);
            }
            if metadata.jwks_uri.is_none() {
                anyhow::bail!("provider metadata has no jwks_uri");
            }
        }
        Ok(metadata)
    }

    async fn token_request(&self, params: &[(&str, &str)]) -> Result<TokenResponse, AuthError> {
        let metadata = self.metadata().await?;
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(params)
            .finish();

        let response = self
            .http
            .post(&metadata.token_endpoint)
            .basic_auth(&self.client_id, Some(self.client_secret.expose_secret()))
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .map_err(|err| AuthError::UpstreamIdp(format!("token request failed: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let reason = serde_json::from_str::<OAuthErrorBody>(&body).map_or_else(
                |_| format!("token endpoint returned {status}"),
                |err| {
                    format!(
                        "{}: {}",
                        err.error,
                        err.error_description.unwrap_or_default()
                    )
                },
            );
            return Err(AuthError::UpstreamIdp(reason));
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|err| AuthError::UpstreamIdp(format!("invalid token response: {err}")))
    }

    /// Return a key set snapshot; refresh if stale, keep cache if refresh fails.
    async fn jwks_snapshot(&self) -> Result<Jwks, IdTokenError> {
        let (cached, fresh) = {
            let cache = self.jwks.read().await;
            (cache.jwks.clone(), cache.is_fresh())
        };

        if fresh {
            return Ok(cached);
        }

        if let Err(err) = self.refresh_jwks().await {
            if cached.keys.is_empty() {
                return Err(err);
            }
            warn!(error = %err, "failed to refresh jwks cache, using cached keys");
            return Ok(cached);
        }

        Ok(self.jwks.read().await.jwks.clone())
    }

    async fn refresh_jwks(&self) -> Result<(), IdTokenError> {
        let metadata = self
            .metadata()
            .await
            .map_err(|err| IdTokenError::KeysUnavailable(err.to_string()))?;
        let uri = metadata
            .jwks_uri
            .as_deref()
            .ok_or_else(|| IdTokenError::KeysUnavailable("provider metadata has no jwks_uri".to_string()))?;

        self.last_refresh_unix
            .store(u64::try_from(super::unix_now()).unwrap_or(0), Ordering::Relaxed);

        let response = self
            .http
            .get(uri)
            .send()
            .instrument(info_span!("idp.jwks.fetch", http.method = "GET", url = %uri))
            .await
            .map_err(|err| IdTokenError::KeysUnavailable(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(IdTokenError::KeysUnavailable(format!("jwks request returned {status}")));
        }
        let jwks: Jwks = response
            .json()
            .await
            .map_err(|err| IdTokenError::KeysUnavailable(err.to_string()))?;

        let mut cache = self.jwks.write().await;
        cache.jwks = jwks;
        cache.fetched_at = Some(Instant::now());
        debug!(keys = cache.jwks.keys.len(), "jwks cache refreshed");
        Ok(())
    }

    /// Refresh if a token `kid` is unknown, with cooldown to avoid spamming the provider.
    async fn refresh_on_unknown_kid(&self) -> Result<bool, IdTokenError> {
        let now = u64::try_from(super::unix_now()).unwrap_or(0);
        let last = self.last_refresh_unix.load(Ordering::Relaxed);
        if now.saturating_sub(last) < JWKS_REFRESH_COOLDOWN_SECONDS {
            return Ok(false);
        }
        self.refresh_jwks().await?;
        Ok(true)
    }
}
