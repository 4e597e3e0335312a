//! Authentication settings and their startup validation.
//!
//! [`AuthOptions::validate`] is pure: it only looks at the options and returns
//! every problem found. [`AuthOptions::complete`] reads key and secret files and
//! builds the [`AuthState`] served by the gateway.

use super::{
    AuthState, Authenticator,
    csrf::CsrfVerifier,
    disabled::DisabledAuthenticator,
    oauth2::{OAuth2Authenticator, OAuth2Settings, scopes_for},
    oidc::{ProviderClient, ProviderConfig, ProviderKind},
    session::{CookieCodec, CookieSessionStore, MemorySessionStore, SessionStore},
};
use anyhow::{Context, Result, anyhow};
use secrecy::SecretString;
use std::{fmt, path::PathBuf, str::FromStr, sync::Arc};
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

/// Inactivity timeouts below this are treated as disabled.
pub const MIN_INACTIVITY_TIMEOUT_SECONDS: u64 = 300;

/// Cluster API address used when no off-cluster endpoint is configured.
pub const IN_CLUSTER_ENDPOINT: &str = "https://kubernetes.default.svc";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthType {
    Disabled,
    Oidc,
    OpenShift,
}

impl FromStr for AuthType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "disabled" => Ok(Self::Disabled),
            "oidc" => Ok(Self::Oidc),
            "openshift" => Ok(Self::OpenShift),
            other => Err(format!(
                "unknown auth type {other:?}, expected one of: disabled, oidc, openshift"
            )),
        }
    }
}

impl fmt::Display for AuthType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disabled => "disabled",
            Self::Oidc => "oidc",
            Self::OpenShift => "openshift",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionStoreKind {
    Cookie,
    Memory,
}

impl FromStr for SessionStoreKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "cookie" => Ok(Self::Cookie),
            "memory" => Ok(Self::Memory),
            other => Err(format!(
                "unknown session store {other:?}, expected one of: cookie, memory"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("--{flag} is required: {reason}")]
    Required {
        flag: &'static str,
        reason: &'static str,
    },

    #[error("--{flag} is not allowed: {reason}")]
    Forbidden {
        flag: &'static str,
        reason: &'static str,
    },

    #[error("invalid --{flag}: {reason}")]
    Invalid { flag: &'static str, reason: String },
}

/// Raw authentication settings as they come from the command line.
#[derive(Debug, Clone)]
pub struct AuthOptions {
    pub auth_type: String,
    pub issuer_url: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<SecretString>,
    pub client_secret_file: Option<PathBuf>,
    pub ca_file: Option<PathBuf>,
    pub extra_scopes: Vec<String>,
    pub inactivity_timeout_seconds: u64,
    pub logout_redirect_url: Option<String>,
    pub cookie_encryption_key_file: Option<PathBuf>,
    pub cookie_authentication_key_file: Option<PathBuf>,
    pub static_bearer_token: Option<SecretString>,
    pub cluster_endpoint: Option<String>,
    pub cluster_ca_file: Option<PathBuf>,
    pub base_address: String,
    pub base_path: String,
    pub session_store: String,
}

impl Default for AuthOptions {
    fn default() -> Self {
        Self {
            auth_type: "openshift".to_string(),
            issuer_url: None,
            client_id: None,
            client_secret: None,
            client_secret_file: None,
            ca_file: None,
            extra_scopes: Vec::new(),
            inactivity_timeout_seconds: 0,
            logout_redirect_url: None,
            cookie_encryption_key_file: None,
            cookie_authentication_key_file: None,
            static_bearer_token: None,
            cluster_endpoint: None,
            cluster_ca_file: None,
            base_address: "http://localhost:9000".to_string(),
            base_path: "/".to_string(),
            session_store: "cookie".to_string(),
        }
    }
}

impl AuthOptions {
    /// Check the options for consistency. Returns every problem found.
    #[must_use]
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        let auth_type = match self.auth_type.parse::<AuthType>() {
            Ok(auth_type) => Some(auth_type),
            Err(reason) => {
                errors.push(ConfigError::Invalid {
                    flag: "user-auth",
                    reason,
                });
                None
            }
        };

        if let Err(reason) = self.session_store.parse::<SessionStoreKind>() {
            errors.push(ConfigError::Invalid {
                flag: "session-store",
                reason,
            });
        }

        if let Err(reason) = parse_http_url(&self.base_address) {
            errors.push(ConfigError::Invalid {
                flag: "base-address",
                reason,
            });
        }

        if !self.base_path.starts_with('/') || !self.base_path.ends_with('/') {
            errors.push(ConfigError::Invalid {
                flag: "base-path",
                reason: format!("{:?} must begin and end with '/'", self.base_path),
            });
        }

        if let Some(url) = &self.logout_redirect_url
            && let Err(reason) = parse_http_url(url)
        {
            errors.push(ConfigError::Invalid {
                flag: "user-auth-logout-redirect",
                reason,
            });
        }

        match auth_type {
            Some(AuthType::Oidc) => {
                self.validate_client(&mut errors);
                match &self.issuer_url {
                    None => errors.push(ConfigError::Required {
                        flag: "user-auth-oidc-issuer-url",
                        reason: "oidc authentication needs an issuer",
                    }),
                    Some(issuer) => {
                        if let Err(reason) = parse_http_url(issuer) {
                            errors.push(ConfigError::Invalid {
                                flag: "user-auth-oidc-issuer-url",
                                reason,
                            });
                        }
                    }
                }
                if self.cookie_encryption_key_file.is_none() {
                    errors.push(ConfigError::Required {
                        flag: "cookie-encryption-key-file",
                        reason: "oidc sessions are sealed with configured keys",
                    });
                }
                if self.cookie_authentication_key_file.is_none() {
                    errors.push(ConfigError::Required {
                        flag: "cookie-authentication-key-file",
                        reason: "oidc sessions are sealed with configured keys",
                    });
                }
            }
            Some(AuthType::OpenShift) => {
                self.validate_client(&mut errors);
                if self.issuer_url.is_some() {
                    errors.push(ConfigError::Forbidden {
                        flag: "user-auth-oidc-issuer-url",
                        reason: "openshift discovers its OAuth server from the cluster",
                    });
                }
                if let Err(reason) = parse_http_url(self.cluster_endpoint()) {
                    errors.push(ConfigError::Invalid {
                        flag: "k8s-mode-off-cluster-endpoint",
                        reason,
                    });
                }
                self.forbid_cookie_keys(&mut errors, "openshift generates its own cookie keys");
            }
            Some(AuthType::Disabled) => {
                if self.static_bearer_token.is_none() {
                    errors.push(ConfigError::Required {
                        flag: "k8s-auth-bearer-token",
                        reason: "disabled authentication acts with a static token",
                    });
                }
                self.forbid_cookie_keys(&mut errors, "sessions are not used without authentication");
            }
            None => {}
        }

        errors
    }

    /// Cluster API address: the off-cluster endpoint, or the in-cluster
    /// service when none is set.
    #[must_use]
    pub fn cluster_endpoint(&self) -> &str {
        self.cluster_endpoint
            .as_deref()
            .unwrap_or(IN_CLUSTER_ENDPOINT)
    }

    /// Inactivity timeout actually enforced.
    #[must_use]
    pub fn effective_inactivity_timeout(&self) -> u64 {
        let timeout = self.inactivity_timeout_seconds;
        if timeout > 0 && timeout < MIN_INACTIVITY_TIMEOUT_SECONDS {
            warn!(
                timeout,
                minimum = MIN_INACTIVITY_TIMEOUT_SECONDS,
                "inactivity timeout below the minimum, disabling it"
            );
            return 0;
        }
        timeout
    }

    /// Public URL of the console: base address plus base path.
    ///
    /// # Errors
    /// Returns an error if the base address or path is not valid.
    pub fn base_url(&self) -> Result<Url> {
        let address = Url::parse(&self.base_address)
            .with_context(|| format!("invalid base address: {}", self.base_address))?;
        address
            .join(&self.base_path)
            .with_context(|| format!("invalid base path: {}", self.base_path))
    }

    /// Validate the options and build the authentication state.
    ///
    /// # Errors
    /// Returns an error listing every validation failure, or if key, secret or
    /// CA files cannot be read.
    pub fn complete(&self) -> Result<AuthState> {
        let errors = self.validate();
        if !errors.is_empty() {
            let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
            return Err(anyhow!(
                "invalid authentication configuration:\n  {}",
                messages.join("\n  ")
            ));
        }

        let auth_type = self.auth_type.parse::<AuthType>().map_err(|e| anyhow!(e))?;
        let base_url = self.base_url()?;
        let base_path = base_url.path().to_string();
        let csrf = CsrfVerifier::new(base_url.clone());

        let authenticator = match auth_type {
            AuthType::Disabled => {
                warn!(
                    "user authentication is DISABLED: every request acts with the static bearer token"
                );
                let token = self
                    .static_bearer_token
                    .clone()
                    .context("missing static bearer token")?;
                Authenticator::Disabled(DisabledAuthenticator::new(
                    token,
                    csrf.clone(),
                    base_path.clone(),
                ))
            }
            AuthType::Oidc => Authenticator::OAuth2(Box::new(self.oauth2_authenticator(
                ProviderKind::Oidc,
                &base_url,
                csrf.clone(),
            )?)),
            AuthType::OpenShift => Authenticator::OAuth2(Box::new(self.oauth2_authenticator(
                ProviderKind::OpenShift,
                &base_url,
                csrf.clone(),
            )?)),
        };

        info!(auth_type = %auth_type, base_url = %base_url, "authentication configured");
        Ok(AuthState::new(authenticator, csrf, base_path))
    }

    fn oauth2_authenticator(
        &self,
        kind: ProviderKind,
        base_url: &Url,
        csrf: CsrfVerifier,
    ) -> Result<OAuth2Authenticator> {
        let codec = Arc::new(match kind {
            ProviderKind::Oidc => {
                let encryption = read_key_file(self.cookie_encryption_key_file.as_ref())?;
                let authentication = read_key_file(self.cookie_authentication_key_file.as_ref())?;
                CookieCodec::new(&encryption, &authentication)?
            }
            ProviderKind::OpenShift => {
                info!("generated random cookie keys, sessions will not survive a restart");
                CookieCodec::generate()?
            }
        });

        let inactivity_timeout_seconds = self.effective_inactivity_timeout();
        let store_kind = self
            .session_store
            .parse::<SessionStoreKind>()
            .map_err(|e| anyhow!(e))?;
        let store: Arc<dyn SessionStore> = match store_kind {
            SessionStoreKind::Cookie => Arc::new(CookieSessionStore::new(
                codec.clone(),
                inactivity_timeout_seconds > 0,
            )),
            SessionStoreKind::Memory => {
                Arc::new(MemorySessionStore::new(inactivity_timeout_seconds))
            }
        };

        let (issuer, ca_file) = match kind {
            ProviderKind::Oidc => (self.issuer_url.as_deref(), self.ca_file.clone()),
            ProviderKind::OpenShift => (
                Some(self.cluster_endpoint()),
                self.ca_file.clone().or_else(|| self.cluster_ca_file.clone()),
            ),
        };
        let issuer = Url::parse(issuer.context("missing issuer URL")?)
            .context("invalid issuer URL")?;

        let provider = ProviderClient::new(ProviderConfig {
            kind,
            issuer,
            client_id: self.client_id.clone().context("missing client id")?,
            client_secret: self.client_secret()?,
            redirect_uri: base_url
                .join("auth/callback")
                .context("invalid redirect URI")?,
            ca_file,
        })?;

        let logout_redirect_url = self
            .logout_redirect_url
            .as_deref()
            .map(Url::parse)
            .transpose()
            .context("invalid logout redirect URL")?;

        Ok(OAuth2Authenticator::new(
            provider,
            codec,
            store,
            csrf,
            OAuth2Settings {
                base_url: base_url.clone(),
                scopes: scopes_for(kind, &self.extra_scopes),
                inactivity_timeout_seconds,
                logout_redirect_url,
            },
        ))
    }

    fn client_secret(&self) -> Result<SecretString> {
        if let Some(secret) = &self.client_secret {
            return Ok(secret.clone());
        }
        let path = self
            .client_secret_file
            .as_ref()
            .context("missing client secret")?;
        let secret = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read client secret file: {}", path.display()))?;
        Ok(SecretString::from(secret.trim().to_string()))
    }

    fn validate_client(&self, errors: &mut Vec<ConfigError>) {
        if self.client_id.as_deref().is_none_or(str::is_empty) {
            errors.push(ConfigError::Required {
                flag: "user-auth-oidc-client-id",
                reason: "the login flow needs a client",
            });
        }
        match (&self.client_secret, &self.client_secret_file) {
            (None, None) => errors.push(ConfigError::Required {
                flag: "user-auth-oidc-client-secret",
                reason: "set it or --user-auth-oidc-client-secret-file",
            }),
            (Some(_), Some(_)) => errors.push(ConfigError::Forbidden {
                flag: "user-auth-oidc-client-secret-file",
                reason: "cannot be combined with --user-auth-oidc-client-secret",
            }),
            _ => {}
        }
    }

    fn forbid_cookie_keys(&self, errors: &mut Vec<ConfigError>, reason: &'static str) {
        if self.cookie_encryption_key_file.is_some() {
            errors.push(ConfigError::Forbidden {
                flag: "cookie-encryption-key-file",
                reason,
            });
        }
        if self.cookie_authentication_key_file.is_some() {
            errors.push(ConfigError::Forbidden {
                flag: "cookie-authentication-key-file",
                reason,
            });
        }
    }
}

fn parse_http_url(value: &str) -> Result<Url, String> {
    let url = Url::parse(value).map_err(|err| format!("{value:?} is not a URL: {err}"))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("{value:?} must use http or https"));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(format!("{value:?} has no host"));
    }
    Ok(url)
}

fn read_key_file(path: Option<&PathBuf>) -> Result<Vec<u8>> {
    let path = path.context("missing cookie key file")?;
    let key = std::fs::read(path)
        .with_context(|| format!("Failed to read cookie key file: {}", path.display()))?;
    if key.is_empty() {
        return Err(anyhow!("cookie key file is empty: {}", path.display()));
    }
    Ok(key)
}
