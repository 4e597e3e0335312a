#![allow(dead_code, clippy::unwrap_used)]

use axum::{
    Router,
    body::Body,
    http::{HeaderMap, Request, Response, header::SET_COOKIE},
};
use bridge::{
    api::{self, proxy::ClusterProxy},
    auth::{
        cookies::SESSION_COOKIE_NAME,
        options::AuthOptions,
        session::{CookieCodec, Session},
        unix_now,
        verifier::{Audience, IdTokenClaims, Jwks, sign_rs256},
    },
};
use secrecy::SecretString;
use std::{path::PathBuf, sync::Arc};
use tower::ServiceExt;
use ulid::Ulid;
use url::Url;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

pub const SIGNING_KEY_PEM: &str = include_str!("../fixtures/idp-signing-key.pem");
pub const KID: &str = "console-test";
pub const CLIENT_ID: &str = "console";
pub const BASE_ADDRESS: &str = "http://console.example.test";
pub const ENCRYPTION_KEY: &[u8] = b"encryption-key-material";
pub const AUTHENTICATION_KEY: &[u8] = b"authentication-key-material";

/// Temporary file removed on drop.
pub struct TempFile(pub PathBuf);

impl TempFile {
    pub fn with_contents(label: &str, contents: &[u8]) -> Self {
        let path = std::env::temp_dir().join(format!("bridge-it-{label}-{}", Ulid::new()));
        std::fs::write(&path, contents).unwrap();
        Self(path)
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

/// A fake OIDC identity provider.
pub struct Idp {
    pub server: MockServer,
}

impl Idp {
    pub async fn start() -> Self {
        let idp = Self {
            server: MockServer::start().await,
        };
        idp.mount_provider().await;
        idp
    }

    /// Serve discovery and signing keys. Needed again after `server.reset()`.
    pub async fn mount_provider(&self) {
        let uri = self.server.uri();
        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "issuer": uri,
                "authorization_endpoint": format!("{uri}/authorize"),
                "token_endpoint": format!("{uri}/token"),
                "jwks_uri": format!("{uri}/keys"),
            })))
            .mount(&self.server)
            .await;

        let jwks = Jwks::from_rsa_private_key_pem_or_der(SIGNING_KEY_PEM.as_bytes(), KID).unwrap();
        Mock::given(method("GET"))
            .and(path("/keys"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&jwks))
            .mount(&self.server)
            .await;
    }

    pub fn id_token(&self, lifetime: i64) -> String {
        self.id_token_with_email(lifetime, "jane@example.test")
    }

    pub fn id_token_with_email(&self, lifetime: i64, email: &str) -> String {
        let now = unix_now();
        let claims = IdTokenClaims {
            iss: self.server.uri(),
            sub: "jane".to_string(),
            aud: Audience::One(CLIENT_ID.to_string()),
            exp: now + lifetime,
            iat: now,
            email: Some(email.to_string()),
        };
        sign_rs256(SIGNING_KEY_PEM.as_bytes(), KID, &claims).unwrap()
    }

    /// Answer every code exchange with `id_token`.
    pub fn token_response(id_token: &str) -> ResponseTemplate {
        Self::token_response_with(id_token, "opaque-access-token", "refresh-me")
    }

    pub fn token_response_with(
        id_token: &str,
        access_token: &str,
        refresh_token: &str,
    ) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": access_token,
            "token_type": "Bearer",
            "expires_in": 3600,
            "refresh_token": refresh_token,
            "id_token": id_token,
        }))
    }
}

/// Options plus the key files they point to.
pub struct OidcSetup {
    pub options: AuthOptions,
    _keys: (TempFile, TempFile),
}

pub fn oidc_options(idp: &Idp, cluster: &MockServer, base_path: &str) -> OidcSetup {
    let encryption = TempFile::with_contents("enc", ENCRYPTION_KEY);
    let authentication = TempFile::with_contents("auth", AUTHENTICATION_KEY);

    let options = AuthOptions {
        auth_type: "oidc".to_string(),
        issuer_url: Some(idp.server.uri()),
        client_id: Some(CLIENT_ID.to_string()),
        client_secret: Some(SecretString::from("client-secret".to_string())),
        cookie_encryption_key_file: Some(encryption.0.clone()),
        cookie_authentication_key_file: Some(authentication.0.clone()),
        cluster_endpoint: Some(cluster.uri()),
        base_address: BASE_ADDRESS.to_string(),
        base_path: base_path.to_string(),
        ..AuthOptions::default()
    };

    OidcSetup {
        options,
        _keys: (encryption, authentication),
    }
}

pub fn disabled_options(cluster: &MockServer, token: &str) -> AuthOptions {
    AuthOptions {
        auth_type: "disabled".to_string(),
        static_bearer_token: Some(SecretString::from(token.to_string())),
        cluster_endpoint: Some(cluster.uri()),
        base_address: BASE_ADDRESS.to_string(),
        ..AuthOptions::default()
    }
}

pub fn app(options: &AuthOptions) -> Router {
    let auth = Arc::new(options.complete().unwrap());
    let endpoint = Url::parse(options.cluster_endpoint.as_deref().unwrap()).unwrap();
    let proxy = Arc::new(ClusterProxy::new(endpoint, None).unwrap());
    api::router(auth, proxy)
}

pub async fn send(app: &Router, request: Request<Body>) -> Response<Body> {
    app.clone().oneshot(request).await.unwrap()
}

pub async fn body_string(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// `name=value` pairs from every `Set-Cookie` header, attributes dropped.
pub fn set_cookies(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .map(str::to_string)
        .collect()
}

pub fn cookie_pair(headers: &HeaderMap, name: &str) -> Option<String> {
    set_cookies(headers)
        .into_iter()
        .filter_map(|cookie| cookie.split(';').next().map(str::to_string))
        .find(|pair| pair.starts_with(&format!("{name}=")))
}

pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    cookie_pair(headers, name)
        .and_then(|pair| pair.split_once('=').map(|(_, value)| value.to_string()))
}

/// `name=value` pairs of every session cookie chunk set on the response,
/// joined into a `Cookie` header value.
pub fn session_cookie_pairs(headers: &HeaderMap) -> String {
    let chunk_prefix = format!("{SESSION_COOKIE_NAME}-");
    set_cookies(headers)
        .into_iter()
        .filter_map(|cookie| cookie.split(';').next().map(str::to_string))
        .filter(|pair| {
            pair.split_once('=').is_some_and(|(name, value)| {
                !value.is_empty()
                    && (name == SESSION_COOKIE_NAME || name.starts_with(&chunk_prefix))
            })
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// The codec the OIDC app seals session cookies with.
pub fn session_codec() -> CookieCodec {
    CookieCodec::new(ENCRYPTION_KEY, AUTHENTICATION_KEY).unwrap()
}

/// A session cookie pair for an OIDC session last active at `last_activity_at`.
pub fn sealed_session(id_token: &str, last_activity_at: i64) -> String {
    let now = unix_now();
    let session = Session {
        session_id: "integration-session".to_string(),
        id_token: id_token.to_string(),
        access_token: String::new(),
        refresh_token: None,
        issued_at: last_activity_at,
        last_activity_at,
        expires_at: now + 3600,
    };
    let sealed = session_codec()
        .seal_json(SESSION_COOKIE_NAME, &session)
        .unwrap();
    format!("{SESSION_COOKIE_NAME}={sealed}")
}
