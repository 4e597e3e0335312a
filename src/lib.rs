//! # Bridge (Console Backend)
//!
//! `bridge` is the backend of the web console. It terminates TLS, authenticates
//! end users against an `OIDC`/`OAuth2` identity provider, verifies CSRF tokens on
//! state-changing requests and reverse-proxies authenticated requests to the
//! cluster API server with the user's bearer token.
//!
//! ## Authentication
//!
//! Three modes are supported, selected with `--user-auth`:
//!
//! - **`oidc`:** authorization-code flow (with PKCE) against a generic `OIDC`
//!   issuer. The ID token is the bearer token forwarded upstream and is verified
//!   against the issuer's JWKS on every request.
//! - **`openshift`:** authorization-code flow against the cluster's built-in
//!   `OAuth` server. The access token is forwarded upstream.
//! - **`disabled`:** development only. Every request acts with a single static
//!   bearer token.
//!
//! ## Sessions
//!
//! Sessions are stored either in a self-contained cookie (encrypt-then-MAC with
//! two keys) or in a server-side map keyed by a random session id. Both honor an
//! optional inactivity timeout and silent refresh with a refresh token.
//!
//! ## CSRF
//!
//! Mutating requests must echo the `csrf-token` cookie in the `X-CSRFToken`
//! header (double-submit cookie). WebSocket upgrades must also come from the
//! configured origin.

pub mod api;
pub mod auth;
pub mod cli;
pub mod tls;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
