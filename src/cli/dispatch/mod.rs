use crate::{
    auth::options::AuthOptions,
    cli::{
        actions::{Action, server::Args},
        commands::{ARG_PORT, auth, cluster, tls},
    },
    tls::TlsPaths,
};
use anyhow::Result;
use clap::ArgMatches;
use secrecy::SecretString;
use std::path::PathBuf;

/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(9000);

    let tls = match (
        path(matches, tls::ARG_TLS_CERT_FILE),
        path(matches, tls::ARG_TLS_KEY_FILE),
    ) {
        (Some(cert), Some(key)) => Some(TlsPaths::new(cert, key)),
        (None, None) => None,
        _ => anyhow::bail!(
            "--{} and --{} must be set together",
            tls::ARG_TLS_CERT_FILE,
            tls::ARG_TLS_KEY_FILE
        ),
    };

    Ok(Action::Server(Args {
        port,
        tls,
        auth: auth_options(matches),
    }))
}

/// Collect the authentication settings. Consistency is checked later by
/// [`AuthOptions::validate`] so every problem is reported at once.
#[must_use]
pub fn auth_options(matches: &ArgMatches) -> AuthOptions {
    let defaults = AuthOptions::default();

    AuthOptions {
        auth_type: string(matches, auth::ARG_USER_AUTH).unwrap_or(defaults.auth_type),
        issuer_url: string(matches, auth::ARG_ISSUER_URL),
        client_id: string(matches, auth::ARG_CLIENT_ID),
        client_secret: secret(matches, auth::ARG_CLIENT_SECRET),
        client_secret_file: path(matches, auth::ARG_CLIENT_SECRET_FILE),
        ca_file: path(matches, auth::ARG_OIDC_CA_FILE),
        extra_scopes: matches
            .get_many::<String>(auth::ARG_EXTRA_SCOPE)
            .map(|scopes| scopes.cloned().collect())
            .unwrap_or_default(),
        inactivity_timeout_seconds: matches
            .get_one::<u64>(auth::ARG_INACTIVITY_TIMEOUT)
            .copied()
            .unwrap_or(defaults.inactivity_timeout_seconds),
        logout_redirect_url: string(matches, auth::ARG_LOGOUT_REDIRECT),
        cookie_encryption_key_file: path(matches, auth::ARG_COOKIE_ENCRYPTION_KEY_FILE),
        cookie_authentication_key_file: path(matches, auth::ARG_COOKIE_AUTHENTICATION_KEY_FILE),
        static_bearer_token: secret(matches, cluster::ARG_BEARER_TOKEN),
        cluster_endpoint: string(matches, cluster::ARG_CLUSTER_ENDPOINT),
        cluster_ca_file: path(matches, cluster::ARG_CLUSTER_CA_FILE),
        base_address: string(matches, auth::ARG_BASE_ADDRESS).unwrap_or(defaults.base_address),
        base_path: string(matches, auth::ARG_BASE_PATH).unwrap_or(defaults.base_path),
        session_store: string(matches, auth::ARG_SESSION_STORE).unwrap_or(defaults.session_store),
    }
}

fn string(matches: &ArgMatches, id: &str) -> Option<String> {
    matches.get_one::<String>(id).cloned()
}

fn path(matches: &ArgMatches, id: &str) -> Option<PathBuf> {
    matches.get_one::<String>(id).map(PathBuf::from)
}

fn secret(matches: &ArgMatches, id: &str) -> Option<SecretString> {
    string(matches, id).map(SecretString::from)
}
