use crate::{
    api::{self, proxy::ClusterProxy},
    auth::options::AuthOptions,
    tls::TlsPaths,
};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub tls: Option<TlsPaths>,
    pub auth: AuthOptions,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the configuration is invalid, TLS or key material
/// cannot be loaded, or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let auth = Arc::new(args.auth.complete()?);

    let endpoint = cluster_endpoint(&args.auth)?;
    let proxy = Arc::new(ClusterProxy::new(
        endpoint,
        args.auth.cluster_ca_file.as_deref(),
    )?);
    info!(endpoint = %proxy.endpoint(), "proxying cluster API");

    let app = api::router(auth, proxy);
    api::serve(args.port, args.tls, app).await
}

fn cluster_endpoint(options: &AuthOptions) -> Result<Url> {
    let endpoint = options.cluster_endpoint();
    Url::parse(endpoint).with_context(|| format!("invalid cluster endpoint: {endpoint}"))
}

fn log_startup_args(args: &Args) {
    let scheme = if args.tls.is_some() { "https" } else { "http" };
    let auth = &args.auth;
    let entries = [
        ("listen", format!("{scheme}://[::]:{}", args.port)),
        (
            "tls_cert_file",
            args.tls
                .as_ref()
                .map_or_else(|| "none".to_string(), |tls| tls.cert_path().display().to_string()),
        ),
        ("user_auth", auth.auth_type.clone()),
        ("base_address", auth.base_address.clone()),
        ("base_path", auth.base_path.clone()),
        ("session_store", auth.session_store.clone()),
        (
            "inactivity_timeout",
            auth.inactivity_timeout_seconds.to_string(),
        ),
        (
            "issuer_url",
            auth.issuer_url.clone().unwrap_or_else(|| "n/a".to_string()),
        ),
        (
            "client_id",
            auth.client_id.clone().unwrap_or_else(|| "n/a".to_string()),
        ),
        (
            "client_secret_set",
            (auth.client_secret.is_some() || auth.client_secret_file.is_some()).to_string(),
        ),
        (
            "cluster_endpoint",
            auth.cluster_endpoint().to_string(),
        ),
    ];
    log_entries("Startup configuration", &entries);
}

fn log_entries(title: &str, entries: &[(&str, String)]) {
    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!("{}\n\n{title}:", bridge_banner());
    for (key, value) in entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ =
            std::fmt::Write::write_fmt(&mut message, format_args!("\n  {key}:{padding} {value}"));
    }
    info!("{message}");
}

fn bridge_banner() -> String {
    let short_hash = short_commit(crate::GIT_COMMIT_HASH);
    BRIDGE_BANNER.replace(
        "{VERSION}",
        &format!(" - {} - {}", env!("CARGO_PKG_VERSION"), short_hash),
    )
}

fn short_commit(hash: &str) -> String {
    let trimmed = hash.trim();
    trimmed.get(..7).unwrap_or(trimmed).to_string()
}

const BRIDGE_BANNER: &str = r"
  ___________________________
  |  |  |  |  |  |  |  |  |  |
 =============================  B R I D G E {VERSION}
  \/                       \/";
