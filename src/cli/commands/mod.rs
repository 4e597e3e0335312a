pub mod auth;
pub mod cluster;
pub mod logging;
pub mod tls;

use clap::{
    Arg, ColorChoice, Command,
    builder::styling::{AnsiColor, Effects, Styles},
};

pub const ARG_PORT: &str = "port";

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    let command = Command::new("bridge")
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new(ARG_PORT)
                .short('p')
                .long(ARG_PORT)
                .help("Port to listen on")
                .default_value("9000")
                .env("BRIDGE_PORT")
                .value_parser(clap::value_parser!(u16)),
        );

    let command = tls::with_args(command);
    let command = auth::with_args(command);
    let command = cluster::with_args(command);
    logging::with_args(command)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new() {
        let command = new();

        assert_eq!(command.get_name(), "bridge");
        assert_eq!(
            command.get_about().map(ToString::to_string),
            Some(env!("CARGO_PKG_DESCRIPTION").to_string())
        );
        assert_eq!(
            command.get_version().map(ToString::to_string),
            Some(env!("CARGO_PKG_VERSION").to_string())
        );
    }

    #[test]
    fn test_defaults() {
        temp_env::with_vars(
            [
                ("BRIDGE_PORT", None::<String>),
                ("BRIDGE_USER_AUTH", None),
                ("BRIDGE_BASE_PATH", None),
                ("BRIDGE_SESSION_STORE", None),
                ("BRIDGE_INACTIVITY_TIMEOUT", None),
            ],
            || {
                let matches = new().get_matches_from(vec!["bridge"]);
                assert_eq!(matches.get_one::<u16>(ARG_PORT).copied(), Some(9000));
                assert_eq!(
                    matches.get_one::<String>(auth::ARG_USER_AUTH).cloned(),
                    Some("openshift".to_string())
                );
                assert_eq!(
                    matches.get_one::<String>(auth::ARG_BASE_PATH).cloned(),
                    Some("/".to_string())
                );
                assert_eq!(
                    matches.get_one::<String>(auth::ARG_SESSION_STORE).cloned(),
                    Some("cookie".to_string())
                );
                assert_eq!(
                    matches.get_one::<u64>(auth::ARG_INACTIVITY_TIMEOUT).copied(),
                    Some(0)
                );
            },
        );
    }

    #[test]
    fn test_check_oidc_args() {
        let matches = new().get_matches_from(vec![
            "bridge",
            "--port",
            "8443",
            "--user-auth",
            "oidc",
            "--user-auth-oidc-issuer-url",
            "https://idp.example.test",
            "--user-auth-oidc-client-id",
            "console",
            "--user-auth-oidc-client-secret",
            "s3cret",
            "--user-auth-oidc-extra-scope",
            "email,profile",
            "--user-auth-oidc-extra-scope",
            "groups",
            "--tls-cert-file",
            "/tmp/tls.crt",
            "--tls-key-file",
            "/tmp/tls.key",
        ]);

        assert_eq!(matches.get_one::<u16>(ARG_PORT).copied(), Some(8443));
        assert_eq!(
            matches.get_one::<String>(auth::ARG_ISSUER_URL).cloned(),
            Some("https://idp.example.test".to_string())
        );
        let scopes: Vec<&String> = matches
            .get_many::<String>(auth::ARG_EXTRA_SCOPE)
            .map(Iterator::collect)
            .unwrap_or_default();
        assert_eq!(scopes, ["email", "profile", "groups"]);
        assert_eq!(
            matches.get_one::<String>(tls::ARG_TLS_KEY_FILE).cloned(),
            Some("/tmp/tls.key".to_string())
        );
    }

    #[test]
    fn test_tls_files_go_together() {
        let result = new().try_get_matches_from(vec!["bridge", "--tls-cert-file", "/tmp/tls.crt"]);
        assert_eq!(
            result.map_err(|e| e.kind()).err(),
            Some(clap::error::ErrorKind::MissingRequiredArgument)
        );
    }

    #[test]
    fn test_client_secret_sources_conflict() {
        let result = new().try_get_matches_from(vec![
            "bridge",
            "--user-auth-oidc-client-secret",
            "s3cret",
            "--user-auth-oidc-client-secret-file",
            "/tmp/secret",
        ]);
        assert_eq!(
            result.map_err(|e| e.kind()).err(),
            Some(clap::error::ErrorKind::ArgumentConflict)
        );
    }

    #[test]
    fn test_check_env() {
        temp_env::with_vars(
            [
                ("BRIDGE_PORT", Some("443")),
                ("BRIDGE_USER_AUTH", Some("disabled")),
                ("BRIDGE_K8S_AUTH_BEARER_TOKEN", Some("static-token")),
                (
                    "BRIDGE_K8S_MODE_OFF_CLUSTER_ENDPOINT",
                    Some("https://api.cluster.test:6443"),
                ),
                ("BRIDGE_BASE_PATH", Some("/console/")),
                ("BRIDGE_LOG_LEVEL", Some("info")),
            ],
            || {
                let matches = new().get_matches_from(vec!["bridge"]);
                assert_eq!(matches.get_one::<u16>(ARG_PORT).copied(), Some(443));
                assert_eq!(
                    matches.get_one::<String>(auth::ARG_USER_AUTH).cloned(),
                    Some("disabled".to_string())
                );
                assert_eq!(
                    matches.get_one::<String>(cluster::ARG_BEARER_TOKEN).cloned(),
                    Some("static-token".to_string())
                );
                assert_eq!(
                    matches
                        .get_one::<String>(cluster::ARG_CLUSTER_ENDPOINT)
                        .cloned(),
                    Some("https://api.cluster.test:6443".to_string())
                );
                assert_eq!(
                    matches.get_one::<String>(auth::ARG_BASE_PATH).cloned(),
                    Some("/console/".to_string())
                );
                assert_eq!(
                    matches.get_one::<u8>(logging::ARG_VERBOSITY).copied(),
                    Some(2)
                );
            },
        );
    }

    #[test]
    fn test_check_log_level_env() {
        // loop cover all possible value_parse
        let levels = ["error", "warn", "info", "debug", "trace"];
        for (index, &level) in levels.iter().enumerate() {
            temp_env::with_vars([("BRIDGE_LOG_LEVEL", Some(level))], || {
                let matches = new().get_matches_from(vec!["bridge"]);
                assert_eq!(
                    matches.get_one::<u8>(logging::ARG_VERBOSITY).copied(),
                    u8::try_from(index).ok()
                );
            });
        }
    }

    #[test]
    fn test_check_log_level_verbosity() {
        let levels = ["error", "warn", "info", "debug", "trace"];
        for (index, _) in levels.iter().enumerate() {
            temp_env::with_vars([("BRIDGE_LOG_LEVEL", None::<String>)], || {
                let mut args = vec!["bridge".to_string()];

                // Add the appropriate number of "-v" flags based on the index
                if index > 0 {
                    args.push(format!("-{}", "v".repeat(index)));
                }

                let matches = new().get_matches_from(args);
                assert_eq!(
                    matches.get_one::<u8>(logging::ARG_VERBOSITY).copied(),
                    u8::try_from(index).ok()
                );
            });
        }
    }
}
