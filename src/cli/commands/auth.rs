use clap::{Arg, ArgAction, Command};

pub const ARG_BASE_ADDRESS: &str = "base-address";
pub const ARG_BASE_PATH: &str = "base-path";
pub const ARG_USER_AUTH: &str = "user-auth";
pub const ARG_ISSUER_URL: &str = "user-auth-oidc-issuer-url";
pub const ARG_CLIENT_ID: &str = "user-auth-oidc-client-id";
pub const ARG_CLIENT_SECRET: &str = "user-auth-oidc-client-secret";
pub const ARG_CLIENT_SECRET_FILE: &str = "user-auth-oidc-client-secret-file";
pub const ARG_OIDC_CA_FILE: &str = "user-auth-oidc-ca-file";
pub const ARG_EXTRA_SCOPE: &str = "user-auth-oidc-extra-scope";
pub const ARG_LOGOUT_REDIRECT: &str = "user-auth-logout-redirect";
pub const ARG_INACTIVITY_TIMEOUT: &str = "inactivity-timeout";
pub const ARG_COOKIE_ENCRYPTION_KEY_FILE: &str = "cookie-encryption-key-file";
pub const ARG_COOKIE_AUTHENTICATION_KEY_FILE: &str = "cookie-authentication-key-file";
pub const ARG_SESSION_STORE: &str = "session-store";

pub fn with_args(command: Command) -> Command {
    let command = with_console_args(command);
    let command = with_oidc_args(command);
    with_session_args(command)
}

fn with_console_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_BASE_ADDRESS)
                .long(ARG_BASE_ADDRESS)
                .help("Public URL of the console, example: https://console.example.com")
                .env("BRIDGE_BASE_ADDRESS")
                .default_value("http://localhost:9000"),
        )
        .arg(
            Arg::new(ARG_BASE_PATH)
                .long(ARG_BASE_PATH)
                .help("Path the console is served under; must begin and end with '/'")
                .env("BRIDGE_BASE_PATH")
                .default_value("/"),
        )
        .arg(
            Arg::new(ARG_USER_AUTH)
                .long(ARG_USER_AUTH)
                .help("User authentication: disabled, oidc or openshift")
                .env("BRIDGE_USER_AUTH")
                .default_value("openshift"),
        )
        .arg(
            Arg::new(ARG_LOGOUT_REDIRECT)
                .long(ARG_LOGOUT_REDIRECT)
                .help("URL the browser is sent to after logout")
                .env("BRIDGE_USER_AUTH_LOGOUT_REDIRECT"),
        )
}

fn with_oidc_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_ISSUER_URL)
                .long(ARG_ISSUER_URL)
                .help("OIDC issuer URL (oidc only)")
                .env("BRIDGE_USER_AUTH_OIDC_ISSUER_URL"),
        )
        .arg(
            Arg::new(ARG_CLIENT_ID)
                .long(ARG_CLIENT_ID)
                .help("OAuth2 client id")
                .env("BRIDGE_USER_AUTH_OIDC_CLIENT_ID"),
        )
        .arg(
            Arg::new(ARG_CLIENT_SECRET)
                .long(ARG_CLIENT_SECRET)
                .help("OAuth2 client secret")
                .env("BRIDGE_USER_AUTH_OIDC_CLIENT_SECRET")
                .hide_env_values(true)
                .conflicts_with(ARG_CLIENT_SECRET_FILE),
        )
        .arg(
            Arg::new(ARG_CLIENT_SECRET_FILE)
                .long(ARG_CLIENT_SECRET_FILE)
                .help("File holding the OAuth2 client secret")
                .env("BRIDGE_USER_AUTH_OIDC_CLIENT_SECRET_FILE"),
        )
        .arg(
            Arg::new(ARG_OIDC_CA_FILE)
                .long(ARG_OIDC_CA_FILE)
                .help("CA bundle (PEM) used to verify the identity provider")
                .env("BRIDGE_USER_AUTH_OIDC_CA_FILE"),
        )
        .arg(
            Arg::new(ARG_EXTRA_SCOPE)
                .long(ARG_EXTRA_SCOPE)
                .help("Additional OIDC scope to request (repeatable, comma-separated)")
                .env("BRIDGE_USER_AUTH_OIDC_EXTRA_SCOPE")
                .action(ArgAction::Append)
                .value_delimiter(','),
        )
}

fn with_session_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_INACTIVITY_TIMEOUT)
                .long(ARG_INACTIVITY_TIMEOUT)
                .help("Seconds of inactivity before a session ends; 0 disables, minimum 300")
                .env("BRIDGE_INACTIVITY_TIMEOUT")
                .default_value("0")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_COOKIE_ENCRYPTION_KEY_FILE)
                .long(ARG_COOKIE_ENCRYPTION_KEY_FILE)
                .help("File holding the key used to encrypt session cookies (oidc only)")
                .env("BRIDGE_COOKIE_ENCRYPTION_KEY_FILE"),
        )
        .arg(
            Arg::new(ARG_COOKIE_AUTHENTICATION_KEY_FILE)
                .long(ARG_COOKIE_AUTHENTICATION_KEY_FILE)
                .help("File holding the key used to authenticate session cookies (oidc only)")
                .env("BRIDGE_COOKIE_AUTHENTICATION_KEY_FILE"),
        )
        .arg(
            Arg::new(ARG_SESSION_STORE)
                .long(ARG_SESSION_STORE)
                .help("Where sessions live: cookie or memory")
                .env("BRIDGE_SESSION_STORE")
                .default_value("cookie"),
        )
}
