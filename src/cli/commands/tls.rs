use clap::{Arg, Command};

pub const ARG_TLS_CERT_FILE: &str = "tls-cert-file";
pub const ARG_TLS_KEY_FILE: &str = "tls-key-file";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_TLS_CERT_FILE)
                .long(ARG_TLS_CERT_FILE)
                .help("TLS certificate chain (PEM); serve plain HTTP when unset")
                .env("BRIDGE_TLS_CERT_FILE")
                .requires(ARG_TLS_KEY_FILE),
        )
        .arg(
            Arg::new(ARG_TLS_KEY_FILE)
                .long(ARG_TLS_KEY_FILE)
                .help("TLS private key (PEM)")
                .env("BRIDGE_TLS_KEY_FILE")
                .requires(ARG_TLS_CERT_FILE),
        )
}
