use clap::{Arg, Command};

pub const ARG_CLUSTER_ENDPOINT: &str = "k8s-mode-off-cluster-endpoint";
pub const ARG_CLUSTER_CA_FILE: &str = "k8s-mode-off-cluster-ca-file";
pub const ARG_BEARER_TOKEN: &str = "k8s-auth-bearer-token";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_CLUSTER_ENDPOINT)
                .long(ARG_CLUSTER_ENDPOINT)
                .help("URL of the cluster API server")
                .long_help(
                    "URL of the cluster API server. Also the discovery base of the OAuth server with --user-auth=openshift. Defaults to the in-cluster service address.",
                )
                .env("BRIDGE_K8S_MODE_OFF_CLUSTER_ENDPOINT"),
        )
        .arg(
            Arg::new(ARG_CLUSTER_CA_FILE)
                .long(ARG_CLUSTER_CA_FILE)
                .help("CA bundle (PEM) used to verify the cluster API server")
                .env("BRIDGE_K8S_MODE_OFF_CLUSTER_CA_FILE"),
        )
        .arg(
            Arg::new(ARG_BEARER_TOKEN)
                .long(ARG_BEARER_TOKEN)
                .help("Static bearer token used for every request with --user-auth=disabled")
                .env("BRIDGE_K8S_AUTH_BEARER_TOKEN")
                .hide_env_values(true),
        )
}
