use anyhow::{Result, anyhow};
use bridge::cli::{self, telemetry};

#[tokio::main]
async fn main() -> Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("failed to install the rustls crypto provider"))?;

    let action = cli::start()?;
    let result = action.execute().await;

    telemetry::shutdown_tracer();

    result
}
