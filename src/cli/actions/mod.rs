pub mod server;

/// What the parsed command line asks `bridge` to do.
#[derive(Debug)]
pub enum Action {
    /// Serve the console backend.
    Server(server::Args),
}

impl Action {
    /// Run the action to completion.
    ///
    /// # Errors
    /// Returns an error if startup fails or the listener stops with an error.
    pub async fn execute(self) -> anyhow::Result<()> {
        match self {
            Self::Server(args) => server::execute(args).await,
        }
    }
}
