use crate::cli::{
    actions::Action,
    commands::{self, logging::ARG_VERBOSITY},
    dispatch::handler,
    telemetry,
};
use anyhow::Result;

/// Parse the command line, install logging and pick the action to run.
///
/// # Errors
/// Returns an error if telemetry cannot be initialized or the arguments are inconsistent.
pub fn start() -> Result<Action> {
    let matches = commands::new().get_matches();

    let verbosity = matches.get_one::<u8>(ARG_VERBOSITY).copied().unwrap_or(0);
    telemetry::init(telemetry::verbosity_level(verbosity))?;

    handler(&matches)
}
