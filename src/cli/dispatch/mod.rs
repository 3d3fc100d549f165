//! Map parsed command-line arguments to the action to run.

use anyhow::{Context, Result};
use std::time::Duration;

use crate::cli::{
    actions::{server::Args, Action},
    commands::{auth, ARG_DSN, ARG_PORT, ARG_RECONCILE_INTERVAL},
};

/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>(ARG_DSN)
        .cloned()
        .context("missing required argument: --dsn")?;
    let reconcile_interval = matches
        .get_one::<u64>(ARG_RECONCILE_INTERVAL)
        .copied()
        .map_or(Duration::from_secs(30), Duration::from_secs);

    Ok(Action::Server(Args {
        port,
        dsn,
        options: auth::options(matches)?,
        reconcile_interval,
    }))
}
