use anyhow::Result;
use std::time::Duration;
use tracing::info;

use crate::{api, config::AuthenticationOptions};

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub options: AuthenticationOptions,
    pub reconcile_interval: Duration,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the database is unreachable or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    info!(
        port = args.port,
        access_token_max_age = args.options.access_token_max_age().as_secs(),
        multiple_login = args.options.multiple_login(),
        anonymous = args.options.anonymous(),
        "Starting warden"
    );

    let result = api::new(args.port, args.dsn, args.options, args.reconcile_interval).await;

    crate::cli::telemetry::shutdown_tracer();

    result
}
