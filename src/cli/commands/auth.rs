//! Authentication flags, mapped onto [`AuthenticationOptions`].

use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use secrecy::SecretString;
use std::time::Duration;

use crate::config::{AuthenticationOptions, LockoutPolicy};

pub const ARG_JWT_SECRET: &str = "jwt-secret";
pub const ARG_ACCESS_TOKEN_MAX_AGE: &str = "access-token-max-age";
pub const ARG_ACCESS_TOKEN_INACTIVITY_TIMEOUT: &str = "access-token-inactivity-timeout";
pub const ARG_MAXIMUM_CLOCK_SKEW: &str = "maximum-clock-skew";
pub const ARG_LOGIN_HISTORY_RETENTION_PERIOD: &str = "login-history-retention-period";
pub const ARG_AUTH_MAX_FAILURES: &str = "auth-max-failures";
pub const ARG_AUTH_FAILURE_WINDOW: &str = "auth-failure-window";
pub const ARG_AUTH_COOLDOWN: &str = "auth-cooldown";
pub const ARG_MULTIPLE_LOGIN: &str = "multiple-login";
pub const ARG_DISABLE_ANONYMOUS: &str = "disable-anonymous";

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_token_args(command);
    with_lockout_args(command)
}

fn with_token_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_JWT_SECRET)
                .long(ARG_JWT_SECRET)
                .help("Shared secret used to sign and verify tokens")
                .env("WARDEN_JWT_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_ACCESS_TOKEN_MAX_AGE)
                .long(ARG_ACCESS_TOKEN_MAX_AGE)
                .help("Access token lifetime in seconds, 0 for untracked tokens that never expire and cannot be revoked")
                .env("WARDEN_ACCESS_TOKEN_MAX_AGE")
                .default_value("7200")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_ACCESS_TOKEN_INACTIVITY_TIMEOUT)
                .long(ARG_ACCESS_TOKEN_INACTIVITY_TIMEOUT)
                .help("Extra refresh token lifetime beyond the access token, in seconds")
                .env("WARDEN_ACCESS_TOKEN_INACTIVITY_TIMEOUT")
                .default_value("7200")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_MAXIMUM_CLOCK_SKEW)
                .long(ARG_MAXIMUM_CLOCK_SKEW)
                .help("Clock skew tolerated when checking token timestamps, in seconds")
                .env("WARDEN_MAXIMUM_CLOCK_SKEW")
                .default_value("10")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_MULTIPLE_LOGIN)
                .long(ARG_MULTIPLE_LOGIN)
                .help("Allow several active sessions per user")
                .env("WARDEN_MULTIPLE_LOGIN")
                .default_value("true")
                .action(ArgAction::Set)
                .value_parser(clap::value_parser!(bool)),
        )
        .arg(
            Arg::new(ARG_DISABLE_ANONYMOUS)
                .long(ARG_DISABLE_ANONYMOUS)
                .help("Reject requests without credentials instead of treating them as system:anonymous")
                .env("WARDEN_DISABLE_ANONYMOUS")
                .action(ArgAction::SetTrue),
        )
}

fn with_lockout_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_LOGIN_HISTORY_RETENTION_PERIOD)
                .long(ARG_LOGIN_HISTORY_RETENTION_PERIOD)
                .help("How long login events are kept, in seconds")
                .env("WARDEN_LOGIN_HISTORY_RETENTION_PERIOD")
                .default_value("604800")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_AUTH_MAX_FAILURES)
                .long(ARG_AUTH_MAX_FAILURES)
                .help("Failed logins within the failure window that lock an account")
                .env("WARDEN_AUTH_MAX_FAILURES")
                .default_value("10")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new(ARG_AUTH_FAILURE_WINDOW)
                .long(ARG_AUTH_FAILURE_WINDOW)
                .help("Window in which failed logins are counted, in seconds")
                .env("WARDEN_AUTH_FAILURE_WINDOW")
                .default_value("600")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_AUTH_COOLDOWN)
                .long(ARG_AUTH_COOLDOWN)
                .help("Time a locked account waits before it is unlocked, in seconds")
                .env("WARDEN_AUTH_COOLDOWN")
                .default_value("600")
                .value_parser(clap::value_parser!(u64)),
        )
}

fn seconds(matches: &ArgMatches, id: &str) -> Result<Duration> {
    matches
        .get_one::<u64>(id)
        .copied()
        .map(Duration::from_secs)
        .with_context(|| format!("missing required argument: --{id}"))
}

/// # Errors
/// Returns an error if a flag is missing or the resulting options are invalid.
pub fn options(matches: &ArgMatches) -> Result<AuthenticationOptions> {
    let jwt_secret = matches
        .get_one::<String>(ARG_JWT_SECRET)
        .cloned()
        .with_context(|| format!("missing required argument: --{ARG_JWT_SECRET}"))?;

    let lockout = LockoutPolicy {
        max_failures: matches
            .get_one::<usize>(ARG_AUTH_MAX_FAILURES)
            .copied()
            .with_context(|| format!("missing required argument: --{ARG_AUTH_MAX_FAILURES}"))?,
        window: seconds(matches, ARG_AUTH_FAILURE_WINDOW)?,
        cooldown: seconds(matches, ARG_AUTH_COOLDOWN)?,
    };

    let options = AuthenticationOptions::new(SecretString::from(jwt_secret))
        .with_access_token_max_age(seconds(matches, ARG_ACCESS_TOKEN_MAX_AGE)?)
        .with_access_token_inactivity_timeout(seconds(
            matches,
            ARG_ACCESS_TOKEN_INACTIVITY_TIMEOUT,
        )?)
        .with_maximum_clock_skew(seconds(matches, ARG_MAXIMUM_CLOCK_SKEW)?)
        .with_login_history_retention_period(seconds(
            matches,
            ARG_LOGIN_HISTORY_RETENTION_PERIOD,
        )?)
        .with_lockout(lockout)
        .with_multiple_login(
            matches
                .get_one::<bool>(ARG_MULTIPLE_LOGIN)
                .copied()
                .unwrap_or(true),
        )
        .with_anonymous(!matches.get_flag(ARG_DISABLE_ANONYMOUS));

    options.validate()?;
    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn command() -> Command {
        with_args(Command::new("warden"))
    }

    #[test]
    fn defaults() {
        temp_env::with_vars([("WARDEN_JWT_SECRET", None::<&str>)], || {
            let matches = command().get_matches_from(["warden", "--jwt-secret", "s3cret"]);
            let options = options(&matches).unwrap();
            assert_eq!(options.jwt_secret().expose_secret(), "s3cret");
            assert_eq!(options.access_token_max_age(), Duration::from_secs(7200));
            assert_eq!(options.maximum_clock_skew(), Duration::from_secs(10));
            assert_eq!(options.lockout(), LockoutPolicy::default());
            assert!(options.multiple_login());
            assert!(options.anonymous());
        });
    }

    #[test]
    fn flags() {
        let matches = command().get_matches_from([
            "warden",
            "--jwt-secret",
            "s3cret",
            "--access-token-max-age",
            "0",
            "--auth-max-failures",
            "3",
            "--auth-cooldown",
            "60",
            "--multiple-login",
            "false",
            "--disable-anonymous",
        ]);
        let options = options(&matches).unwrap();
        assert_eq!(options.access_token_max_age(), Duration::ZERO);
        assert_eq!(options.lockout().max_failures, 3);
        assert_eq!(options.lockout().cooldown, Duration::from_secs(60));
        assert!(!options.multiple_login());
        assert!(!options.anonymous());
    }

    #[test]
    fn env() {
        temp_env::with_vars(
            [
                ("WARDEN_JWT_SECRET", Some("from-env")),
                ("WARDEN_AUTH_FAILURE_WINDOW", Some("120")),
                ("WARDEN_DISABLE_ANONYMOUS", Some("true")),
            ],
            || {
                let matches = command().get_matches_from(["warden"]);
                let options = options(&matches).unwrap();
                assert_eq!(options.jwt_secret().expose_secret(), "from-env");
                assert_eq!(options.lockout().window, Duration::from_secs(120));
                assert!(!options.anonymous());
            },
        );
    }

    #[test]
    fn invalid_options_are_rejected() {
        let matches = command().get_matches_from([
            "warden",
            "--jwt-secret",
            "s3cret",
            "--auth-max-failures",
            "0",
        ]);
        assert!(options(&matches).is_err());
    }
}
