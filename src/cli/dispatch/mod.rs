//! Command-line argument dispatch and server initialization.
//!
//! This module parses validated CLI arguments and maps them to the
//! appropriate action, such as starting the API server with its full
//! configuration state.

use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::limiter::{ARG_LIMITER_BURST, ARG_LIMITER_ENABLED, ARG_LIMITER_RPS};
use anyhow::{Context, Result};

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(4000);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;

    Ok(Action::Server(Args {
        port,
        dsn,
        limiter_rps: matches
            .get_one::<f64>(ARG_LIMITER_RPS)
            .copied()
            .unwrap_or(2.0),
        limiter_burst: matches
            .get_one::<u32>(ARG_LIMITER_BURST)
            .copied()
            .unwrap_or(4),
        limiter_enabled: matches
            .get_one::<bool>(ARG_LIMITER_ENABLED)
            .copied()
            .unwrap_or(true),
    }))
}
