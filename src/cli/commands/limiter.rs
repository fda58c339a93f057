//! Rate limiter flags.

use clap::{Arg, Command};

pub const ARG_LIMITER_RPS: &str = "limiter-rps";
pub const ARG_LIMITER_BURST: &str = "limiter-burst";
pub const ARG_LIMITER_ENABLED: &str = "limiter-enabled";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_LIMITER_RPS)
                .long(ARG_LIMITER_RPS)
                .help("Rate limiter maximum requests per second")
                .default_value("2")
                .env("FOTUJO_LIMITER_RPS")
                .value_parser(clap::value_parser!(f64)),
        )
        .arg(
            Arg::new(ARG_LIMITER_BURST)
                .long(ARG_LIMITER_BURST)
                .help("Rate limiter maximum burst")
                .default_value("4")
                .env("FOTUJO_LIMITER_BURST")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_LIMITER_ENABLED)
                .long(ARG_LIMITER_ENABLED)
                .help("Enable the per-client rate limiter")
                .default_value("true")
                .env("FOTUJO_LIMITER_ENABLED")
                .value_parser(clap::value_parser!(bool)),
        )
}
