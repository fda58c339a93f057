use crate::api::{
    self,
    limiter::{IpRateLimiter, LimiterConfig},
    mailer::LogMailer,
    state::AppState,
    store::PgStore,
};
use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub limiter_rps: f64,
    pub limiter_burst: u32,
    pub limiter_enabled: bool,
}

/// Execute the server action.
///
/// # Errors
/// Returns an error if the database is unreachable, the listener cannot
/// bind, or the server stops with a drain error.
pub async fn execute(args: Args) -> Result<()> {
    // Connect to database
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&args.dsn)
        .await
        .context("Failed to connect to database")?;

    let limiter = Arc::new(IpRateLimiter::new(LimiterConfig::new(
        args.limiter_rps,
        args.limiter_burst,
        args.limiter_enabled,
    )));

    let state = AppState::new(Arc::new(PgStore::new(pool)), limiter, Arc::new(LogMailer));

    api::serve(args.port, state).await
}
