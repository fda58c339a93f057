use anyhow::Result;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

/// Initialize JSON logging.
///
/// The default directive comes from the `-v` count; `RUST_LOG` still wins
/// when set. `hyper` and `tokio` internals are pinned to `error` so request
/// logs stay readable.
///
/// # Errors
///
/// Returns an error if a filter directive fails to parse or a global
/// subscriber is already installed.
pub fn init(verbosity_level: Option<tracing::Level>) -> Result<()> {
    let verbosity_level = verbosity_level.unwrap_or(tracing::Level::ERROR);

    let fmt_layer = fmt::layer()
        .json()
        .flatten_event(true)
        .with_target(false)
        .with_file(false)
        .with_line_number(false);

    let filter = EnvFilter::builder()
        .with_default_directive(verbosity_level.into())
        .from_env_lossy()
        .add_directive("hyper=error".parse()?)
        .add_directive("tokio=error".parse()?);

    let subscriber = Registry::default().with(fmt_layer).with(filter);

    tracing::subscriber::set_global_default(subscriber)?;

    Ok(())
}
