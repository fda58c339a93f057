//! Shared application state and structured background-task tracking.

use crate::api::{limiter::IpRateLimiter, mailer::Mailer, middleware::panic_message, store::Store};
use anyhow::Result;
use futures_util::FutureExt;
use std::{future::Future, panic::AssertUnwindSafe, sync::Arc};
use tokio_util::task::TaskTracker;
use tracing::error;

/// Dependencies injected into every request plus the wait-set the lifecycle
/// coordinator drains on shutdown.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub limiter: Arc<IpRateLimiter>,
    pub mailer: Arc<dyn Mailer>,
    pub tasks: TaskTracker,
}

impl AppState {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, limiter: Arc<IpRateLimiter>, mailer: Arc<dyn Mailer>) -> Self {
        Self {
            store,
            limiter,
            mailer,
            tasks: TaskTracker::new(),
        }
    }

    /// Launch fire-and-forget work registered in the shutdown wait-set.
    ///
    /// The tracker observes completion unconditionally, including when the
    /// task fails or panics, so shutdown can never wait on a task that died
    /// silently. Failures are logged, never propagated to the caller.
    pub fn spawn_background<F>(&self, task: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.tasks.spawn(async move {
            match AssertUnwindSafe(task).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => error!("background task failed: {err:#}"),
                Err(panic) => {
                    error!("background task panicked: {}", panic_message(panic.as_ref()));
                }
            }
        });
    }
}
