//! Outbound mail abstraction used by the registration flow.
//!
//! Delivery is fire-and-forget from the handler's point of view; the sender
//! decides how to deliver and returns `Ok`/`Err`. The default sender for
//! local dev is [`LogMailer`], which logs and returns `Ok(())`.

use anyhow::Result;
use serde_json::Value;
use tracing::info;

pub trait Mailer: Send + Sync {
    /// Deliver a message or return an error so the failure can be logged.
    ///
    /// # Errors
    /// Implementations return an error when delivery fails.
    fn send(&self, recipient: &str, template: &str, payload: &Value) -> Result<()>;
}

/// Local dev sender that logs the payload instead of sending real email.
#[derive(Clone, Debug)]
pub struct LogMailer;

impl Mailer for LogMailer {
    fn send(&self, recipient: &str, template: &str, payload: &Value) -> Result<()> {
        info!(recipient, template, payload = %payload, "mail delivery stub");
        Ok(())
    }
}
