//! Mail transport port.
//!
//! The engine never talks to a concrete provider; it sends through this
//! trait. Implementations decide transport details (API mailer, SMTP relay).
//! The trait-based design enables mock transports with scripted failures in
//! tests and a logging transport for local runs.

pub mod alert;

use std::collections::HashMap;
use std::future::Future;

use thiserror::Error;

use crate::types::EmailAddress;

pub use alert::{notify_best_effort, AlertError, AlertSink, TracingAlertSink};

/// Errors reported by a mail transport.
///
/// The engine treats every variant the same way — the recipient counts as
/// failed and its dedup reservation is released — so the split exists for
/// logs, not control flow.
#[derive(Debug, Error)]
pub enum SendError {
    /// The provider rejected this message (bad address, content refused).
    #[error("transport rejected message: {0}")]
    Rejected(String),

    /// The provider could not be reached or returned a server-side error.
    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

/// Mail transport abstraction.
pub trait MailSender: Send + Sync {
    /// Delivers one message. `Ok(())` means the provider accepted it.
    fn send(
        &self,
        to: &EmailAddress,
        subject: &str,
        html: &str,
        headers: &HashMap<String, String>,
    ) -> impl Future<Output = Result<(), SendError>> + Send;
}

/// A transport that logs instead of sending. Used by local runs without
/// provider credentials.
#[derive(Debug, Clone, Default)]
pub struct LoggingMailer;

impl MailSender for LoggingMailer {
    async fn send(
        &self,
        to: &EmailAddress,
        subject: &str,
        _html: &str,
        _headers: &HashMap<String, String>,
    ) -> Result<(), SendError> {
        tracing::info!(recipient = %to, subject = %subject, "would send email");
        Ok(())
    }
}
