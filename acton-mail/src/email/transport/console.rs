//! Console backend for development
//!
//! Logs messages instead of sending them. The SMTP settings are still read from
//! the job's preference snapshot, so a misconfigured deployment fails the same way
//! it would with a real server.

use async_trait::async_trait;
use tracing::{debug, info};

use super::{MailTransport, OutboundMessage, SmtpSettings};
use crate::email::EmailError;

/// Console mail backend
///
/// ```rust
/// use acton_mail::config::Preferences;
/// use acton_mail::email::{ConsoleTransport, MailTransport, OutboundMessage, SmtpSettings};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let prefs = Preferences::new()
///     .with("smtp_server", "localhost")
///     .with("smtp_port", "1025");
/// let settings = SmtpSettings::from_preferences(&prefs)?;
///
/// let message = OutboundMessage {
///     from: "monitor@example.com".to_string(),
///     to: vec!["ops@example.com".to_string()],
///     subject: "Hello".to_string(),
///     ..OutboundMessage::default()
/// };
///
/// ConsoleTransport::new().deliver(&settings, message).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleTransport {
    /// Whether to log the message bodies
    verbose: bool,
}

impl ConsoleTransport {
    /// Create a console backend that logs headers only
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a console backend that also logs both bodies
    #[must_use]
    pub const fn verbose() -> Self {
        Self { verbose: true }
    }
}

#[async_trait]
impl MailTransport for ConsoleTransport {
    async fn deliver(&self, settings: &SmtpSettings, message: OutboundMessage) -> Result<(), EmailError> {
        if message.primary_recipient().is_none() {
            return Err(EmailError::InvalidAddress(String::new()));
        }

        info!(
            host = %settings.host,
            port = settings.port,
            from = %message.from,
            to = ?message.to,
            cc = ?message.cc,
            subject = %message.subject,
            attachments = message.attachments.len(),
            "Console email sent"
        );

        if self.verbose {
            debug!(text = %message.text, "Email text content");
            debug!(html = %message.html, "Email HTML content");
        }

        Ok(())
    }
}
