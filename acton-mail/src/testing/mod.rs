//! Testing utilities
//!
//! [`RecordingTransport`] stands in for an SMTP server and the fixture functions
//! build the pieces a dispatcher needs without touching the filesystem.
//!
//! Compiled for the crate's own tests and, outside them, only with the `testing`
//! feature.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::config::{PreferenceStore, Preferences, DEFAULT_TEMPLATE};
use crate::dispatch::MailPipeline;
use crate::email::{
    EmailError, MailPayload, MailTransport, OutboundMessage, SmtpSettings, TemplateCache,
    TemplateRenderer,
};

/// One message accepted by a [`RecordingTransport`]
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Settings the message was sent with
    pub settings: SmtpSettings,
    /// The message
    pub message: OutboundMessage,
}

#[derive(Debug, Default)]
struct Recorded {
    deliveries: Mutex<Vec<Delivery>>,
    attempts: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// Mail transport that records deliveries in memory
///
/// Clones share what they record. A delay keeps each delivery in flight for a
/// while, which makes concurrency observable; a failure message makes every
/// delivery fail after the delay.
///
/// ```rust
/// use acton_mail::email::{MailTransport, OutboundMessage};
/// use acton_mail::testing::{smtp_preferences, RecordingTransport};
/// use acton_mail::email::SmtpSettings;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let transport = RecordingTransport::new();
/// let settings = SmtpSettings::from_preferences(&smtp_preferences())?;
///
/// let message = OutboundMessage {
///     to: vec!["ops@example.com".to_string()],
///     ..OutboundMessage::default()
/// };
/// transport.deliver(&settings, message).await?;
///
/// assert_eq!(transport.delivery_count(), 1);
/// assert!(transport.was_sent_to("ops@example.com"));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct RecordingTransport {
    delay: Duration,
    failure: Option<String>,
    recorded: Arc<Recorded>,
}

impl RecordingTransport {
    /// Create a transport that accepts every message immediately
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold each delivery for `delay` before completing it
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail every delivery with `message`
    #[must_use]
    pub fn failing(mut self, message: &str) -> Self {
        self.failure = Some(message.to_string());
        self
    }

    /// Number of accepted messages
    #[must_use]
    pub fn delivery_count(&self) -> usize {
        self.recorded.deliveries.lock().len()
    }

    /// Number of delivery attempts, including failed ones
    #[must_use]
    pub fn attempt_count(&self) -> usize {
        self.recorded.attempts.load(Ordering::SeqCst)
    }

    /// Largest number of deliveries that were in flight at the same time
    #[must_use]
    pub fn max_in_flight(&self) -> usize {
        self.recorded.max_in_flight.load(Ordering::SeqCst)
    }

    /// Every accepted message, in completion order
    #[must_use]
    pub fn deliveries(&self) -> Vec<Delivery> {
        self.recorded.deliveries.lock().clone()
    }

    /// The most recently accepted message
    #[must_use]
    pub fn last(&self) -> Option<Delivery> {
        self.recorded.deliveries.lock().last().cloned()
    }

    /// Whether any accepted message was addressed to `address`
    #[must_use]
    pub fn was_sent_to(&self, address: &str) -> bool {
        self.recorded
            .deliveries
            .lock()
            .iter()
            .any(|delivery| delivery.message.to.iter().any(|to| to == address))
    }

    /// Forget everything recorded so far
    pub fn clear(&self) {
        self.recorded.deliveries.lock().clear();
        self.recorded.attempts.store(0, Ordering::SeqCst);
        self.recorded.max_in_flight.store(0, Ordering::SeqCst);
    }
}

#[async_trait]
impl MailTransport for RecordingTransport {
    async fn deliver(&self, settings: &SmtpSettings, message: OutboundMessage) -> Result<(), EmailError> {
        self.recorded.attempts.fetch_add(1, Ordering::SeqCst);
        let now = self.recorded.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.recorded.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.recorded.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(failure) = &self.failure {
            return Err(EmailError::smtp(failure.clone()));
        }

        self.recorded.deliveries.lock().push(Delivery {
            settings: settings.clone(),
            message,
        });
        Ok(())
    }
}

/// Preferences pointing at a local relay on port 1025 without authentication
#[must_use]
pub fn smtp_preferences() -> Preferences {
    Preferences::new()
        .with("smtp_server", "localhost")
        .with("smtp_port", "1025")
        .with("smtp_encryption", "none")
        .with("smtp_from_email", "monitor@example.com")
        .with("smtp_from_name", "Monitor")
}

/// Template used by [`alert_payload`]
pub const ALERT_TEMPLATE: &str = "alert.mail.tmpl";

/// A cache holding the embedded templates plus [`ALERT_TEMPLATE`]
///
/// # Errors
///
/// Returns `EmailError::TemplateSyntax` if a fixture template does not compile.
pub fn template_cache() -> Result<Arc<TemplateCache>, EmailError> {
    let cache = TemplateCache::builder().with_embedded_defaults()?.add(
        ALERT_TEMPLATE,
        r#"<html><head><style>h1 { color: #dc3545; }</style></head><body>
<h1>{{ string_map.host }} is {{ string_map.status }}</h1>
{% if "failures" in int_map %}<p>{{ int_map.failures }} failed checks</p>{% endif %}
{{ content }}
</body></html>"#,
    )?;
    Ok(Arc::new(cache.build()))
}

/// A pipeline using the fixture templates and `transport`
///
/// # Errors
///
/// Returns `EmailError::TemplateSyntax` if a fixture template does not compile.
pub fn pipeline(
    transport: Arc<dyn MailTransport>,
    preferences: PreferenceStore,
) -> Result<MailPipeline, EmailError> {
    Ok(MailPipeline::new(
        TemplateRenderer::new(template_cache()?, DEFAULT_TEMPLATE),
        transport,
        preferences,
    ))
}

/// A payload rendered with [`ALERT_TEMPLATE`]
#[must_use]
pub fn alert_payload(host: &str) -> MailPayload {
    MailPayload::new()
        .to("ops@example.com")
        .subject("Alert")
        .template(ALERT_TEMPLATE)
        .string("host", host)
        .string("status", "down")
        .int("failures", 3)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> SmtpSettings {
        SmtpSettings::from_preferences(&smtp_preferences()).unwrap()
    }

    fn message(to: &str) -> OutboundMessage {
        OutboundMessage {
            to: vec![to.to_string()],
            ..OutboundMessage::default()
        }
    }

    #[tokio::test]
    async fn test_recording_transport_records() {
        let transport = RecordingTransport::new();
        transport.deliver(&settings(), message("a@x.com")).await.unwrap();
        transport.deliver(&settings(), message("b@x.com")).await.unwrap();

        assert_eq!(transport.delivery_count(), 2);
        assert!(transport.was_sent_to("b@x.com"));
        assert_eq!(transport.last().unwrap().message.to, vec!["b@x.com"]);
        assert_eq!(transport.max_in_flight(), 1);

        transport.clear();
        assert_eq!(transport.delivery_count(), 0);
    }

    #[tokio::test]
    async fn test_recording_transport_failure() {
        let transport = RecordingTransport::new().failing("550 rejected");
        let err = transport.deliver(&settings(), message("a@x.com")).await.unwrap_err();

        assert!(matches!(err, EmailError::Send(msg) if msg == "550 rejected"));
        assert_eq!(transport.attempt_count(), 1);
        assert_eq!(transport.delivery_count(), 0);
    }

    #[test]
    fn test_fixture_templates() {
        let cache = template_cache().unwrap();
        assert!(cache.contains(DEFAULT_TEMPLATE));
        assert!(cache.contains(ALERT_TEMPLATE));
    }
}
