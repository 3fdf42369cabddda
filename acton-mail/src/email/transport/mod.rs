//! Outbound mail transport
//!
//! Three concerns live here:
//! - [`SmtpSettings`]: connection parameters read from a preference snapshot at the
//!   moment a job is sent (never cached between jobs)
//! - [`OutboundMessage`]: the message assembled from a payload and its rendered bodies
//! - [`MailTransport`]: the seam that opens a connection and sends one message
//!
//! Backends:
//! - **SMTP**: [`SmtpTransport`], one `lettre` session per message (production)
//! - **Console**: [`ConsoleTransport`], logs instead of sending (development)

pub mod console;
pub mod smtp;

use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;

use async_trait::async_trait;

use super::{EmailError, MailPayload, RenderedBodies};
use crate::config::Preferences;

pub use console::ConsoleTransport;
pub use smtp::{SmtpClient, SmtpTransport};

/// SMTP authentication mechanism
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// `AUTH PLAIN`, used for loopback relays
    Plain,
    /// `AUTH LOGIN`, used for everything else
    Login,
}

/// Transport-layer encryption
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Encryption {
    /// Upgrade with STARTTLS; refuse to continue without it
    #[default]
    StartTls,
    /// Implicit TLS from the first byte
    Tls,
    /// Plaintext, for local relays and test servers
    None,
}

impl Encryption {
    fn parse(value: &str) -> Result<Self, EmailError> {
        match value.to_ascii_lowercase().as_str() {
            "" | "starttls" => Ok(Self::StartTls),
            "tls" | "ssl" => Ok(Self::Tls),
            "none" => Ok(Self::None),
            other => Err(EmailError::config(format!(
                "smtp_encryption must be starttls, tls or none, got {other:?}"
            ))),
        }
    }
}

/// Connection parameters for one send
#[derive(Clone, PartialEq, Eq)]
pub struct SmtpSettings {
    /// Server hostname
    pub host: String,
    /// Server port
    pub port: u16,
    /// Login name; empty disables authentication
    pub username: String,
    /// Password
    pub password: String,
    /// Authentication mechanism
    pub auth: AuthMode,
    /// Encryption mode
    pub encryption: Encryption,
}

impl fmt::Debug for SmtpSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("auth", &self.auth)
            .field("encryption", &self.encryption)
            .finish()
    }
}

impl SmtpSettings {
    /// Read settings from a preference snapshot
    ///
    /// Uses `smtp_server`, `smtp_port`, `smtp_user`, `smtp_password` and the optional
    /// `smtp_encryption`.
    ///
    /// # Errors
    ///
    /// Returns `EmailError::MissingConfig` if the server or port is absent and
    /// `EmailError::InvalidConfig` if the port or encryption mode does not parse.
    pub fn from_preferences(preferences: &Preferences) -> Result<Self, EmailError> {
        let host = preferences
            .get_non_empty("smtp_server")
            .ok_or(EmailError::MissingConfig("smtp_server"))?
            .trim()
            .to_string();

        let port = preferences
            .get_non_empty("smtp_port")
            .ok_or(EmailError::MissingConfig("smtp_port"))?;
        let port = port
            .trim()
            .parse()
            .map_err(|_| EmailError::config(format!("smtp_port must be a port number, got {port:?}")))?;

        let encryption = Encryption::parse(preferences.get("smtp_encryption").unwrap_or_default())?;

        let auth = if is_loopback(&host) {
            AuthMode::Plain
        } else {
            AuthMode::Login
        };

        Ok(Self {
            host,
            port,
            username: preferences.get("smtp_user").unwrap_or_default().to_string(),
            password: preferences.get("smtp_password").unwrap_or_default().to_string(),
            auth,
            encryption,
        })
    }

    /// Whether credentials will be presented
    #[must_use]
    pub const fn authenticates(&self) -> bool {
        !self.username.is_empty()
    }
}

fn is_loopback(host: &str) -> bool {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    host.eq_ignore_ascii_case("localhost")
        || host.parse::<IpAddr>().is_ok_and(|ip| ip.is_loopback())
}

/// A message ready to hand to a transport
///
/// `to` holds the primary recipient first, then the additional recipients in
/// payload order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Sender address
    pub from: String,
    /// Sender display name
    pub from_name: String,
    /// `To` recipients, primary first
    pub to: Vec<String>,
    /// CC recipients
    pub cc: Vec<String>,
    /// Subject line
    pub subject: String,
    /// HTML body (styles inlined)
    pub html: String,
    /// Plain-text alternative; empty means HTML only
    pub text: String,
    /// Files to attach
    pub attachments: Vec<PathBuf>,
}

impl OutboundMessage {
    /// Assemble a message from a payload and its rendered bodies
    #[must_use]
    pub fn assemble(payload: &MailPayload, bodies: RenderedBodies) -> Self {
        let mut to = Vec::with_capacity(1 + payload.additional_to.len());
        to.push(payload.to.clone());
        to.extend(payload.additional_to.iter().cloned());

        Self {
            from: payload.from.clone(),
            from_name: payload.from_name.clone(),
            to,
            cc: payload.cc.clone(),
            subject: payload.subject.clone(),
            html: bodies.html,
            text: bodies.text,
            attachments: payload.attachments.clone(),
        }
    }

    /// The primary recipient
    #[must_use]
    pub fn primary_recipient(&self) -> Option<&str> {
        self.to.first().map(String::as_str)
    }

    /// Recipients after the primary one
    #[must_use]
    pub fn additional_recipients(&self) -> &[String] {
        self.to.get(1..).unwrap_or_default()
    }
}

/// Opens a connection and sends one message
///
/// Implemented by every backend. The pipeline calls `deliver` once per job with
/// settings read from that job's preference snapshot.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Connect using `settings` and send `message`
    ///
    /// # Errors
    ///
    /// Returns `EmailError` if the connection cannot be opened, the message cannot be
    /// built, or the server rejects it.
    async fn deliver(&self, settings: &SmtpSettings, message: OutboundMessage) -> Result<(), EmailError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn smtp_prefs(host: &str) -> Preferences {
        Preferences::new()
            .with("smtp_server", host)
            .with("smtp_port", "587")
            .with("smtp_user", "mailer")
            .with("smtp_password", "secret")
    }

    #[test]
    fn test_settings_from_preferences() {
        let settings = SmtpSettings::from_preferences(&smtp_prefs("smtp.example.com")).unwrap();
        assert_eq!(settings.host, "smtp.example.com");
        assert_eq!(settings.port, 587);
        assert_eq!(settings.username, "mailer");
        assert_eq!(settings.password, "secret");
        assert_eq!(settings.auth, AuthMode::Login);
        assert_eq!(settings.encryption, Encryption::StartTls);
        assert!(settings.authenticates());
    }

    #[test]
    fn test_loopback_uses_plain_auth() {
        for host in ["localhost", "127.0.0.1", "::1", "[::1]"] {
            let settings = SmtpSettings::from_preferences(&smtp_prefs(host)).unwrap();
            assert_eq!(settings.auth, AuthMode::Plain, "host {host}");
        }
    }

    #[test]
    fn test_missing_server() {
        let prefs = Preferences::new().with("smtp_port", "25");
        let err = SmtpSettings::from_preferences(&prefs).unwrap_err();
        assert!(matches!(err, EmailError::MissingConfig("smtp_server")));
    }

    #[test]
    fn test_invalid_port() {
        let prefs = smtp_prefs("smtp.example.com").with("smtp_port", "smtp");
        let err = SmtpSettings::from_preferences(&prefs).unwrap_err();
        assert!(matches!(err, EmailError::InvalidConfig(_)));
    }

    #[test]
    fn test_encryption_modes() {
        let prefs = smtp_prefs("smtp.example.com").with("smtp_encryption", "none");
        assert_eq!(SmtpSettings::from_preferences(&prefs).unwrap().encryption, Encryption::None);

        let prefs = smtp_prefs("smtp.example.com").with("smtp_encryption", "TLS");
        assert_eq!(SmtpSettings::from_preferences(&prefs).unwrap().encryption, Encryption::Tls);

        let prefs = smtp_prefs("smtp.example.com").with("smtp_encryption", "rot13");
        assert!(SmtpSettings::from_preferences(&prefs).is_err());
    }

    #[test]
    fn test_debug_redacts_password() {
        let settings = SmtpSettings::from_preferences(&smtp_prefs("smtp.example.com")).unwrap();
        let debug = format!("{settings:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("redacted"));
    }

    #[test]
    fn test_assemble_orders_recipients() {
        let payload = MailPayload::new()
            .from("monitor@example.com")
            .to("ops@example.com")
            .additional_to("a@x.com")
            .additional_to("b@x.com")
            .cc("lead@example.com")
            .subject("Alert")
            .attachment("/tmp/report.csv");
        let bodies = RenderedBodies {
            html: "<p>hi</p>".to_string(),
            text: "hi".to_string(),
        };

        let message = OutboundMessage::assemble(&payload, bodies);
        assert_eq!(message.primary_recipient(), Some("ops@example.com"));
        assert_eq!(message.additional_recipients(), ["a@x.com", "b@x.com"]);
        assert_eq!(message.cc, vec!["lead@example.com"]);
        assert_eq!(message.attachments.len(), 1);
        assert_eq!(message.html, "<p>hi</p>");
        assert_eq!(message.text, "hi");
    }
}
