//! SMTP backend for sending mail
//!
//! Uses the `lettre` crate. Every message gets its own session, opened from the
//! settings of the job that produced it and closed once the message is sent, so
//! no connection outlives its job.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Attachment, Mailbox, MultiPart, SinglePart},
    transport::smtp::{
        authentication::{Credentials, Mechanism},
        client::{AsyncSmtpConnection, TlsParameters},
        extension::ClientId,
    },
    Address, Message,
};
use tracing::{debug, info};

use super::{AuthMode, Encryption, MailTransport, OutboundMessage, SmtpSettings};
use crate::email::EmailError;

/// Time allowed to open a connection
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Time allowed to transmit one message
pub const SEND_TIMEOUT: Duration = Duration::from_secs(10);

impl AuthMode {
    const fn mechanism(self) -> Mechanism {
        match self {
            Self::Plain => Mechanism::Plain,
            Self::Login => Mechanism::Login,
        }
    }
}

/// One open SMTP session
///
/// Holds a single connection from greeting to `QUIT`.
pub struct SmtpClient {
    connection: AsyncSmtpConnection,
}

impl SmtpClient {
    /// Open a session described by `settings`
    ///
    /// Connects, upgrades with STARTTLS when requested and authenticates when a
    /// user name is configured.
    ///
    /// # Errors
    ///
    /// Returns `EmailError::Connection` if the server cannot be reached, refuses the
    /// handshake or the credentials, or the TLS parameters are invalid.
    pub async fn connect(settings: &SmtpSettings) -> Result<Self, EmailError> {
        let hello = ClientId::default();
        let wrapper = match settings.encryption {
            Encryption::Tls => Some(tls_parameters(&settings.host)?),
            Encryption::StartTls | Encryption::None => None,
        };

        let mut connection = AsyncSmtpConnection::connect_tokio1(
            (settings.host.as_str(), settings.port),
            Some(CONNECT_TIMEOUT),
            &hello,
            wrapper,
            None,
        )
        .await
        .map_err(|e| EmailError::connection(e.to_string()))?;

        if let Err(e) = handshake(&mut connection, settings, &hello).await {
            connection.abort().await;
            return Err(e);
        }

        debug!(host = %settings.host, port = settings.port, "SMTP connection established");
        Ok(Self { connection })
    }

    /// Send one message over this session
    ///
    /// # Errors
    ///
    /// Returns `EmailError::Timeout` if the send exceeds [`SEND_TIMEOUT`] and
    /// `EmailError::Send` if the server rejects the message.
    pub async fn send(&mut self, message: &Message) -> Result<(), EmailError> {
        let body = message.formatted();
        tokio::time::timeout(SEND_TIMEOUT, self.connection.send(message.envelope(), &body))
            .await
            .map_err(|_| EmailError::Timeout(SEND_TIMEOUT))?
            .map_err(|e| EmailError::smtp(e.to_string()))?;

        Ok(())
    }

    /// End the session with `QUIT`
    ///
    /// The message is already accepted by now, so a failed goodbye is only logged.
    pub async fn quit(mut self) {
        match tokio::time::timeout(SEND_TIMEOUT, self.connection.quit()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => debug!(error = %e, "SMTP QUIT failed"),
            Err(_) => debug!("SMTP QUIT timed out"),
        }
    }

    /// Drop the session without waiting for the server
    pub async fn abort(mut self) {
        self.connection.abort().await;
    }
}

async fn handshake(
    connection: &mut AsyncSmtpConnection,
    settings: &SmtpSettings,
    hello: &ClientId,
) -> Result<(), EmailError> {
    if settings.encryption == Encryption::StartTls {
        connection
            .starttls(tls_parameters(&settings.host)?, hello)
            .await
            .map_err(|e| EmailError::connection(format!("STARTTLS failed: {e}")))?;
    }

    if settings.authenticates() {
        let credentials = Credentials::new(settings.username.clone(), settings.password.clone());
        connection
            .auth(&[settings.auth.mechanism()], &credentials)
            .await
            .map_err(|e| EmailError::connection(format!("authentication failed: {e}")))?;
    }

    Ok(())
}

fn tls_parameters(host: &str) -> Result<TlsParameters, EmailError> {
    TlsParameters::new(host.to_string())
        .map_err(|e| EmailError::connection(format!("TLS parameters error: {e}")))
}

fn parse_address(address: &str) -> Result<Address, EmailError> {
    address
        .trim()
        .parse()
        .map_err(|_| EmailError::InvalidAddress(address.to_string()))
}

fn sender_mailbox(message: &OutboundMessage) -> Result<Mailbox, EmailError> {
    let name = (!message.from_name.is_empty()).then(|| message.from_name.clone());
    Ok(Mailbox::new(name, parse_address(&message.from)?))
}

async fn attachment_part(path: &Path) -> Result<SinglePart, EmailError> {
    let body = tokio::fs::read(path).await.map_err(|source| EmailError::Attachment {
        path: path.display().to_string(),
        source,
    })?;

    let filename = path
        .file_name()
        .map_or_else(|| "attachment".to_string(), |n| n.to_string_lossy().into_owned());

    let mime = mime_guess::from_path(path).first_or_octet_stream();
    let content_type = ContentType::parse(mime.as_ref())
        .map_err(|e| EmailError::Build(format!("content type {mime}: {e}")))?;

    Ok(Attachment::new(filename).body(body, content_type))
}

/// Build a lettre `Message` from an assembled message
///
/// The HTML body is the primary part; a non-empty text body is added as its
/// alternative. Attachments are read from disk here.
///
/// # Errors
///
/// Returns `EmailError::InvalidAddress` for an unparseable address,
/// `EmailError::Attachment` for an unreadable attachment and `EmailError::Build`
/// if lettre rejects the message.
pub async fn build_message(message: &OutboundMessage) -> Result<Message, EmailError> {
    let mut builder = Message::builder()
        .from(sender_mailbox(message)?)
        .subject(message.subject.clone());

    for to_addr in &message.to {
        builder = builder.to(Mailbox::new(None, parse_address(to_addr)?));
    }

    for cc_addr in &message.cc {
        builder = builder.cc(Mailbox::new(None, parse_address(cc_addr)?));
    }

    let built = if message.attachments.is_empty() {
        if message.text.is_empty() {
            builder.singlepart(SinglePart::html(message.html.clone()))
        } else {
            builder.multipart(MultiPart::alternative_plain_html(
                message.text.clone(),
                message.html.clone(),
            ))
        }
    } else {
        let mut mixed = if message.text.is_empty() {
            MultiPart::mixed().singlepart(SinglePart::html(message.html.clone()))
        } else {
            MultiPart::mixed().multipart(MultiPart::alternative_plain_html(
                message.text.clone(),
                message.html.clone(),
            ))
        };
        for path in &message.attachments {
            mixed = mixed.singlepart(attachment_part(path).await?);
        }
        builder.multipart(mixed)
    };

    built.map_err(|e| EmailError::Build(e.to_string()))
}

/// SMTP mail backend
///
/// ```rust,no_run
/// use acton_mail::config::Preferences;
/// use acton_mail::email::{MailTransport, OutboundMessage, SmtpSettings, SmtpTransport};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let prefs = Preferences::new()
///     .with("smtp_server", "smtp.example.com")
///     .with("smtp_port", "587")
///     .with("smtp_user", "mailer")
///     .with("smtp_password", "secret");
/// let settings = SmtpSettings::from_preferences(&prefs)?;
///
/// let message = OutboundMessage {
///     from: "monitor@example.com".to_string(),
///     to: vec!["ops@example.com".to_string()],
///     subject: "Hello".to_string(),
///     html: "<p>Hello</p>".to_string(),
///     ..OutboundMessage::default()
/// };
///
/// SmtpTransport.deliver(&settings, message).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct SmtpTransport;

#[async_trait]
impl MailTransport for SmtpTransport {
    async fn deliver(&self, settings: &SmtpSettings, message: OutboundMessage) -> Result<(), EmailError> {
        let email = build_message(&message).await?;
        let mut client = SmtpClient::connect(settings).await?;
        if let Err(e) = client.send(&email).await {
            client.abort().await;
            return Err(e);
        }
        client.quit().await;

        info!(
            host = %settings.host,
            to = ?message.to,
            subject = %message.subject,
            "Email sent"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    /// Minimal plaintext SMTP server that accepts every message
    async fn fake_smtp_server(sessions: Arc<AtomicUsize>) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                sessions.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let (read, mut write) = stream.into_split();
                    let mut lines = BufReader::new(read).lines();
                    write.write_all(b"220 localhost ESMTP\r\n").await.unwrap();

                    let mut in_data = false;
                    while let Ok(Some(line)) = lines.next_line().await {
                        let reply: &[u8] = if in_data {
                            if line != "." {
                                continue;
                            }
                            in_data = false;
                            b"250 queued\r\n"
                        } else {
                            match line.get(..4).map(str::to_ascii_uppercase).as_deref() {
                                Some("EHLO" | "HELO") => b"250 localhost\r\n",
                                Some("DATA") => {
                                    in_data = true;
                                    b"354 go ahead\r\n"
                                }
                                Some("QUIT") => {
                                    let _ = write.write_all(b"221 bye\r\n").await;
                                    break;
                                }
                                _ => b"250 ok\r\n",
                            }
                        };
                        if write.write_all(reply).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });

        port
    }

    fn message() -> OutboundMessage {
        OutboundMessage {
            from: "monitor@example.com".to_string(),
            from_name: "Monitor".to_string(),
            to: vec![
                "ops@example.com".to_string(),
                "a@x.com".to_string(),
                "b@x.com".to_string(),
            ],
            cc: vec!["lead@example.com".to_string()],
            subject: "Alert".to_string(),
            html: "<p>down</p>".to_string(),
            text: "down".to_string(),
            attachments: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_build_message_envelope() {
        let email = build_message(&message()).await.unwrap();
        // Envelope recipients are To + CC.
        assert_eq!(email.envelope().to().len(), 4);
        assert_eq!(
            email.envelope().from().map(ToString::to_string),
            Some("monitor@example.com".to_string())
        );
    }

    #[tokio::test]
    async fn test_build_message_alternative_body() {
        let email = build_message(&message()).await.unwrap();
        let raw = String::from_utf8(email.formatted()).unwrap();
        assert!(raw.contains("multipart/alternative"));
        assert!(raw.contains("text/plain"));
        assert!(raw.contains("text/html"));
        assert!(raw.contains("Subject: Alert"));
    }

    #[tokio::test]
    async fn test_build_message_html_only_when_text_empty() {
        let mut msg = message();
        msg.text.clear();
        let email = build_message(&msg).await.unwrap();
        let raw = String::from_utf8(email.formatted()).unwrap();
        assert!(!raw.contains("multipart/alternative"));
        assert!(raw.contains("text/html"));
    }

    #[tokio::test]
    async fn test_build_message_with_attachment() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.csv");
        std::fs::write(&path, "host,status\nweb-01,down\n").unwrap();

        let mut msg = message();
        msg.attachments.push(path);
        let email = build_message(&msg).await.unwrap();
        let raw = String::from_utf8(email.formatted()).unwrap();
        assert!(raw.contains("multipart/mixed"));
        assert!(raw.contains("report.csv"));
    }

    #[tokio::test]
    async fn test_build_message_missing_attachment() {
        let mut msg = message();
        msg.attachments.push("/nonexistent/report.csv".into());
        let err = build_message(&msg).await.unwrap_err();
        assert!(matches!(err, EmailError::Attachment { .. }));
    }

    #[tokio::test]
    async fn test_build_message_invalid_address() {
        let mut msg = message();
        msg.cc.push("not an address".to_string());
        let err = build_message(&msg).await.unwrap_err();
        assert!(matches!(err, EmailError::InvalidAddress(addr) if addr == "not an address"));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let settings = SmtpSettings {
            host: "127.0.0.1".to_string(),
            port: 1,
            username: String::new(),
            password: String::new(),
            auth: AuthMode::Plain,
            encryption: Encryption::None,
        };
        let result = SmtpClient::connect(&settings).await;
        assert!(matches!(result, Err(EmailError::Connection(_))));
    }

    #[tokio::test]
    async fn test_deliver_uses_one_connection() {
        let sessions = Arc::new(AtomicUsize::new(0));
        let port = fake_smtp_server(Arc::clone(&sessions)).await;
        let settings = SmtpSettings {
            host: "127.0.0.1".to_string(),
            port,
            username: String::new(),
            password: String::new(),
            auth: AuthMode::Login,
            encryption: Encryption::None,
        };

        SmtpTransport.deliver(&settings, message()).await.unwrap();
        assert_eq!(sessions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_starttls_required_but_not_offered() {
        let sessions = Arc::new(AtomicUsize::new(0));
        let port = fake_smtp_server(Arc::clone(&sessions)).await;
        let settings = SmtpSettings {
            host: "127.0.0.1".to_string(),
            port,
            username: String::new(),
            password: String::new(),
            auth: AuthMode::Login,
            encryption: Encryption::StartTls,
        };

        let result = SmtpClient::connect(&settings).await;
        assert!(matches!(result, Err(EmailError::Connection(msg)) if msg.contains("STARTTLS")));
        assert_eq!(sessions.load(Ordering::SeqCst), 1);
    }
}
