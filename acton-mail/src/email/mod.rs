//! Mail rendering and transport
//!
//! Turns a [`MailPayload`] into a delivered message:
//! - [`TemplateRenderer`] binds the payload into a template from the [`TemplateCache`]
//! - [`ContentTransformer`] inlines styles and derives a plain-text alternative
//! - [`MailTransport`] connects with [`SmtpSettings`] from the current preferences
//!   and sends the [`OutboundMessage`]
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use acton_mail::config::{Preferences, DEFAULT_TEMPLATE};
//! use acton_mail::email::{
//!     ContentTransformer, HtmlTransformer, MailPayload, OutboundMessage, TemplateCache,
//!     TemplateRenderer,
//! };
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let cache = TemplateCache::builder().with_embedded_defaults()?.build();
//! let renderer = TemplateRenderer::new(Arc::new(cache), DEFAULT_TEMPLATE);
//!
//! let payload = MailPayload::new()
//!     .to("ops@example.com")
//!     .subject("Host down")
//!     .content("<p>web-01 stopped responding</p>");
//!
//! let html = renderer.render(&payload, &Preferences::new())?;
//! let bodies = HtmlTransformer::default().transform(&html);
//! let message = OutboundMessage::assemble(&payload, bodies);
//!
//! assert_eq!(message.primary_recipient(), Some("ops@example.com"));
//! # Ok(())
//! # }
//! ```

mod error;
mod payload;
pub mod template;
pub mod transform;
pub mod transport;

pub use error::EmailError;
pub use payload::{MailPayload, Row, RowSet};
pub use template::{MailView, TemplateCache, TemplateCacheBuilder, TemplateRenderer};
pub use transform::{ContentTransformer, HtmlTransformer, RenderedBodies};
pub use transport::{
    AuthMode, ConsoleTransport, Encryption, MailTransport, OutboundMessage, SmtpClient,
    SmtpSettings, SmtpTransport,
};
