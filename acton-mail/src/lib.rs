//! acton-mail: templated outbound mail dispatch
//!
//! A bounded pool of async workers drains a queue of delivery jobs. Each job is
//! rendered through a mail template, its styles are inlined and a plain-text
//! alternative is derived, and the result is sent over a fresh SMTP connection
//! configured from the application's current preferences.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use acton_mail::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     acton_mail::observability::init()?;
//!
//!     let config = MailConfig::load_for_service("monitor")?;
//!     let preferences = PreferenceStore::new(
//!         Preferences::new()
//!             .with("smtp_server", "smtp.example.com")
//!             .with("smtp_port", "587")
//!             .with("smtp_user", "mailer")
//!             .with("smtp_password", "secret")
//!             .with("smtp_from_email", "monitor@example.com"),
//!     );
//!
//!     let pipeline = MailPipeline::from_config(&config, Arc::new(SmtpTransport), preferences)?;
//!     let dispatcher = Dispatcher::new(config.dispatch, pipeline).start();
//!
//!     dispatcher
//!         .queue()
//!         .submit(
//!             MailPayload::new()
//!                 .to("ops@example.com")
//!                 .subject("Host down")
//!                 .content("<p>web-01 stopped responding</p>"),
//!         )
//!         .await?;
//!
//!     dispatcher.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`config`]: engine settings and the live preference table
//! - [`email`]: payloads, templates, content transformation, SMTP transport
//! - [`dispatch`]: job queue, worker pool and per-job pipeline
//! - [`observability`]: logging setup
//! - `testing`: recording transport and fixtures (`testing` feature)

pub mod config;
pub mod dispatch;
pub mod email;
pub mod observability;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub mod prelude {
    //! Convenience re-exports for common types and traits
    //!
    //! ```rust
    //! use acton_mail::prelude::*;
    //! ```

    pub use crate::config::{MailConfig, PreferenceStore, Preferences};
    pub use crate::dispatch::{
        DispatchError, DispatchEvent, Dispatcher, DispatcherHandle, MailPipeline, MailQueue,
        WorkerState,
    };
    pub use crate::email::{
        ConsoleTransport, ContentTransformer, EmailError, HtmlTransformer, MailPayload,
        MailTransport, SmtpTransport, TemplateCache, TemplateRenderer,
    };
}
