//! The per-job processing pipeline
//!
//! Render, transform, connect, send. Each step reads only the job it was given and
//! the preference snapshot taken when processing began.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use super::MailJob;
use crate::config::{MailConfig, PreferenceStore};
use crate::email::{
    ContentTransformer, EmailError, HtmlTransformer, MailTransport, OutboundMessage,
    SmtpSettings, TemplateCache, TemplateRenderer,
};

/// Everything a worker needs to turn a job into a sent message
///
/// Cheap to clone; every worker holds its own copy.
#[derive(Clone)]
pub struct MailPipeline {
    renderer: TemplateRenderer,
    transformer: Arc<dyn ContentTransformer>,
    transport: Arc<dyn MailTransport>,
    preferences: PreferenceStore,
}

impl fmt::Debug for MailPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailPipeline")
            .field("renderer", &self.renderer)
            .field("preferences", &self.preferences)
            .finish_non_exhaustive()
    }
}

impl MailPipeline {
    /// Create a pipeline using the default HTML transformer
    #[must_use]
    pub fn new(
        renderer: TemplateRenderer,
        transport: Arc<dyn MailTransport>,
        preferences: PreferenceStore,
    ) -> Self {
        Self {
            renderer,
            transformer: Arc::new(HtmlTransformer::default()),
            transport,
            preferences,
        }
    }

    /// Build a pipeline from engine configuration
    ///
    /// Registers the embedded templates when enabled, then every template in the
    /// configured directory if it exists.
    ///
    /// # Errors
    ///
    /// Returns `EmailError::TemplateSyntax` if a template does not compile and
    /// `EmailError::Io` if the template directory cannot be read.
    pub fn from_config(
        config: &MailConfig,
        transport: Arc<dyn MailTransport>,
        preferences: PreferenceStore,
    ) -> Result<Self, EmailError> {
        let mut builder = TemplateCache::builder();
        if config.templates.embedded_defaults {
            builder = builder.with_embedded_defaults()?;
        }

        let dir = &config.templates.template_dir;
        if dir.is_dir() {
            builder = builder.load_dir(dir)?;
        } else {
            debug!(dir = %dir.display(), "Mail template directory not found, skipping");
        }

        let cache = builder.build();
        if !cache.contains(&config.templates.default_template) {
            warn!(
                template = %config.templates.default_template,
                "Default mail template is not registered"
            );
        }

        let renderer = TemplateRenderer::new(Arc::new(cache), config.templates.default_template.clone());
        Ok(Self::new(renderer, transport, preferences)
            .with_transformer(Arc::new(HtmlTransformer::new(config.content.text_width))))
    }

    /// Replace the content transformer
    #[must_use]
    pub fn with_transformer(mut self, transformer: Arc<dyn ContentTransformer>) -> Self {
        self.transformer = transformer;
        self
    }

    /// The preference store consulted for each job
    #[must_use]
    pub const fn preferences(&self) -> &PreferenceStore {
        &self.preferences
    }

    /// The template renderer
    #[must_use]
    pub const fn renderer(&self) -> &TemplateRenderer {
        &self.renderer
    }

    /// Run one job to completion
    ///
    /// # Errors
    ///
    /// Returns the first error that abandons the job. Style inlining and text
    /// extraction failures are not errors; they degrade the message instead.
    pub async fn process(&self, job: &MailJob) -> Result<(), EmailError> {
        let payload = job.payload();
        let preferences = self.preferences.snapshot();

        let html = self.renderer.render(payload, &preferences)?;
        debug!(job = %job.id(), template = %self.renderer.resolve(payload), "Mail rendered");

        let bodies = self.transformer.transform(&html);

        let settings = SmtpSettings::from_preferences(&preferences)?;
        let message = OutboundMessage::assemble(payload, bodies);

        self.transport.deliver(&settings, message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Preferences;
    use crate::email::transport::{AuthMode, MockMailTransport};
    use crate::email::MailPayload;

    fn cache() -> Arc<TemplateCache> {
        Arc::new(
            TemplateCache::builder()
                .with_embedded_defaults()
                .unwrap()
                .add("alert.mail.tmpl", "<p>{{ string_map.host }} is down</p>")
                .unwrap()
                .build(),
        )
    }

    fn store() -> PreferenceStore {
        PreferenceStore::new(
            Preferences::new()
                .with("smtp_server", "smtp.example.com")
                .with("smtp_port", "587")
                .with("smtp_user", "mailer")
                .with("smtp_password", "secret"),
        )
    }

    fn pipeline(transport: MockMailTransport) -> MailPipeline {
        MailPipeline::new(
            TemplateRenderer::new(cache(), crate::config::DEFAULT_TEMPLATE),
            Arc::new(transport),
            store(),
        )
    }

    fn alert() -> MailJob {
        MailJob::new(
            MailPayload::new()
                .from("monitor@example.com")
                .to("ops@example.com")
                .subject("Alert")
                .template("alert.mail.tmpl")
                .string("host", "web-01"),
        )
    }

    #[tokio::test]
    async fn test_process_delivers_rendered_message() {
        let mut transport = MockMailTransport::new();
        transport
            .expect_deliver()
            .withf(|settings, message| {
                settings.host == "smtp.example.com"
                    && settings.auth == AuthMode::Login
                    && message.subject == "Alert"
                    && message.html.contains("web-01 is down")
                    && message.text.contains("web-01 is down")
            })
            .times(1)
            .returning(|_, _| Ok(()));

        pipeline(transport).process(&alert()).await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_template_skips_transport() {
        let mut transport = MockMailTransport::new();
        transport.expect_deliver().times(0);

        let job = MailJob::new(MailPayload::new().to("ops@example.com").template("missing.mail.tmpl"));
        let err = pipeline(transport).process(&job).await.unwrap_err();
        assert!(matches!(err, EmailError::TemplateNotFound(_)));
    }

    #[tokio::test]
    async fn test_missing_smtp_settings_skips_transport() {
        let mut transport = MockMailTransport::new();
        transport.expect_deliver().times(0);

        let pipeline = pipeline(transport);
        pipeline.preferences().replace(Preferences::new());

        let err = pipeline.process(&alert()).await.unwrap_err();
        assert!(matches!(err, EmailError::MissingConfig("smtp_server")));
    }

    #[tokio::test]
    async fn test_transport_error_is_returned() {
        let mut transport = MockMailTransport::new();
        transport
            .expect_deliver()
            .times(1)
            .returning(|_, _| Err(EmailError::connection("refused")));

        let err = pipeline(transport).process(&alert()).await.unwrap_err();
        assert!(matches!(err, EmailError::Connection(_)));
    }

    #[tokio::test]
    async fn test_from_config_loads_template_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("custom.mail.tmpl"), "custom").unwrap();

        let mut config = MailConfig::default();
        config.templates.template_dir = dir.path().to_path_buf();

        let pipeline =
            MailPipeline::from_config(&config, Arc::new(MockMailTransport::new()), store()).unwrap();
        let renderer = pipeline.renderer();
        let payload = MailPayload::new().template("custom.mail.tmpl");
        assert_eq!(renderer.render(&payload, &Preferences::new()).unwrap(), "custom");
        assert_eq!(renderer.resolve(&MailPayload::new()), crate::config::DEFAULT_TEMPLATE);
    }
}
