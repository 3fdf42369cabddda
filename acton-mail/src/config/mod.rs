//! Configuration for the mail engine
//!
//! Two kinds of configuration are involved in delivering mail:
//!
//! - [`MailConfig`]: static engine settings (worker count, template location, text
//!   layout), loaded once at startup with the usual precedence:
//!   1. Environment variables (highest priority, `ACTON_MAIL_` prefix, `__` for nesting)
//!   2. `./config.toml`
//!   3. `~/.config/acton-mail/{service}/config.toml`
//!   4. `/etc/acton-mail/{service}/config.toml`
//!   5. Hardcoded defaults
//! - [`Preferences`]: the application's live key/value preference table (SMTP host,
//!   credentials, default sender, anything templates want to show). It is owned by
//!   the application and published through a [`PreferenceStore`]; the engine takes a
//!   fresh snapshot for every job.
//!
//! # Example Configuration
//!
//! ```toml
//! [dispatch]
//! workers = 5
//! queue_capacity = 5
//!
//! [templates]
//! template_dir = "./templates/mail"
//! default_template = "bootstrap.mail.tmpl"
//! embedded_defaults = true
//!
//! [content]
//! text_width = 80
//! ```

mod preferences;

pub use preferences::{PreferenceStore, Preferences};

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Template used when a payload does not name one
pub const DEFAULT_TEMPLATE: &str = "bootstrap.mail.tmpl";

/// Worker pool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchSettings {
    /// Number of concurrent workers
    pub workers: usize,

    /// Jobs the intake queue holds before submitters have to wait
    pub queue_capacity: usize,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            workers: 5,
            queue_capacity: 5,
        }
    }
}

/// Mail template settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateSettings {
    /// Directory scanned for `*.mail.tmpl` files
    pub template_dir: PathBuf,

    /// Template selected when a payload leaves its template empty
    pub default_template: String,

    /// Register the templates compiled into the crate before loading the directory
    pub embedded_defaults: bool,
}

impl Default for TemplateSettings {
    fn default() -> Self {
        Self {
            template_dir: PathBuf::from("./templates/mail"),
            default_template: DEFAULT_TEMPLATE.to_string(),
            embedded_defaults: true,
        }
    }
}

/// Content transformation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentSettings {
    /// Column width of the plain-text alternative
    pub text_width: usize,
}

impl Default for ContentSettings {
    fn default() -> Self {
        Self { text_width: 80 }
    }
}

/// Complete mail engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MailConfig {
    /// Worker pool settings
    #[serde(default)]
    pub dispatch: DispatchSettings,

    /// Template settings
    #[serde(default)]
    pub templates: TemplateSettings,

    /// Content transformation settings
    #[serde(default)]
    pub content: ContentSettings,
}

impl MailConfig {
    /// Load configuration for a specific service
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration file cannot be parsed or a value has the
    /// wrong type.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use acton_mail::config::MailConfig;
    ///
    /// # fn example() -> anyhow::Result<()> {
    /// let config = MailConfig::load_for_service("monitor")?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn load_for_service(service_name: &str) -> anyhow::Result<Self> {
        let mut figment = Figment::new().merge(Toml::string(&toml::to_string(&Self::default())?));

        let system_config = PathBuf::from("/etc/acton-mail")
            .join(service_name)
            .join("config.toml");
        if system_config.exists() {
            figment = figment.merge(Toml::file(&system_config));
        }

        let user_config = Self::recommended_path(service_name);
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }

        let local_config = PathBuf::from("./config.toml");
        if local_config.exists() {
            figment = figment.merge(Toml::file(&local_config));
        }

        figment = figment.merge(Env::prefixed("ACTON_MAIL_").split("__").lowercase(true));

        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file
    ///
    /// A missing file leaves the defaults in place.
    ///
    /// # Errors
    ///
    /// Returns an error if the file contains invalid TOML or a value has the wrong type.
    pub fn load_from(path: &str) -> anyhow::Result<Self> {
        let config: Self = Figment::new()
            .merge(Toml::string(&toml::to_string(&Self::default())?))
            .merge(Toml::file(path))
            .merge(Env::prefixed("ACTON_MAIL_").split("__").lowercase(true))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    /// Get the recommended XDG config path for a service
    #[must_use]
    pub fn recommended_path(service_name: &str) -> PathBuf {
        dirs::config_dir().map_or_else(
            || PathBuf::from("./config.toml"),
            |config_dir| {
                config_dir
                    .join("acton-mail")
                    .join(service_name)
                    .join("config.toml")
            },
        )
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.dispatch.workers == 0 {
            anyhow::bail!("dispatch.workers must be at least 1");
        }
        if self.dispatch.queue_capacity == 0 {
            anyhow::bail!("dispatch.queue_capacity must be at least 1");
        }
        if self.content.text_width == 0 {
            anyhow::bail!("content.text_width must be at least 1");
        }
        Ok(())
    }
}
