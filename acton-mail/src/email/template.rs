//! Mail template cache and renderer
//!
//! Templates are minijinja templates compiled once into a [`TemplateCache`] and
//! shared read-only between workers. Rendering binds a [`MailView`] built from the
//! job's payload and the current preference snapshot.
//!
//! The cache runs with strict undefined behaviour: a template that reads a lookup
//! key the payload did not bind fails to render instead of printing nothing.
//! Templates test for optional keys explicitly:
//!
//! ```jinja
//! {% if "cpu" in float_map %}CPU: {{ float_map.cpu }}%{% endif %}
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use minijinja::{AutoEscape, Environment, ErrorKind, UndefinedBehavior, Value};
use serde::Serialize;
use tracing::debug;

use super::{EmailError, MailPayload, RowSet};
use crate::config::{Preferences, DEFAULT_TEMPLATE};

/// File suffix recognised by [`TemplateCacheBuilder::load_dir`]
pub const TEMPLATE_SUFFIX: &str = ".mail.tmpl";

/// Templates compiled into the crate
const EMBEDDED_TEMPLATES: &[(&str, &str)] = &[(
    DEFAULT_TEMPLATE,
    include_str!("../../templates/bootstrap.mail.tmpl"),
)];

/// Compiled mail templates keyed by identifier
#[derive(Debug)]
pub struct TemplateCache {
    env: Environment<'static>,
    names: Vec<String>,
}

impl TemplateCache {
    /// Start building a cache
    #[must_use]
    pub fn builder() -> TemplateCacheBuilder {
        TemplateCacheBuilder::new()
    }

    /// Whether a template is registered under `name`
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    /// Registered template identifiers, in registration order
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    fn render<S: Serialize>(&self, name: &str, view: S) -> Result<String, EmailError> {
        let template = self.env.get_template(name).map_err(|e| {
            if e.kind() == ErrorKind::TemplateNotFound {
                EmailError::TemplateNotFound(name.to_string())
            } else {
                EmailError::Render(e)
            }
        })?;

        template.render(view).map_err(EmailError::Render)
    }
}

/// Builder for [`TemplateCache`]
///
/// Every template is compiled as it is added, so syntax errors surface at startup.
#[derive(Debug)]
pub struct TemplateCacheBuilder {
    env: Environment<'static>,
    names: Vec<String>,
}

impl Default for TemplateCacheBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateCacheBuilder {
    /// Create a builder with no templates
    #[must_use]
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        // Mail templates do not end in .html, so escaping is switched on explicitly.
        env.set_auto_escape_callback(|_| AutoEscape::Html);
        env.add_filter("human_date", human_date);
        env.add_filter("format_date", format_date);
        env.add_filter("after_year_one", after_year_one);

        Self {
            env,
            names: Vec::new(),
        }
    }

    /// Compile and register a template
    ///
    /// Registering a name twice replaces the earlier template.
    ///
    /// # Errors
    ///
    /// Returns `EmailError::TemplateSyntax` if the source does not compile.
    pub fn add(mut self, name: &str, source: &str) -> Result<Self, EmailError> {
        self.env
            .add_template_owned(name.to_string(), source.to_string())
            .map_err(|source| EmailError::TemplateSyntax {
                name: name.to_string(),
                source,
            })?;

        if !self.names.iter().any(|n| n == name) {
            self.names.push(name.to_string());
        }
        debug!(template = %name, "Mail template registered");
        Ok(self)
    }

    /// Register the templates shipped with the crate
    ///
    /// # Errors
    ///
    /// Returns `EmailError::TemplateSyntax` if an embedded template does not compile.
    pub fn with_embedded_defaults(self) -> Result<Self, EmailError> {
        EMBEDDED_TEMPLATES
            .iter()
            .try_fold(self, |builder, (name, source)| builder.add(name, source))
    }

    /// Register every `*.mail.tmpl` file in `dir`, named by file name
    ///
    /// Files in `dir` replace embedded templates of the same name.
    ///
    /// # Errors
    ///
    /// Returns `EmailError::Io` if the directory cannot be read and
    /// `EmailError::TemplateSyntax` if a template does not compile.
    pub fn load_dir(mut self, dir: impl AsRef<Path>) -> Result<Self, EmailError> {
        let mut paths: Vec<_> = std::fs::read_dir(dir.as_ref())?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.ends_with(TEMPLATE_SUFFIX))
            })
            .collect();
        paths.sort();

        for path in paths {
            let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                continue;
            };
            let source = std::fs::read_to_string(&path)?;
            self = self.add(&name, &source)?;
        }

        Ok(self)
    }

    /// Finish building
    #[must_use]
    pub fn build(self) -> TemplateCache {
        TemplateCache {
            env: self.env,
            names: self.names,
        }
    }
}

/// Data bound into a mail template
///
/// Field names are the variable names templates use.
#[derive(Debug, Serialize)]
pub struct MailView<'a> {
    /// Body seed, inserted verbatim
    pub content: Value,
    /// Sender address
    pub from: &'a str,
    /// Sender display name
    pub from_name: &'a str,
    /// Application preferences
    pub preference_map: &'a Preferences,
    /// Integer lookup table
    pub int_map: &'a BTreeMap<String, i64>,
    /// String lookup table
    pub string_map: &'a BTreeMap<String, String>,
    /// Floating-point lookup table
    pub float_map: &'a BTreeMap<String, f64>,
    /// Named result sets
    pub row_sets: &'a BTreeMap<String, RowSet>,
}

impl<'a> MailView<'a> {
    /// Build the view for one payload
    #[must_use]
    pub fn new(payload: &'a MailPayload, preferences: &'a Preferences) -> Self {
        Self {
            content: Value::from_safe_string(payload.content.clone()),
            from: &payload.from,
            from_name: &payload.from_name,
            preference_map: preferences,
            int_map: &payload.int_map,
            string_map: &payload.string_map,
            float_map: &payload.float_map,
            row_sets: &payload.row_sets,
        }
    }
}

/// Renders payloads through the template cache
#[derive(Debug, Clone)]
pub struct TemplateRenderer {
    cache: Arc<TemplateCache>,
    default_template: String,
}

impl TemplateRenderer {
    /// Create a renderer falling back to `default_template` for unnamed payloads
    #[must_use]
    pub fn new(cache: Arc<TemplateCache>, default_template: impl Into<String>) -> Self {
        Self {
            cache,
            default_template: default_template.into(),
        }
    }

    /// The template identifier a payload resolves to
    #[must_use]
    pub fn resolve<'p>(&'p self, payload: &'p MailPayload) -> &'p str {
        if payload.template.is_empty() {
            &self.default_template
        } else {
            &payload.template
        }
    }

    /// Render a payload into an HTML document
    ///
    /// # Errors
    ///
    /// Returns `EmailError::TemplateNotFound` if the resolved template is not in the
    /// cache and `EmailError::Render` if the template fails while executing.
    pub fn render(&self, payload: &MailPayload, preferences: &Preferences) -> Result<String, EmailError> {
        let name = self.resolve(payload);
        if !self.cache.contains(name) {
            return Err(EmailError::TemplateNotFound(name.to_string()));
        }

        self.cache.render(name, MailView::new(payload, preferences))
    }
}

fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.naive_local())
        .ok()
        .or_else(|| NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S").ok())
        .or_else(|| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

fn unparseable(value: &str) -> minijinja::Error {
    minijinja::Error::new(
        ErrorKind::InvalidOperation,
        format!("not a timestamp: {value:?}"),
    )
}

/// `{{ checked_at | human_date }}` renders `YYYY-MM-DD`; empty input renders empty
fn human_date(value: String) -> Result<String, minijinja::Error> {
    if value.is_empty() {
        return Ok(String::new());
    }
    let timestamp = parse_timestamp(&value).ok_or_else(|| unparseable(&value))?;
    Ok(timestamp.format("%Y-%m-%d").to_string())
}

/// `{{ checked_at | format_date("%H:%M") }}` renders with a strftime layout
fn format_date(value: String, layout: String) -> Result<String, minijinja::Error> {
    let timestamp = parse_timestamp(&value).ok_or_else(|| unparseable(&value))?;

    let items: Vec<Item<'_>> = StrftimeItems::new(&layout).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return Err(minijinja::Error::new(
            ErrorKind::InvalidOperation,
            format!("invalid date layout: {layout:?}"),
        ));
    }

    Ok(timestamp.format_with_items(items.iter()).to_string())
}

/// `{% if checked_at | after_year_one %}` is false for empty and zero timestamps
fn after_year_one(value: String) -> Result<bool, minijinja::Error> {
    if value.is_empty() {
        return Ok(false);
    }
    let timestamp = parse_timestamp(&value).ok_or_else(|| unparseable(&value))?;
    Ok(timestamp > year_one())
}

fn year_one() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or(NaiveDateTime::MIN)
}
