//! Message payload with fluent API
//!
//! A [`MailPayload`] describes one message: who it is from and to, which template
//! renders it, and the data bound into that template.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// One row of a named result set, keyed by column name
pub type Row = BTreeMap<String, serde_json::Value>;

/// An ordered result set exposed to templates under `row_sets`
pub type RowSet = Vec<Row>;

/// The data describing one message to send
///
/// Built by the enqueuing collaborator and moved into the dispatch queue; the
/// engine never mutates it after submission.
///
/// ```rust
/// use acton_mail::email::MailPayload;
///
/// let payload = MailPayload::new()
///     .to("ops@example.com")
///     .additional_to("oncall@example.com")
///     .subject("Host down")
///     .template("alert.mail.tmpl")
///     .content("<p>web-01 stopped responding</p>")
///     .string("host", "web-01")
///     .int("failures", 3);
///
/// assert_eq!(payload.recipient_count(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MailPayload {
    /// Sender address; empty means "use the configured default"
    pub from: String,

    /// Sender display name
    pub from_name: String,

    /// Primary recipient
    pub to: String,

    /// Additional recipients, in order
    pub additional_to: Vec<String>,

    /// CC recipients, in order
    pub cc: Vec<String>,

    /// Files to attach, in order
    pub attachments: Vec<PathBuf>,

    /// Subject line
    pub subject: String,

    /// Template identifier; empty selects the default template
    pub template: String,

    /// Body seed, inserted into the template without escaping
    pub content: String,

    /// String values available to the template
    pub string_map: BTreeMap<String, String>,

    /// Integer values available to the template
    pub int_map: BTreeMap<String, i64>,

    /// Floating-point values available to the template
    pub float_map: BTreeMap<String, f64>,

    /// Named result sets available to the template
    pub row_sets: BTreeMap<String, RowSet>,
}

impl MailPayload {
    /// Create a new empty payload
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the sender address
    #[must_use]
    pub fn from(mut self, address: &str) -> Self {
        self.from = address.to_string();
        self
    }

    /// Set the sender display name
    #[must_use]
    pub fn from_name(mut self, name: &str) -> Self {
        self.from_name = name.to_string();
        self
    }

    /// Set the primary recipient
    #[must_use]
    pub fn to(mut self, address: &str) -> Self {
        self.to = address.to_string();
        self
    }

    /// Add a recipient after the primary one
    #[must_use]
    pub fn additional_to(mut self, address: &str) -> Self {
        self.additional_to.push(address.to_string());
        self
    }

    /// Add a CC recipient
    #[must_use]
    pub fn cc(mut self, address: &str) -> Self {
        self.cc.push(address.to_string());
        self
    }

    /// Attach a file by path
    #[must_use]
    pub fn attachment(mut self, path: impl Into<PathBuf>) -> Self {
        self.attachments.push(path.into());
        self
    }

    /// Set the subject line
    #[must_use]
    pub fn subject(mut self, subject: &str) -> Self {
        self.subject = subject.to_string();
        self
    }

    /// Select the template used to render the body
    #[must_use]
    pub fn template(mut self, name: &str) -> Self {
        self.template = name.to_string();
        self
    }

    /// Set the body seed content
    #[must_use]
    pub fn content(mut self, html: &str) -> Self {
        self.content = html.to_string();
        self
    }

    /// Bind a string value
    #[must_use]
    pub fn string(mut self, key: &str, value: &str) -> Self {
        self.string_map.insert(key.to_string(), value.to_string());
        self
    }

    /// Bind an integer value
    #[must_use]
    pub fn int(mut self, key: &str, value: i64) -> Self {
        self.int_map.insert(key.to_string(), value);
        self
    }

    /// Bind a floating-point value
    #[must_use]
    pub fn float(mut self, key: &str, value: f64) -> Self {
        self.float_map.insert(key.to_string(), value);
        self
    }

    /// Bind a named result set
    #[must_use]
    pub fn row_set(mut self, key: &str, rows: RowSet) -> Self {
        self.row_sets.insert(key.to_string(), rows);
        self
    }

    /// Number of `To` recipients: the primary one plus any additional ones
    #[must_use]
    pub fn recipient_count(&self) -> usize {
        usize::from(!self.to.is_empty()) + self.additional_to.len()
    }

    /// Fill in the sender when the payload does not name one
    pub(crate) fn apply_default_sender(&mut self, address: Option<&str>, name: Option<&str>) {
        if !self.from.is_empty() {
            return;
        }
        if let Some(address) = address {
            self.from = address.to_string();
        }
        if let Some(name) = name {
            self.from_name = name.to_string();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_builder() {
        let payload = MailPayload::new()
            .from("monitor@example.com")
            .from_name("Monitor")
            .to("ops@example.com")
            .subject("Alert")
            .content("<p>down</p>");

        assert_eq!(payload.from, "monitor@example.com");
        assert_eq!(payload.from_name, "Monitor");
        assert_eq!(payload.to, "ops@example.com");
        assert_eq!(payload.subject, "Alert");
        assert!(payload.template.is_empty());
    }

    #[test]
    fn test_recipient_order_is_kept() {
        let payload = MailPayload::new()
            .to("a@x.com")
            .additional_to("b@x.com")
            .additional_to("c@x.com")
            .cc("d@x.com")
            .cc("e@x.com");

        assert_eq!(payload.additional_to, vec!["b@x.com", "c@x.com"]);
        assert_eq!(payload.cc, vec!["d@x.com", "e@x.com"]);
        assert_eq!(payload.recipient_count(), 3);
    }

    #[test]
    fn test_typed_lookup_tables() {
        let mut row = Row::new();
        row.insert("host".to_string(), serde_json::json!("web-01"));
        row.insert("status".to_string(), serde_json::json!("down"));

        let payload = MailPayload::new()
            .string("service", "http")
            .int("port", 443)
            .float("latency", 12.5)
            .row_set("hosts", vec![row]);

        assert_eq!(payload.string_map["service"], "http");
        assert_eq!(payload.int_map["port"], 443);
        assert!((payload.float_map["latency"] - 12.5).abs() < f64::EPSILON);
        assert_eq!(payload.row_sets["hosts"].len(), 1);
    }

    #[test]
    fn test_default_sender_only_when_missing() {
        let mut payload = MailPayload::new();
        payload.apply_default_sender(Some("noreply@example.com"), Some("Monitor"));
        assert_eq!(payload.from, "noreply@example.com");
        assert_eq!(payload.from_name, "Monitor");

        let mut payload = MailPayload::new().from("me@example.com").from_name("Me");
        payload.apply_default_sender(Some("noreply@example.com"), Some("Monitor"));
        assert_eq!(payload.from, "me@example.com");
        assert_eq!(payload.from_name, "Me");
    }
}
