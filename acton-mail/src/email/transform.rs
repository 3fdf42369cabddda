//! Content transformation for mail clients
//!
//! Turns a rendered HTML document into the two bodies a message carries: HTML with
//! stylesheet rules inlined onto elements, and a plain-text alternative. Both are
//! best-effort. A failed inline falls back to the original document and a failed
//! text extraction falls back to an empty alternative.

use tracing::{error, warn};

use super::EmailError;

/// The two bodies of an outbound message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderedBodies {
    /// HTML body with styles inlined (or the original document on fallback)
    pub html: String,
    /// Plain-text alternative (empty on fallback)
    pub text: String,
}

/// Derives mail bodies from a rendered document
pub trait ContentTransformer: Send + Sync {
    /// Rewrite `<style>` rules as inline `style` attributes
    ///
    /// # Errors
    ///
    /// Returns `EmailError::Inline` if the document cannot be processed.
    fn inline_styles(&self, html: &str) -> Result<String, EmailError>;

    /// Strip markup, keeping tables readable
    ///
    /// # Errors
    ///
    /// Returns `EmailError::TextExtraction` if the document cannot be processed.
    fn plain_text(&self, html: &str) -> Result<String, EmailError>;

    /// Produce both bodies, falling back on failure
    ///
    /// Never fails. Errors that are not the expected inline or extraction kinds are
    /// logged louder but degrade the same way.
    fn transform(&self, html: &str) -> RenderedBodies {
        let text = self.plain_text(html).unwrap_or_else(|e| {
            degraded(&e, "Plain-text alternative unavailable, sending HTML only");
            String::new()
        });

        let html = self.inline_styles(html).unwrap_or_else(|e| {
            degraded(&e, "Style inlining failed, sending original HTML");
            html.to_string()
        });

        RenderedBodies { html, text }
    }
}

fn degraded(e: &EmailError, fallback: &str) {
    if e.is_recoverable() {
        warn!(error = %e, "{fallback}");
    } else {
        error!(error = %e, "Unexpected transformer error. {fallback}");
    }
}

/// Default transformer backed by `css-inline` and `html2text`
#[derive(Debug, Clone)]
pub struct HtmlTransformer {
    text_width: usize,
}

impl Default for HtmlTransformer {
    fn default() -> Self {
        Self { text_width: 80 }
    }
}

impl HtmlTransformer {
    /// Create a transformer wrapping plain text at `text_width` columns
    #[must_use]
    pub const fn new(text_width: usize) -> Self {
        Self { text_width }
    }
}

impl ContentTransformer for HtmlTransformer {
    fn inline_styles(&self, html: &str) -> Result<String, EmailError> {
        let inliner = css_inline::CSSInliner::options()
            .load_remote_stylesheets(false)
            .build();

        inliner
            .inline(html)
            .map_err(|e| EmailError::Inline(e.to_string()))
    }

    fn plain_text(&self, html: &str) -> Result<String, EmailError> {
        html2text::config::plain()
            .string_from_read(html.as_bytes(), self.text_width)
            .map_err(|e| EmailError::TextExtraction(e.to_string()))
    }
}
