//! Rendered output and trusted HTML
//!
//! `SafeHtml` has no `From<String>`. Outside the composer the only way to
//! wrap text is `SafeHtml::assume_trusted`, and the caller owns that call.

use std::fmt;

use minijinja::Value;
use serde::{Serialize, Serializer};

/// The body produced by executing a template against a model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedOutput {
    name: String,
    body: String,
}

impl RenderedOutput {
    pub(crate) fn new(name: impl Into<String>, body: String) -> Self {
        Self {
            name: name.into(),
            body,
        }
    }

    /// Name of the template that produced the body
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn as_str(&self) -> &str {
        &self.body
    }

    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    pub fn into_string(self) -> String {
        self.body
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.body.into_bytes()
    }

    /// Tag the rendered body as pre-escaped markup for embedding in another page
    pub fn into_html(self) -> SafeHtml {
        SafeHtml(self.body)
    }
}

impl fmt::Display for RenderedOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.body)
    }
}

/// Markup that templates emit without escaping
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SafeHtml(String);

impl SafeHtml {
    /// Mark arbitrary text as trusted markup. The caller is responsible for
    /// the text never carrying user input.
    pub fn assume_trusted(markup: impl Into<String>) -> Self {
        Self(markup.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for SafeHtml {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<SafeHtml> for Value {
    fn from(html: SafeHtml) -> Self {
        Value::from_safe_string(html.0)
    }
}

/// Serializes as the bare markup string; use `Value::from` to keep the
/// trusted tag inside a template context.
impl Serialize for SafeHtml {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_html_keeps_body() {
        let out = RenderedOutput::new("row.html", "<tr><td>1</td></tr>".to_string());
        assert_eq!(out.name(), "row.html");
        let html = out.into_html();
        assert_eq!(html.as_str(), "<tr><td>1</td></tr>");
    }

    #[test]
    fn test_safe_html_becomes_safe_value() {
        let value = Value::from(SafeHtml::assume_trusted("<b>x</b>"));
        assert!(value.is_safe());
        assert_eq!(value.as_str(), Some("<b>x</b>"));
    }

    #[test]
    fn test_safe_html_serializes_as_string() {
        let json = serde_json::to_string(&SafeHtml::assume_trusted("<i>")).unwrap();
        assert_eq!(json, r#""<i>""#);
    }
}
