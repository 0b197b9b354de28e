//! Prompt templates.
//!
//! A template is plain text with `{{name}}` placeholders. Rendering is a pure
//! function of the template, the arguments and the schema defaults:
//!
//! - a placeholder naming a supplied argument is replaced by its value;
//! - otherwise, one naming a field with a default is replaced by the default;
//! - otherwise it is left in the text unchanged.
//!
//! String values are inserted verbatim; any other JSON value is inserted in
//! its compact JSON form. Whitespace inside the braces is ignored.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::schema::InputSchema;
use crate::types::Arguments;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// A parameterized message template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptTemplate {
    text: String,
}

impl PromptTemplate {
    /// Wrap template text.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Raw template text.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Placeholder names in order of first appearance.
    #[must_use]
    pub fn placeholders(&self) -> Vec<&str> {
        let mut names = Vec::new();
        for (_, name) in scan(&self.text) {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }

    /// Render with `arguments`, falling back to defaults from `schema`.
    #[must_use]
    pub fn render(&self, arguments: &Arguments, schema: &InputSchema) -> String {
        render(&self.text, arguments, schema)
    }
}

/// Render `template` with `arguments`, falling back to defaults in `schema`.
#[must_use]
pub fn render(template: &str, arguments: &Arguments, schema: &InputSchema) -> String {
    let mut out = String::with_capacity(template.len());
    let mut cursor = 0;

    for (span, name) in scan(template) {
        out.push_str(&template[cursor..span.start]);
        let value = arguments
            .get(name)
            .filter(|v| !v.is_null())
            .or_else(|| schema.get(name).and_then(|f| f.default.as_ref()));
        match value {
            Some(Value::String(s)) => out.push_str(s),
            Some(other) => out.push_str(&other.to_string()),
            None => out.push_str(&template[span.clone()]),
        }
        cursor = span.end;
    }

    out.push_str(&template[cursor..]);
    out
}

/// Yield `(byte range of "{{ name }}", trimmed name)` for each well-formed
/// placeholder. Unterminated or empty braces are treated as literal text.
fn scan(template: &str) -> impl Iterator<Item = (std::ops::Range<usize>, &str)> {
    let mut offset = 0;
    std::iter::from_fn(move || {
        loop {
            let rest = template.get(offset..)?;
            let open = rest.find(OPEN)?;
            let start = offset.saturating_add(open);
            let inner_start = start.saturating_add(OPEN.len());
            let after_open = template.get(inner_start..)?;
            let close = after_open.find(CLOSE)?;
            let inner_end = inner_start.saturating_add(close);
            let end = inner_end.saturating_add(CLOSE.len());
            let name = template[inner_start..inner_end].trim();

            if name.is_empty() || name.contains(OPEN) || !is_identifier(name) {
                // Not a placeholder; resume scanning one byte past the brace.
                offset = start.saturating_add(1);
                continue;
            }

            offset = end;
            return Some((start..end, name));
        }
    })
}

fn is_identifier(name: &str) -> bool {
    name.chars()
        .all(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == '.')
}
