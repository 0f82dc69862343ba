//! Upload page rendering

use crate::error::{IntakeError, Severity};
use crate::validator::ValidationOutcome;

/// Bootstrap-style alert category of a flash message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashCategory {
    Success,
    Warning,
    Error,
}

impl FlashCategory {
    fn css_class(self) -> &'static str {
        match self {
            FlashCategory::Success => "alert-success",
            FlashCategory::Warning => "alert-warning",
            FlashCategory::Error => "alert-danger",
        }
    }
}

/// One message shown above the upload forms
///
/// `html` is already escaped and safe to embed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flash {
    pub category: FlashCategory,
    pub html: String,
}

impl Flash {
    /// Plain text message, escaped
    pub fn text(category: FlashCategory, text: &str) -> Self {
        Self {
            category,
            html: escape_html(text),
        }
    }

    pub fn from_outcome(outcome: &ValidationOutcome) -> Self {
        if outcome.success() {
            Self::text(FlashCategory::Success, outcome.message())
        } else {
            let diagnostic = outcome
                .message()
                .lines()
                .map(escape_html)
                .collect::<Vec<_>>()
                .join("<br>");
            Self {
                category: FlashCategory::Error,
                html: format!(
                    "{}<br>{}",
                    escape_html(&format!(
                        "Validation error for: '{}':",
                        outcome.subject_filename()
                    )),
                    diagnostic
                ),
            }
        }
    }

    pub fn from_error(error: &IntakeError) -> Self {
        let category = match error.severity() {
            Severity::Warning => FlashCategory::Warning,
            Severity::Error => FlashCategory::Error,
        };
        Self::text(category, &error.user_message())
    }
}

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Render the upload page; both forms post back to `action`
pub fn render_index(messages: &[Flash], action: &str) -> String {
    let alerts: String = messages
        .iter()
        .map(|flash| {
            format!(
                "      <div class=\"alert {}\" role=\"alert\">{}</div>\n",
                flash.category.css_class(),
                flash.html
            )
        })
        .collect();
    let action = escape_html(action);

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
  <head>
    <meta charset="utf-8">
    <title>META-SHARE validator</title>
  </head>
  <body>
    <main class="container">
      <h1>Validate a META-SHARE resource description</h1>
{alerts}      <form method="post" action="{action}" enctype="multipart/form-data">
        <label for="url">URL of an XML file</label>
        <input type="text" id="url" name="url">
        <input type="submit" value="Validate URL">
      </form>
      <form method="post" action="{action}" enctype="multipart/form-data">
        <label for="file">Local XML file</label>
        <input type="file" id="file" name="file" accept=".xml">
        <input type="submit" value="Upload">
      </form>
    </main>
  </body>
</html>
"#
    )
}
