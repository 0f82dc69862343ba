//! Output and Reporting
//!
//! Renders the result of a `check` run for the terminal or as JSON.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::cli::OutputFormat;
use crate::error::{IntakeError, Severity};
use crate::validator::ValidationOutcome;

/// Final state of one checked submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Valid,
    Invalid,
    Rejected,
    Error,
}

impl CheckStatus {
    /// Process exit status: 0 validated, 1 schema or parse failure, 2 rejected or failed
    pub fn exit_code(self) -> i32 {
        match self {
            CheckStatus::Valid => 0,
            CheckStatus::Invalid => 1,
            CheckStatus::Rejected | CheckStatus::Error => 2,
        }
    }
}

/// Everything printed about one submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckReport {
    pub target: String,
    pub status: CheckStatus,
    pub filename: Option<String>,
    pub message: String,
    pub duration_ms: u64,
}

impl CheckReport {
    pub fn from_result(
        target: &str,
        result: &Result<ValidationOutcome, IntakeError>,
        duration: Duration,
    ) -> Self {
        let duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        match result {
            Ok(outcome) => Self {
                target: target.to_string(),
                status: if outcome.success() {
                    CheckStatus::Valid
                } else {
                    CheckStatus::Invalid
                },
                filename: Some(outcome.subject_filename().to_string()),
                message: outcome.message().to_string(),
                duration_ms,
            },
            Err(error) => Self {
                target: target.to_string(),
                status: match error.severity() {
                    Severity::Warning => CheckStatus::Rejected,
                    Severity::Error => CheckStatus::Error,
                },
                filename: None,
                message: error.user_message(),
                duration_ms,
            },
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.status.exit_code()
    }
}

/// Formatter for check reports
pub struct Output {
    format: OutputFormat,
    show_colors: bool,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            show_colors: atty::is(atty::Stream::Stdout),
        }
    }

    /// Formatter that never emits ANSI escapes
    pub fn plain(format: OutputFormat) -> Self {
        Self {
            format,
            show_colors: false,
        }
    }

    fn colorize(&self, text: &str, color: &str) -> String {
        if self.show_colors {
            format!("\x1b[{}m{}\x1b[0m", color, text)
        } else {
            text.to_string()
        }
    }

    pub fn render(&self, report: &CheckReport) -> String {
        match self.format {
            OutputFormat::Human => self.format_human(report),
            OutputFormat::Json => {
                serde_json::to_string_pretty(report).unwrap_or_else(|e| {
                    format!("{{\"status\":\"error\",\"message\":\"{}\"}}", e)
                })
            }
        }
    }

    fn format_human(&self, report: &CheckReport) -> String {
        let duration_str = format_duration(Duration::from_millis(report.duration_ms));
        let subject = report.filename.as_deref().unwrap_or(&report.target);

        match report.status {
            CheckStatus::Valid => format!(
                "{}  {} ({})",
                self.colorize("✓ VALID", "32"),
                subject,
                duration_str
            ),
            CheckStatus::Invalid => {
                let mut output = format!(
                    "{}  {} ({})",
                    self.colorize("✗ INVALID", "31"),
                    subject,
                    duration_str
                );
                for line in report.message.lines() {
                    output.push_str(&format!("\n    {}", line));
                }
                output
            }
            CheckStatus::Rejected => format!(
                "{}  {} - {}",
                self.colorize("⚠ REJECTED", "33"),
                subject,
                report.message
            ),
            CheckStatus::Error => format!(
                "{}  {} - {}",
                self.colorize("⚠ ERROR", "33"),
                subject,
                report.message
            ),
        }
    }
}

fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs_f64();
    if total_secs < 1.0 {
        format!("{:.0}ms", duration.as_millis())
    } else if total_secs < 60.0 {
        format!("{:.2}s", total_secs)
    } else {
        let mins = (total_secs / 60.0) as u64;
        let secs = total_secs % 60.0;
        format!("{}m{:.1}s", mins, secs)
    }
}
