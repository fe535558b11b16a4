//! Output formatting for the `check` command

use clap::ValueEnum;
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::io::{self, Write};

use conform_core::findings::{Finding, FindingError, FindingKind};
use conform_core::validator::BlobReport;

use super::CliError;

/// Output format options
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug, Default)]
pub enum OutputFormat {
    /// Human-readable listing with colors
    #[default]
    Table,
    Json,
    Yaml,
}

/// One finding as printed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindingOutput {
    pub kind: FindingKind,
    /// Location of the offending value inside the message
    pub path: String,
    /// Location of the failing keyword inside the schema
    pub schema_path: String,
    pub message: String,
}

impl FindingOutput {
    fn from_finding(finding: &Finding) -> Self {
        let (path, schema_path) = match &finding.error {
            FindingError::Validation(detail) => (
                format!("/{}", detail.path.join("/")),
                format!("/{}", detail.schema_path.join("/")),
            ),
            FindingError::Blob(_) => (String::new(), String::new()),
        };
        Self {
            kind: finding.kind,
            path,
            schema_path,
            message: finding.error.message().to_string(),
        }
    }
}

/// Result of checking one message file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckOutput {
    pub conforming: bool,
    pub messages_checked: usize,
    pub findings: Vec<FindingOutput>,
    pub summary: String,
}

impl CheckOutput {
    pub fn from_report(report: &BlobReport) -> Self {
        let findings: Vec<FindingOutput> = report
            .findings
            .iter()
            .map(FindingOutput::from_finding)
            .collect();
        let conforming = findings.is_empty();
        let summary = if conforming {
            format!("All {} messages conform to the schema", report.messages_checked)
        } else {
            format!(
                "{} problem(s) found in {} messages",
                findings.len(),
                report.messages_checked
            )
        };
        Self {
            conforming,
            messages_checked: report.messages_checked,
            findings,
            summary,
        }
    }

    pub fn render(&self, format: OutputFormat) -> Result<(), CliError> {
        match format {
            OutputFormat::Json => {
                let json = serde_json::to_string_pretty(self)
                    .map_err(|e| CliError::Output(e.to_string()))?;
                println!("{json}");
            }
            OutputFormat::Yaml => {
                let yaml =
                    serde_yaml::to_string(self).map_err(|e| CliError::Output(e.to_string()))?;
                println!("{yaml}");
            }
            OutputFormat::Table => self.render_table(&mut io::stdout()),
        }
        Ok(())
    }

    fn render_table(&self, out: &mut impl Write) {
        writeln!(out).ok();
        writeln!(out, "{}", "Conformance Results".cyan().bold()).ok();
        writeln!(out, "{}", "=".repeat(60)).ok();

        let icon = if self.conforming { "+".green() } else { "x".red() };
        writeln!(out, "{} {}", icon, self.summary).ok();

        if self.findings.is_empty() {
            return;
        }
        writeln!(out).ok();
        writeln!(out, "{}", "Findings:".cyan().bold()).ok();
        writeln!(out, "{}", "-".repeat(60)).ok();
        for (index, finding) in self.findings.iter().enumerate() {
            let kind = match finding.kind {
                FindingKind::Message => finding.kind.as_str().yellow(),
                FindingKind::Schema | FindingKind::Blob => finding.kind.as_str().red(),
            };
            writeln!(out, "{}. [{}] {}", index + 1, kind, finding.message).ok();
            if !finding.path.is_empty() {
                writeln!(out, "   at {}", finding.path.dimmed()).ok();
                writeln!(out, "   schema {}", finding.schema_path.dimmed()).ok();
            }
        }
    }
}
