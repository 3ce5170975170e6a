//! Output formatters for validation reports

mod json;
mod text;

pub use json::JsonFormatter;
pub use text::TextFormatter;

use crate::finding::Finding;
use crate::report::Report;

/// Report formatter trait
pub trait ReportFormatter: Send + Sync {
    /// Format the entire report
    fn format(&self, report: &Report) -> String;

    /// Format a single finding
    fn format_finding(&self, finding: &Finding) -> String;
}
