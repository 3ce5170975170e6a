//! JSON output formatter

use super::ReportFormatter;
use crate::finding::{Finding, Severity};
use crate::report::{Report, Verdict};
use serde::Serialize;
use std::collections::BTreeMap;

/// JSON formatter for machine-readable output
#[derive(Default)]
pub struct JsonFormatter {
    /// Pretty print with indentation
    pub pretty: bool,
}

impl JsonFormatter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable pretty printing
    pub fn pretty(mut self) -> Self {
        self.pretty = true;
        self
    }

    fn render<T: Serialize>(&self, value: &T) -> String {
        let rendered = if self.pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        };
        rendered.unwrap_or_else(|e| {
            log::error!("could not serialize report: {}", e);
            String::new()
        })
    }
}

#[derive(Serialize)]
struct JsonOutput<'a> {
    findings: &'a [Finding],
    summary: JsonSummary<'a>,
}

#[derive(Serialize)]
struct JsonSummary<'a> {
    verdict: Verdict,
    configurations: usize,
    total: usize,
    counts: &'a BTreeMap<Severity, usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_severity: Option<Severity>,
}

impl ReportFormatter for JsonFormatter {
    fn format(&self, report: &Report) -> String {
        let output = JsonOutput {
            findings: &report.findings,
            summary: JsonSummary {
                verdict: report.verdict,
                configurations: report.configurations,
                total: report.total(),
                counts: &report.counts,
                max_severity: report.max_severity(),
            },
        };
        self.render(&output)
    }

    fn format_finding(&self, finding: &Finding) -> String {
        self.render(finding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finding::Evidence;
    use crate::property::Property;
    use crate::report::assemble;

    fn finding() -> Finding {
        let prop = Property::new("app.yaml", "db.ssl", false);
        Finding::new(
            "mysql-ssl-off",
            Severity::Error,
            "MySQL without TLS".to_string(),
            vec![Evidence::present(1, "host-a", &prop)],
        )
    }

    #[test]
    fn test_json_format_finding() {
        let output = JsonFormatter::new().format_finding(&finding());
        assert!(output.contains("\"rule_id\":\"mysql-ssl-off\""));
        assert!(output.contains("\"severity\":\"error\""));
        assert!(output.contains("\"value\":false"));
        assert!(!output.contains("rationale"));
    }

    #[test]
    fn test_json_format_report() {
        let mut report = assemble(vec![finding()]);
        report.configurations = 3;

        let output = JsonFormatter::new().format(&report);
        let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(parsed["summary"]["verdict"], "blocking");
        assert_eq!(parsed["summary"]["configurations"], 3);
        assert_eq!(parsed["summary"]["counts"]["error"], 1);
        assert_eq!(parsed["summary"]["max_severity"], "error");
        assert_eq!(parsed["findings"][0]["configurations"][0], "host-a");
    }

    #[test]
    fn test_json_pretty() {
        let output = JsonFormatter::new().pretty().format_finding(&finding());
        assert!(output.contains('\n'));
    }
}
