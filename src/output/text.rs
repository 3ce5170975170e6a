//! Human-readable text output formatter

use super::ReportFormatter;
use crate::finding::{Finding, Severity};
use crate::report::{Report, Verdict};
use colored::*;

/// Text formatter with optional color support
pub struct TextFormatter {
    /// Enable colored output
    pub colored: bool,

    /// Show evidence lines under each finding
    pub show_evidence: bool,

    /// Show rule rationale as help text
    pub show_help: bool,

    /// Show the summary line
    pub show_stats: bool,
}

impl Default for TextFormatter {
    fn default() -> Self {
        Self {
            colored: true,
            show_evidence: true,
            show_help: true,
            show_stats: true,
        }
    }
}

impl TextFormatter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Disable colors
    pub fn without_color(mut self) -> Self {
        self.colored = false;
        self
    }

    fn severity_str(&self, severity: Severity) -> ColoredString {
        let s = format!("{}", severity);
        if !self.colored {
            return s.normal();
        }
        match severity {
            Severity::Critical => s.magenta().bold(),
            Severity::Error => s.red().bold(),
            Severity::Warning => s.yellow().bold(),
            Severity::Info => s.blue(),
        }
    }

    fn paint(&self, text: String, paint: fn(&str) -> ColoredString) -> String {
        if self.colored {
            paint(&text).to_string()
        } else {
            text
        }
    }

    fn verdict_str(&self, verdict: Verdict) -> String {
        let s = verdict.to_string();
        if !self.colored {
            return s;
        }
        match verdict {
            Verdict::Clean => s.green().bold().to_string(),
            Verdict::WarningsOnly => s.yellow().bold().to_string(),
            Verdict::Blocking => s.red().bold().to_string(),
        }
    }
}

impl ReportFormatter for TextFormatter {
    fn format(&self, report: &Report) -> String {
        let mut output = String::new();

        // Group findings by the configurations involved, in report order
        let mut groups: Vec<(String, Vec<&Finding>)> = Vec::new();
        for finding in &report.findings {
            let label = finding.configurations.join(" <-> ");
            match groups.iter_mut().find(|(l, _)| *l == label) {
                Some((_, list)) => list.push(finding),
                None => groups.push((label, vec![finding])),
            }
        }

        for (label, findings) in &groups {
            output.push_str(&format!("{}\n", self.paint(label.clone(), |s| s.underline())));
            for finding in findings {
                output.push_str(&self.format_finding(finding));
            }
            output.push('\n');
        }

        if self.show_stats {
            output.push_str(&format!(
                "{} {} validated",
                report.configurations,
                if report.configurations == 1 {
                    "configuration"
                } else {
                    "configurations"
                }
            ));

            let counts: Vec<String> = Severity::ALL
                .iter()
                .rev()
                .filter(|s| report.count(**s) > 0)
                .map(|s| format!("{} {}", report.count(*s), self.severity_str(*s)))
                .collect();
            if !counts.is_empty() {
                output.push_str(&format!(": {}", counts.join(", ")));
            }

            output.push_str(&format!(" ({})\n", self.verdict_str(report.verdict)));
        }

        output
    }

    fn format_finding(&self, finding: &Finding) -> String {
        let mut output = format!(
            "  {}[{}]: {}\n",
            self.severity_str(finding.severity),
            self.paint(finding.rule_id.clone(), |s| s.cyan()),
            finding.message
        );

        if self.show_evidence {
            for ev in &finding.evidence {
                let line = match ev.value() {
                    Some(value) => format!("{} = {} ({})", ev.key, value, ev.source()),
                    None => format!("{} absent ({})", ev.key, ev.configuration),
                };
                output.push_str(&format!(
                    "    {} {}\n",
                    self.paint("|".to_string(), |s| s.blue()),
                    line
                ));
            }
        }

        if self.show_help {
            if let Some(rationale) = &finding.rationale {
                output.push_str(&format!(
                    "    {} {}\n",
                    self.paint("= help:".to_string(), |s| s.bold()),
                    rationale
                ));
            }
        }

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finding::Evidence;
    use crate::property::Property;
    use crate::report::assemble;

    fn finding() -> Finding {
        let prop = Property::new("app.yaml", "db.driver", "mysql");
        Finding::new(
            "mysql-ssl-off",
            Severity::Error,
            "MySQL without TLS".to_string(),
            vec![
                Evidence::present(0, "host-a", &prop),
                Evidence::absent(1, "host-a", "db.ssl"),
            ],
        )
        .with_rationale(Some("MySQL 8 refuses plaintext auth"))
    }

    #[test]
    fn test_format_finding() {
        let output = TextFormatter::new().without_color().format_finding(&finding());
        assert!(output.contains("error[mysql-ssl-off]: MySQL without TLS"));
        assert!(output.contains("| db.driver = mysql (app.yaml)"));
        assert!(output.contains("| db.ssl absent (host-a)"));
        assert!(output.contains("= help: MySQL 8 refuses plaintext auth"));
    }

    #[test]
    fn test_format_report() {
        let mut report = assemble(vec![finding()]);
        report.configurations = 2;

        let output = TextFormatter::new().without_color().format(&report);
        assert!(output.starts_with("host-a\n"));
        assert!(output.contains("2 configurations validated: 1 error (blocking)"));
    }

    #[test]
    fn test_format_clean_report() {
        let mut report = assemble(Vec::new());
        report.configurations = 1;
        let output = TextFormatter::new().without_color().format(&report);
        assert_eq!(output, "1 configuration validated (clean)\n");
    }
}
