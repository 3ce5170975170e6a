//! Report assembly: findings, per-severity counts and the run verdict

use crate::finding::{Finding, Severity};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Run-level summary derived from the highest finding severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Verdict {
    /// No findings
    Clean,
    /// Findings, all below error
    WarningsOnly,
    /// At least one error or critical finding
    Blocking,
}

impl Verdict {
    /// Process exit status for this verdict
    pub fn exit_code(&self) -> i32 {
        match self {
            Verdict::Clean | Verdict::WarningsOnly => 0,
            Verdict::Blocking => 1,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Clean => write!(f, "clean"),
            Verdict::WarningsOnly => write!(f, "warnings-only"),
            Verdict::Blocking => write!(f, "blocking"),
        }
    }
}

/// Aggregated result of a validation run
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub verdict: Verdict,

    /// Findings per severity; every severity is present
    pub counts: BTreeMap<Severity, usize>,

    /// Number of configurations validated
    pub configurations: usize,

    pub findings: Vec<Finding>,
}

impl Report {
    pub fn total(&self) -> usize {
        self.findings.len()
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.counts.get(&severity).copied().unwrap_or(0)
    }

    pub fn exit_code(&self) -> i32 {
        self.verdict.exit_code()
    }

    /// Highest severity among the findings
    pub fn max_severity(&self) -> Option<Severity> {
        self.findings.iter().map(|f| f.severity).max()
    }
}

/// Aggregate findings into a report
///
/// Findings are kept in the order given.
pub fn assemble(findings: Vec<Finding>) -> Report {
    let mut counts: BTreeMap<Severity, usize> = Severity::ALL.iter().map(|s| (*s, 0)).collect();
    for finding in &findings {
        *counts.entry(finding.severity).or_insert(0) += 1;
    }

    let verdict = match findings.iter().map(|f| f.severity).max() {
        None => Verdict::Clean,
        Some(max) if max.is_blocking() => Verdict::Blocking,
        Some(_) => Verdict::WarningsOnly,
    };

    Report {
        verdict,
        counts,
        configurations: 0,
        findings,
    }
}
