//! Findings produced by the matcher and correlator

use crate::property::{Property, Value};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Severity level of a compatibility rule
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Worth knowing, nothing breaks
    Info,
    /// Likely to misbehave after the upgrade
    #[default]
    Warning,
    /// Known to break
    Error,
    /// Known to break with data loss or an outage
    Critical,
}

impl Severity {
    /// All severities, lowest first
    pub const ALL: [Severity; 4] = [
        Severity::Info,
        Severity::Warning,
        Severity::Error,
        Severity::Critical,
    ];

    /// Whether this severity blocks an upgrade
    pub fn is_blocking(&self) -> bool {
        *self >= Severity::Error
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "info" | "hint" | "note" => Ok(Severity::Info),
            "warning" | "warn" => Ok(Severity::Warning),
            "error" | "err" => Ok(Severity::Error),
            "critical" | "crit" | "fatal" => Ok(Severity::Critical),
            _ => Err(format!("Unknown severity: {}", s)),
        }
    }
}

/// The property that satisfied one condition of a rule
///
/// `property` is `None` when an `absent` condition was satisfied.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evidence {
    /// Index of the condition within the rule
    pub condition: usize,
    /// Configuration the property was found in (or found missing from)
    pub configuration: String,
    /// Key the condition was evaluated against
    pub key: String,
    /// Matching property, if the condition required one
    pub property: Option<Property>,
}

impl Evidence {
    pub fn present(condition: usize, configuration: &str, property: &Property) -> Self {
        Self {
            condition,
            configuration: configuration.to_string(),
            key: property.key.clone(),
            property: Some(property.clone()),
        }
    }

    pub fn absent(condition: usize, configuration: &str, key: &str) -> Self {
        Self {
            condition,
            configuration: configuration.to_string(),
            key: key.to_string(),
            property: None,
        }
    }

    pub fn value(&self) -> Option<&Value> {
        self.property.as_ref().map(|p| &p.value)
    }

    /// Where the evidence came from: the property source, or the
    /// configuration id for an absent key
    pub fn source(&self) -> &str {
        self.property
            .as_ref()
            .map(|p| p.source.as_str())
            .unwrap_or(&self.configuration)
    }
}

/// A detected rule match
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Finding {
    /// Rule that fired
    pub rule_id: String,
    /// Severity (after any configured override)
    pub severity: Severity,
    /// Rendered message
    pub message: String,
    /// Configurations involved, in condition order without repeats
    pub configurations: Vec<String>,
    /// One entry per rule condition
    pub evidence: Vec<Evidence>,
    /// Why the combination is known to break
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

impl Finding {
    pub fn new(
        rule_id: &str,
        severity: Severity,
        message: String,
        evidence: Vec<Evidence>,
    ) -> Self {
        let mut configurations: Vec<String> = Vec::new();
        for ev in &evidence {
            if !configurations.contains(&ev.configuration) {
                configurations.push(ev.configuration.clone());
            }
        }
        Self {
            rule_id: rule_id.to_string(),
            severity,
            message,
            configurations,
            evidence,
            rationale: None,
        }
    }

    pub fn with_rationale(mut self, rationale: Option<&str>) -> Self {
        self.rationale = rationale.map(String::from);
        self
    }

    /// Source used for ordering: the first piece of evidence
    pub fn primary_source(&self) -> &str {
        self.evidence.first().map(Evidence::source).unwrap_or("")
    }

    /// Whether this finding spans more than one configuration
    pub fn is_cross(&self) -> bool {
        self.configurations.len() > 1
    }

    pub fn is_blocking(&self) -> bool {
        self.severity.is_blocking()
    }
}

/// Report order: severity descending, rule id ascending, source ascending,
/// then the involved configurations and evidence keys so the order is total
pub fn compare_findings(a: &Finding, b: &Finding) -> Ordering {
    b.severity
        .cmp(&a.severity)
        .then_with(|| a.rule_id.cmp(&b.rule_id))
        .then_with(|| a.primary_source().cmp(b.primary_source()))
        .then_with(|| a.configurations.cmp(&b.configurations))
        .then_with(|| {
            let keys_a = a.evidence.iter().map(|e| (e.source(), e.key.as_str()));
            let keys_b = b.evidence.iter().map(|e| (e.source(), e.key.as_str()));
            keys_a.cmp(keys_b)
        })
}

/// Sort findings into the deterministic report order
pub fn sort_findings(findings: &mut [Finding]) {
    findings.sort_by(compare_findings);
}
