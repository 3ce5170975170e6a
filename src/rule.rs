//! Compatibility rule definition and condition evaluation

use crate::finding::{Evidence, Finding, Severity};
use crate::property::{Configuration, Property, Value};
use globset::{Glob, GlobMatcher};
use regex::Regex;
use semver::VersionReq;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Error loading or compiling rules
#[derive(Debug, Error)]
pub enum RuleLoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error in {file}: {message}")]
    Parse { file: String, message: String },

    #[error("Duplicate rule id '{0}'")]
    DuplicateRuleId(String),

    #[error("Rule '{rule}': unknown condition operator '{operator}'")]
    UnknownOperator { rule: String, operator: String },

    #[error("Rule '{rule}': {conditions} condition(s) given, at least 2 are needed")]
    DegenerateRule { rule: String, conditions: usize },

    #[error("Rule '{0}': every condition is 'absent', nothing anchors the rule to a property")]
    UnanchoredRule(String),

    #[error("Rule '{rule}': invalid version range '{range}': {message}")]
    InvalidVersionRange {
        rule: String,
        range: String,
        message: String,
    },

    #[error("Rule '{rule}': invalid regex '{pattern}': {message}")]
    InvalidRegex {
        rule: String,
        pattern: String,
        message: String,
    },

    #[error("Rule '{rule}': invalid key pattern '{pattern}': {message}")]
    InvalidKeyPattern {
        rule: String,
        pattern: String,
        message: String,
    },

    #[error("Rule '{rule}': operator '{operator}' requires a value")]
    MissingValue { rule: String, operator: String },

    #[error("Invalid rule: {0}")]
    Invalid(String),
}

/// Where a rule's conditions may be satisfied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// All conditions hold within one configuration
    #[default]
    Single,
    /// Conditions may hold in different configurations validated together
    Cross,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Single => write!(f, "single"),
            Scope::Cross => write!(f, "cross"),
        }
    }
}

/// Which property keys a condition binds to
#[derive(Debug, Clone)]
pub enum KeySelector {
    /// One exact dotted key
    Exact(String),
    /// A glob over dotted keys (`db.*.ssl`)
    Pattern { pattern: String, matcher: GlobMatcher },
}

impl KeySelector {
    pub fn pattern(pattern: &str) -> Result<Self, globset::Error> {
        let matcher = Glob::new(pattern)?.compile_matcher();
        Ok(KeySelector::Pattern {
            pattern: pattern.to_string(),
            matcher,
        })
    }

    /// The key or pattern text
    pub fn as_str(&self) -> &str {
        match self {
            KeySelector::Exact(key) => key,
            KeySelector::Pattern { pattern, .. } => pattern,
        }
    }

    pub fn matches(&self, key: &str) -> bool {
        match self {
            KeySelector::Exact(k) => k == key,
            KeySelector::Pattern { matcher, .. } => matcher.is_match(key),
        }
    }
}

/// Value test applied to a bound property
#[derive(Debug, Clone)]
pub enum Operator {
    Equals(Value),
    NotEquals(Value),
    VersionRange(VersionReq),
    RegexMatch(Regex),
    Present,
    Absent,
}

impl Operator {
    /// Test a present value
    ///
    /// Type mismatches (a version range over `latest`, say) are simply
    /// `false`; evaluation never fails.
    pub fn test(&self, value: &Value) -> bool {
        match self {
            Operator::Equals(expected) => value.loosely_equals(expected),
            Operator::NotEquals(expected) => !value.loosely_equals(expected),
            Operator::VersionRange(req) => value.as_version().is_some_and(|v| req.matches(&v)),
            Operator::RegexMatch(re) => re.is_match(&value.to_string()),
            Operator::Present => true,
            Operator::Absent => false,
        }
    }
}

/// Outcome of evaluating one condition against one configuration
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionOutcome<'a> {
    /// Satisfied by these properties (key order)
    Matched(Vec<&'a Property>),
    /// An `absent` condition holds
    Missing,
    Unsatisfied,
}

impl ConditionOutcome<'_> {
    pub fn is_satisfied(&self) -> bool {
        !matches!(self, ConditionOutcome::Unsatisfied)
    }
}

/// One predicate of a rule
#[derive(Debug, Clone)]
pub struct Condition {
    pub selector: KeySelector,
    pub operator: Operator,
}

impl Condition {
    pub fn is_absent(&self) -> bool {
        matches!(self.operator, Operator::Absent)
    }

    /// Evaluate against the full property mapping of a configuration
    ///
    /// A key that is not in the configuration is absent: it satisfies
    /// `absent` and fails every other operator.
    pub fn evaluate<'a>(&self, config: &'a Configuration) -> ConditionOutcome<'a> {
        let bound: Vec<&Property> = match &self.selector {
            KeySelector::Exact(key) => config.get(key).into_iter().collect(),
            KeySelector::Pattern { matcher, .. } => {
                config.iter().filter(|p| matcher.is_match(&p.key)).collect()
            }
        };

        if self.is_absent() {
            return if bound.is_empty() {
                ConditionOutcome::Missing
            } else {
                ConditionOutcome::Unsatisfied
            };
        }

        let matched: Vec<&Property> = bound
            .into_iter()
            .filter(|p| self.operator.test(&p.value))
            .collect();

        if matched.is_empty() {
            ConditionOutcome::Unsatisfied
        } else {
            ConditionOutcome::Matched(matched)
        }
    }

    /// Evidence for a satisfied outcome (first matching property)
    pub fn evidence(
        &self,
        index: usize,
        config: &Configuration,
        outcome: &ConditionOutcome<'_>,
    ) -> Option<Evidence> {
        match outcome {
            ConditionOutcome::Matched(props) => props
                .first()
                .map(|p| Evidence::present(index, config.id(), p)),
            ConditionOutcome::Missing => {
                Some(Evidence::absent(index, config.id(), self.selector.as_str()))
            }
            ConditionOutcome::Unsatisfied => None,
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let key = self.selector.as_str();
        match &self.operator {
            Operator::Equals(v) => write!(f, "{} == {}", key, v),
            Operator::NotEquals(v) => write!(f, "{} != {}", key, v),
            Operator::VersionRange(req) => write!(f, "{} in {}", key, req),
            Operator::RegexMatch(re) => write!(f, "{} =~ /{}/", key, re.as_str()),
            Operator::Present => write!(f, "present({})", key),
            Operator::Absent => write!(f, "absent({})", key),
        }
    }
}

/// Condition as written in a rule file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionDefinition {
    /// Exact key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    /// Glob over keys (used instead of `key`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,

    /// Operator name (equals, not-equals, version-range, regex, present, absent)
    #[serde(alias = "operator")]
    pub op: String,

    /// Operand: expected value, version range or regex
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl ConditionDefinition {
    pub fn key(key: &str, op: &str, value: Option<Value>) -> Self {
        Self {
            key: Some(key.to_string()),
            pattern: None,
            op: op.to_string(),
            value,
        }
    }

    pub fn pattern(pattern: &str, op: &str, value: Option<Value>) -> Self {
        Self {
            key: None,
            pattern: Some(pattern.to_string()),
            op: op.to_string(),
            value,
        }
    }

    pub fn equals(key: &str, value: impl Into<Value>) -> Self {
        Self::key(key, "equals", Some(value.into()))
    }

    pub fn not_equals(key: &str, value: impl Into<Value>) -> Self {
        Self::key(key, "not-equals", Some(value.into()))
    }

    pub fn version_range(key: &str, range: &str) -> Self {
        Self::key(key, "version-range", Some(Value::from(range)))
    }

    pub fn regex(key: &str, pattern: &str) -> Self {
        Self::key(key, "regex", Some(Value::from(pattern)))
    }

    pub fn present(key: &str) -> Self {
        Self::key(key, "present", None)
    }

    pub fn absent(key: &str) -> Self {
        Self::key(key, "absent", None)
    }

    /// Compile into an evaluable condition
    pub fn compile(&self, rule_id: &str) -> Result<Condition, RuleLoadError> {
        let selector = match (&self.key, &self.pattern) {
            (Some(key), None) if !key.is_empty() => KeySelector::Exact(key.clone()),
            (None, Some(pattern)) if !pattern.is_empty() => {
                KeySelector::pattern(pattern).map_err(|e| RuleLoadError::InvalidKeyPattern {
                    rule: rule_id.to_string(),
                    pattern: pattern.clone(),
                    message: e.to_string(),
                })?
            }
            (Some(_), Some(_)) => {
                return Err(RuleLoadError::Invalid(format!(
                    "Rule '{}': condition sets both 'key' and 'pattern'",
                    rule_id
                )))
            }
            _ => {
                return Err(RuleLoadError::Invalid(format!(
                    "Rule '{}': condition needs a non-empty 'key' or 'pattern'",
                    rule_id
                )))
            }
        };

        let operand = || {
            self.value.clone().ok_or_else(|| RuleLoadError::MissingValue {
                rule: rule_id.to_string(),
                operator: self.op.clone(),
            })
        };

        let operator = match self.op.to_lowercase().as_str() {
            "equals" | "eq" | "==" => Operator::Equals(operand()?),
            "not-equals" | "not_equals" | "ne" | "!=" => Operator::NotEquals(operand()?),
            "version-range" | "version_range" | "range" => {
                let range = operand()?.to_string();
                Operator::VersionRange(parse_version_range(&range).map_err(|e| {
                    RuleLoadError::InvalidVersionRange {
                        rule: rule_id.to_string(),
                        range: range.clone(),
                        message: e.to_string(),
                    }
                })?)
            }
            "regex" | "matches" | "=~" => {
                let pattern = operand()?.to_string();
                Operator::RegexMatch(Regex::new(&pattern).map_err(|e| {
                    RuleLoadError::InvalidRegex {
                        rule: rule_id.to_string(),
                        pattern: pattern.clone(),
                        message: e.to_string(),
                    }
                })?)
            }
            "present" | "exists" => Operator::Present,
            "absent" | "missing" => Operator::Absent,
            _ => {
                return Err(RuleLoadError::UnknownOperator {
                    rule: rule_id.to_string(),
                    operator: self.op.clone(),
                })
            }
        };

        Ok(Condition { selector, operator })
    }
}

/// Parse a comma-separated version requirement (`>=2.0,<3.0`)
pub fn parse_version_range(range: &str) -> Result<VersionReq, semver::Error> {
    let normalized = range
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(", ");
    VersionReq::parse(&normalized)
}

fn default_true() -> bool {
    true
}

/// Rule as written in a rule file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDefinition {
    /// Stable identifier, referenced by suppressions and reports
    pub id: String,

    #[serde(default)]
    pub scope: Scope,

    #[serde(default)]
    pub severity: Severity,

    /// Ordered predicates, all of which must hold
    #[serde(default)]
    pub conditions: Vec<ConditionDefinition>,

    /// Message template
    #[serde(default)]
    pub message: Option<String>,

    #[serde(default)]
    pub rationale: Option<String>,

    /// Cross rules only: report just the first satisfying combination
    #[serde(default)]
    pub first_match_only: bool,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub tags: Vec<String>,

    /// Documentation URL
    #[serde(default)]
    pub docs: Option<String>,
}

impl RuleDefinition {
    pub fn new(id: &str, scope: Scope) -> Self {
        Self {
            id: id.to_string(),
            scope,
            severity: Severity::Warning,
            conditions: Vec::new(),
            message: None,
            rationale: None,
            first_match_only: false,
            enabled: true,
            tags: Vec::new(),
            docs: None,
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_condition(mut self, condition: ConditionDefinition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_message(mut self, message: &str) -> Self {
        self.message = Some(message.to_string());
        self
    }

    pub fn with_rationale(mut self, rationale: &str) -> Self {
        self.rationale = Some(rationale.to_string());
        self
    }

    pub fn first_match_only(mut self) -> Self {
        self.first_match_only = true;
        self
    }
}

/// A compiled rule
#[derive(Debug, Clone)]
pub struct CompatibilityRule {
    pub id: String,
    pub scope: Scope,
    pub severity: Severity,
    pub conditions: Vec<Condition>,
    pub message: Option<String>,
    pub rationale: Option<String>,
    pub first_match_only: bool,
    pub enabled: bool,
    pub tags: Vec<String>,
    pub docs: Option<String>,
}

impl CompatibilityRule {
    /// Validate and compile a definition
    pub fn compile(def: &RuleDefinition) -> Result<Self, RuleLoadError> {
        if def.id.trim().is_empty() {
            return Err(RuleLoadError::Invalid("rule with empty id".to_string()));
        }

        if def.conditions.len() < 2 {
            return Err(RuleLoadError::DegenerateRule {
                rule: def.id.clone(),
                conditions: def.conditions.len(),
            });
        }

        let conditions = def
            .conditions
            .iter()
            .map(|c| c.compile(&def.id))
            .collect::<Result<Vec<_>, _>>()?;

        if conditions.iter().all(Condition::is_absent) {
            return Err(RuleLoadError::UnanchoredRule(def.id.clone()));
        }

        Ok(Self {
            id: def.id.clone(),
            scope: def.scope,
            severity: def.severity,
            conditions,
            message: def.message.clone(),
            rationale: def.rationale.clone(),
            first_match_only: def.first_match_only,
            enabled: def.enabled,
            tags: def.tags.clone(),
            docs: def.docs.clone(),
        })
    }

    pub fn is_cross(&self) -> bool {
        self.scope == Scope::Cross
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Build the finding for a satisfying set of evidence (one per condition)
    pub fn finding(&self, evidence: Vec<Evidence>) -> Finding {
        let message = self.render_message(&evidence);
        Finding::new(&self.id, self.severity, message, evidence)
            .with_rationale(self.rationale.as_deref())
    }

    /// Render the message template against the matched evidence
    ///
    /// `{N}` is the value matched by condition N, `{N.key}`, `{N.source}`
    /// and `{N.config}` its key, source and configuration; `{some.key}` is
    /// the value of the evidence with that key. Anything else is left as is.
    pub fn render_message(&self, evidence: &[Evidence]) -> String {
        let Some(template) = &self.message else {
            let parts: Vec<String> = evidence.iter().map(describe_evidence).collect();
            return format!("incompatible combination: {}", parts.join(", "));
        };

        let mut out = String::with_capacity(template.len());
        let mut rest = template.as_str();
        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            match after.find('}') {
                Some(close) => {
                    let name = &after[..close];
                    match resolve_placeholder(name, evidence) {
                        Some(text) => out.push_str(&text),
                        None => {
                            out.push('{');
                            out.push_str(name);
                            out.push('}');
                        }
                    }
                    rest = &after[close + 1..];
                }
                None => {
                    out.push_str(&rest[open..]);
                    rest = "";
                }
            }
        }
        out.push_str(rest);
        out
    }
}

fn describe_evidence(ev: &Evidence) -> String {
    match ev.value() {
        Some(value) => format!("{}={} ({})", ev.key, value, ev.configuration),
        None => format!("{} absent ({})", ev.key, ev.configuration),
    }
}

fn resolve_placeholder(name: &str, evidence: &[Evidence]) -> Option<String> {
    let value_text = |ev: &Evidence| {
        ev.value()
            .map(|v| v.to_string())
            .unwrap_or_else(|| "(absent)".to_string())
    };

    let (head, field) = match name.split_once('.') {
        Some((head, field)) if head.chars().all(|c| c.is_ascii_digit()) => (head, Some(field)),
        _ => (name, None),
    };

    if let Ok(index) = head.parse::<usize>() {
        let ev = evidence.iter().find(|e| e.condition == index)?;
        return match field {
            None => Some(value_text(ev)),
            Some("key") => Some(ev.key.clone()),
            Some("source") => Some(ev.source().to_string()),
            Some("config") => Some(ev.configuration.clone()),
            Some(_) => None,
        };
    }

    evidence.iter().find(|e| e.key == name).map(value_text)
}

/// Rule file format (YAML or JSON)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleFile {
    /// Knowledge-base version
    #[serde(default)]
    pub version: Option<String>,

    pub rules: Vec<RuleDefinition>,
}

impl RuleFile {
    /// Read a rule file, choosing the parser by extension
    pub fn load(path: &Path) -> Result<Self, RuleLoadError> {
        let content = std::fs::read_to_string(path)?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        Self::parse(&content, ext, &path.display().to_string())
    }

    /// Parse rule file content (`ext` is `json`, `yaml` or `yml`)
    ///
    /// A document without `rules` whose every value is a list is read as a
    /// legacy allow-list matrix (see [`RuleFile::from_legacy_matrix`]).
    pub fn parse(content: &str, ext: &str, file: &str) -> Result<Self, RuleLoadError> {
        let parse_err = |message: String| RuleLoadError::Parse {
            file: file.to_string(),
            message,
        };

        let doc: serde_json::Value = match ext {
            "json" => serde_json::from_str(content).map_err(|e| parse_err(e.to_string()))?,
            "yaml" | "yml" => serde_yaml::from_str(content).map_err(|e| parse_err(e.to_string()))?,
            _ => return Err(parse_err(format!("unknown rule file format: '{}'", ext))),
        };

        if let Some(matrix) = doc.as_object().filter(|map| is_legacy_matrix(map)) {
            log::debug!("{}: reading legacy allow-list matrix", file);
            return Self::from_legacy_matrix(matrix, file);
        }

        if ext == "json" {
            serde_json::from_value(doc).map_err(|e| parse_err(e.to_string()))
        } else {
            serde_yaml::from_str(content).map_err(|e| parse_err(e.to_string()))
        }
    }

    /// Import a legacy `{"property": [allowed values]}` matrix
    ///
    /// Each property becomes two single-scope error rules:
    /// - `allowed:<property>` fires when the property is present with a value
    ///   outside the list (`present` plus one `not-equals` per allowed value)
    /// - `required:<property>` fires when a configuration has properties but
    ///   not this one (any key `present` plus `absent`), so an empty
    ///   configuration stays clean
    pub fn from_legacy_matrix(
        matrix: &serde_json::Map<String, serde_json::Value>,
        file: &str,
    ) -> Result<Self, RuleLoadError> {
        let mut rules = Vec::with_capacity(matrix.len() * 2);

        for (property, allowed) in matrix {
            let allowed: Vec<Value> =
                serde_json::from_value(allowed.clone()).map_err(|e| RuleLoadError::Parse {
                    file: file.to_string(),
                    message: format!("property '{}': {}", property, e),
                })?;
            if allowed.is_empty() {
                return Err(RuleLoadError::Invalid(format!(
                    "{}: property '{}' allows no value",
                    file, property
                )));
            }

            let listed: Vec<String> = allowed.iter().map(Value::to_string).collect();
            let id = format!("allowed:{}", property);
            let value_rule = allowed.into_iter().fold(
                RuleDefinition::new(&id, Scope::Single)
                    .with_severity(Severity::Error)
                    .with_condition(ConditionDefinition::present(property))
                    .with_message(&format!(
                        "{{0.key}} has incompatible value '{{0}}', allowed: {}",
                        listed.join(", ")
                    )),
                |rule, value| rule.with_condition(ConditionDefinition::not_equals(property, value)),
            );
            rules.push(value_rule);

            rules.push(
                RuleDefinition::new(&format!("required:{}", property), Scope::Single)
                    .with_severity(Severity::Error)
                    .with_condition(ConditionDefinition::pattern("*", "present", None))
                    .with_condition(ConditionDefinition::absent(property))
                    .with_message(&format!("{{0.config}} is missing '{}'", property)),
            );
        }

        Ok(Self {
            version: None,
            rules,
        })
    }
}

fn is_legacy_matrix(map: &serde_json::Map<String, serde_json::Value>) -> bool {
    !map.is_empty()
        && !map.contains_key("rules")
        && map.values().all(serde_json::Value::is_array)
}
