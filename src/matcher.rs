//! Single-configuration validation
//!
//! Every property key pulls its candidate rules from the matrix index. Each
//! candidate is then evaluated once against the whole configuration, so a
//! condition on `db.ssl` is checked even when the rule was reached through
//! `db.driver`.

use crate::config::Config;
use crate::finding::{sort_findings, Finding};
use crate::matrix::RuleMatrix;
use crate::property::Configuration;
use crate::rule::{CompatibilityRule, Scope};
use std::collections::HashSet;

/// Validates configurations against the single-scope rules of a matrix
pub struct Matcher<'a> {
    matrix: &'a RuleMatrix,
    config: &'a Config,
}

impl<'a> Matcher<'a> {
    pub fn new(matrix: &'a RuleMatrix, config: &'a Config) -> Self {
        Self { matrix, config }
    }

    /// Findings for one configuration, in report order
    pub fn validate(&self, configuration: &Configuration) -> Vec<Finding> {
        let mut evaluated: HashSet<usize> = HashSet::new();
        let mut findings = Vec::new();

        for key in configuration.keys() {
            for idx in self.matrix.candidate_indices(key) {
                // A rule reached through several of its keys fires once
                if !evaluated.insert(idx) {
                    continue;
                }

                let Some(rule) = self.matrix.rule_at(idx) else {
                    continue;
                };

                if rule.scope != Scope::Single || !self.config.is_rule_enabled(&rule.id) {
                    continue;
                }

                if let Some(finding) = evaluate_rule(rule, configuration) {
                    if let Some(finding) = self.config.apply_policy(finding) {
                        findings.push(finding);
                    }
                }
            }
        }

        log::debug!(
            "{}: {} candidate rule(s), {} finding(s)",
            configuration.id(),
            evaluated.len(),
            findings.len()
        );

        sort_findings(&mut findings);
        findings
    }
}

/// Evaluate every condition of a rule against one configuration
///
/// Returns a finding only when all conditions hold.
pub fn evaluate_rule(rule: &CompatibilityRule, configuration: &Configuration) -> Option<Finding> {
    let mut evidence = Vec::with_capacity(rule.conditions.len());

    for (index, condition) in rule.conditions.iter().enumerate() {
        let outcome = condition.evaluate(configuration);
        evidence.push(condition.evidence(index, configuration, &outcome)?);
    }

    Some(rule.finding(evidence))
}

/// Validate one configuration with default settings
pub fn validate(configuration: &Configuration, matrix: &RuleMatrix) -> Vec<Finding> {
    let config = Config::default();
    Matcher::new(matrix, &config).validate(configuration)
}
