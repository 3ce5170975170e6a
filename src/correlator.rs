//! Cross-configuration validation
//!
//! A cross rule's conditions may each be satisfied by a different
//! configuration of the fleet. Configurations are pre-filtered per condition
//! through a fleet-wide key index, then combinations of the survivors are
//! enumerated in input order.

use crate::config::Config;
use crate::finding::{sort_findings, Evidence, Finding};
use crate::matrix::RuleMatrix;
use crate::property::Configuration;
use crate::rule::{CompatibilityRule, Condition, KeySelector, Scope};
use std::collections::{BTreeSet, HashMap};

/// Which configurations hold each key
struct FleetIndex<'f> {
    keys: HashMap<&'f str, Vec<usize>>,
    size: usize,
}

impl<'f> FleetIndex<'f> {
    fn build(configurations: &'f [Configuration]) -> Self {
        let mut keys: HashMap<&str, Vec<usize>> = HashMap::new();
        for (idx, configuration) in configurations.iter().enumerate() {
            for key in configuration.keys() {
                keys.entry(key).or_default().push(idx);
            }
        }
        Self {
            keys,
            size: configurations.len(),
        }
    }

    /// Configurations that could satisfy a condition, ascending
    fn candidates(&self, condition: &Condition) -> Vec<usize> {
        if condition.is_absent() {
            return (0..self.size).collect();
        }

        match &condition.selector {
            KeySelector::Exact(key) => self.keys.get(key.as_str()).cloned().unwrap_or_default(),
            KeySelector::Pattern { matcher, .. } => {
                let set: BTreeSet<usize> = self
                    .keys
                    .iter()
                    .filter(|(key, _)| matcher.is_match(key))
                    .flat_map(|(_, configs)| configs.iter().copied())
                    .collect();
                set.into_iter().collect()
            }
        }
    }
}

/// Validates a fleet of configurations against the cross-scope rules
pub struct Correlator<'a> {
    matrix: &'a RuleMatrix,
    config: &'a Config,
}

impl<'a> Correlator<'a> {
    pub fn new(matrix: &'a RuleMatrix, config: &'a Config) -> Self {
        Self { matrix, config }
    }

    /// Findings across all configurations, in report order
    pub fn validate_all(&self, configurations: &[Configuration]) -> Vec<Finding> {
        if configurations.len() < 2 {
            return Vec::new();
        }

        let index = FleetIndex::build(configurations);
        let mut findings = Vec::new();

        for rule in self.matrix.rules_in_scope(Scope::Cross) {
            if !self.config.is_rule_enabled(&rule.id) {
                continue;
            }

            let fired = correlate_rule(rule, configurations, &index, self.config);
            log::debug!("cross rule '{}': {} combination(s)", rule.id, fired.len());
            findings.extend(fired);
        }

        sort_findings(&mut findings);
        findings
    }
}

/// Every combination of configurations (one per condition, at least two
/// distinct) that jointly satisfies the rule and survives the policy
fn correlate_rule(
    rule: &CompatibilityRule,
    configurations: &[Configuration],
    index: &FleetIndex<'_>,
    config: &Config,
) -> Vec<Finding> {
    // Per condition: (configuration index, evidence) pairs that satisfy it
    let mut satisfying: Vec<Vec<(usize, Evidence)>> = Vec::with_capacity(rule.conditions.len());

    for (cond_idx, condition) in rule.conditions.iter().enumerate() {
        let hits: Vec<(usize, Evidence)> = index
            .candidates(condition)
            .into_iter()
            .filter_map(|cfg_idx| {
                let configuration = &configurations[cfg_idx];
                let outcome = condition.evaluate(configuration);
                condition
                    .evidence(cond_idx, configuration, &outcome)
                    .map(|ev| (cfg_idx, ev))
            })
            .collect();

        if hits.is_empty() {
            return Vec::new();
        }
        satisfying.push(hits);
    }

    let mut findings = Vec::new();
    let mut cursor = vec![0usize; satisfying.len()];

    loop {
        let distinct: BTreeSet<usize> = cursor
            .iter()
            .zip(&satisfying)
            .map(|(pos, hits)| hits[*pos].0)
            .collect();

        if distinct.len() >= 2 {
            let evidence: Vec<Evidence> = cursor
                .iter()
                .zip(&satisfying)
                .map(|(pos, hits)| hits[*pos].1.clone())
                .collect();
            if let Some(finding) = config.apply_policy(rule.finding(evidence)) {
                findings.push(finding);
                if rule.first_match_only {
                    break;
                }
            }
        }

        if !advance(&mut cursor, &satisfying) {
            break;
        }
    }

    findings
}

/// Step the odometer, last condition fastest; false once exhausted
fn advance(cursor: &mut [usize], satisfying: &[Vec<(usize, Evidence)>]) -> bool {
    for pos in (0..cursor.len()).rev() {
        cursor[pos] += 1;
        if cursor[pos] < satisfying[pos].len() {
            return true;
        }
        cursor[pos] = 0;
    }
    false
}

/// Validate a fleet with default settings
pub fn validate_all(configurations: &[Configuration], matrix: &RuleMatrix) -> Vec<Finding> {
    let config = Config::default();
    Correlator::new(matrix, &config).validate_all(configurations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finding::Severity;
    use crate::property::Value;
    use crate::rule::{ConditionDefinition, RuleDefinition};
    use pretty_assertions::assert_eq;

    fn protocol_split() -> RuleDefinition {
        RuleDefinition::new("mixed-protocol", Scope::Cross)
            .with_severity(Severity::Error)
            .with_condition(ConditionDefinition::version_range("cluster.protocol", "<2.0"))
            .with_condition(ConditionDefinition::version_range("cluster.protocol", ">=2.0"))
            .with_message("{0.config} speaks {0}, {1.config} speaks {1}")
    }

    fn node(id: &str, protocol: &str) -> Configuration {
        Configuration::new(id).with_property("cluster.protocol", Value::infer(protocol))
    }

    #[test]
    fn test_two_configurations_one_finding() {
        let matrix = RuleMatrix::load(vec![protocol_split()]).unwrap();
        let a = node("A", "1.4.0");
        let b = node("B", "2.1.0");

        let findings = validate_all(&[a.clone(), b.clone()], &matrix);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].configurations, vec!["A", "B"]);
        assert_eq!(findings[0].message, "A speaks 1.4.0, B speaks 2.1.0");

        assert!(validate_all(&[a], &matrix).is_empty());
        assert!(validate_all(&[b], &matrix).is_empty());
    }

    #[test]
    fn test_each_pair_reported() {
        let matrix = RuleMatrix::load(vec![protocol_split()]).unwrap();
        let fleet = vec![
            node("A", "1.4.0"),
            node("B", "2.1.0"),
            node("C", "2.2.0"),
        ];

        let findings = validate_all(&fleet, &matrix);
        let pairs: Vec<Vec<String>> = findings.iter().map(|f| f.configurations.clone()).collect();
        assert_eq!(
            pairs,
            vec![
                vec!["A".to_string(), "B".to_string()],
                vec!["A".to_string(), "C".to_string()],
            ]
        );
    }

    #[test]
    fn test_first_match_only() {
        let matrix = RuleMatrix::load(vec![protocol_split().first_match_only()]).unwrap();
        let fleet = vec![
            node("A", "1.4.0"),
            node("B", "1.9.0"),
            node("C", "2.2.0"),
            node("D", "3.0.0"),
        ];

        let findings = validate_all(&fleet, &matrix);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].configurations, vec!["A", "C"]);
    }

    #[test]
    fn test_first_match_only_skips_suppressed_combinations() {
        let matrix = RuleMatrix::load(vec![protocol_split().first_match_only()]).unwrap();
        let fleet = vec![
            node("legacy-a", "1.4.0"),
            node("legacy-b", "2.1.0"),
            node("current-c", "2.2.0"),
        ];
        let mut config = Config::default();
        config.ignore_for_source("legacy-*", &["mixed-protocol"]).unwrap();

        let findings = Correlator::new(&matrix, &config).validate_all(&fleet);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].configurations, vec!["legacy-a", "current-c"]);
    }

    #[test]
    fn test_same_configuration_does_not_correlate_with_itself() {
        let def = RuleDefinition::new("x", Scope::Cross)
            .with_condition(ConditionDefinition::present("a"))
            .with_condition(ConditionDefinition::present("b"));
        let matrix = RuleMatrix::load(vec![def]).unwrap();

        let both = Configuration::new("both")
            .with_property("a", 1i64)
            .with_property("b", 1i64);
        let other = Configuration::new("other").with_property("z", 1i64);
        assert!(validate_all(&[both, other], &matrix).is_empty());
    }

    #[test]
    fn test_absent_condition_across_fleet() {
        let def = RuleDefinition::new("missing-peer-setting", Scope::Cross)
            .with_condition(ConditionDefinition::equals("tls.enabled", true))
            .with_condition(ConditionDefinition::absent("tls.enabled"));
        let matrix = RuleMatrix::load(vec![def]).unwrap();

        let secure = Configuration::new("secure").with_property("tls.enabled", true);
        let legacy = Configuration::new("legacy").with_property("port", 80i64);

        let findings = validate_all(&[secure, legacy], &matrix);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].configurations, vec!["secure", "legacy"]);
        assert!(findings[0].evidence[1].property.is_none());
    }

    #[test]
    fn test_pattern_condition_prefilter() {
        let def = RuleDefinition::new("cache-split", Scope::Cross)
            .with_condition(ConditionDefinition::pattern(
                "cache.*.backend",
                "equals",
                Some(Value::from("redis")),
            ))
            .with_condition(ConditionDefinition::equals("cache.backend", "memcached"));
        let matrix = RuleMatrix::load(vec![def]).unwrap();

        let a = Configuration::new("a").with_property("cache.session.backend", "redis");
        let b = Configuration::new("b").with_property("cache.backend", "memcached");
        let c = Configuration::new("c").with_property("cache.session.backend", "memcached");

        let findings = validate_all(&[a, b, c], &matrix);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].configurations, vec!["a", "b"]);
    }

    #[test]
    fn test_single_rules_ignored() {
        let def = RuleDefinition::new("s", Scope::Single)
            .with_condition(ConditionDefinition::present("a"))
            .with_condition(ConditionDefinition::present("b"));
        let matrix = RuleMatrix::load(vec![def]).unwrap();
        let a = Configuration::new("A").with_property("a", 1i64);
        let b = Configuration::new("B").with_property("b", 1i64);
        assert!(validate_all(&[a, b], &matrix).is_empty());
    }
}
