//! Rule matrix: the compiled, indexed knowledge base
//!
//! Built once per run and read-only afterwards. Every non-`absent` condition
//! registers its rule under the exact key or glob pattern it binds to, so a
//! property key only ever pulls in rules that could match it.

use crate::rule::{
    CompatibilityRule, KeySelector, RuleDefinition, RuleFile, RuleLoadError, Scope,
};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::HashMap;
use std::path::Path;

/// Indexed, immutable set of compatibility rules
#[derive(Debug, Clone)]
pub struct RuleMatrix {
    rules: Vec<CompatibilityRule>,
    by_id: HashMap<String, usize>,
    exact_index: HashMap<String, Vec<usize>>,
    patterns: GlobSet,
    /// Rules per glob, parallel to `patterns`
    pattern_rules: Vec<Vec<usize>>,
    /// Knowledge-base versions the matrix was built from
    versions: Vec<String>,
}

impl Default for RuleMatrix {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            by_id: HashMap::new(),
            exact_index: HashMap::new(),
            patterns: GlobSet::empty(),
            pattern_rules: Vec::new(),
            versions: Vec::new(),
        }
    }
}

impl RuleMatrix {
    /// Compile and index rule definitions
    ///
    /// Fails on the first malformed rule: unknown operator, fewer than two
    /// conditions, duplicate id, unparseable version range, regex or pattern.
    pub fn load(
        definitions: impl IntoIterator<Item = RuleDefinition>,
    ) -> Result<Self, RuleLoadError> {
        let mut matrix = Self::default();
        let mut pattern_slots: HashMap<String, usize> = HashMap::new();
        let mut globs = GlobSetBuilder::new();

        for def in definitions {
            if matrix.by_id.contains_key(&def.id) {
                return Err(RuleLoadError::DuplicateRuleId(def.id));
            }

            let rule = CompatibilityRule::compile(&def)?;
            let idx = matrix.rules.len();

            if rule.enabled {
                for condition in rule.conditions.iter().filter(|c| !c.is_absent()) {
                    match &condition.selector {
                        KeySelector::Exact(key) => {
                            push_unique(matrix.exact_index.entry(key.clone()).or_default(), idx);
                        }
                        KeySelector::Pattern { pattern, .. } => {
                            let slot = match pattern_slots.get(pattern) {
                                Some(slot) => *slot,
                                None => {
                                    let glob = Glob::new(pattern).map_err(|e| {
                                        RuleLoadError::InvalidKeyPattern {
                                            rule: rule.id.clone(),
                                            pattern: pattern.clone(),
                                            message: e.to_string(),
                                        }
                                    })?;
                                    globs.add(glob);
                                    matrix.pattern_rules.push(Vec::new());
                                    let slot = matrix.pattern_rules.len() - 1;
                                    pattern_slots.insert(pattern.clone(), slot);
                                    slot
                                }
                            };
                            push_unique(&mut matrix.pattern_rules[slot], idx);
                        }
                    }
                }
            } else {
                log::debug!("rule '{}' is disabled, not indexed", rule.id);
            }

            matrix.by_id.insert(rule.id.clone(), idx);
            matrix.rules.push(rule);
        }

        matrix.patterns = globs
            .build()
            .map_err(|e| RuleLoadError::Invalid(format!("key pattern index: {}", e)))?;

        log::debug!(
            "rule matrix: {} rules, {} indexed keys, {} key patterns",
            matrix.rules.len(),
            matrix.exact_index.len(),
            matrix.pattern_rules.len()
        );

        Ok(matrix)
    }

    /// Load and merge rule files (YAML or JSON); ids must be unique across files
    pub fn from_files<P: AsRef<Path>>(paths: &[P]) -> Result<Self, RuleLoadError> {
        let mut definitions = Vec::new();
        let mut versions = Vec::new();

        for path in paths {
            let path = path.as_ref();
            let file = RuleFile::load(path)?;
            log::debug!("loaded {} rule(s) from {}", file.rules.len(), path.display());
            if let Some(version) = file.version {
                versions.push(version);
            }
            definitions.extend(file.rules);
        }

        let mut matrix = Self::load(definitions)?;
        matrix.versions = versions;
        Ok(matrix)
    }

    /// Load a single in-memory rule file
    pub fn from_rule_file(file: RuleFile) -> Result<Self, RuleLoadError> {
        let mut matrix = Self::load(file.rules)?;
        matrix.versions = file.version.into_iter().collect();
        Ok(matrix)
    }

    /// Indices of enabled rules that could match a property with this key,
    /// ascending and without repeats
    pub fn candidate_indices(&self, key: &str) -> Vec<usize> {
        let mut indices: Vec<usize> = self
            .exact_index
            .get(key)
            .map(|v| v.to_vec())
            .unwrap_or_default();

        for slot in self.patterns.matches(key) {
            indices.extend_from_slice(&self.pattern_rules[slot]);
        }

        indices.sort_unstable();
        indices.dedup();
        indices
    }

    /// Rules that could match a property with this key
    pub fn candidate_rules(&self, key: &str) -> Vec<&CompatibilityRule> {
        self.candidate_indices(key)
            .into_iter()
            .map(|idx| &self.rules[idx])
            .collect()
    }

    /// Rule at a position returned by [`candidate_indices`](Self::candidate_indices)
    pub fn rule_at(&self, idx: usize) -> Option<&CompatibilityRule> {
        self.rules.get(idx)
    }

    /// Look up a rule by id
    pub fn rule(&self, id: &str) -> Option<&CompatibilityRule> {
        self.by_id.get(id).map(|idx| &self.rules[*idx])
    }

    /// All rules in definition order
    pub fn all_rules(&self) -> &[CompatibilityRule] {
        &self.rules
    }

    /// Enabled rules of the given scope, in definition order
    pub fn rules_in_scope(&self, scope: Scope) -> impl Iterator<Item = &CompatibilityRule> {
        self.rules
            .iter()
            .filter(move |r| r.enabled && r.scope == scope)
    }

    pub fn versions(&self) -> &[String] {
        &self.versions
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn push_unique(list: &mut Vec<usize>, idx: usize) {
    if list.last() != Some(&idx) {
        list.push(idx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finding::Severity;
    use crate::rule::ConditionDefinition;
    use crate::property::Value;

    fn mysql_ssl() -> RuleDefinition {
        RuleDefinition::new("R1", Scope::Single)
            .with_severity(Severity::Error)
            .with_condition(ConditionDefinition::equals("db.driver", "mysql"))
            .with_condition(ConditionDefinition::equals("db.ssl", false))
    }

    #[test]
    fn test_load_and_lookup() {
        let matrix = RuleMatrix::load(vec![mysql_ssl()]).unwrap();
        assert_eq!(matrix.len(), 1);
        assert!(matrix.rule("R1").is_some());
        assert!(matrix.rule("R2").is_none());
        assert_eq!(matrix.all_rules()[0].id, "R1");
    }

    #[test]
    fn test_candidate_rules_by_key() {
        let other = RuleDefinition::new("R2", Scope::Single)
            .with_condition(ConditionDefinition::present("cache.backend"))
            .with_condition(ConditionDefinition::absent("cache.ttl"));
        let matrix = RuleMatrix::load(vec![mysql_ssl(), other]).unwrap();

        let ids: Vec<&str> = matrix
            .candidate_rules("db.ssl")
            .iter()
            .map(|r| r.id.as_str())
            .collect();
        assert_eq!(ids, vec!["R1"]);

        assert_eq!(matrix.candidate_indices("cache.backend"), vec![1]);
        // absent conditions are not indexed
        assert!(matrix.candidate_indices("cache.ttl").is_empty());
        assert!(matrix.candidate_rules("unrelated.key").is_empty());
    }

    #[test]
    fn test_candidate_rules_by_pattern() {
        let def = RuleDefinition::new("P1", Scope::Single)
            .with_condition(ConditionDefinition::pattern(
                "db.*.ssl",
                "equals",
                Some(Value::Boolean(false)),
            ))
            .with_condition(ConditionDefinition::equals("db.driver", "mysql"));
        let matrix = RuleMatrix::load(vec![mysql_ssl(), def]).unwrap();

        assert_eq!(matrix.candidate_indices("db.replica.ssl"), vec![1]);
        assert_eq!(matrix.candidate_indices("db.driver"), vec![0, 1]);
    }

    #[test]
    fn test_rule_indexed_once_per_key() {
        let def = RuleDefinition::new("R", Scope::Single)
            .with_condition(ConditionDefinition::present("a"))
            .with_condition(ConditionDefinition::not_equals("a", "x"));
        let matrix = RuleMatrix::load(vec![def]).unwrap();
        assert_eq!(matrix.candidate_indices("a"), vec![0]);
    }

    #[test]
    fn test_duplicate_rule_id_rejected() {
        let err = RuleMatrix::load(vec![mysql_ssl(), mysql_ssl()]).unwrap_err();
        assert!(matches!(err, RuleLoadError::DuplicateRuleId(id) if id == "R1"));
    }

    #[test]
    fn test_single_condition_rule_rejected() {
        let def = RuleDefinition::new("solo", Scope::Single)
            .with_condition(ConditionDefinition::equals("db.driver", "mysql"));
        let err = RuleMatrix::load(vec![def]).unwrap_err();
        assert!(matches!(err, RuleLoadError::DegenerateRule { .. }));
    }

    #[test]
    fn test_single_condition_cross_rule_rejected() {
        let def = RuleDefinition::new("solo", Scope::Cross)
            .with_condition(ConditionDefinition::present("a"));
        assert!(RuleMatrix::load(vec![def]).is_err());
    }

    #[test]
    fn test_disabled_rule_not_indexed() {
        let mut def = mysql_ssl();
        def.enabled = false;
        let matrix = RuleMatrix::load(vec![def]).unwrap();
        assert_eq!(matrix.len(), 1);
        assert!(matrix.candidate_indices("db.driver").is_empty());
        assert_eq!(matrix.rules_in_scope(Scope::Single).count(), 0);
    }

    #[test]
    fn test_from_rule_file_keeps_version() {
        let file = RuleFile {
            version: Some("2024.1".to_string()),
            rules: vec![mysql_ssl()],
        };
        let matrix = RuleMatrix::from_rule_file(file).unwrap();
        assert_eq!(matrix.versions(), &["2024.1".to_string()]);
    }

    #[test]
    fn test_from_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let a = dir.path().join("a.yaml");
        let b = dir.path().join("b.json");
        std::fs::write(
            &a,
            r#"
version: "1"
rules:
  - id: A
    conditions:
      - { key: x, op: present }
      - { key: y, op: absent }
"#,
        )
        .unwrap();
        std::fs::write(
            &b,
            r#"{"rules": [{"id": "A", "conditions": [
                {"key": "p", "op": "present"}, {"key": "q", "op": "present"}]}]}"#,
        )
        .unwrap();

        let matrix = RuleMatrix::from_files(&[&a]).unwrap();
        assert_eq!(matrix.len(), 1);
        assert_eq!(matrix.versions(), &["1".to_string()]);

        let err = RuleMatrix::from_files(&[&a, &b]).unwrap_err();
        assert!(matches!(err, RuleLoadError::DuplicateRuleId(_)));
    }

    #[test]
    fn test_matrix_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RuleMatrix>();
    }
}
