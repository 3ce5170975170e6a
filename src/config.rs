//! Configuration for the validator
//!
//! Reads configuration from:
//! - `.compatrc.yaml` / `.compatrc.json` (project-level)
//! - `~/.compatrc.yaml` (user-level)
//!
//! and merges CLI flags on top.

use crate::finding::{Finding, Severity};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration error
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Engine settings
///
/// Unset switches inherit from `extends` and default to on.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Validate configurations in parallel
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallel: Option<bool>,

    /// Number of worker threads (0 = one per core)
    pub jobs: usize,

    /// Run cross-configuration rules
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cross: Option<bool>,
}

impl EngineConfig {
    pub fn parallel(&self) -> bool {
        self.parallel.unwrap_or(true)
    }

    pub fn cross(&self) -> bool {
        self.cross.unwrap_or(true)
    }
}

/// Output settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub format: OutputFormat,

    pub color: ColorMode,

    /// Debug logging
    pub verbose: bool,

    /// Only errors on stderr, nothing on stdout unless blocking
    pub quiet: bool,
}

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Unknown output format: {}", s)),
        }
    }
}

/// Color mode options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorMode {
    #[default]
    Auto,
    Always,
    Never,
}

/// Rule selection and suppression
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    /// Rule definition files
    pub files: Vec<PathBuf>,

    /// Disabled rules
    pub disabled: Vec<String>,

    /// Enabled rules (empty = all)
    pub enabled: Vec<String>,

    /// Ignore rules by id prefix (case-insensitive)
    pub ignore: Vec<String>,

    /// Severity overrides (rule_id -> severity)
    pub severity: HashMap<String, Severity>,

    /// Per-source rule ignores (glob over property source -> rule ids or "all")
    ///
    /// Compiled by [`Config::load`]; add entries with
    /// [`Config::ignore_for_source`].
    pub(crate) per_source: HashMap<String, Vec<String>>,
}

/// Compiled `per_source` patterns
#[derive(Debug, Clone)]
struct SourceIgnores {
    set: GlobSet,
    /// Rule ids per glob, in `set` order
    rules: Vec<Vec<String>>,
}

impl Default for SourceIgnores {
    fn default() -> Self {
        Self {
            set: GlobSet::empty(),
            rules: Vec::new(),
        }
    }
}

impl SourceIgnores {
    fn compile(per_source: &HashMap<String, Vec<String>>) -> Result<Self, ConfigError> {
        let mut patterns: Vec<(&String, &Vec<String>)> = per_source.iter().collect();
        patterns.sort_by(|a, b| a.0.cmp(b.0));

        let mut builder = GlobSetBuilder::new();
        let mut rules = Vec::with_capacity(patterns.len());
        for (pattern, ids) in patterns {
            let glob = Glob::new(pattern).map_err(|e| {
                ConfigError::Invalid(format!("per_source pattern '{}': {}", pattern, e))
            })?;
            builder.add(glob);
            rules.push(ids.clone());
        }

        let set = builder
            .build()
            .map_err(|e| ConfigError::Invalid(format!("per_source patterns: {}", e)))?;
        Ok(Self { set, rules })
    }

    fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    fn ignores(&self, rule_id: &str, source: &str) -> bool {
        self.set
            .matches(source)
            .into_iter()
            .any(|idx| self.rules[idx].iter().any(|r| r == "all" || r == rule_id))
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Other configuration files to inherit from
    pub extends: Vec<String>,

    pub engine: EngineConfig,

    pub output: OutputConfig,

    pub rules: RulesConfig,

    #[serde(skip)]
    source_ignores: SourceIgnores,
}

impl Config {
    /// Create default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_with_depth(path, 0)?;
        config.source_ignores = SourceIgnores::compile(&config.rules.per_source)?;
        Ok(config)
    }

    /// Load with recursion depth limit (to prevent infinite loops)
    fn load_with_depth(path: &Path, depth: usize) -> Result<Self, ConfigError> {
        const MAX_DEPTH: usize = 10;
        if depth >= MAX_DEPTH {
            return Err(ConfigError::Invalid(
                "Maximum config inheritance depth exceeded".to_string(),
            ));
        }

        let content = std::fs::read_to_string(path)?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let mut config: Self = match ext {
            "yaml" | "yml" => serde_yaml::from_str(&content)?,
            "json" => serde_json::from_str(&content)?,
            _ => {
                return Err(ConfigError::Invalid(format!(
                    "Unknown config file format: {}",
                    ext
                )))
            }
        };

        let base_dir = path.parent().unwrap_or(Path::new("."));

        // Rule files are relative to the file that names them
        for file in &mut config.rules.files {
            if file.is_relative() {
                *file = base_dir.join(&*file);
            }
        }

        if !config.extends.is_empty() {
            let mut base_config = Self::default();

            for extend in &config.extends.clone() {
                let extend_path = if Path::new(extend).is_absolute() {
                    PathBuf::from(extend)
                } else {
                    base_dir.join(extend)
                };
                base_config.merge(Self::load_with_depth(&extend_path, depth + 1)?);
            }

            base_config.merge(config);
            config = base_config;
        }

        Ok(config)
    }

    /// Merge another config into this one (other takes precedence)
    ///
    /// `per_source` is merged uncompiled; [`Config::load`] compiles it.
    fn merge(&mut self, other: Self) {
        // Engine settings
        if other.engine.jobs != 0 {
            self.engine.jobs = other.engine.jobs;
        }
        if other.engine.parallel.is_some() {
            self.engine.parallel = other.engine.parallel;
        }
        if other.engine.cross.is_some() {
            self.engine.cross = other.engine.cross;
        }

        // Output settings
        if other.output.format != OutputFormat::Text {
            self.output.format = other.output.format;
        }
        if other.output.color != ColorMode::Auto {
            self.output.color = other.output.color;
        }
        if other.output.verbose {
            self.output.verbose = true;
        }
        if other.output.quiet {
            self.output.quiet = true;
        }

        // Rules
        self.rules.files.extend(other.rules.files);
        self.rules.disabled.extend(other.rules.disabled);
        if !other.rules.enabled.is_empty() {
            self.rules.enabled = other.rules.enabled;
        }
        self.rules.ignore.extend(other.rules.ignore);
        self.rules.severity.extend(other.rules.severity);
        for (pattern, rules) in other.rules.per_source {
            self.rules.per_source.entry(pattern).or_default().extend(rules);
        }
    }

    /// Load configuration from default locations
    pub fn load_default() -> Result<Self, ConfigError> {
        let config_names = [
            ".compatrc.yaml",
            ".compatrc.yml",
            ".compatrc.json",
            "compat.yaml",
            "compat.yml",
            "compat.json",
        ];

        // Check current directory
        for name in &config_names {
            let path = PathBuf::from(name);
            if path.exists() {
                return Self::load(&path);
            }
        }

        // Check home directory
        if let Some(home) = dirs::home_dir() {
            for name in &config_names {
                let path = home.join(name);
                if path.exists() {
                    return Self::load(&path);
                }
            }
        }

        Ok(Self::default())
    }

    /// Merge CLI arguments into configuration
    pub fn merge_cli(
        &mut self,
        format: Option<OutputFormat>,
        jobs: Option<usize>,
        rule_files: Vec<PathBuf>,
        disabled_rules: Option<Vec<String>>,
        enabled_rules: Option<Vec<String>>,
    ) {
        if let Some(f) = format {
            self.output.format = f;
        }
        if let Some(j) = jobs {
            if j != 0 {
                self.engine.jobs = j;
            }
        }
        self.rules.files.extend(rule_files);
        if let Some(disabled) = disabled_rules {
            self.rules.disabled.extend(disabled);
        }
        if let Some(enabled) = enabled_rules {
            self.rules.enabled = enabled;
        }
    }

    /// Check if a rule is enabled
    pub fn is_rule_enabled(&self, rule_id: &str) -> bool {
        if self.rules.disabled.iter().any(|r| r == rule_id) {
            return false;
        }

        let rule_upper = rule_id.to_uppercase();
        if self
            .rules
            .ignore
            .iter()
            .any(|prefix| rule_upper.starts_with(&prefix.to_uppercase()))
        {
            return false;
        }

        if !self.rules.enabled.is_empty() {
            return self.rules.enabled.iter().any(|r| r == rule_id);
        }

        true
    }

    /// Get severity override for a rule
    pub fn severity_override(&self, rule_id: &str) -> Option<Severity> {
        self.rules.severity.get(rule_id).copied()
    }

    /// Ignore rules (ids or "all") for property sources matching a glob
    pub fn ignore_for_source(&mut self, pattern: &str, rules: &[&str]) -> Result<(), ConfigError> {
        let mut per_source = self.rules.per_source.clone();
        per_source
            .entry(pattern.to_string())
            .or_default()
            .extend(rules.iter().map(|r| r.to_string()));

        self.source_ignores = SourceIgnores::compile(&per_source)?;
        self.rules.per_source = per_source;
        Ok(())
    }

    /// Check if a rule is ignored for a property source
    pub fn should_ignore_rule_for_source(&self, rule_id: &str, source: &str) -> bool {
        self.source_ignores.ignores(rule_id, source)
    }

    /// Apply suppressions and severity overrides to a fired rule
    ///
    /// A finding is dropped when every piece of its evidence comes from a
    /// source that ignores the rule.
    pub fn apply_policy(&self, mut finding: Finding) -> Option<Finding> {
        if !self.source_ignores.is_empty()
            && !finding.evidence.is_empty()
            && finding
                .evidence
                .iter()
                .all(|ev| self.should_ignore_rule_for_source(&finding.rule_id, ev.source()))
        {
            log::debug!("finding for '{}' suppressed by source", finding.rule_id);
            return None;
        }

        if let Some(severity) = self.severity_override(&finding.rule_id) {
            finding.severity = severity;
        }

        Some(finding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finding::Evidence;
    use crate::property::Property;

    fn finding_from(source: &str) -> Finding {
        let prop = Property::new(source, "db.driver", "mysql");
        Finding::new(
            "R1",
            Severity::Error,
            "m".to_string(),
            vec![Evidence::present(0, "host", &prop)],
        )
    }

    #[test]
    fn test_default_config() {
        let config = Config::new();
        assert!(config.engine.parallel());
        assert!(config.engine.cross());
        assert_eq!(config.engine.jobs, 0);
        assert_eq!(config.output.format, OutputFormat::Text);
        assert!(config.rules.files.is_empty());
    }

    #[test]
    fn test_output_format_from_str() {
        assert_eq!("text".parse::<OutputFormat>().unwrap(), OutputFormat::Text);
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert!("sarif".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_config_merge_cli() {
        let mut config = Config::new();
        config.merge_cli(
            Some(OutputFormat::Json),
            Some(4),
            vec![PathBuf::from("rules.yaml")],
            Some(vec!["rule1".to_string()]),
            None,
        );

        assert_eq!(config.output.format, OutputFormat::Json);
        assert_eq!(config.engine.jobs, 4);
        assert_eq!(config.rules.files, vec![PathBuf::from("rules.yaml")]);
        assert!(config.rules.disabled.contains(&"rule1".to_string()));
    }

    #[test]
    fn test_rule_enabled() {
        let mut config = Config::new();
        assert!(config.is_rule_enabled("any-rule"));

        config.rules.disabled.push("disabled-rule".to_string());
        assert!(!config.is_rule_enabled("disabled-rule"));
        assert!(config.is_rule_enabled("other-rule"));

        config.rules.enabled = vec!["only-this".to_string()];
        assert!(!config.is_rule_enabled("other-rule"));
        assert!(config.is_rule_enabled("only-this"));
    }

    #[test]
    fn test_ignore_prefix() {
        let mut config = Config::new();
        config.rules.ignore.push("MYSQL-".to_string());
        assert!(!config.is_rule_enabled("mysql-ssl-off"));
        assert!(config.is_rule_enabled("postgres-ssl-off"));
    }

    #[test]
    fn test_apply_policy_severity_override() {
        let mut config = Config::new();
        config.rules.severity.insert("R1".to_string(), Severity::Warning);

        let finding = config.apply_policy(finding_from("app.yaml")).unwrap();
        assert_eq!(finding.severity, Severity::Warning);
    }

    #[test]
    fn test_apply_policy_per_source_ignore() {
        let mut config = Config::new();
        config.ignore_for_source("legacy/**", &["R1"]).unwrap();

        assert!(config.apply_policy(finding_from("legacy/app.yaml")).is_none());
        assert!(config.apply_policy(finding_from("current/app.yaml")).is_some());

        config.ignore_for_source("current/**", &["all"]).unwrap();
        assert!(config.apply_policy(finding_from("current/app.yaml")).is_none());
        assert!(config.should_ignore_rule_for_source("R2", "current/app.yaml"));
        assert!(!config.should_ignore_rule_for_source("R2", "legacy/app.yaml"));
    }

    #[test]
    fn test_invalid_source_pattern_rejected() {
        let mut config = Config::new();
        let err = config.ignore_for_source("hosts/[a", &["R1"]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(config.rules.per_source.is_empty());

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join(".compatrc.yaml");
        std::fs::write(&path, "rules:\n  per_source:\n    \"hosts/[a\": [all]\n").unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_source_patterns_compiled_on_load() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("base.yaml"),
            "rules:\n  per_source:\n    \"legacy/**\": [R1]\n",
        )
        .unwrap();
        let main = dir.path().join(".compatrc.yaml");
        std::fs::write(&main, "extends: [base.yaml]\n").unwrap();

        let config = Config::load(&main).unwrap();
        assert!(config.apply_policy(finding_from("legacy/app.yaml")).is_none());
        assert!(config.apply_policy(finding_from("current/app.yaml")).is_some());
    }

    #[test]
    fn test_yaml_deserialize() {
        let yaml = r#"
engine:
  parallel: false
  jobs: 4
output:
  format: json
rules:
  files: [rules.yaml]
  disabled:
    - rule1
  severity:
    rule2: critical
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(!config.engine.parallel());
        assert!(config.engine.cross());
        assert_eq!(config.engine.jobs, 4);
        assert_eq!(config.output.format, OutputFormat::Json);
        assert_eq!(config.rules.disabled, vec!["rule1"]);
        assert_eq!(config.severity_override("rule2"), Some(Severity::Critical));
    }

    #[test]
    fn test_load_resolves_rule_files_and_extends() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("base.yaml"),
            "rules:\n  files: [kb/base-rules.yaml]\n  disabled: [old-rule]\n",
        )
        .unwrap();
        let main = dir.path().join(".compatrc.yaml");
        std::fs::write(
            &main,
            "extends: [base.yaml]\nengine:\n  jobs: 2\nrules:\n  files: [local.yaml]\n",
        )
        .unwrap();

        let config = Config::load(&main).unwrap();
        assert_eq!(config.engine.jobs, 2);
        assert_eq!(
            config.rules.files,
            vec![
                dir.path().join("kb/base-rules.yaml"),
                dir.path().join("local.yaml")
            ]
        );
        assert!(!config.is_rule_enabled("old-rule"));
    }

    #[test]
    fn test_extends_keeps_engine_switches() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("base.yaml"),
            "engine:\n  cross: false\n  parallel: false\n",
        )
        .unwrap();
        let main = dir.path().join(".compatrc.yaml");
        std::fs::write(&main, "extends: [base.yaml]\nengine:\n  jobs: 2\n").unwrap();

        let config = Config::load(&main).unwrap();
        assert!(!config.engine.cross());
        assert!(!config.engine.parallel());
        assert_eq!(config.engine.jobs, 2);

        // An explicit setting in the extending file still wins
        std::fs::write(&main, "extends: [base.yaml]\nengine:\n  cross: true\n").unwrap();
        let config = Config::load(&main).unwrap();
        assert!(config.engine.cross());
        assert!(!config.engine.parallel());
    }

    #[test]
    fn test_load_unknown_format() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("compat.toml");
        std::fs::write(&path, "").unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_extends_cycle_is_bounded() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("loop.yaml");
        std::fs::write(&path, "extends: [loop.yaml]\n").unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::Invalid(_))));
    }
}
