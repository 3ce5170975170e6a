//! Validation engine
//!
//! Owns the shared rule matrix and the run configuration, fans single-scope
//! validation out over a worker pool and runs the cross pass alongside it.

use crate::config::Config;
use crate::correlator::Correlator;
use crate::finding::{sort_findings, Finding};
use crate::matcher::Matcher;
use crate::matrix::RuleMatrix;
use crate::property::Configuration;
use crate::report::{assemble, Report};
use rayon::prelude::*;
use std::sync::Arc;
use std::time::Instant;

/// Validation engine
pub struct Engine {
    matrix: Arc<RuleMatrix>,
    config: Config,
}

impl Engine {
    pub fn new(matrix: Arc<RuleMatrix>, config: Config) -> Self {
        Self { matrix, config }
    }

    /// Validate a fleet and assemble the report
    pub fn run(&self, configurations: &[Configuration]) -> Report {
        let start = Instant::now();

        let mut findings = if self.config.engine.parallel() {
            let threads = if self.config.engine.jobs > 0 {
                self.config.engine.jobs
            } else {
                num_cpus::get()
            };

            match rayon::ThreadPoolBuilder::new().num_threads(threads).build() {
                Ok(pool) => pool.install(|| {
                    let (mut single, cross) = rayon::join(
                        || self.validate_each_parallel(configurations),
                        || self.correlate(configurations),
                    );
                    single.extend(cross);
                    single
                }),
                Err(e) => {
                    log::warn!("could not start worker pool ({}), validating sequentially", e);
                    self.run_sequential(configurations)
                }
            }
        } else {
            self.run_sequential(configurations)
        };

        sort_findings(&mut findings);

        let mut report = assemble(findings);
        report.configurations = configurations.len();

        log::info!(
            "validated {} configuration(s) against {} rule(s) in {:?}: {}",
            configurations.len(),
            self.matrix.len(),
            start.elapsed(),
            report.verdict
        );

        report
    }

    fn run_sequential(&self, configurations: &[Configuration]) -> Vec<Finding> {
        let matcher = Matcher::new(&self.matrix, &self.config);
        let mut findings: Vec<Finding> = configurations
            .iter()
            .flat_map(|c| matcher.validate(c))
            .collect();
        findings.extend(self.correlate(configurations));
        findings
    }

    /// Per-configuration results are collected in input order
    fn validate_each_parallel(&self, configurations: &[Configuration]) -> Vec<Finding> {
        let matcher = Matcher::new(&self.matrix, &self.config);
        let per_config: Vec<Vec<Finding>> = configurations
            .par_iter()
            .map(|c| matcher.validate(c))
            .collect();
        per_config.into_iter().flatten().collect()
    }

    fn correlate(&self, configurations: &[Configuration]) -> Vec<Finding> {
        if !self.config.engine.cross() {
            return Vec::new();
        }
        Correlator::new(&self.matrix, &self.config).validate_all(configurations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finding::Severity;
    use crate::property::Value;
    use crate::report::Verdict;
    use crate::rule::{ConditionDefinition, RuleDefinition, Scope};

    fn matrix() -> Arc<RuleMatrix> {
        let single = RuleDefinition::new("mysql-ssl-off", Scope::Single)
            .with_severity(Severity::Error)
            .with_condition(ConditionDefinition::equals("db.driver", "mysql"))
            .with_condition(ConditionDefinition::equals("db.ssl", false));
        let cross = RuleDefinition::new("mixed-protocol", Scope::Cross)
            .with_severity(Severity::Warning)
            .with_condition(ConditionDefinition::version_range("cluster.protocol", "<2.0"))
            .with_condition(ConditionDefinition::version_range("cluster.protocol", ">=2.0"));
        Arc::new(RuleMatrix::load(vec![single, cross]).unwrap())
    }

    fn fleet() -> Vec<Configuration> {
        (0..8)
            .map(|i| {
                let protocol = if i % 2 == 0 { "1.5.0" } else { "2.0.0" };
                Configuration::new(&format!("node-{}", i))
                    .with_property("db.driver", "mysql")
                    .with_property("db.ssl", i % 3 != 0)
                    .with_property("cluster.protocol", Value::infer(protocol))
            })
            .collect()
    }

    #[test]
    fn test_run_combines_single_and_cross() {
        let engine = Engine::new(matrix(), Config::default());
        let report = engine.run(&fleet());

        // node-0, node-3, node-6 have ssl off
        assert_eq!(report.count(Severity::Error), 3);
        // 4 old nodes x 4 new nodes
        assert_eq!(report.count(Severity::Warning), 16);
        assert_eq!(report.verdict, Verdict::Blocking);
        assert_eq!(report.configurations, 8);
        assert_eq!(report.findings[0].severity, Severity::Error);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let parallel = Engine::new(matrix(), Config::default()).run(&fleet());

        let mut config = Config::default();
        config.engine.parallel = Some(false);
        let sequential = Engine::new(matrix(), config).run(&fleet());

        assert_eq!(parallel.findings, sequential.findings);
    }

    #[test]
    fn test_cross_pass_can_be_disabled() {
        let mut config = Config::default();
        config.engine.cross = Some(false);
        config.engine.jobs = 2;
        let report = Engine::new(matrix(), config).run(&fleet());
        assert_eq!(report.count(Severity::Warning), 0);
        assert_eq!(report.total(), 3);
    }

    #[test]
    fn test_empty_fleet_is_clean() {
        let report = Engine::new(matrix(), Config::default()).run(&[]);
        assert_eq!(report.verdict, Verdict::Clean);
        assert_eq!(report.exit_code(), 0);
    }
}
