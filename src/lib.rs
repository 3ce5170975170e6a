//! config-compat - configuration compatibility cross-validation
//!
//! Validates configuration properties against a knowledge base of
//! known-incompatible value combinations and reports the configurations that
//! are likely to break during an upgrade or migration.
//!
//! # Architecture
//!
//! ```text
//! Adapter -> Configuration -> Engine -> { Matcher, Correlator } -> Report
//!                                 \-> RuleMatrix (shared, read-only)
//! ```
//!
//! Adapters normalize files into [`Configuration`]s. The [`Matcher`] checks
//! `single`-scope rules within each configuration; the [`Correlator`] checks
//! `cross`-scope rules across all of them. Findings are assembled into a
//! [`Report`] whose [`Verdict`] decides the exit status.
//!
//! # Rule files
//!
//! ```yaml
//! version: "2024.1"
//! rules:
//!   - id: mysql-ssl-off
//!     severity: error
//!     message: "{db.driver} with ssl disabled"
//!     conditions:
//!       - key: db.driver
//!         op: equals
//!         value: mysql
//!       - key: db.ssl
//!         op: equals
//!         value: false
//! ```

pub mod adapter;
pub mod config;
pub mod correlator;
pub mod engine;
pub mod finding;
pub mod matcher;
pub mod matrix;
pub mod output;
pub mod property;
pub mod report;
pub mod rule;

// Re-export main types
pub use adapter::{Adapter, AdapterError, FileAdapter};
pub use config::{Config, ConfigError};
pub use correlator::{validate_all, Correlator};
pub use engine::Engine;
pub use finding::{Evidence, Finding, Severity};
pub use matcher::{validate, Matcher};
pub use matrix::RuleMatrix;
pub use property::{Configuration, Property, Value, ValueType};
pub use report::{assemble, Report, Verdict};
pub use rule::{CompatibilityRule, Condition, Operator, RuleDefinition, RuleLoadError, Scope};
