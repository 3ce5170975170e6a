//! config-compat CLI
//!
//! Validates configuration files against compatibility rule files.

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use colored::Colorize;
use config_compat::adapter::{produce_all, FileAdapter};
use config_compat::config::{ColorMode, Config, OutputFormat};
use config_compat::engine::Engine;
use config_compat::matrix::RuleMatrix;
use config_compat::output::{JsonFormatter, ReportFormatter, TextFormatter};
use config_compat::report::Verdict;
use glob::glob;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(
    name = "config-compat",
    version,
    about = "Configuration compatibility validator",
    long_about = "Cross-validates configuration files against a matrix of known-incompatible \
                  property combinations and reports what is likely to break on upgrade."
)]
struct Cli {
    /// Configuration files or glob patterns to validate
    configs: Vec<String>,

    /// Rule definition file (repeatable)
    #[arg(short, long = "rules")]
    rules: Vec<PathBuf>,

    /// Tool configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum)]
    format: Option<Format>,

    /// Number of parallel jobs (0 = auto)
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Disable specific rules (comma-separated)
    #[arg(long, value_delimiter = ',')]
    disable: Option<Vec<String>>,

    /// Only enable specific rules (comma-separated)
    #[arg(long, value_delimiter = ',')]
    select: Option<Vec<String>>,

    /// Skip cross-configuration validation
    #[arg(long)]
    no_cross: bool,

    /// Warn about and skip configuration files that cannot be parsed
    #[arg(long)]
    skip_invalid: bool,

    /// List loaded rules and exit
    #[arg(long)]
    list_rules: bool,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Enable verbose output
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// Only report errors
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Text,
    Json,
}

impl From<Format> for OutputFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Text => OutputFormat::Text,
            Format::Json => OutputFormat::Json,
        }
    }
}

fn main() {
    let cli = Cli::parse();

    match run(&cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{}: {:#}", "error".red().bold(), e);
            std::process::exit(2);
        }
    }
}

fn run(cli: &Cli) -> Result<i32> {
    // Load configuration
    let mut config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => Config::load_default().context("failed to load config")?,
    };

    config.merge_cli(
        cli.format.map(OutputFormat::from),
        cli.jobs,
        cli.rules.clone(),
        cli.disable.clone(),
        cli.select.clone(),
    );
    if cli.no_cross {
        config.engine.cross = Some(false);
    }
    if cli.verbose {
        config.output.verbose = true;
    }
    if cli.quiet {
        config.output.quiet = true;
    }

    init_logging(&config);

    if cli.no_color || config.output.color == ColorMode::Never {
        colored::control::set_override(false);
    } else if config.output.color == ColorMode::Always {
        colored::control::set_override(true);
    }

    if config.rules.files.is_empty() {
        bail!("no rule files given (use --rules or rules.files in the config)");
    }

    let matrix = RuleMatrix::from_files(&config.rules.files).context("failed to load rules")?;

    if cli.list_rules {
        list_rules(&matrix);
        return Ok(0);
    }

    let files = expand_patterns(&cli.configs)?;
    if files.is_empty() {
        bail!("no configuration files found");
    }

    let adapters: Vec<FileAdapter> = files.into_iter().map(FileAdapter::new).collect();
    let configurations = produce_all(&adapters, cli.skip_invalid)?;

    log::debug!(
        "validating {} configuration(s) against {} rule(s)",
        configurations.len(),
        matrix.len()
    );

    let colored = !cli.no_color && config.output.color != ColorMode::Never;
    let format = config.output.format;
    let quiet = config.output.quiet;

    let engine = Engine::new(Arc::new(matrix), config);
    let report = engine.run(&configurations);

    let formatter: Box<dyn ReportFormatter> = match format {
        OutputFormat::Text => {
            let formatter = TextFormatter::new();
            Box::new(if colored {
                formatter
            } else {
                formatter.without_color()
            })
        }
        OutputFormat::Json => Box::new(JsonFormatter::new().pretty()),
    };

    if !quiet || report.verdict == Verdict::Blocking {
        print!("{}", formatter.format(&report));
    }

    Ok(report.exit_code())
}

fn init_logging(config: &Config) {
    let level = if config.output.verbose {
        "debug"
    } else if config.output.quiet {
        "error"
    } else {
        "warn"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

/// Expand glob patterns into existing files, keeping argument order
fn expand_patterns(patterns: &[String]) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = Vec::new();
    for pattern in patterns {
        let paths = glob(pattern).with_context(|| format!("invalid pattern '{}'", pattern))?;
        let before = files.len();
        for entry in paths.flatten() {
            if entry.is_file() && !files.contains(&entry) {
                files.push(entry);
            }
        }
        if files.len() == before {
            log::warn!("'{}' matched no files", pattern);
        }
    }
    Ok(files)
}

fn list_rules(matrix: &RuleMatrix) {
    println!("{}", "Loaded rules:".bold());
    if !matrix.versions().is_empty() {
        println!("  knowledge base: {}", matrix.versions().join(", "));
    }
    println!();

    for rule in matrix.all_rules() {
        let state = if rule.enabled { "" } else { " (disabled)" };
        println!(
            "  {} [{}, {}]{}",
            rule.id.cyan(),
            rule.scope,
            rule.severity,
            state
        );
        for condition in &rule.conditions {
            println!("      {}", condition);
        }
        if let Some(rationale) = &rule.rationale {
            println!("      {}", rationale.dimmed());
        }
    }

    println!();
    println!("{} rule(s)", matrix.len());
}
