//! Remedy - self-healing remediation pipeline CLI
//!
//! ## Commands
//!
//! - `run`: drive one alert through the pipeline and report the final state
//! - `validate`: check a playbook file against the operation policy
//! - `catalog`: list category → template mappings
//! - `audit`: show a persisted run record after digest verification

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use remedy_core::metrics::METRICS;
use remedy_core::{
    read_run_record, validate_document, Alert, Category, Pipeline, PipelineConfig, PipelineRun,
    RunState, Severity, ValidationResult,
};
use remedy_gateway::{CompletionsClient, HttpCaseStore};
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "remedy")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Self-healing infrastructure remediation pipeline", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Pipeline configuration file (TOML)
    #[arg(short, long, global = true, env = "REMEDY_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one alert through the pipeline
    Run {
        /// Alert id (generated when omitted)
        #[arg(long)]
        id: Option<String>,

        /// Alert severity: info, warning or critical
        #[arg(short, long, default_value = "warning")]
        severity: Severity,

        /// Alert text
        #[arg(long, conflicts_with = "content_file", required_unless_present = "content_file")]
        content: Option<String>,

        /// Read the alert text from a file
        #[arg(long)]
        content_file: Option<PathBuf>,

        /// Print the full run record as JSON
        #[arg(long)]
        record: bool,
    },

    /// Validate a playbook file against the configured operation policy
    Validate {
        /// Playbook (YAML) to inspect
        file: PathBuf,
    },

    /// List category to template mappings
    Catalog,

    /// Show a persisted run record
    Audit {
        /// Run ID to show
        run_id: String,

        /// Audit directory (default: from configuration)
        #[arg(long)]
        audit_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    remedy_core::init_tracing(cli.json, level);

    let config = load_config(cli.config.as_deref())?;

    let status = match cli.command {
        Commands::Run {
            id,
            severity,
            content,
            content_file,
            record,
        } => {
            let content = match (content, content_file) {
                (Some(text), _) => text,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read alert content from {:?}", path))?,
                (None, None) => anyhow::bail!("either --content or --content-file is required"),
            };
            let id = id.unwrap_or_else(|| format!("alert-{}", uuid::Uuid::new_v4()));
            cmd_run(&config, Alert::new(id, content, severity), record).await
        }
        Commands::Validate { file } => cmd_validate(&config, &file),
        Commands::Catalog => cmd_catalog(&config),
        Commands::Audit { run_id, audit_dir } => cmd_audit(&config, &run_id, audit_dir),
    }?;

    Ok(ExitCode::from(status))
}

/// Defaults, then the config file, then `REMEDY_*` overrides.
fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    let config = match path {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("Failed to load configuration from {:?}", path))?,
        None => PipelineConfig::default(),
    }
    .with_env_overrides();
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

const EXIT_OK: u8 = 0;
const EXIT_FAILED: u8 = 1;
const EXIT_REJECTED: u8 = 2;
const EXIT_MANUAL_REVIEW: u8 = 3;

/// Exit status for a finished run: 0 only when staged.
fn exit_status(state: RunState) -> u8 {
    match state {
        RunState::Staged => EXIT_OK,
        RunState::ValidatedRejected => EXIT_REJECTED,
        RunState::NoTemplateManualReview => EXIT_MANUAL_REVIEW,
        _ => EXIT_FAILED,
    }
}

async fn cmd_run(config: &PipelineConfig, alert: Alert, record: bool) -> Result<u8> {
    let model = CompletionsClient::new(&config.llm).context("Failed to build model client")?;
    let store = HttpCaseStore::new(&config.memory).context("Failed to build memory client")?;
    let catalog = config
        .template_catalog()
        .context("Failed to load template catalog")?;

    let pipeline = Pipeline::from_config(config, Arc::new(model), Arc::new(store), Arc::new(catalog))
        .context("Failed to assemble pipeline")?;

    info!(alert_id = %alert.id, "running pipeline");
    let run = pipeline.run(alert).await.context("Pipeline invariant violated")?;
    METRICS.flush();

    if record {
        println!("{}", serde_json::to_string_pretty(&run)?);
    } else {
        print_run(&run);
    }
    Ok(exit_status(run.state))
}

fn print_run(run: &PipelineRun) {
    println!("run:    {}", run.run_id);
    println!("alert:  {}", run.alert.id);
    println!("state:  {}", run.state);
    if let Some(c) = &run.classification {
        println!(
            "class:  {} (node={}, service={})",
            c.category, c.target_node, c.target_service
        );
    }
    if let Some(template_id) = &run.template_id {
        println!("template: {}", template_id);
    }
    if let Some(path) = &run.staged_path {
        println!("staged: {}", path.display());
    }
    if let Some(validation) = &run.validation {
        if !validation.valid {
            print_validation(validation);
        }
    }
    if let Some(failure) = &run.failure {
        println!("reason: {}", failure);
    }
    for diagnostic in &run.diagnostics {
        println!("note:   [{}] {}", diagnostic.stage, diagnostic.message);
    }
}

fn print_validation(result: &ValidationResult) {
    if let Some(err) = &result.parse_error {
        println!("parse error: {}", err);
    }
    for op in &result.banned_ops {
        println!("banned:     {}", op);
    }
    for op in &result.unapproved_ops {
        println!("unapproved: {}", op);
    }
}

fn cmd_validate(config: &PipelineConfig, file: &Path) -> Result<u8> {
    let document = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read playbook {:?}", file))?;
    let policy = config.operation_policy()?;
    let result = validate_document(&document, &policy);

    for op in &result.approved_ops {
        println!("approved:   {}", op);
    }
    print_validation(&result);
    println!(
        "{}: {} task(s) inspected, {}",
        file.display(),
        result.tasks_inspected,
        if result.valid { "VALID" } else { "REJECTED" }
    );

    Ok(if result.valid { EXIT_OK } else { EXIT_REJECTED })
}

fn cmd_catalog(config: &PipelineConfig) -> Result<u8> {
    let catalog = config
        .template_catalog()
        .context("Failed to load template catalog")?;

    for category in Category::ALL {
        match catalog.select(category) {
            Some(template) => {
                println!("{} -> {}", category, template.template_id);
                for spec in &template.variable_schema {
                    println!(
                        "    {:<14} {:<10} {:?}  {}",
                        spec.name,
                        spec.var_type.to_string(),
                        spec.kind,
                        spec.description
                    );
                }
            }
            None => println!("{} -> (manual review)", category),
        }
    }
    Ok(EXIT_OK)
}

fn cmd_audit(config: &PipelineConfig, run_id: &str, audit_dir: Option<PathBuf>) -> Result<u8> {
    let Some(dir) = audit_dir.or_else(|| config.audit.dir.clone()) else {
        anyhow::bail!("No audit directory configured; pass --audit-dir");
    };
    let run = read_run_record(run_id, &dir)
        .with_context(|| format!("Failed to read run record {} from {:?}", run_id, dir))?;

    print_run(&run);
    for t in &run.transitions {
        println!("  {}  {} -> {}", t.at.to_rfc3339(), t.from, t.to);
    }
    println!("Record digest verified");
    Ok(EXIT_OK)
}
