use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use leadresearch_core::{
    ConfigLoader, ConfigOverrides, ExtractionSchema, ResearchClients, ResearchRunner,
    ResearchTask, RunConfig, TelemetryOptions, init_metrics_from_env, init_telemetry,
    persist_trace,
};
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "leadresearch",
    version,
    about = "Schema-directed company research"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Research a company and print the extracted record as JSON.
    Run(RunArgs),
    /// Print the default extraction schema.
    Schema,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Company to research.
    #[arg(long)]
    company: String,

    /// JSON Schema file describing the fields to extract.
    #[arg(long)]
    schema: Option<PathBuf>,

    /// Prior observation about the company (repeatable).
    #[arg(long = "note")]
    notes: Vec<String>,

    /// Service configuration file (TOML).
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    max_search_queries: Option<usize>,

    #[arg(long)]
    max_search_results: Option<usize>,

    #[arg(long)]
    max_reflection_steps: Option<u32>,

    /// Return every iteration's sources with the result (`true` or `false`).
    #[arg(long, value_name = "BOOL")]
    include_search_results: Option<String>,

    /// Directory to write the run trace to as JSON.
    #[arg(long)]
    trace_dir: Option<PathBuf>,

    /// Print the step trace to stderr after the run.
    #[arg(long, default_value_t = false)]
    trace: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Schema => {
            let schema = ExtractionSchema::company_default().to_json_schema();
            println!("{}", serde_json::to_string_pretty(&schema)?);
            Ok(())
        }
        Command::Run(args) => {
            let rt = Runtime::new()?;
            rt.block_on(run_command(args))
        }
    }
}

async fn run_command(args: RunArgs) -> Result<()> {
    let service = ConfigLoader::load(args.config.clone())?;
    init_telemetry(TelemetryOptions::from(&service.logging))?;
    init_metrics_from_env("leadresearch");

    let schema = match &args.schema {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed to read schema {}", path.display()))?;
            let value: serde_json::Value = serde_json::from_str(&raw)
                .with_context(|| format!("schema {} is not valid JSON", path.display()))?;
            ExtractionSchema::from_json_schema(&value)?
        }
        None => ExtractionSchema::company_default(),
    };

    let mut overrides = ConfigOverrides::new();
    if let Some(value) = args.max_search_queries {
        overrides.insert("max_search_queries", value);
    }
    if let Some(value) = args.max_search_results {
        overrides.insert("max_search_results", value);
    }
    if let Some(value) = args.max_reflection_steps {
        overrides.insert("max_reflection_steps", value);
    }
    if let Some(value) = &args.include_search_results {
        overrides.insert("include_search_results", value);
    }
    let run_config = RunConfig::resolve(&overrides)?;

    let task = args
        .notes
        .iter()
        .fold(ResearchTask::new(&args.company, schema), |task, note| {
            task.with_note(note)
        });

    let clients = ResearchClients::from_config(&service)?;
    let token = CancellationToken::new();
    let runner = ResearchRunner::new(&service, clients).with_cancellation(token.clone());

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; cancelling at the next step boundary");
            token.cancel();
        }
    });

    info!(company = %args.company, "starting research run");
    match runner.run(task, run_config).await {
        Ok(outcome) => {
            if let Some(dir) = &args.trace_dir {
                let path = persist_trace(dir, &outcome.run_id, &outcome.trace_events)?;
                info!(path = %path.display(), "trace written");
            }
            if args.trace {
                eprintln!("{}", outcome.trace.render_markdown());
            }
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            Ok(())
        }
        Err(failure) => {
            if args.trace {
                eprintln!("{}", failure.partial.trace.render_markdown());
            }
            println!("{}", serde_json::to_string_pretty(&failure.to_report())?);
            Err(failure.into())
        }
    }
}
