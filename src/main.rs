use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use dotenvy::dotenv;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use es_lifecycle::config::{Config, DateSelection, RunConfig};
use es_lifecycle::operation::OperationKind;
use es_lifecycle::orchestrator::Orchestrator;

#[derive(Parser, Debug)]
#[command(
    name = "es-lifecycle",
    version,
    about = "Open, close, chill, snapshot and delete time-partitioned indices",
    after_help = "\
Exit codes:
  0  every index succeeded (or nothing to do)
  1  fatal error, or every index failed
  2  some indices failed (degraded run)"
)]
struct Cli {
    /// Task to run
    #[arg(short, long, env = "TASK", value_enum)]
    task: OperationKind,

    /// Comma-separated index prefixes, or _all
    #[arg(short, long, env = "INDICES")]
    indices: String,

    /// First day of the range (YYYY-MM-DD)
    #[arg(long, env = "FROM")]
    from: Option<String>,

    /// Last day of the range (YYYY-MM-DD), inclusive
    #[arg(long, env = "TO")]
    to: Option<String>,

    /// Select indices older than this many days instead of a range
    #[arg(long = "days-ago", env = "DAYSAGO")]
    days_ago: Option<u32>,

    /// Skip the cluster health check
    #[arg(short, long, env = "FORCE")]
    force: bool,

    /// Path to the configuration file
    #[arg(short, long, env = "ES_LIFECYCLE_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenv();
    init_tracing();

    let cli = Cli::parse();
    let cfg = Arc::new(Config::load(cli.config.clone())?);
    let selection = DateSelection::from_raw(cli.from.as_deref(), cli.to.as_deref(), cli.days_ago)?;
    let run = RunConfig::new(cli.task, &cli.indices, selection, cli.force)?;
    info!(
        "starting {} for {:?} ({:?}) on {}",
        run.task, run.prefixes, run.selection, cfg.es.url
    );

    let orchestrator = Orchestrator::from_config(cfg)?;
    let outcome = match orchestrator.run(&run).await {
        Ok(outcome) => outcome,
        Err(err) => {
            error!("{} aborted: {err:?}", run.task);
            std::process::exit(1);
        }
    };

    let failed: Vec<&str> = outcome.failed_indices().collect();
    if !failed.is_empty() {
        error!("failed indices: {}", failed.join(", "));
    }
    std::process::exit(outcome.exit_code());
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
