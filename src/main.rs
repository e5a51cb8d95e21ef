use chrono::Utc;
use clap::{Parser, ValueEnum};
use rmanctl::plan::{BackupJob, BackupKind};
use rmanctl::{Config, Orchestrator};
use std::path::PathBuf;
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "backup-run")]
#[command(about = "Run one lock-guarded, classified backup of an Oracle instance")]
#[command(version)]
struct Cli {
    /// Target instance name, as listed in the home lookup table
    #[arg(long)]
    instance: String,

    /// What to back up
    #[arg(long, value_enum)]
    kind: KindArg,

    /// Compress backup sets regardless of the configured default
    #[arg(long)]
    compress: bool,

    /// Print the plan this run would execute, then exit
    #[arg(long)]
    dry_run: bool,

    /// TOML configuration file; built-in defaults apply without one
    #[arg(long)]
    config: Option<PathBuf>,

    /// Kill the engine and fail the run after this many seconds
    #[arg(long)]
    timeout_seconds: Option<u64>,

    /// Keep the transient plan file for debugging
    #[arg(long)]
    keep_plan: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Full,
    Incremental,
    Logonly,
}

impl From<KindArg> for BackupKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Full => BackupKind::Full,
            KindArg::Incremental => BackupKind::Incremental,
            KindArg::Logonly => BackupKind::LogOnly,
        }
    }
}

#[tokio::main]
async fn main() {
    // Usage problems are a configuration error to the caller, not clap's
    // default exit status.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            std::process::exit(if e.use_stderr() { 1 } else { 0 });
        }
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {:#}", e);
            std::process::exit(1);
        }
    };
    if cli.timeout_seconds.is_some() {
        config.timeout_seconds = cli.timeout_seconds;
    }

    let job = BackupJob {
        target_instance: cli.instance,
        kind: cli.kind.into(),
        compression: cli.compress || config.compress_default,
        parallelism: config.channels,
        max_piece_size: config.max_piece_size.clone(),
        requested_at: Utc::now(),
    };

    let orchestrator = Orchestrator::new(config);

    if cli.dry_run {
        match orchestrator.dry_run(&job) {
            Ok(plan_text) => {
                print!("{plan_text}");
            }
            Err(e) => {
                error!("{}", e);
                std::process::exit(e.exit_code());
            }
        }
        return;
    }

    match orchestrator.run(&job, cli.keep_plan).await {
        Ok(summary) => {
            println!("{summary}");
        }
        Err(e) => {
            error!("{}", e);
            std::process::exit(e.exit_code());
        }
    }
}
