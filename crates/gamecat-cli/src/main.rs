use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use gamecat_core::RecordStatus;
use gamecat_storage::RecordStore;
use gamecat_sync::{shutdown, steam_controller, IngestConfig, ShutdownTrigger};
use tracing::{info, warn};

mod input;
mod logging;

const DEFAULT_INPUT: &str = "games_list.txt";
const DEFAULT_OUTPUT: &str = "steam_games.csv";

#[derive(Debug, Parser)]
#[command(name = "gamecat")]
#[command(about = "Steam catalog ingestion: resolve names, extract store details, append to CSV")]
struct Cli {
    /// Debug-level logging unless RUST_LOG is set.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Process every name in the input list that is not yet in the output file.
    Run(RunArgs),
    /// Print record counts per status for an output file.
    Summary(OutputArg),
    /// Remove failed rows so those names are processed again on the next run.
    ClearFailed(ClearArgs),
}

#[derive(Debug, Args)]
struct RunArgs {
    #[arg(short, long, default_value = DEFAULT_INPUT)]
    input: PathBuf,
    #[arg(short, long, default_value = DEFAULT_OUTPUT)]
    output: PathBuf,
    /// Pause between records; overrides GAMECAT_REQUEST_DELAY_MS.
    #[arg(long)]
    delay_ms: Option<u64>,
}

impl Default for RunArgs {
    fn default() -> Self {
        Self {
            input: PathBuf::from(DEFAULT_INPUT),
            output: PathBuf::from(DEFAULT_OUTPUT),
            delay_ms: None,
        }
    }
}

#[derive(Debug, Args)]
struct OutputArg {
    #[arg(short, long, default_value = DEFAULT_OUTPUT)]
    output: PathBuf,
}

#[derive(Debug, Args)]
struct ClearArgs {
    #[arg(short, long, default_value = DEFAULT_OUTPUT)]
    output: PathBuf,
    /// Only clear these statuses (repeatable). Default: every non-ok status.
    #[arg(long = "status")]
    statuses: Vec<RecordStatus>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::ensure_dotenv();
    logging::init_tracing(if cli.verbose { "debug" } else { "info" })?;

    match cli.command.unwrap_or(Commands::Run(RunArgs::default())) {
        Commands::Run(args) => run(args).await?,
        Commands::Summary(args) => summary(args)?,
        Commands::ClearFailed(args) => clear_failed(args)?,
    }

    Ok(())
}

async fn run(args: RunArgs) -> Result<()> {
    let names = input::load_names(&args.input)?;
    let mut config = IngestConfig::from_env();
    if let Some(ms) = args.delay_ms {
        config.request_delay = Duration::from_millis(ms);
    }
    info!(
        input = %args.input.display(),
        output = %args.output.display(),
        names = names.len(),
        authenticated = config.credentials.is_authenticated(),
        "starting gamecat"
    );

    let store = RecordStore::open(&args.output)?;
    let (trigger, stop) = shutdown::channel();
    spawn_signal_listener(trigger);

    let mut controller = steam_controller(&config, store, stop)?;
    let summary = controller.run(&names).await?;
    print!("{summary}");
    Ok(())
}

fn summary(args: OutputArg) -> Result<()> {
    let store = RecordStore::inspect(&args.output)?;
    println!("{}: {} records", args.output.display(), store.len());
    for (status, count) in store.status_counts() {
        println!("  {status:<18} {count}");
    }
    Ok(())
}

fn clear_failed(args: ClearArgs) -> Result<()> {
    let mut store = RecordStore::open(&args.output)?;
    let removed = store.remove_failed(&args.statuses)?;
    println!(
        "removed {removed} failed record(s) from {}; {} remain",
        args.output.display(),
        store.len()
    );
    Ok(())
}

fn spawn_signal_listener(trigger: ShutdownTrigger) {
    tokio::spawn(async move {
        wait_for_stop_signal().await;
        warn!("stop signal received; finishing the current record boundary");
        trigger.trigger();
    });
}

async fn ctrl_c() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "cannot listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn wait_for_stop_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(err) => {
            warn!(error = %err, "cannot listen for SIGTERM");
            ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_stop_signal() {
    ctrl_c().await;
}
