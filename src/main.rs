use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use batch_map::config::{BatchConfig, SchedulerCommands};
use batch_map::orchestrator::{BatchReport, CommonVariables, JobRecord};
use batch_map::packager::ShellPackager;
use batch_map::scheduler::{LsfClient, SchedulerClient, StatusReport};
use batch_map::shutdown::install_interrupt_handler;
use batch_map::BatchOrchestrator;

#[derive(Parser, Debug)]
#[command(name = "batch-map")]
#[command(version)]
#[command(about = "Map a program over many inputs as independent LSF jobs")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run a program once per input value and print the ordered results
    Run(RunArgs),

    /// Query the scheduler status of a submitted job
    Status {
        #[command(flatten)]
        scheduler: SchedulerArgs,

        /// Scheduler job handle
        handle: String,
    },
}

// =============================================================================
// Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct SchedulerArgs {
    /// Submit command
    #[arg(long, default_value = "bsub")]
    bsub: String,

    /// Status command
    #[arg(long, default_value = "bjobs")]
    bjobs: String,

    /// Cancel command
    #[arg(long, default_value = "bkill")]
    bkill: String,
}

impl SchedulerArgs {
    fn commands(&self) -> SchedulerCommands {
        SchedulerCommands {
            submit: self.bsub.clone(),
            status: self.bjobs.clone(),
            cancel: self.bkill.clone(),
        }
    }
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Shared working directory, visible from the cluster nodes
    #[arg(long, default_value = "lsf")]
    root: PathBuf,

    /// Queue to submit to
    #[arg(long, short = 'q', default_value = "vshort")]
    queue: String,

    /// Program run as `<program> [args..] <input> <output> [<shared>]`
    #[arg(long)]
    program: PathBuf,

    /// Extra arguments passed to the program before the artifact paths
    #[arg(long = "arg")]
    program_args: Vec<String>,

    /// Name embedded in job identifiers (defaults to the program's file name)
    #[arg(long)]
    name: Option<String>,

    /// JSON file holding an array of input values
    #[arg(long)]
    inputs: PathBuf,

    /// JSON file holding an object of variables shared by all jobs
    #[arg(long)]
    common: Option<PathBuf>,

    /// Give up on pending jobs after this many seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Interval between status scans, in milliseconds
    #[arg(long, default_value = "200")]
    poll_ms: u64,

    #[command(flatten)]
    scheduler: SchedulerArgs,

    /// Output format
    #[arg(long, short = 'o', default_value = "json")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct RunOutput<'a> {
    results: &'a [Option<serde_json::Value>],
    jobs: &'a [JobRecord],
    wall_time_secs: f64,
    cpu_time_secs: f64,
    speed_up: f64,
    interrupted: bool,
    timed_out: bool,
}

// =============================================================================
// Handlers
// =============================================================================

async fn handle_run(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let inputs: Vec<serde_json::Value> =
        serde_json::from_slice(&tokio::fs::read(&args.inputs).await?)?;
    let common: Option<CommonVariables> = match &args.common {
        Some(path) => Some(serde_json::from_slice(&tokio::fs::read(path).await?)?),
        None => None,
    };

    let name = args.name.clone().unwrap_or_else(|| {
        args.program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "work".to_string())
    });
    let packager = ShellPackager::new(name, &args.program).with_args(args.program_args.clone());

    let mut config = BatchConfig::new(&args.root)
        .with_queue(&args.queue)
        .with_poll_interval(Duration::from_millis(args.poll_ms))
        .with_commands(args.scheduler.commands());
    if let Some(secs) = args.timeout {
        config = config.with_timeout(Duration::from_secs(secs));
    }

    let shutdown = install_interrupt_handler();
    let mut orchestrator = BatchOrchestrator::lsf(config);
    let report: BatchReport<serde_json::Value> = orchestrator
        .run_with_shutdown(&packager, &inputs, common.as_ref(), None, &shutdown)
        .await?;

    match args.output {
        OutputFormat::Json => {
            let output = RunOutput {
                results: &report.results,
                jobs: &report.jobs,
                wall_time_secs: report.metrics.wall_time.as_secs_f64(),
                cpu_time_secs: report.metrics.cpu_time.as_secs_f64(),
                speed_up: report.metrics.speed_up,
                interrupted: report.interrupted,
                timed_out: report.timed_out,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            println!("{:<44} {:<10} {:<18} RESULT", "JOB ID", "HANDLE", "OUTCOME");
            println!("{}", "-".repeat(90));
            for (job, result) in report.jobs.iter().zip(&report.results) {
                let result = match result {
                    Some(value) => value.to_string(),
                    None => "-".to_string(),
                };
                println!(
                    "{:<44} {:<10} {:<18} {}",
                    job.id,
                    job.handle.as_deref().unwrap_or("-"),
                    job.outcome.to_string(),
                    result
                );
            }
            println!();
            println!("{}", report.metrics);
            if report.interrupted {
                println!("(Interrupted: pending jobs were cancelled)");
            }
            if report.timed_out {
                println!("(Deadline exceeded: pending jobs were cancelled)");
            }
        }
    }
    Ok(())
}

async fn handle_status(
    scheduler: SchedulerArgs,
    handle: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let client = LsfClient::new(scheduler.commands());
    match client.query(&handle).await {
        StatusReport::Status(status) => println!("{handle}: {status}"),
        StatusReport::NotFound => println!("{handle}: not found"),
        StatusReport::Unparsable(response) => {
            return Err(format!("Unreadable status response: {:?}", response).into());
        }
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match args.command {
        Commands::Run(run_args) => handle_run(run_args).await?,
        Commands::Status { scheduler, handle } => handle_status(scheduler, handle).await?,
    }

    Ok(())
}
