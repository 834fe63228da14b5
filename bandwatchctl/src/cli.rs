use std::path::PathBuf;

use bandwatch_model::{MeasurementId, TriggerReason};
use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "bandwatchctl")]
#[command(
    about = "Run and inspect official broadband measurements",
    version
)]
pub struct Cli {
    /// Path to bandwatch.toml (defaults to ./bandwatch.toml or ./config/bandwatch.toml)
    #[arg(long, global = true, env = "BANDWATCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Alternate .env file
    #[arg(long, global = true)]
    pub env_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start an official measurement and wait for it to finish
    Measure(MeasureArgs),
    /// Evaluate speeds against the contracted rate; measure when breached
    MeasureIfBreached(BreachArgs),
    /// Show one measurement record
    Status {
        id: MeasurementId,
    },
    /// List recent measurement records, newest first
    List {
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Fail active records older than the stuck timeout
    Cleanup,
    /// Print the evidence archive path of a completed measurement
    Archive {
        id: MeasurementId,
    },
}

#[derive(Args, Debug, Clone)]
pub struct MeasureArgs {
    /// manual, threshold-warning or threshold-critical
    #[arg(long, default_value = "manual")]
    pub reason: TriggerReason,

    /// Routine speed-test result that prompted this run
    #[arg(long)]
    pub result_id: Option<i64>,
}

#[derive(Args, Debug, Clone)]
pub struct BreachArgs {
    /// Measured download speed in Mbit/s
    #[arg(long)]
    pub download: f64,

    /// Measured upload speed in Mbit/s
    #[arg(long)]
    pub upload: f64,

    #[arg(long)]
    pub result_id: Option<i64>,

    /// Only print the threshold evaluation
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}
