use std::path::PathBuf;

use clap::{Args, Parser};
use clap_complete::Shell;
use clap_verbosity_flag::Verbosity;
use corun::config::OutputKind;

#[derive(Debug, Parser)]
#[command(
    name = "corun",
    author,
    version = corun::core::version(),
    about = "Run a batch of jobs concurrently on local cores and GPUs"
)]
#[command(styles=corun::utils::STYLES)]
pub struct Corun {
    #[command(subcommand)]
    pub command: Commands,

    /// The configuration file to use
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Also write corun's own logs to daily-rotated files in this directory
    #[arg(long, global = true, value_name = "DIR")]
    pub log_dir: Option<PathBuf>,

    #[command(flatten)]
    pub verbosity: Verbosity,
}

#[derive(Debug, Parser)]
pub enum Commands {
    /// Run every job in a job file and print a summary
    Run {
        /// TOML file with one [[job]] table per job
        jobs: PathBuf,

        #[command(flatten)]
        pool: PoolArgs,

        /// Where job stdout/stderr goes
        #[arg(long, value_enum)]
        output: Option<OutputKind>,

        /// Directory for per-job log files (with --output log)
        #[arg(long, value_name = "DIR")]
        job_log_dir: Option<PathBuf>,

        /// Print the run report as JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Print the order in which jobs would be considered, without running them
    Plan {
        /// TOML file with one [[job]] table per job
        jobs: PathBuf,

        #[command(flatten)]
        pool: PoolArgs,
    },
    /// Generate shell completion scripts
    Completion {
        /// The shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, Args)]
pub struct PoolArgs {
    /// Cores jobs may use (default: all host cores)
    #[arg(long, value_name = "N")]
    pub cores: Option<u32>,

    /// GPU indices jobs may use (e.g., "0,2" or "0-2")
    #[arg(long, value_name = "INDICES")]
    pub gpus: Option<String>,
}
