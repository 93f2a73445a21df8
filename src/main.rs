use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use log::info;

use crate::activation::BashActivation;
use crate::dispatch::{DispatchError, Dispatcher, Mode, Outcome};
use crate::request::job::{ActivationRequest, JobRequest, LauncherRequest};
use crate::request::message::Message;
use crate::slurm::job_spec::ConfigError;
use crate::slurm::submit::Sbatch;

mod activation;
mod dispatch;
mod request;
mod shell;
mod slurm;

/// Submit mpi4py process pool jobs to SLURM
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Render a job script and submit it with sbatch
    Submit(SubmitArgs),
}

/// Flags override values read from --config
#[derive(Args, Debug)]
struct SubmitArgs {
    /// JSON job request to start from
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Job name
    #[arg(long)]
    name: Option<String>,
    /// Number of nodes
    #[arg(long, allow_negative_numbers = true)]
    nodes: Option<i64>,
    /// Wall-clock limit, HH:MM:SS
    #[arg(long)]
    time: Option<String>,
    /// SLURM partition
    #[arg(long)]
    partition: Option<String>,
    /// Directory the job is submitted and run from
    #[arg(long)]
    workdir: Option<PathBuf>,
    /// Standard output log path, relative to --workdir
    #[arg(long)]
    stdout: Option<String>,
    /// Standard error log path, relative to --workdir
    #[arg(long)]
    stderr: Option<String>,
    /// Python script or module run by the process pool
    #[arg(long)]
    entry: Option<String>,
    /// Arguments for the entry point, must come last
    #[arg(long = "args", num_args = 1.., allow_hyphen_values = true, value_name = "ARG")]
    entry_args: Vec<String>,
    /// Script to source before the entry point runs
    #[arg(long, value_name = "PATH", conflicts_with = "activate_command")]
    activate_script: Option<PathBuf>,
    /// Command to run before the entry point runs
    #[arg(long, value_name = "COMMAND")]
    activate_command: Option<String>,
    /// Fail instead of creating missing log directories
    #[arg(long)]
    no_create_log_dirs: bool,
    /// MPI launcher program [default: mpirun]
    #[arg(long)]
    launcher: Option<String>,
    /// Extra argument for the MPI launcher, repeatable
    #[arg(long = "launcher-arg", allow_hyphen_values = true, value_name = "ARG")]
    launcher_args: Vec<String>,
    /// Python interpreter [default: python]
    #[arg(long)]
    python: Option<String>,
    /// sbatch program
    #[arg(long, default_value = "sbatch")]
    sbatch: String,
    /// Print the rendered job script instead of submitting it
    #[arg(long)]
    dry_run: bool,
}

impl SubmitArgs {
    /// The job request described by flags alone
    fn to_request(&self) -> JobRequest {
        let env_activation = match (&self.activate_script, &self.activate_command) {
            (Some(script), _) => Some(ActivationRequest::Script(script.clone())),
            (None, Some(command)) => Some(ActivationRequest::Command(command.clone())),
            (None, None) => None,
        };

        JobRequest {
            name: self.name.clone(),
            stdout_path: self.stdout.clone(),
            stderr_path: self.stderr.clone(),
            node_count: self.nodes,
            time_limit: self.time.clone(),
            partition: self.partition.clone(),
            working_directory: self.workdir.clone(),
            env_activation,
            entry_point: self.entry.clone(),
            entry_args: non_empty(&self.entry_args),
            create_log_dirs: self.no_create_log_dirs.then_some(false),
            launcher: LauncherRequest {
                program: self.launcher.clone(),
                args: non_empty(&self.launcher_args),
                python: self.python.clone(),
                module: None,
            },
        }
    }

    /// Read --config if given and layer the flags on top
    fn job_request(&self) -> Result<JobRequest, ConfigError> {
        let base = match &self.config {
            Some(path) => Message::new(path)?.read()?,
            None => JobRequest::default(),
        };
        Ok(base.merge(self.to_request()))
    }
}

fn non_empty(values: &[String]) -> Option<Vec<String>> {
    (!values.is_empty()).then(|| values.to_vec())
}

fn submit(args: &SubmitArgs) -> Result<Outcome, DispatchError> {
    let request = args.job_request()?;
    let mode = if args.dry_run { Mode::DryRun } else { Mode::Submit };

    let scheduler = Sbatch { program: args.sbatch.clone() };
    let hook = BashActivation::default();
    Dispatcher::new(&scheduler, &hook).dispatch(request, mode)
}

/// clap exits with 2 on bad usage, which is reserved for environment setup failures
fn usage_exit_code(err: &clap::Error) -> u8 {
    if err.use_stderr() {
        1
    } else {
        // --help and --version
        0
    }
}

fn main() -> ExitCode {
    env_logger::init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return ExitCode::from(usage_exit_code(&err));
        }
    };
    info!("terve! starting up :)");

    match cli.command {
        Commands::Submit(args) => match submit(&args) {
            Ok(Outcome::DryRun(script)) => {
                print!("{script}");
                ExitCode::SUCCESS
            }
            Ok(Outcome::Submitted(job_id)) => {
                println!("{job_id}");
                ExitCode::SUCCESS
            }
            Err(err) => {
                eprintln!("error: {err}");
                ExitCode::from(err.exit_code())
            }
        },
    }
}
