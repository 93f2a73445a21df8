//! One-shot dispatch of a job request to the cluster queue
//!
//! Validate, render, prepare log directories, activate, write, submit. Each step fails with its
//! own error kind and nothing after a failing step runs.

use log::info;
use thiserror::Error;

use crate::activation::{ActivationError, PreExecutionHook};
use crate::request::job::JobRequest;
use crate::slurm::job::JobScript;
use crate::slurm::job_spec::{ConfigError, JobSpec};
use crate::slurm::submit::{JobId, SchedulerClient, SubmitError};

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),
    #[error("environment setup error: {0}")]
    EnvironmentSetup(#[from] ActivationError),
    #[error("submission error: {0}")]
    Submission(#[from] SubmitError),
}

impl DispatchError {
    /// Process exit code for scripted callers
    pub fn exit_code(&self) -> u8 {
        match self {
            DispatchError::Configuration(_) => 1,
            DispatchError::EnvironmentSetup(_) => 2,
            DispatchError::Submission(_) => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Submit,
    DryRun,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// the rendered script, not submitted
    DryRun(String),
    Submitted(JobId),
}

pub struct Dispatcher<'a> {
    scheduler: &'a dyn SchedulerClient,
    hook: &'a dyn PreExecutionHook,
}

impl<'a> Dispatcher<'a> {
    pub fn new(scheduler: &'a dyn SchedulerClient, hook: &'a dyn PreExecutionHook) -> Self {
        Dispatcher { scheduler, hook }
    }

    pub fn dispatch(&self, request: JobRequest, mode: Mode) -> Result<Outcome, DispatchError> {
        let spec = JobSpec::from_request(request)?;
        let script = JobScript::render(&spec)?;

        if mode == Mode::DryRun {
            info!("--dry-run set, not submitting {}", spec.name());
            return Ok(Outcome::DryRun(script.content()));
        }

        spec.prepare_log_directories()?;

        if let Some(activation) = spec.env_activation() {
            self.hook.run(activation, spec.working_directory())?;
        }

        let job_path = script.write(&spec)?;

        let job_id = self.scheduler.submit(&job_path.path, spec.working_directory())?;
        info!("SLURM job id: {job_id}");
        Ok(Outcome::Submitted(job_id))
    }
}
