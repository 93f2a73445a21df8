//! Environment activation, run once before submission to catch broken environments early

use std::io;
use std::path::Path;
use std::process::Command;

use log::{info, warn};
use thiserror::Error;

use crate::slurm::job_spec::Activation;

#[derive(Error, Debug)]
pub enum ActivationError {
    #[error("can't start environment activation `{step}`: {source}")]
    Spawn { step: String, source: io::Error },
    #[error("environment activation `{step}` failed ({status}): {stderr}")]
    Failed { step: String, status: String, stderr: String },
}

/// A step that must succeed before a job is handed to the scheduler
pub trait PreExecutionHook {
    fn run(&self, activation: &Activation, working_directory: &Path) -> Result<(), ActivationError>;
}

/// Runs the activation line in a throwaway `bash -c` from the working directory
pub struct BashActivation {
    pub shell: String,
}

impl Default for BashActivation {
    fn default() -> Self {
        BashActivation { shell: "bash".to_string() }
    }
}

impl PreExecutionHook for BashActivation {
    fn run(&self, activation: &Activation, working_directory: &Path) -> Result<(), ActivationError> {
        let step = activation.shell_line();
        info!("Checking environment activation: {step}");

        let output = Command::new(&self.shell)
            .arg("-c")
            .arg(&step)
            .current_dir(working_directory)
            .output()
            .map_err(|source| ActivationError::Spawn { step: step.clone(), source })?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!("Environment activation failed with {}", output.status);
            Err(ActivationError::Failed { step, status: output.status.to_string(), stderr })
        }
    }
}
