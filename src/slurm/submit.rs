use std::fmt;
use std::io;
use std::path::Path;
use std::process::Command;

use log::{debug, info, warn};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("can't run {program}: {source}")]
    Spawn { program: String, source: io::Error },
    #[error("sbatch rejected the job ({status}): {stderr}")]
    Rejected { status: String, stderr: String },
    #[error("sbatch accepted the job but printed no job id: {0:?}")]
    MissingJobId(String),
}

/// Opaque job identifier assigned by the workload manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobId(pub String);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The cluster queue: a shared, write-only sink for job scripts
pub trait SchedulerClient {
    /// Queue the script at `script`, running the submission from `working_directory`
    fn submit(&self, script: &Path, working_directory: &Path) -> Result<JobId, SubmitError>;
}

/// Submit with the `sbatch` command line tool
pub struct Sbatch {
    pub program: String,
}

impl SchedulerClient for Sbatch {
    fn submit(&self, script: &Path, working_directory: &Path) -> Result<JobId, SubmitError> {
        let mut sbatch = Command::new(&self.program);
        let cmd = sbatch.arg("--parsable").arg(script).current_dir(working_directory);
        info!("Running sbatch process");
        debug!("{:?}", &cmd);

        let output = cmd
            .output()
            .map_err(|source| SubmitError::Spawn { program: self.program.clone(), source })?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            warn!("sbatch failed with {}", output.status);
            return Err(SubmitError::Rejected {
                status: output.status.to_string(),
                stderr: stderr.trim().to_string(),
            });
        }

        parse_job_id(&stdout)
    }
}

/// `sbatch --parsable` prints `<job id>` or `<job id>;<cluster>`
pub fn parse_job_id(stdout: &str) -> Result<JobId, SubmitError> {
    let id = stdout.trim().split(';').next().unwrap_or_default().trim();
    if id.is_empty() {
        return Err(SubmitError::MissingJobId(stdout.to_string()));
    }
    Ok(JobId(id.to_string()))
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    use super::*;

    #[test]
    fn parsable_output_is_trimmed_to_the_id() {
        assert_eq!(parse_job_id("4242\n").unwrap(), JobId("4242".into()));
        assert_eq!(parse_job_id("4242;cluster-a\n").unwrap(), JobId("4242".into()));
        assert!(matches!(parse_job_id("  \n"), Err(SubmitError::MissingJobId(_))));
    }

    /// stand-in for sbatch: prints its arguments to a file, then behaves as told
    fn fake_sbatch(dir: &Path, body: &str) -> String {
        let path = dir.join("fake-sbatch");
        fs::write(&path, format!("#!/bin/sh\necho \"$@\" > \"$(pwd)/sbatch-args\"\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn sbatch_runs_parsable_from_the_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let sbatch = Sbatch { program: fake_sbatch(dir.path(), "echo 777") };
        let script = dir.path().join("job.sbatch");

        let id = sbatch.submit(&script, dir.path()).unwrap();
        assert_eq!(id.to_string(), "777");

        let args = fs::read_to_string(dir.path().join("sbatch-args")).unwrap();
        assert_eq!(args.trim(), format!("--parsable {}", script.display()));
    }

    #[test]
    fn sbatch_failure_is_a_rejection_with_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let sbatch = Sbatch {
            program: fake_sbatch(dir.path(), "echo 'invalid partition specified: nope' >&2\nexit 1"),
        };

        match sbatch.submit(&dir.path().join("job.sbatch"), dir.path()) {
            Err(SubmitError::Rejected { stderr, .. }) => assert_eq!(stderr, "invalid partition specified: nope"),
            other => panic!("expected a rejection, got {other:?}"),
        }
    }

    #[test]
    fn missing_sbatch_is_a_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let sbatch = Sbatch { program: dir.path().join("no-such-sbatch").to_string_lossy().into_owned() };
        assert!(matches!(
            sbatch.submit(&dir.path().join("job.sbatch"), dir.path()),
            Err(SubmitError::Spawn { .. })
        ));
    }
}
