use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A partially specified job, before validation
///
/// Every field is optional so that a request file can be completed (or overridden) by CLI
/// flags. Validation into a [`JobSpec`](crate::slurm::job_spec::JobSpec) reports missing fields.
#[derive(Debug, Default, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct JobRequest {
    pub name: Option<String>,
    pub stdout_path: Option<String>,
    pub stderr_path: Option<String>,
    pub node_count: Option<i64>,
    pub time_limit: Option<String>,
    pub partition: Option<String>,
    pub working_directory: Option<PathBuf>,
    pub env_activation: Option<ActivationRequest>,
    pub entry_point: Option<String>,
    pub entry_args: Option<Vec<String>>,
    pub create_log_dirs: Option<bool>,
    #[serde(default)]
    pub launcher: LauncherRequest,
}

/// Environment activation, `{"script": "venv/bin/activate"}` or `{"command": "module load mpi"}`
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationRequest {
    Script(PathBuf),
    Command(String),
}

#[derive(Debug, Default, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LauncherRequest {
    pub program: Option<String>,
    pub args: Option<Vec<String>>,
    pub python: Option<String>,
    pub module: Option<String>,
}

impl JobRequest {
    /// Layer `overrides` on top of this request, fields set in `overrides` win
    pub fn merge(self, overrides: JobRequest) -> JobRequest {
        JobRequest {
            name: overrides.name.or(self.name),
            stdout_path: overrides.stdout_path.or(self.stdout_path),
            stderr_path: overrides.stderr_path.or(self.stderr_path),
            node_count: overrides.node_count.or(self.node_count),
            time_limit: overrides.time_limit.or(self.time_limit),
            partition: overrides.partition.or(self.partition),
            working_directory: overrides.working_directory.or(self.working_directory),
            env_activation: overrides.env_activation.or(self.env_activation),
            entry_point: overrides.entry_point.or(self.entry_point),
            entry_args: overrides.entry_args.or(self.entry_args),
            create_log_dirs: overrides.create_log_dirs.or(self.create_log_dirs),
            launcher: self.launcher.merge(overrides.launcher),
        }
    }
}

impl LauncherRequest {
    fn merge(self, overrides: LauncherRequest) -> LauncherRequest {
        LauncherRequest {
            program: overrides.program.or(self.program),
            args: overrides.args.or(self.args),
            python: overrides.python.or(self.python),
            module: overrides.module.or(self.module),
        }
    }
}
