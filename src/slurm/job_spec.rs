use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::Duration;
use log::info;
use thiserror::Error;

use crate::request::job::{ActivationRequest, JobRequest};
use crate::request::message::RequestError;
use crate::shell::shell_escape;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required field `{field}` (set it in the job request or with {flag})")]
    Missing { field: &'static str, flag: &'static str },
    #[error("`{0}` must not be empty")]
    Empty(&'static str),
    #[error("`{0}` must not contain whitespace")]
    Whitespace(&'static str),
    #[error("`node_count` must be a positive integer, got {0}")]
    NodeCount(i64),
    #[error("`time_limit` {value:?} is not a valid HH:MM:SS duration: {reason}")]
    TimeLimit { value: String, reason: &'static str },
    #[error("`working_directory` {path} can't be resolved: {source}")]
    WorkingDirectory { path: PathBuf, source: io::Error },
    #[error("`working_directory` {0} is not a directory")]
    NotADirectory(PathBuf),
    #[error("log directory {path} for `{field}` does not exist and creating log directories is disabled")]
    LogDirectory { field: &'static str, path: PathBuf },
    #[error("`name` {0:?} must not contain '/', it names the job script file")]
    NameSeparator(String),
    #[error("can't write job script {path}: {source}")]
    WriteScript { path: PathBuf, source: io::Error },
    #[error("can't create log directory {path}: {source}")]
    CreateLogDirectory { path: PathBuf, source: io::Error },
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error("can't render job script: {0}")]
    Template(#[from] tinytemplate::error::Error),
}

/// Maximum wall-clock runtime of a job, written `HH:MM:SS`
///
/// Hours may run past 23 (`48:00:00` is two days). Minutes and seconds are always two digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeLimit(Duration);

impl TimeLimit {
    pub fn duration(&self) -> Duration {
        self.0
    }
}

impl FromStr for TimeLimit {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason| ConfigError::TimeLimit { value: s.to_string(), reason };

        let parts: Vec<&str> = s.split(':').collect();
        let [hours, minutes, seconds] = parts.as_slice() else {
            return Err(invalid("expected three fields separated by ':'"));
        };

        let hours = parse_field(hours, None).ok_or_else(|| invalid("hours must be digits"))?;
        let minutes = parse_field(minutes, Some(2)).ok_or_else(|| invalid("minutes must be two digits"))?;
        let seconds = parse_field(seconds, Some(2)).ok_or_else(|| invalid("seconds must be two digits"))?;
        if minutes >= 60 || seconds >= 60 {
            return Err(invalid("minutes and seconds must be below 60"));
        }

        let total = hours * 3600 + minutes * 60 + seconds;
        if total == 0 {
            return Err(invalid("time limit must be greater than zero"));
        }
        Ok(TimeLimit(Duration::seconds(total)))
    }
}

/// Parse an all-digit field, optionally of an exact width
fn parse_field(field: &str, width: Option<usize>) -> Option<i64> {
    let digits_ok = !field.is_empty() && field.chars().all(|c| c.is_ascii_digit());
    let width_ok = width.map_or(true, |w| field.len() == w);
    if !(digits_ok && width_ok) {
        return None;
    }
    // u32 bounds the hours so the total can't overflow
    field.parse::<u32>().ok().map(i64::from)
}

impl fmt::Display for TimeLimit {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let total = self.0.num_seconds();
        write!(f, "{:02}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
    }
}

/// Step that establishes the job's runtime environment before the entry point runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activation {
    /// a script to `source`, like a virtualenv's `bin/activate`
    Script(PathBuf),
    /// a command line run verbatim, like `module load openmpi`
    Command(String),
}

impl Activation {
    /// The bash line that performs this activation
    pub fn shell_line(&self) -> String {
        match self {
            Activation::Script(path) => format!("source {}", shell_escape(&path.to_string_lossy())),
            Activation::Command(command) => command.clone(),
        }
    }
}

impl From<ActivationRequest> for Activation {
    fn from(request: ActivationRequest) -> Self {
        match request {
            ActivationRequest::Script(path) => Activation::Script(path),
            ActivationRequest::Command(command) => Activation::Command(command),
        }
    }
}

/// What the process pool runs: a script path or an importable module
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryPoint {
    Script(String),
    Module(String),
}

impl EntryPoint {
    /// `.py` files and anything that looks like a path are scripts, everything else is a module
    pub fn parse(entry: &str) -> EntryPoint {
        if entry.ends_with(".py") || entry.contains('/') {
            EntryPoint::Script(entry.to_string())
        } else {
            EntryPoint::Module(entry.to_string())
        }
    }
}

/// How the MPI process pool is started
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Launcher {
    pub program: String,
    pub args: Vec<String>,
    pub python: String,
    pub module: String,
}

impl Default for Launcher {
    fn default() -> Self {
        Launcher {
            program: "mpirun".to_string(),
            args: Vec::new(),
            python: "python".to_string(),
            module: "mpi4py.futures".to_string(),
        }
    }
}

/// A validated submission
///
/// Only built by [`JobSpec::from_request`], and has no setters: submitting a different job
/// means building a new `JobSpec`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    name: String,
    stdout_path: String,
    stderr_path: String,
    node_count: u32,
    time_limit: TimeLimit,
    partition: String,
    working_directory: PathBuf,
    env_activation: Option<Activation>,
    entry_point: EntryPoint,
    entry_args: Vec<String>,
    create_log_dirs: bool,
    launcher: Launcher,
}

impl JobSpec {
    /// Check every field of a request, resolving the working directory on the way
    pub fn from_request(request: JobRequest) -> Result<JobSpec, ConfigError> {
        let name = required(request.name, "name", "--name")?;
        check_word(&name, "name")?;
        if name.contains('/') {
            return Err(ConfigError::NameSeparator(name));
        }

        let node_count = required(request.node_count, "node_count", "--nodes")?;
        let node_count = u32::try_from(node_count)
            .ok()
            .filter(|n| *n >= 1)
            .ok_or(ConfigError::NodeCount(node_count))?;

        let time_limit: TimeLimit = required(request.time_limit, "time_limit", "--time")?.parse()?;

        let partition = required(request.partition, "partition", "--partition")?;
        check_word(&partition, "partition")?;

        let stdout_path = required(request.stdout_path, "stdout_path", "--stdout")?;
        check_word(&stdout_path, "stdout_path")?;
        let stderr_path = required(request.stderr_path, "stderr_path", "--stderr")?;
        check_word(&stderr_path, "stderr_path")?;

        let entry = required(request.entry_point, "entry_point", "--entry")?;
        if entry.trim().is_empty() {
            return Err(ConfigError::Empty("entry_point"));
        }

        let working_directory = required(request.working_directory, "working_directory", "--workdir")?;
        let working_directory = resolve_working_directory(&working_directory)?;

        let defaults = Launcher::default();
        let launcher = Launcher {
            program: request.launcher.program.unwrap_or(defaults.program),
            args: request.launcher.args.unwrap_or(defaults.args),
            python: request.launcher.python.unwrap_or(defaults.python),
            module: request.launcher.module.unwrap_or(defaults.module),
        };
        check_word(&launcher.program, "launcher.program")?;
        check_word(&launcher.python, "launcher.python")?;
        check_word(&launcher.module, "launcher.module")?;

        let spec = JobSpec {
            name,
            stdout_path,
            stderr_path,
            node_count,
            time_limit,
            partition,
            working_directory,
            env_activation: request.env_activation.map(Activation::from),
            entry_point: EntryPoint::parse(&entry),
            entry_args: request.entry_args.unwrap_or_default(),
            create_log_dirs: request.create_log_dirs.unwrap_or(true),
            launcher,
        };
        info!(
            "Job request {} is valid: {} node(s) on {} for up to {} minutes",
            spec.name,
            spec.node_count,
            spec.partition,
            spec.time_limit.duration().num_minutes()
        );
        Ok(spec)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stdout_path(&self) -> &str {
        &self.stdout_path
    }

    pub fn stderr_path(&self) -> &str {
        &self.stderr_path
    }

    pub fn node_count(&self) -> u32 {
        self.node_count
    }

    pub fn time_limit(&self) -> TimeLimit {
        self.time_limit
    }

    pub fn partition(&self) -> &str {
        &self.partition
    }

    pub fn working_directory(&self) -> &Path {
        &self.working_directory
    }

    pub fn env_activation(&self) -> Option<&Activation> {
        self.env_activation.as_ref()
    }

    pub fn entry_point(&self) -> &EntryPoint {
        &self.entry_point
    }

    pub fn entry_args(&self) -> &[String] {
        &self.entry_args
    }

    pub fn launcher(&self) -> &Launcher {
        &self.launcher
    }

    /// Where the rendered script is written before submission
    pub fn script_path(&self) -> PathBuf {
        self.working_directory.join(format!("{}.sbatch", self.name))
    }

    /// Directories that must exist before the job starts writing its logs
    ///
    /// Relative log paths are relative to the working directory, where sbatch runs.
    pub fn log_directories(&self) -> Vec<(&'static str, PathBuf)> {
        let mut dirs: Vec<(&'static str, PathBuf)> = Vec::new();
        for (field, path) in [("stdout_path", &self.stdout_path), ("stderr_path", &self.stderr_path)] {
            let path = self.working_directory.join(path);
            if let Some(parent) = path.parent() {
                if !dirs.iter().any(|(_, dir)| dir == parent) {
                    dirs.push((field, parent.to_path_buf()));
                }
            }
        }
        dirs
    }

    /// Make sure every log directory exists, creating them if allowed
    pub fn prepare_log_directories(&self) -> Result<(), ConfigError> {
        for (field, dir) in self.log_directories() {
            if dir.is_dir() {
                continue;
            }
            if !self.create_log_dirs {
                return Err(ConfigError::LogDirectory { field, path: dir });
            }
            info!("Creating log directory {}", dir.display());
            fs::create_dir_all(&dir).map_err(|source| ConfigError::CreateLogDirectory { path: dir.clone(), source })?;
        }
        Ok(())
    }
}

fn required<T>(value: Option<T>, field: &'static str, flag: &'static str) -> Result<T, ConfigError> {
    value.ok_or(ConfigError::Missing { field, flag })
}

/// Values written into `#SBATCH` directives or as bare words: non-empty, no whitespace
fn check_word(value: &str, field: &'static str) -> Result<(), ConfigError> {
    if value.is_empty() {
        Err(ConfigError::Empty(field))
    } else if value.chars().any(char::is_whitespace) {
        Err(ConfigError::Whitespace(field))
    } else {
        Ok(())
    }
}

fn resolve_working_directory(path: &Path) -> Result<PathBuf, ConfigError> {
    let resolved = fs::canonicalize(path)
        .map_err(|source| ConfigError::WorkingDirectory { path: path.to_path_buf(), source })?;
    if !resolved.is_dir() {
        return Err(ConfigError::NotADirectory(resolved));
    }
    Ok(resolved)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// scenario request: a one node run of demo.py on the gen partition
    pub(crate) fn demo_request(workdir: &Path) -> JobRequest {
        JobRequest {
            name: Some("mpipool-test".into()),
            stdout_path: Some("logs/log-demo.o".into()),
            stderr_path: Some("logs/log-demo.e".into()),
            node_count: Some(1),
            time_limit: Some("00:20:00".into()),
            partition: Some("gen".into()),
            working_directory: Some(workdir.to_path_buf()),
            entry_point: Some("demo.py".into()),
            ..Default::default()
        }
    }

    #[test]
    fn time_limits_parse_and_print() {
        let limit: TimeLimit = "00:20:00".parse().unwrap();
        assert_eq!(limit.duration(), Duration::minutes(20));
        assert_eq!(limit.to_string(), "00:20:00");

        let long: TimeLimit = "120:05:09".parse().unwrap();
        assert_eq!(long.to_string(), "120:05:09");

        let short: TimeLimit = "1:00:00".parse().unwrap();
        assert_eq!(short.to_string(), "01:00:00");
    }

    #[test]
    fn bad_time_limits_are_config_errors() {
        for value in ["", "20:00", "00:20:00:00", "aa:20:00", "00:60:00", "00:00:60", "00:5:00", "00:00:00", "-1:00:00", "99999999999:00:00"] {
            let result = value.parse::<TimeLimit>();
            assert!(matches!(result, Err(ConfigError::TimeLimit { .. })), "{value:?} parsed as {result:?}");
        }
    }

    #[test]
    fn demo_request_is_valid() {
        let dir = tempfile::tempdir().unwrap();
        let spec = JobSpec::from_request(demo_request(dir.path())).unwrap();

        assert_eq!(spec.name(), "mpipool-test");
        assert_eq!(spec.node_count(), 1);
        assert_eq!(spec.partition(), "gen");
        assert_eq!(spec.entry_point(), &EntryPoint::Script("demo.py".into()));
        assert_eq!(spec.working_directory(), fs::canonicalize(dir.path()).unwrap());
        assert_eq!(spec.launcher(), &Launcher::default());
    }

    #[test]
    fn node_count_must_be_positive() {
        let dir = tempfile::tempdir().unwrap();
        for nodes in [0, -3, i64::from(u32::MAX) + 1] {
            let request = JobRequest { node_count: Some(nodes), ..demo_request(dir.path()) };
            assert!(matches!(JobSpec::from_request(request), Err(ConfigError::NodeCount(n)) if n == nodes));
        }
    }

    #[test]
    fn empty_partition_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let request = JobRequest { partition: Some(String::new()), ..demo_request(dir.path()) };
        assert!(matches!(JobSpec::from_request(request), Err(ConfigError::Empty("partition"))));
    }

    #[test]
    fn whitespace_in_directives_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let request = JobRequest { name: Some("mpipool\n#SBATCH --exclusive".into()), ..demo_request(dir.path()) };
        assert!(matches!(JobSpec::from_request(request), Err(ConfigError::Whitespace("name"))));
    }

    #[test]
    fn name_with_a_path_separator_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["demo/run1", "../escape"] {
            let request = JobRequest { name: Some(name.into()), ..demo_request(dir.path()) };
            assert!(matches!(JobSpec::from_request(request), Err(ConfigError::NameSeparator(n)) if n == name));
        }
    }

    #[test]
    fn script_lives_in_the_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let spec = JobSpec::from_request(demo_request(dir.path())).unwrap();
        assert_eq!(spec.script_path(), fs::canonicalize(dir.path()).unwrap().join("mpipool-test.sbatch"));
    }

    #[test]
    fn missing_fields_name_the_flag() {
        let dir = tempfile::tempdir().unwrap();
        let request = JobRequest { entry_point: None, ..demo_request(dir.path()) };
        let err = JobSpec::from_request(request).unwrap_err();
        assert!(err.to_string().contains("--entry"), "{err}");
    }

    #[test]
    fn working_directory_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let request = demo_request(&dir.path().join("missing"));
        assert!(matches!(JobSpec::from_request(request), Err(ConfigError::WorkingDirectory { .. })));

        let file = dir.path().join("file");
        fs::write(&file, "").unwrap();
        let request = demo_request(&file);
        assert!(matches!(JobSpec::from_request(request), Err(ConfigError::NotADirectory(_))));
    }

    #[test]
    fn entry_points_are_scripts_or_modules() {
        assert_eq!(EntryPoint::parse("demo.py"), EntryPoint::Script("demo.py".into()));
        assert_eq!(EntryPoint::parse("scripts/run"), EntryPoint::Script("scripts/run".into()));
        assert_eq!(EntryPoint::parse("pkg.main"), EntryPoint::Module("pkg.main".into()));
    }

    #[test]
    fn activation_lines() {
        assert_eq!(Activation::Script("venv/bin/activate".into()).shell_line(), "source venv/bin/activate");
        assert_eq!(Activation::Script("my env/activate".into()).shell_line(), "source 'my env/activate'");
        assert_eq!(Activation::Command("module load openmpi".into()).shell_line(), "module load openmpi");
    }

    #[test]
    fn log_directories_are_created_when_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let spec = JobSpec::from_request(demo_request(dir.path())).unwrap();

        let dirs = spec.log_directories();
        assert_eq!(dirs.len(), 1, "shared parent is listed once: {dirs:?}");
        assert!(!dir.path().join("logs").exists());

        spec.prepare_log_directories().unwrap();
        assert!(dir.path().join("logs").is_dir());
    }

    #[test]
    fn missing_log_directory_without_auto_create_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let request = JobRequest { create_log_dirs: Some(false), ..demo_request(dir.path()) };
        let spec = JobSpec::from_request(request).unwrap();

        assert!(matches!(
            spec.prepare_log_directories(),
            Err(ConfigError::LogDirectory { field: "stdout_path", .. })
        ));
        assert!(!dir.path().join("logs").exists());
    }
}
