use std::fs::File;
use std::io;
use std::io::Write;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::Serialize;
use tinytemplate::{format_unescaped, TinyTemplate};

use crate::shell::{join, shell_escape};
use crate::slurm::job_spec::{ConfigError, EntryPoint, JobSpec};

/// A JobPath is the path to a job script that's submitted to SLURM via sbatch
pub struct JobPath {
    pub path: PathBuf,
}

/// All rendered sections of an sbatch script for one mpi4py process pool job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobScript {
    header: Header,
    environment: Environment,
    workflow: Workflow,
}

impl JobScript {
    /// Render every section of the job script
    ///
    /// Rendering is a pure function of the spec: no timestamps or host details are included, so
    /// the same spec always renders the same bytes.
    pub fn render(spec: &JobSpec) -> Result<JobScript, ConfigError> {
        let script = JobScript {
            header: render_header(spec)?,
            environment: render_environment(spec)?,
            workflow: render_workflow(spec)?,
        };
        debug!("Rendered job script for {}:\n{}", spec.name(), script.content());
        Ok(script)
    }

    /// The complete script, sections in submission order
    pub fn content(&self) -> String {
        // order is important when writing the file
        [&self.header.content, &self.environment.content, &self.workflow.content]
            .iter()
            .map(|s| s.as_str())
            .collect()
    }

    /// Write the script to `<working directory>/<job name>.sbatch`, replacing any older copy
    pub fn write(&self, spec: &JobSpec) -> Result<JobPath, ConfigError> {
        let path = spec.script_path();
        if path.exists() {
            warn!("Job script {} already exists and will be overwritten", path.display());
        }
        info!("Writing job script to {}", path.display());
        write_file(&path, &self.content()).map_err(|source| ConfigError::WriteScript { path: path.clone(), source })?;
        Ok(JobPath { path })
    }
}

fn write_file(path: &Path, content: &str) -> Result<(), io::Error> {
    let mut file = File::create(path)?;
    file.write_all(content.as_bytes())
}

/// Rendered SBATCH header
///
/// SLURM jobs options can be parsed by sbatch using #SBATCH headers [before executable commands](https://slurm.schedmd.com/sbatch.html#SECTION_DESCRIPTION).
/// Job name, log paths, node count, wall-clock limit and partition all come from the spec.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Header {
    content: String,
}

/// Rendered environment section
///
/// Changes into the working directory and runs the activation step, exiting the job if the
/// activation fails.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Environment {
    content: String,
}

/// Rendered launcher command
#[derive(Debug, Clone, PartialEq, Eq)]
struct Workflow {
    content: String,
}

/// Rendering context for header
#[derive(Serialize)]
struct HeaderContext {
    name: String,
    stdout_path: String,
    stderr_path: String,
    node_count: u32,
    time_limit: String,
    partition: String,
}

/// Rendering context for the environment section
#[derive(Serialize)]
struct EnvironmentContext {
    working_directory: String,
    activation: Option<String>,
}

/// Rendering context for workflow
#[derive(Serialize)]
struct WorkflowContext {
    command: String,
}

fn template_engine<'a>(name: &'a str, text: &'a str) -> Result<TinyTemplate<'a>, ConfigError> {
    let mut tt = TinyTemplate::new();
    tt.set_default_formatter(&format_unescaped);
    tt.add_template(name, text)?;
    Ok(tt)
}

/// Render the SBATCH header using TinyTemplate
fn render_header(spec: &JobSpec) -> Result<Header, ConfigError> {
    /// included header template
    static HEADER: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/templates/header.txt"));
    let tt = template_engine("header", HEADER)?;

    let context = HeaderContext {
        name: spec.name().to_string(),
        stdout_path: spec.stdout_path().to_string(),
        stderr_path: spec.stderr_path().to_string(),
        node_count: spec.node_count(),
        time_limit: spec.time_limit().to_string(),
        partition: spec.partition().to_string(),
    };

    Ok(Header { content: tt.render("header", &context)? })
}

/// Render the working directory change and activation guard
fn render_environment(spec: &JobSpec) -> Result<Environment, ConfigError> {
    /// included environment template
    static ENVIRONMENT: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/templates/environment.txt"));
    let tt = template_engine("environment", ENVIRONMENT)?;

    let context = EnvironmentContext {
        working_directory: shell_escape(&spec.working_directory().to_string_lossy()),
        activation: spec.env_activation().map(|activation| activation.shell_line()),
    };

    Ok(Environment { content: tt.render("environment", &context)? })
}

/// Render the launcher command using TinyTemplate
fn render_workflow(spec: &JobSpec) -> Result<Workflow, ConfigError> {
    /// included workflow template
    static WORKFLOW: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/templates/workflow.txt"));
    let tt = template_engine("workflow", WORKFLOW)?;

    let context = WorkflowContext { command: launch_command(spec) };
    Ok(Workflow { content: tt.render("workflow", &context)? })
}

/// `mpirun [args] python -m mpi4py.futures <entry> [entry args]`
fn launch_command(spec: &JobSpec) -> String {
    let launcher = spec.launcher();
    let mut words: Vec<&str> = vec![launcher.program.as_str()];
    words.extend(launcher.args.iter().map(String::as_str));
    words.extend([launcher.python.as_str(), "-m", launcher.module.as_str()]);
    match spec.entry_point() {
        EntryPoint::Script(script) => words.push(script),
        EntryPoint::Module(module) => words.extend(["-m", module.as_str()]),
    }
    words.extend(spec.entry_args().iter().map(String::as_str));
    join(words)
}
