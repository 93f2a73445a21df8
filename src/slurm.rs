//! Validate job requests, render them into sbatch scripts, and hand them to SLURM

/// Validated, immutable job description
pub mod job_spec;

/// Read configuration templates and render them with job content
pub mod job;

/// Submit rendered job scripts to the workload manager
pub mod submit;
