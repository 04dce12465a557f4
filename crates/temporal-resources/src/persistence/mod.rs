//! Datastore provisioning: schema scripts and the jobs that run them

pub mod jobs;
pub mod scripts;

pub use jobs::{
    active_schema_jobs, job_complete, job_failed, schema_jobs, schema_pending, SchemaJobBuilder,
};
pub use scripts::{render_script, render_scripts, SchemaScriptsBuilder, SchemaStep};
