//! The five running modes
//!
//! `app` and `system` collect; `parse`, `query` and `export` post-process a
//! result directory collected earlier.

pub mod app;
pub mod export;
pub mod parse;
pub mod query;
pub mod system;

pub use app::AppMode;
pub use export::ExportMode;
pub use parse::ParseMode;
pub use query::QueryMode;
pub use system::SystemMode;

use std::fs;
use std::path::{Path, PathBuf};

use super::analysis::AnalysisStep;
use super::params::ProfileParams;
use super::running_mode::{generate_job_id, ModeBase};
use crate::domain::ModeError;

/// Run one analysis step on `--output`, for the post-processing modes
fn run_single_step(base: &mut ModeBase, step: &AnalysisStep) -> Result<(), ModeError> {
    base.analysis.check_env()?;
    let output = base
        .params
        .output
        .clone()
        .ok_or(ModeError::MissingParam { mode: base.name, arg: "--output" })?;
    if !output.is_dir() {
        return Err(ModeError::InvalidValue {
            arg: "--output",
            reason: format!("{} is not a directory", output.display()),
        });
    }
    base.run_analysis(step, &output)?;
    println!("{}: {}", step.name(), output.display());
    Ok(())
}

/// Create a new job directory under `output`, persist the params into it and
/// add it to the output record
fn create_job_dir(base: &ModeBase, output: &Path) -> Result<(String, PathBuf), ModeError> {
    let job_id = generate_job_id();
    let job_dir = output.join(format!("PROF_{job_id}"));
    fs::create_dir_all(&job_dir)?;
    write_sample_json(&base.params, &job_dir)?;
    base.record.append(&job_dir)?;
    Ok((job_id, job_dir))
}

fn write_sample_json(params: &ProfileParams, job_dir: &Path) -> Result<(), ModeError> {
    let json = serde_json::to_vec_pretty(params)?;
    fs::write(job_dir.join("sample.json"), json)?;
    Ok(())
}
