//! Pre-flight checks for msprof
//!
//! Validates the environment once the running mode is known and before any
//! collection starts. Provides clear, actionable error messages when
//! requirements aren't met.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;

use crate::host::analysis::{find_executable, AnalysisTool};
use crate::host::process::split_command_line;
use crate::host::ProfileParams;

/// Run the checks that apply to `mode`
///
/// # Errors
/// Returns the first failed check
pub fn run_preflight_checks(mode: &str, params: &ProfileParams, quiet: bool) -> Result<()> {
    match mode {
        "app" => {
            check_output_writable(&params.output_dir())?;
            check_application_exists(params.app.as_deref().unwrap_or_default())?;
            check_analysis_env(params, quiet);
        }
        "system" => {
            check_output_writable(&params.output_dir())?;
            check_analysis_env(params, quiet);
        }
        _ => {
            if let Some(output) = &params.output {
                check_result_dir(output)?;
            }
        }
    }
    Ok(())
}

/// Check that `dir` exists (or can be created) and accepts new files
fn check_output_writable(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| {
        format!(
            "Cannot create output directory {}\n\n\
             Check the path and its permissions, or pass another --output.",
            dir.display()
        )
    })?;
    let probe = dir.join(format!(".msprof_probe_{}", std::process::id()));
    fs::write(&probe, b"").with_context(|| {
        format!("Output directory {} is not writable (permission denied)", dir.display())
    })?;
    let _ = fs::remove_file(&probe);
    Ok(())
}

/// Check that the application's program can be found
fn check_application_exists(command_line: &str) -> Result<()> {
    let Some((program, _)) = split_command_line(command_line) else {
        bail!("Missing required argument: --application is empty");
    };
    if find_executable(&program).is_none() {
        bail!(
            "Application not found: {program}\n\n\
             Make sure the path is correct, or that the program is on PATH."
        );
    }
    Ok(())
}

/// Check that a post-processing target is an existing directory
fn check_result_dir(dir: &Path) -> Result<()> {
    if !dir.is_dir() {
        bail!(
            "Result directory not found: {}\n\n\
             --output must point to a directory collected by msprof.",
            dir.display()
        );
    }
    Ok(())
}

/// Warn early when collected data will not be analyzed afterwards
fn check_analysis_env(params: &ProfileParams, quiet: bool) {
    if quiet {
        return;
    }
    if let Err(e) = AnalysisTool::from_params(params).check_env() {
        eprintln!("warning: {e}; collected data will not be exported");
    }
}
