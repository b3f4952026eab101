//! External analysis tool
//!
//! Parsing, querying and exporting collected data is done by the Python
//! `msprof.py` tool. This module only locates it and builds its command
//! lines; running it goes through the mode's single task slot.

use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;

use super::params::{ExportType, ProfileParams, SummaryFormat};
use crate::domain::ModeError;

/// Overrides the analysis script location
pub const ANALYSIS_SCRIPT_ENV: &str = "MSPROF_ANALYSIS_SCRIPT";

/// Script location relative to the directory of the `msprof` binary
const DEFAULT_SCRIPT_RELATIVE: &str = "../analysis/msprof/msprof.py";

/// One invocation of the analysis tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisStep {
    Import,
    Query,
    Export {
        kind: ExportType,
        iteration_id: Option<u32>,
        model_id: Option<u32>,
        format: SummaryFormat,
    },
}

impl AnalysisStep {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Import => "import",
            Self::Query => "query",
            Self::Export { .. } => "export",
        }
    }

    /// Positional and flag arguments for a result directory
    #[must_use]
    pub fn args(&self, dir: &Path) -> Vec<String> {
        let mut args = vec![self.name().to_string()];
        if let Self::Export { kind, .. } = self {
            args.push(kind.as_str().to_string());
        }
        args.push(format!("-dir={}", dir.display()));
        if let Self::Export { iteration_id, model_id, format, kind } = self {
            if let Some(id) = iteration_id {
                args.push(format!("--iteration-id={id}"));
            }
            if let Some(id) = model_id {
                args.push(format!("--model-id={id}"));
            }
            if *kind == ExportType::Summary {
                args.push(format!("--format={}", format.as_str()));
            }
        }
        args
    }
}

#[derive(Debug, Clone)]
pub struct AnalysisTool {
    python: String,
    script: PathBuf,
}

impl AnalysisTool {
    #[must_use]
    pub fn new(python: impl Into<String>, script: impl Into<PathBuf>) -> Self {
        Self { python: python.into(), script: script.into() }
    }

    /// Locate the tool from `--python-path` and the environment
    #[must_use]
    pub fn from_params(params: &ProfileParams) -> Self {
        Self::new(params.python_path.clone(), default_script())
    }

    #[must_use]
    pub fn script(&self) -> &Path {
        &self.script
    }

    /// Check that both the interpreter and the script are present
    ///
    /// # Errors
    /// Returns `AnalysisUnavailable` naming what is missing
    pub fn check_env(&self) -> Result<(), ModeError> {
        if find_executable(&self.python).is_none() {
            return Err(ModeError::AnalysisUnavailable(format!(
                "python interpreter {:?} not found",
                self.python
            )));
        }
        if !self.script.is_file() {
            return Err(ModeError::AnalysisUnavailable(format!(
                "analysis script {} not found (set {ANALYSIS_SCRIPT_ENV})",
                self.script.display()
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn command(&self, step: &AnalysisStep, dir: &Path) -> Command {
        let mut command = Command::new(&self.python);
        command.arg(&self.script).args(step.args(dir));
        command
    }
}

fn default_script() -> PathBuf {
    if let Some(script) = env::var_os(ANALYSIS_SCRIPT_ENV) {
        return PathBuf::from(script);
    }
    env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(DEFAULT_SCRIPT_RELATIVE)))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SCRIPT_RELATIVE))
}

/// Resolve `program` the way the shell would: as a path, or through `PATH`
#[must_use]
pub fn find_executable(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    env::var_os("PATH").and_then(|paths| {
        env::split_paths(&paths).map(|dir| dir.join(program)).find(|path| path.is_file())
    })
}
