//! # Running Modes
//!
//! One [`RunningMode`] runs per invocation. Every mode carries a parameter
//! contract over the flags the user typed:
//!
//! - **forbidden**: any of these present aborts before anything is touched
//! - **necessary**: all of these must be present
//! - **white**: flags that have an effect; others only get a warning
//!
//! [`ModeBase`] holds the state every mode shares: the contract, the single
//! task process slot, the collection tasks of system mode, the cancel token
//! and the output record.

use log::{info, warn};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::thread;
use std::time::{Duration, Instant};

use super::analysis::{AnalysisStep, AnalysisTool};
use super::cancel::CancelToken;
use super::params::{ArgKind, ExportType, ProfileParams};
use super::process::{TaskProcess, WAIT_POLL_INTERVAL};
use super::record::OutputRecord;
use super::tasks::ProfTask;
use crate::domain::{ModeError, Pid};

pub trait RunningMode: Send {
    /// Mode name as shown to the user (`app`, `system`, ...)
    fn name(&self) -> &'static str;

    /// Check the parameter contract and resolve mode specific values
    ///
    /// # Errors
    /// Fails on forbidden or missing flags and on values that do not resolve
    fn mode_params_check(&mut self) -> Result<(), ModeError>;

    /// Run the mode to completion
    ///
    /// # Errors
    /// Fails if a required task cannot be started or fails
    fn run_mode_tasks(&mut self) -> Result<(), ModeError>;

    /// Stop whatever is still running; later task starts are refused
    fn stop_running_tasks(&mut self);
}

/// Parameter contract of one mode
#[derive(Debug, Clone, Default)]
pub struct ParamContract {
    pub forbidden: BTreeSet<ArgKind>,
    pub necessary: BTreeSet<ArgKind>,
    pub white: BTreeSet<ArgKind>,
}

impl ParamContract {
    #[must_use]
    pub fn new(forbidden: &[ArgKind], necessary: &[ArgKind], white: &[ArgKind]) -> Self {
        Self {
            forbidden: forbidden.iter().copied().collect(),
            necessary: necessary.iter().copied().collect(),
            // Necessary flags always have an effect
            white: white.iter().chain(necessary).copied().collect(),
        }
    }
}

pub struct ModeBase {
    pub name: &'static str,
    pub params: ProfileParams,
    pub used: HashSet<ArgKind>,
    pub contract: ParamContract,
    pub cancel: CancelToken,
    pub analysis: AnalysisTool,
    pub record: OutputRecord,
    /// Directories collected by this run, read back from the record
    pub result_dirs: Vec<PathBuf>,
    /// System mode collection tasks by job key
    pub task_map: HashMap<String, Box<dyn ProfTask>>,
    task: Option<TaskProcess>,
}

impl ModeBase {
    #[must_use]
    pub fn new(
        name: &'static str,
        params: ProfileParams,
        used: HashSet<ArgKind>,
        contract: ParamContract,
        cancel: CancelToken,
    ) -> Self {
        let analysis = AnalysisTool::from_params(&params);
        let record = OutputRecord::new(&params.output_dir());
        Self {
            name,
            params,
            used,
            contract,
            cancel,
            analysis,
            record,
            result_dirs: Vec::new(),
            task_map: HashMap::new(),
            task: None,
        }
    }

    /// Forbidden and necessary flags; fails on the first violation
    ///
    /// # Errors
    /// `ForbiddenParam` or `MissingParam`
    pub fn check_params(&self) -> Result<(), ModeError> {
        if let Some(arg) = self.contract.forbidden.iter().find(|arg| self.used.contains(*arg)) {
            return Err(ModeError::ForbiddenParam { mode: self.name, arg: arg.flag() });
        }
        if let Some(arg) = self.contract.necessary.iter().find(|arg| !self.used.contains(*arg)) {
            return Err(ModeError::MissingParam { mode: self.name, arg: arg.flag() });
        }
        self.output_useless_params();
        Ok(())
    }

    /// Used flags that have no effect in this mode
    #[must_use]
    pub fn useless_params(&self) -> Vec<ArgKind> {
        let mut useless: Vec<ArgKind> =
            self.used.iter().copied().filter(|arg| !self.contract.white.contains(arg)).collect();
        useless.sort();
        useless
    }

    fn output_useless_params(&self) {
        for arg in self.useless_params() {
            warn!("{} has no effect in {} mode and is ignored", arg.flag(), self.name);
        }
    }

    /// Pid of the task process, if one is running
    #[must_use]
    pub fn task_pid(&self) -> Option<Pid> {
        self.task.as_ref().map(TaskProcess::pid)
    }

    /// Spawn the task process; only one may exist at a time
    ///
    /// # Errors
    /// `Cancelled` after a stop request, `TaskBusy` if a task is running,
    /// or the spawn error
    pub fn start_task(&mut self, name: &str, command: &mut Command) -> Result<Pid, ModeError> {
        if self.cancel.is_cancelled() {
            return Err(ModeError::Cancelled);
        }
        if let Some(pid) = self.task_pid() {
            return Err(ModeError::TaskBusy(pid));
        }
        let task = TaskProcess::spawn(name, command)?;
        let pid = task.pid();
        self.task = Some(task);
        Ok(pid)
    }

    /// Wait for the task process and free the slot
    ///
    /// # Errors
    /// `Cancelled` if interrupted, `TaskFailed` on a non-zero exit
    pub fn wait_running_process(&mut self) -> Result<(), ModeError> {
        let Some(mut task) = self.task.take() else {
            return Ok(());
        };
        let status = task.wait(&self.cancel)?;
        if status.success() {
            Ok(())
        } else {
            Err(ModeError::TaskFailed {
                name: task.name().to_string(),
                reason: format!("exited with {status}"),
            })
        }
    }

    /// Run one analysis step against `dir` in the task slot
    ///
    /// # Errors
    /// As [`Self::start_task`] and [`Self::wait_running_process`]
    pub fn run_analysis(&mut self, step: &AnalysisStep, dir: &Path) -> Result<(), ModeError> {
        let mut command = self.analysis.command(step, dir);
        let name = format!("analysis {}", step.name());
        self.start_task(&name, &mut command)?;
        self.wait_running_process()
    }

    /// Wait `period`, or until cancelled when `None`
    pub fn wait_period(&self, period: Option<Duration>) {
        let started = Instant::now();
        while !self.cancel.is_cancelled() {
            if period.is_some_and(|p| started.elapsed() >= p) {
                return;
            }
            thread::sleep(WAIT_POLL_INTERVAL);
        }
        info!("Collection interrupted");
    }

    /// Start `task` and track it under `key`
    ///
    /// # Errors
    /// `Cancelled` after a stop request, or the task's start error
    pub fn start_prof_task(&mut self, key: String, mut task: Box<dyn ProfTask>) -> Result<(), ModeError> {
        if self.cancel.is_cancelled() {
            return Err(ModeError::Cancelled);
        }
        task.start()?;
        self.task_map.insert(key, task);
        Ok(())
    }

    /// Stop every collection task; returns the first failure
    ///
    /// # Errors
    /// The first task stop error; every task is still stopped
    pub fn stop_prof_tasks(&mut self) -> Result<(), ModeError> {
        let mut first_err = None;
        let mut keys: Vec<String> = self.task_map.keys().cloned().collect();
        keys.sort();
        for key in keys {
            let Some(mut task) = self.task_map.remove(&key) else {
                continue;
            };
            if let Err(e) = task.stop() {
                warn!("Failed to stop {}: {e}", task.name());
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Load the collected directories from the output record
    ///
    /// # Errors
    /// Returns an error if the record cannot be read
    pub fn update_output_dir_info(&mut self) -> Result<(), ModeError> {
        self.result_dirs = self.record.take()?;
        Ok(())
    }

    /// Export then query every collected directory
    ///
    /// Failures are logged only; the collected data is on disk either way.
    pub fn post_process(&mut self) {
        if self.result_dirs.is_empty() {
            return;
        }
        if let Err(e) = self.analysis.check_env() {
            warn!("Skipping analysis: {e}");
            return;
        }
        let dirs = self.result_dirs.clone();
        let steps = [
            self.export_step(ExportType::Timeline),
            self.export_step(ExportType::Summary),
            AnalysisStep::Query,
        ];
        for dir in &dirs {
            for step in &steps {
                match self.run_analysis(step, dir) {
                    Ok(()) => {}
                    Err(ModeError::Cancelled) => {
                        warn!("Analysis cancelled");
                        return;
                    }
                    Err(e) => warn!("Analysis {} of {} failed: {e}", step.name(), dir.display()),
                }
            }
            println!("saved: {}", dir.display());
        }
    }

    #[must_use]
    pub fn export_step(&self, kind: ExportType) -> AnalysisStep {
        AnalysisStep::Export {
            kind,
            iteration_id: self.params.iteration_id,
            model_id: self.params.model_id,
            format: self.params.summary_format,
        }
    }

    /// Cancel, interrupt the task process and stop all collection tasks
    pub fn stop_running_tasks(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.as_mut() {
            task.interrupt();
        }
        self.task = None;
        if let Err(e) = self.stop_prof_tasks() {
            warn!("Stopping tasks: {e}");
        }
    }
}

/// Generate a job id unique to this process
#[must_use]
pub fn generate_job_id() -> String {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::{SystemTime, UNIX_EPOCH};

    static SEQ: AtomicU32 = AtomicU32::new(0);
    let millis = SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |d| d.as_millis());
    let seq = SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{millis}{:05}{seq:03}", std::process::id() % 100_000)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base(used: &[ArgKind]) -> ModeBase {
        let contract = ParamContract::new(&[ArgKind::Query], &[ArgKind::Output], &[ArgKind::PythonPath]);
        ModeBase::new(
            "test",
            ProfileParams::default(),
            used.iter().copied().collect(),
            contract,
            CancelToken::new(),
        )
    }

    #[test]
    fn test_forbidden_wins_over_missing() {
        let err = base(&[ArgKind::Query]).check_params().unwrap_err();
        assert!(matches!(err, ModeError::ForbiddenParam { arg: "--query", .. }));
    }

    #[test]
    fn test_missing_and_useless_params() {
        assert!(matches!(base(&[]).check_params(), Err(ModeError::MissingParam { arg: "--output", .. })));
        let mode = base(&[ArgKind::Output, ArgKind::AiCore]);
        assert!(mode.check_params().is_ok());
        assert_eq!(mode.useless_params(), vec![ArgKind::AiCore]);
    }

    #[test]
    fn test_single_task_slot() {
        let mut mode = base(&[]);
        assert!(mode.task_pid().is_none());
        mode.start_task("sleep", Command::new("sleep").arg("5")).unwrap();
        assert!(mode.task_pid().is_some());
        let err = mode.start_task("true", &mut Command::new("true")).unwrap_err();
        assert!(matches!(err, ModeError::TaskBusy(_)));

        mode.stop_running_tasks();
        assert!(mode.task_pid().is_none());
        assert!(matches!(mode.start_task("true", &mut Command::new("true")), Err(ModeError::Cancelled)));
    }

    #[test]
    fn test_failed_task_frees_slot() {
        let mut mode = base(&[]);
        mode.start_task("false", &mut Command::new("false")).unwrap();
        assert!(matches!(mode.wait_running_process(), Err(ModeError::TaskFailed { .. })));
        assert!(mode.task_pid().is_none());
    }

    #[test]
    fn test_wait_period_returns_on_cancel() {
        let mode = base(&[]);
        mode.cancel.cancel();
        let started = Instant::now();
        mode.wait_period(None);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_job_ids_are_unique() {
        assert_ne!(generate_job_id(), generate_job_id());
    }
}
