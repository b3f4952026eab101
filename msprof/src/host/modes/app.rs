//! Application mode
//!
//! Runs the application under profiling as the mode's task process. The
//! application's runtime reads its collection settings from
//! `PROFILING_OPTIONS` and writes into the job directory. Host sampling runs
//! alongside when `--host-sys` is given.

use log::info;
use std::collections::HashSet;
use std::fs;
use std::process::Command;

use super::create_job_dir;
use crate::domain::ModeError;
use crate::host::cancel::CancelToken;
use crate::host::params::{ArgKind, ProfileParams};
use crate::host::process::split_command_line;
use crate::host::running_mode::{ModeBase, ParamContract, RunningMode};
use crate::host::tasks::{HostSampleKind, HostSamplerTask};

/// Settings handed to the profiled application
pub const PROFILING_OPTIONS_ENV: &str = "PROFILING_OPTIONS";
pub const PROFILING_MODE_ENV: &str = "PROFILING_MODE";

pub struct AppMode {
    base: ModeBase,
    host_kinds: Vec<HostSampleKind>,
}

impl AppMode {
    #[must_use]
    pub fn new(params: ProfileParams, used: HashSet<ArgKind>, cancel: CancelToken) -> Self {
        let contract = ParamContract::new(
            &[ArgKind::Parse, ArgKind::Query, ArgKind::Export, ArgKind::SysPeriod],
            &[ArgKind::Application],
            &[
                ArgKind::Output,
                ArgKind::AiCore,
                ArgKind::AicMode,
                ArgKind::AicMetrics,
                ArgKind::AicFreq,
                ArgKind::Aiv,
                ArgKind::AivMode,
                ArgKind::AivMetrics,
                ArgKind::HcclTrace,
                ArgKind::RuntimeApi,
                ArgKind::HostSys,
                ArgKind::SysSamplingInterval,
                ArgKind::IterationId,
                ArgKind::ModelId,
                ArgKind::SummaryFormat,
                ArgKind::PythonPath,
            ],
        );
        Self { base: ModeBase::new("app", params, used, contract, cancel), host_kinds: Vec::new() }
    }

    fn run_application(&mut self) -> Result<(), ModeError> {
        let output = self.base.params.output_dir();
        fs::create_dir_all(&output)?;
        let (job_id, job_dir) = create_job_dir(&self.base, &output)?;

        if !self.host_kinds.is_empty() {
            let sampler = HostSamplerTask::new(
                &job_dir,
                self.host_kinds.clone(),
                self.base.params.sys_sampling_interval_ms,
            );
            self.base.start_prof_task(format!("{job_id}_host"), Box::new(sampler))?;
        }

        let app = self.base.params.app.clone().unwrap_or_default();
        let (program, args) = split_command_line(&app)
            .ok_or(ModeError::InvalidValue { arg: "--application", reason: "empty command".to_string() })?;
        let options = ProfileParams { output: Some(job_dir.clone()), ..self.base.params.clone() };
        let mut command = Command::new(&program);
        command
            .args(&args)
            .env(PROFILING_MODE_ENV, "true")
            .env(PROFILING_OPTIONS_ENV, serde_json::to_string(&options)?);

        let pid = self.base.start_task("application", &mut command)?;
        println!("application: {program} ({pid})");
        self.base.wait_running_process()?;
        info!("Application finished, job {job_id}");
        Ok(())
    }
}

impl RunningMode for AppMode {
    fn name(&self) -> &'static str {
        self.base.name
    }

    fn mode_params_check(&mut self) -> Result<(), ModeError> {
        self.base.check_params()?;
        if let Some(list) = self.base.params.host_sys.as_deref() {
            self.host_kinds = HostSampleKind::parse_list(list)?;
        }
        Ok(())
    }

    fn run_mode_tasks(&mut self) -> Result<(), ModeError> {
        let ran = self.run_application();
        let stopped = self.base.stop_prof_tasks();
        self.base.update_output_dir_info()?;
        ran?;
        stopped?;
        self.base.post_process();
        Ok(())
    }

    fn stop_running_tasks(&mut self) {
        self.base.stop_running_tasks();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(dir: &std::path::Path, app: &str) -> ProfileParams {
        ProfileParams {
            output: Some(dir.to_path_buf()),
            app: Some(app.to_string()),
            python_path: "no-such-python-xyz".to_string(),
            ..ProfileParams::default()
        }
    }

    fn used() -> HashSet<ArgKind> {
        [ArgKind::Application, ArgKind::Output].into_iter().collect()
    }

    #[test]
    fn test_forbidden_flag_leaves_no_trace() {
        let dir = tempfile::tempdir().unwrap();
        let mut used = used();
        used.insert(ArgKind::Parse);
        let mut mode = AppMode::new(params(dir.path(), "true"), used, CancelToken::new());
        assert!(mode.mode_params_check().is_err());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_app_run_creates_job_dir_and_consumes_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut mode = AppMode::new(params(dir.path(), "true"), used(), CancelToken::new());
        mode.mode_params_check().unwrap();
        mode.run_mode_tasks().unwrap();

        assert_eq!(mode.base.result_dirs.len(), 1);
        let job_dir = &mode.base.result_dirs[0];
        assert!(job_dir.join("sample.json").is_file());
        assert!(!mode.base.record.path().exists());
        assert!(mode.base.task_pid().is_none());
    }

    #[test]
    fn test_failing_app_fails_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut mode = AppMode::new(params(dir.path(), "false"), used(), CancelToken::new());
        mode.mode_params_check().unwrap();
        assert!(matches!(mode.run_mode_tasks(), Err(ModeError::TaskFailed { .. })));
    }

    #[test]
    fn test_app_sees_profiling_options() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("seen");
        let script = dir.path().join("app.sh");
        fs::write(&script, format!("printenv {PROFILING_OPTIONS_ENV} > {}\n", marker.display())).unwrap();
        let app = format!("sh {}", script.display());
        let mut mode = AppMode::new(params(dir.path(), &app), used(), CancelToken::new());
        mode.mode_params_check().unwrap();
        mode.run_mode_tasks().unwrap();

        let options: ProfileParams = serde_json::from_str(fs::read_to_string(&marker).unwrap().trim()).unwrap();
        assert_eq!(options.output.as_ref(), mode.base.result_dirs.first());
    }
}
