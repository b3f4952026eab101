//! System mode
//!
//! Samples the whole system instead of one application. Every requested
//! device gets its own job directory with a host sampler and, when a device
//! switch is on, a device collection job on the agent. Collection runs for
//! `--sys-period` seconds or until interrupted.

use log::{info, warn};
use msprof_common::{JobContext, SampleConfig};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use super::create_job_dir;
use crate::domain::ModeError;
use crate::host::cancel::CancelToken;
use crate::host::metrics::{adapt_llc_events, resolve_ai_core_metrics};
use crate::host::params::{ArgKind, ProfileParams};
use crate::host::running_mode::{ModeBase, ParamContract, RunningMode};
use crate::host::tasks::{DeviceRpcTask, HostSampleKind, HostSamplerTask, SessionConnector, TcpConnector};

/// Device nodes probed for `--sys-devices=all`
const DEVICE_NODE_DIR: &str = "/dev";
const DEVICE_NODE_PREFIX: &str = "davinci";

pub struct SystemMode {
    base: ModeBase,
    devices: Vec<i32>,
    host_kinds: Vec<HostSampleKind>,
    connector: Option<Arc<dyn SessionConnector>>,
}

impl SystemMode {
    #[must_use]
    pub fn new(params: ProfileParams, used: HashSet<ArgKind>, cancel: CancelToken) -> Self {
        let contract = ParamContract::new(
            &[
                ArgKind::Application,
                ArgKind::Parse,
                ArgKind::Query,
                ArgKind::Export,
                ArgKind::HcclTrace,
                ArgKind::RuntimeApi,
            ],
            &[],
            &[
                ArgKind::Output,
                ArgKind::SysDevices,
                ArgKind::HostSys,
                ArgKind::SysPeriod,
                ArgKind::SysSamplingInterval,
                ArgKind::AiCore,
                ArgKind::AicMode,
                ArgKind::AicMetrics,
                ArgKind::AicFreq,
                ArgKind::Aiv,
                ArgKind::AivMode,
                ArgKind::AivMetrics,
                ArgKind::LlcProfiling,
                ArgKind::Platform,
                ArgKind::IterationId,
                ArgKind::ModelId,
                ArgKind::SummaryFormat,
                ArgKind::PythonPath,
                ArgKind::DeviceAddr,
            ],
        );
        Self {
            base: ModeBase::new("system", params, used, contract, cancel),
            devices: Vec::new(),
            host_kinds: Vec::new(),
            connector: None,
        }
    }

    /// Reach the device agent through `connector` instead of `--device-addr`
    #[must_use]
    pub fn with_connector(mut self, connector: Arc<dyn SessionConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    #[must_use]
    pub fn devices(&self) -> &[i32] {
        &self.devices
    }

    #[must_use]
    pub fn params(&self) -> &ProfileParams {
        &self.base.params
    }

    fn connector(&self) -> Arc<dyn SessionConnector> {
        self.connector
            .clone()
            .unwrap_or_else(|| Arc::new(TcpConnector(self.base.params.device_addr.clone())))
    }

    fn sample_config(&self, job_id: &str, dev: i32) -> SampleConfig {
        let params = &self.base.params;
        SampleConfig {
            job_id: job_id.to_string(),
            dev_id: dev.to_string(),
            profiling_mode: "system-wide".to_string(),
            ai_core_events: params.ai_core_events.clone(),
            ai_core_mode: params.aic_mode.clone(),
            ai_core_sampling_interval_ms: params.ai_core_sampling_interval_ms(),
            aiv_events: params.aiv_events.clone(),
            aiv_mode: params.aiv_mode.clone(),
            llc_events: params.llc_events.clone(),
            sys_sampling_interval_ms: params.sys_sampling_interval_ms,
            ..SampleConfig::default()
        }
    }

    fn start_tasks(&mut self, output: &Path) -> Result<(), ModeError> {
        let jobs: Vec<Option<i32>> =
            if self.devices.is_empty() { vec![None] } else { self.devices.iter().copied().map(Some).collect() };
        let interval = self.base.params.sys_sampling_interval_ms;

        for dev in jobs {
            let (job_id, job_dir) = create_job_dir(&self.base, output)?;
            let sampler = HostSamplerTask::new(&job_dir, self.host_kinds.clone(), interval);
            self.base.start_prof_task(format!("{job_id}_host"), Box::new(sampler))?;

            let Some(dev) = dev.filter(|_| self.base.params.device_profiling_enabled()) else {
                continue;
            };
            let job_ctx = JobContext::new(job_id.as_str(), dev.to_string());
            let task =
                DeviceRpcTask::new(self.connector(), job_ctx.clone(), self.sample_config(&job_id, dev), &job_dir);
            self.base.start_prof_task(job_ctx.task_key(), Box::new(task))?;
            println!("device {dev}: job {job_id}");
        }
        Ok(())
    }
}

/// Parse `--sys-devices`: `all` or a comma separated id list
///
/// # Errors
/// `InvalidValue` for malformed ids, or `all` when no device is present
pub fn resolve_devices(devices: &str) -> Result<Vec<i32>, ModeError> {
    let devices = devices.trim();
    if devices == "all" {
        let found = probe_devices(Path::new(DEVICE_NODE_DIR));
        if found.is_empty() {
            return Err(ModeError::InvalidValue {
                arg: "--sys-devices",
                reason: "no device found for \"all\"".to_string(),
            });
        }
        return Ok(found);
    }

    let mut ids = Vec::new();
    for item in devices.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let id = item.parse::<i32>().ok().filter(|id| *id >= 0).ok_or_else(|| ModeError::InvalidValue {
            arg: "--sys-devices",
            reason: format!("invalid device id {item:?}"),
        })?;
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    Ok(ids)
}

/// Device ids of the `davinci<N>` nodes under `dir`
fn probe_devices(dir: &Path) -> Vec<i32> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut ids: Vec<i32> = entries
        .flatten()
        .filter_map(|entry| {
            entry.file_name().to_str()?.strip_prefix(DEVICE_NODE_PREFIX)?.parse::<i32>().ok()
        })
        .collect();
    ids.sort_unstable();
    ids
}

impl RunningMode for SystemMode {
    fn name(&self) -> &'static str {
        self.base.name
    }

    fn mode_params_check(&mut self) -> Result<(), ModeError> {
        self.base.check_params()?;

        let params = &mut self.base.params;
        if params.ai_core {
            params.ai_core_events = resolve_ai_core_metrics("--aic-metrics", &params.aic_metrics)?;
        }
        if params.aiv {
            params.aiv_events = resolve_ai_core_metrics("--aiv-metrics", &params.aiv_metrics)?;
        }
        if let Some(mode) = params.llc_profiling.as_deref() {
            params.llc_events = adapt_llc_events(params.platform, mode)?;
        }
        if params.sys_sampling_interval_ms == 0 {
            return Err(ModeError::InvalidValue {
                arg: "--sys-sampling-interval",
                reason: "must be greater than 0".to_string(),
            });
        }

        self.host_kinds = match params.host_sys.as_deref() {
            Some(list) => HostSampleKind::parse_list(list)?,
            None => HostSampleKind::DEFAULT.to_vec(),
        };
        self.devices = match params.devices.as_deref() {
            Some(devices) => resolve_devices(devices)?,
            None => Vec::new(),
        };
        if !self.devices.is_empty() && !params.device_profiling_enabled() {
            warn!("No device switch is on; only host data will be collected");
        }
        Ok(())
    }

    fn run_mode_tasks(&mut self) -> Result<(), ModeError> {
        let output = self.base.params.output_dir();
        fs::create_dir_all(&output)?;

        let started = self.start_tasks(&output);
        if started.is_ok() {
            let period = self.base.params.sys_period_s.map(Duration::from_secs);
            match period {
                Some(p) => info!("Collecting for {}s", p.as_secs()),
                None => println!("collecting until interrupted (Ctrl+C)"),
            }
            self.base.wait_period(period);
        }
        let stopped = self.base.stop_prof_tasks();
        self.base.update_output_dir_info()?;
        started?;
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

    fn mode(params: ProfileParams, used: &[ArgKind]) -> SystemMode {
        SystemMode::new(params, used.iter().copied().collect(), CancelToken::new())
    }

    #[test]
    fn test_resolve_device_list() {
        assert_eq!(resolve_devices("0, 2,0").unwrap(), vec![0, 2]);
        assert!(resolve_devices("0,x").is_err());
        assert!(resolve_devices("-1").is_err());
    }

    #[test]
    fn test_probe_device_nodes() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["davinci1", "davinci0", "davinci_manager", "null"] {
            fs::write(dir.path().join(name), "").unwrap();
        }
        assert_eq!(probe_devices(dir.path()), vec![0, 1]);
    }

    #[test]
    fn test_check_resolves_metrics_and_llc() {
        let params = ProfileParams {
            devices: Some("0".to_string()),
            ai_core: true,
            aic_metrics: "MemoryL0".to_string(),
            llc_profiling: Some("read".to_string()),
            ..ProfileParams::default()
        };
        let mut mode = mode(params, &[ArgKind::SysDevices, ArgKind::AiCore, ArgKind::LlcProfiling]);
        mode.mode_params_check().unwrap();
        assert_eq!(mode.params().ai_core_events.len(), 8);
        assert_eq!(mode.params().llc_events.len(), 3);
        assert_eq!(mode.devices(), &[0]);
    }

    #[test]
    fn test_unsupported_llc_mode_aborts() {
        let params = ProfileParams {
            devices: Some("0".to_string()),
            llc_profiling: Some("capacity".to_string()),
            ..ProfileParams::default()
        };
        assert!(mode(params, &[ArgKind::SysDevices, ArgKind::LlcProfiling]).mode_params_check().is_err());
    }

    #[test]
    fn test_application_is_forbidden() {
        let params = ProfileParams { host_sys: Some("cpu".to_string()), ..ProfileParams::default() };
        let err = mode(params, &[ArgKind::HostSys, ArgKind::Application]).mode_params_check().unwrap_err();
        assert!(matches!(err, ModeError::ForbiddenParam { arg: "--application", .. }));
    }

    #[test]
    fn test_host_only_run_for_a_period() {
        let dir = tempfile::tempdir().unwrap();
        let params = ProfileParams {
            output: Some(dir.path().to_path_buf()),
            host_sys: Some("cpu,mem".to_string()),
            sys_period_s: Some(0),
            sys_sampling_interval_ms: 10,
            python_path: "no-such-python-xyz".to_string(),
            ..ProfileParams::default()
        };
        let mut mode = mode(params, &[ArgKind::HostSys, ArgKind::Output, ArgKind::SysPeriod]);
        mode.mode_params_check().unwrap();
        mode.run_mode_tasks().unwrap();

        assert_eq!(mode.base.result_dirs.len(), 1);
        let host_data = mode.base.result_dirs[0].join("host").join("data");
        assert!(host_data.join("cpu.data").is_file());
        assert!(mode.base.task_map.is_empty());
    }
}
