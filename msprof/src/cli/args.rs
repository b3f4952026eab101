//! CLI argument definitions

use clap::{Parser, ValueEnum};
use std::collections::HashSet;
use std::path::PathBuf;

use crate::host::params::{ArgKind, ExportType, Platform, ProfileParams, SummaryFormat};

/// `on` / `off` switch value
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Switch {
    On,
    Off,
}

impl Switch {
    fn is_on(self) -> bool {
        self == Self::On
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PlatformArg {
    Mini,
    Cloud,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExportTypeArg {
    Summary,
    Timeline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SummaryFormatArg {
    Csv,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AicModeArg {
    TaskBased,
    SampleBased,
}

impl AicModeArg {
    fn as_str(self) -> &'static str {
        match self {
            Self::TaskBased => "task-based",
            Self::SampleBased => "sample-based",
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "msprof",
    version,
    about = "Collect and analyze NPU profiling data",
    after_help = "\
EXAMPLES:
    msprof --application=\"./train.sh\" --output=./prof      Profile an application
    msprof --sys-devices=0 --ai-core=on --sys-period=10     Sample device 0 for 10s
    msprof --host-sys=cpu,mem --output=./prof               Sample the host until Ctrl+C
    msprof --export=on --output=./prof/PROF_xxx             Export collected data"
)]
pub struct Args {
    /// Result directory (defaults to the working directory)
    #[arg(long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Application command line to launch and profile
    #[arg(long, value_name = "CMD")]
    pub application: Option<String>,

    /// Devices to sample system wide: id list or "all"
    #[arg(long, value_name = "IDS")]
    pub sys_devices: Option<String>,

    /// Host data to sample: cpu,mem,disk,network
    #[arg(long, value_name = "TYPES")]
    pub host_sys: Option<String>,

    /// System sampling duration in seconds (unlimited if omitted)
    #[arg(long, value_name = "SECS")]
    pub sys_period: Option<u64>,

    /// System sampling interval in milliseconds
    #[arg(long, value_name = "MS")]
    pub sys_sampling_interval: Option<u32>,

    /// AI core PMU collection
    #[arg(long, value_enum)]
    pub ai_core: Option<Switch>,

    #[arg(long, value_enum)]
    pub aic_mode: Option<AicModeArg>,

    /// Metric group or comma separated 0x event list
    #[arg(long)]
    pub aic_metrics: Option<String>,

    /// AI core sampling frequency in Hz
    #[arg(long, value_name = "HZ")]
    pub aic_freq: Option<u32>,

    /// AI vector core PMU collection
    #[arg(long, value_enum)]
    pub aiv: Option<Switch>,

    #[arg(long, value_enum)]
    pub aiv_mode: Option<AicModeArg>,

    #[arg(long)]
    pub aiv_metrics: Option<String>,

    /// LLC profiling: read/write (mini) or capacity/bandwidth (cloud)
    #[arg(long, value_name = "MODE")]
    pub llc_profiling: Option<String>,

    #[arg(long, value_enum)]
    pub platform: Option<PlatformArg>,

    /// HCCL communication trace
    #[arg(long, value_enum)]
    pub hccl: Option<Switch>,

    /// Runtime API trace
    #[arg(long, value_enum)]
    pub runtime_api: Option<Switch>,

    /// Parse collected data in --output
    #[arg(long, value_enum)]
    pub parse: Option<Switch>,

    /// List jobs collected in --output
    #[arg(long, value_enum)]
    pub query: Option<Switch>,

    /// Export collected data in --output
    #[arg(long, value_enum)]
    pub export: Option<Switch>,

    #[arg(long, value_enum)]
    pub export_type: Option<ExportTypeArg>,

    #[arg(long)]
    pub iteration_id: Option<u32>,

    #[arg(long)]
    pub model_id: Option<u32>,

    #[arg(long, value_enum)]
    pub summary_format: Option<SummaryFormatArg>,

    /// Python interpreter for the analysis tool
    #[arg(long, value_name = "PATH")]
    pub python_path: Option<String>,

    /// Device agent address
    #[arg(long, value_name = "ADDR")]
    pub device_addr: Option<String>,

    /// Suppress non-essential output
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    /// Build the profiling params and the set of flags actually given
    #[must_use]
    pub fn to_params(&self) -> (ProfileParams, HashSet<ArgKind>) {
        let mut used = HashSet::new();
        let mut mark = |given: bool, kind: ArgKind| {
            if given {
                used.insert(kind);
            }
        };
        mark(self.output.is_some(), ArgKind::Output);
        mark(self.application.is_some(), ArgKind::Application);
        mark(self.sys_devices.is_some(), ArgKind::SysDevices);
        mark(self.host_sys.is_some(), ArgKind::HostSys);
        mark(self.sys_period.is_some(), ArgKind::SysPeriod);
        mark(self.sys_sampling_interval.is_some(), ArgKind::SysSamplingInterval);
        mark(self.ai_core.is_some(), ArgKind::AiCore);
        mark(self.aic_mode.is_some(), ArgKind::AicMode);
        mark(self.aic_metrics.is_some(), ArgKind::AicMetrics);
        mark(self.aic_freq.is_some(), ArgKind::AicFreq);
        mark(self.aiv.is_some(), ArgKind::Aiv);
        mark(self.aiv_mode.is_some(), ArgKind::AivMode);
        mark(self.aiv_metrics.is_some(), ArgKind::AivMetrics);
        mark(self.llc_profiling.is_some(), ArgKind::LlcProfiling);
        mark(self.platform.is_some(), ArgKind::Platform);
        mark(self.hccl.is_some(), ArgKind::HcclTrace);
        mark(self.runtime_api.is_some(), ArgKind::RuntimeApi);
        mark(self.parse.is_some(), ArgKind::Parse);
        mark(self.query.is_some(), ArgKind::Query);
        mark(self.export.is_some(), ArgKind::Export);
        mark(self.export_type.is_some(), ArgKind::ExportType);
        mark(self.iteration_id.is_some(), ArgKind::IterationId);
        mark(self.model_id.is_some(), ArgKind::ModelId);
        mark(self.summary_format.is_some(), ArgKind::SummaryFormat);
        mark(self.python_path.is_some(), ArgKind::PythonPath);
        mark(self.device_addr.is_some(), ArgKind::DeviceAddr);

        let on = |switch: Option<Switch>| switch.is_some_and(Switch::is_on);
        let defaults = ProfileParams::default();
        let params = ProfileParams {
            output: self.output.clone(),
            app: self.application.clone(),
            devices: self.sys_devices.clone(),
            host_sys: self.host_sys.clone(),
            sys_period_s: self.sys_period,
            sys_sampling_interval_ms: self.sys_sampling_interval.unwrap_or(defaults.sys_sampling_interval_ms),
            ai_core: on(self.ai_core),
            aic_mode: self.aic_mode.map_or(defaults.aic_mode, |m| m.as_str().to_string()),
            aic_metrics: self.aic_metrics.clone().unwrap_or(defaults.aic_metrics),
            aic_freq_hz: self.aic_freq.unwrap_or(defaults.aic_freq_hz),
            aiv: on(self.aiv),
            aiv_mode: self.aiv_mode.map_or(defaults.aiv_mode, |m| m.as_str().to_string()),
            aiv_metrics: self.aiv_metrics.clone().unwrap_or(defaults.aiv_metrics),
            llc_profiling: self.llc_profiling.clone(),
            platform: match self.platform {
                Some(PlatformArg::Cloud) => Platform::Cloud,
                Some(PlatformArg::Mini) | None => Platform::Mini,
            },
            hccl_trace: on(self.hccl),
            runtime_api_trace: on(self.runtime_api),
            parse: on(self.parse),
            query: on(self.query),
            export: on(self.export),
            export_type: match self.export_type {
                Some(ExportTypeArg::Timeline) => ExportType::Timeline,
                Some(ExportTypeArg::Summary) | None => ExportType::Summary,
            },
            iteration_id: self.iteration_id,
            model_id: self.model_id,
            summary_format: match self.summary_format {
                Some(SummaryFormatArg::Json) => SummaryFormat::Json,
                Some(SummaryFormatArg::Csv) | None => SummaryFormat::Csv,
            },
            python_path: self.python_path.clone().unwrap_or(defaults.python_path),
            device_addr: self.device_addr.clone().unwrap_or(defaults.device_addr),
            ai_core_events: Vec::new(),
            aiv_events: Vec::new(),
            llc_events: Vec::new(),
        };
        (params, used)
    }
}

/// Device agent arguments
#[derive(Parser, Debug)]
#[command(name = "msprofd", version, about = "Device-side profiling agent")]
pub struct DaemonArgs {
    /// Address to accept host sessions on
    #[arg(long, default_value = crate::host::params::DEFAULT_DEVICE_ADDR)]
    pub listen: String,

    /// Keep a local copy of collected data under this directory
    #[arg(long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Number of devices served (ids 0..N)
    #[arg(long, default_value = "1")]
    pub devices: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("msprof").chain(argv.iter().copied())).unwrap()
    }

    #[test]
    fn test_switches_and_used_set() {
        let args = parse(&["--sys-devices=0,1", "--ai-core=on", "--aiv=off", "--sys-period=5"]);
        let (params, used) = args.to_params();
        assert!(params.ai_core);
        assert!(!params.aiv);
        assert_eq!(params.devices.as_deref(), Some("0,1"));
        assert_eq!(params.sys_period_s, Some(5));
        assert!(used.contains(&ArgKind::Aiv));
        assert!(!used.contains(&ArgKind::Output));
    }

    #[test]
    fn test_defaults_apply_when_omitted() {
        let (params, used) = parse(&["--parse=on", "--output=/tmp/prof"]).to_params();
        assert!(params.parse);
        assert_eq!(params.python_path, "python3");
        assert_eq!(params.aic_metrics, "PipeUtilization");
        assert_eq!(used.len(), 2);
    }

    #[test]
    fn test_enum_values() {
        let (params, _) =
            parse(&["--export=on", "--export-type=timeline", "--summary-format=json", "--aic-mode=sample-based"])
                .to_params();
        assert_eq!(params.export_type, ExportType::Timeline);
        assert_eq!(params.summary_format, SummaryFormat::Json);
        assert_eq!(params.aic_mode, "sample-based");
    }

    #[test]
    fn test_bad_switch_value_is_rejected() {
        assert!(Args::try_parse_from(["msprof", "--parse=yes"]).is_err());
    }
}
