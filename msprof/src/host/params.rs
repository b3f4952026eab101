//! Parsed profiling parameters
//!
//! [`ProfileParams`] is what every running mode works from. [`ArgKind`] names
//! the command line flags; the set of flags the user actually typed is kept
//! next to the params and drives each mode's parameter contract.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default host sampling interval in milliseconds
pub const DEFAULT_SYS_SAMPLING_INTERVAL_MS: u32 = 100;

/// Default AI core sampling frequency in Hz
pub const DEFAULT_AIC_FREQ_HZ: u32 = 100;

/// Default device agent address
pub const DEFAULT_DEVICE_ADDR: &str = "127.0.0.1:22118";

/// A command line flag, as far as the mode contracts are concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArgKind {
    Output,
    Application,
    SysDevices,
    HostSys,
    SysPeriod,
    SysSamplingInterval,
    AiCore,
    AicMode,
    AicMetrics,
    AicFreq,
    Aiv,
    AivMode,
    AivMetrics,
    LlcProfiling,
    Platform,
    HcclTrace,
    RuntimeApi,
    Parse,
    Query,
    Export,
    ExportType,
    IterationId,
    ModelId,
    SummaryFormat,
    PythonPath,
    DeviceAddr,
}

impl ArgKind {
    /// Flag as typed on the command line
    #[must_use]
    pub fn flag(self) -> &'static str {
        match self {
            Self::Output => "--output",
            Self::Application => "--application",
            Self::SysDevices => "--sys-devices",
            Self::HostSys => "--host-sys",
            Self::SysPeriod => "--sys-period",
            Self::SysSamplingInterval => "--sys-sampling-interval",
            Self::AiCore => "--ai-core",
            Self::AicMode => "--aic-mode",
            Self::AicMetrics => "--aic-metrics",
            Self::AicFreq => "--aic-freq",
            Self::Aiv => "--aiv",
            Self::AivMode => "--aiv-mode",
            Self::AivMetrics => "--aiv-metrics",
            Self::LlcProfiling => "--llc-profiling",
            Self::Platform => "--platform",
            Self::HcclTrace => "--hccl",
            Self::RuntimeApi => "--runtime-api",
            Self::Parse => "--parse",
            Self::Query => "--query",
            Self::Export => "--export",
            Self::ExportType => "--export-type",
            Self::IterationId => "--iteration-id",
            Self::ModelId => "--model-id",
            Self::SummaryFormat => "--summary-format",
            Self::PythonPath => "--python-path",
            Self::DeviceAddr => "--device-addr",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[default]
    Mini,
    Cloud,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportType {
    #[default]
    Summary,
    Timeline,
}

impl ExportType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Summary => "summary",
            Self::Timeline => "timeline",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryFormat {
    #[default]
    Csv,
    Json,
}

impl SummaryFormat {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
        }
    }
}

/// Everything a running mode needs to know about this invocation
///
/// Serialized as `sample.json` into every job directory and handed to the
/// profiled application through `PROFILING_OPTIONS`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileParams {
    /// Result directory
    pub output: Option<PathBuf>,

    /// Application command line (`path arg...`)
    pub app: Option<String>,

    /// `--sys-devices` as given: id list or `all`
    pub devices: Option<String>,
    /// `--host-sys` types: `cpu,mem,disk,network`
    pub host_sys: Option<String>,
    /// Sampling period in seconds; `None` runs until interrupted
    pub sys_period_s: Option<u64>,
    pub sys_sampling_interval_ms: u32,

    pub ai_core: bool,
    /// `task-based` or `sample-based`
    pub aic_mode: String,
    pub aic_metrics: String,
    pub aic_freq_hz: u32,
    pub aiv: bool,
    pub aiv_mode: String,
    pub aiv_metrics: String,
    pub llc_profiling: Option<String>,
    pub platform: Platform,

    pub hccl_trace: bool,
    pub runtime_api_trace: bool,

    pub parse: bool,
    pub query: bool,
    pub export: bool,
    pub export_type: ExportType,
    pub iteration_id: Option<u32>,
    pub model_id: Option<u32>,
    pub summary_format: SummaryFormat,

    pub python_path: String,
    pub device_addr: String,

    /// Resolved by the system mode parameter check
    pub ai_core_events: Vec<String>,
    pub aiv_events: Vec<String>,
    pub llc_events: Vec<String>,
}

impl Default for ProfileParams {
    fn default() -> Self {
        Self {
            output: None,
            app: None,
            devices: None,
            host_sys: None,
            sys_period_s: None,
            sys_sampling_interval_ms: DEFAULT_SYS_SAMPLING_INTERVAL_MS,
            ai_core: false,
            aic_mode: "task-based".to_string(),
            aic_metrics: "PipeUtilization".to_string(),
            aic_freq_hz: DEFAULT_AIC_FREQ_HZ,
            aiv: false,
            aiv_mode: "task-based".to_string(),
            aiv_metrics: "PipeUtilization".to_string(),
            llc_profiling: None,
            platform: Platform::default(),
            hccl_trace: false,
            runtime_api_trace: false,
            parse: false,
            query: false,
            export: false,
            export_type: ExportType::default(),
            iteration_id: None,
            model_id: None,
            summary_format: SummaryFormat::default(),
            python_path: "python3".to_string(),
            device_addr: DEFAULT_DEVICE_ADDR.to_string(),
            ai_core_events: Vec::new(),
            aiv_events: Vec::new(),
            llc_events: Vec::new(),
        }
    }
}

fn is_set(value: Option<&String>) -> bool {
    value.is_some_and(|v| !v.trim().is_empty())
}

impl ProfileParams {
    #[must_use]
    pub fn has_app(&self) -> bool {
        is_set(self.app.as_ref())
    }

    #[must_use]
    pub fn has_devices(&self) -> bool {
        is_set(self.devices.as_ref())
    }

    #[must_use]
    pub fn has_host_sys(&self) -> bool {
        is_set(self.host_sys.as_ref())
    }

    /// Whether any switch needs a collection job on the device
    #[must_use]
    pub fn device_profiling_enabled(&self) -> bool {
        self.ai_core || self.aiv || self.llc_profiling.is_some()
    }

    /// AI core sampling interval derived from `--aic-freq`
    #[must_use]
    pub fn ai_core_sampling_interval_ms(&self) -> u32 {
        (1000 / self.aic_freq_hz.max(1)).max(1)
    }

    /// Result directory, defaulting to the working directory
    #[must_use]
    pub fn output_dir(&self) -> PathBuf {
        self.output.clone().unwrap_or_else(|| PathBuf::from("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_values_do_not_count_as_set() {
        let params = ProfileParams { app: Some("  ".to_string()), ..ProfileParams::default() };
        assert!(!params.has_app());
        assert!(!params.has_devices());
    }

    #[test]
    fn test_aic_interval_from_frequency() {
        let mut params = ProfileParams::default();
        assert_eq!(params.ai_core_sampling_interval_ms(), 10);
        params.aic_freq_hz = 5000;
        assert_eq!(params.ai_core_sampling_interval_ms(), 1);
        params.aic_freq_hz = 0;
        assert_eq!(params.ai_core_sampling_interval_ms(), 1000);
    }

    #[test]
    fn test_params_serialize_lowercase_enums() {
        let json = serde_json::to_value(ProfileParams::default()).unwrap();
        assert_eq!(json["platform"], "mini");
        assert_eq!(json["summary_format"], "csv");
    }
}
