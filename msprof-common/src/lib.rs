//! # Shared Protocol Vocabulary (Host ↔ Device)
//!
//! Defines the messages, job identity and status types exchanged between the
//! host-side `msprof` CLI and the device-side `msprofd` agent. Both ends
//! decode the same types, so any change here is a protocol change.
//!
//! ## Key Types
//!
//! - [`Message`] - Closed set of control/data messages carried by a session
//! - [`MessageKind`] - Dispatch key for [`Message`] variants
//! - [`JobContext`] - Host job id + device id pair identifying one device job
//! - [`SampleConfig`] - Collection settings pushed with `JobStart`
//! - [`ReplayEvents`] - Per-category PMU event lists pushed with `ReplayStart`
//! - [`StatusInfo`] - Outcome + free-text reason threaded back as `Response`
//! - [`Handshake`] - First packet of every session (control or data channel)

use serde::{Deserialize, Serialize};

// ============================================================================
// Event Limits
// ============================================================================

/// Maximum control-CPU PMU events per replay
pub const MAX_CTRL_CPU_EVENTS: usize = 8;

/// Maximum TS-CPU PMU events per replay
pub const MAX_TS_CPU_EVENTS: usize = 8;

/// Maximum AI core PMU events per replay (hardware has 8 counters)
pub const MAX_AI_CORE_EVENTS: usize = 8;

/// Maximum AI core ids in one replay core mask
pub const MAX_AI_CORE_CORES: usize = 32;

/// Maximum LLC events per replay
pub const MAX_LLC_EVENTS: usize = 8;

/// Maximum DDR events per replay
pub const MAX_DDR_EVENTS: usize = 8;

/// Maximum AI vector core PMU events per replay
pub const MAX_AIV_EVENTS: usize = 8;

/// Maximum AI vector core ids in one replay core mask
pub const MAX_AIV_CORES: usize = 64;

/// Separator between host job id and device id in a task key
pub const TASK_KEY_SEPARATOR: &str = "_";

// ============================================================================
// Job Identity
// ============================================================================

/// Identifies one device job within a host profiling job
///
/// The device registry keys jobs by [`JobContext::task_key`], i.e.
/// `"<job_id>_<dev_id>"`, so the same host job can run on several devices.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobContext {
    /// Job id generated by the host for this collection
    pub job_id: String,

    /// Device id as the host sees it (decimal string)
    pub dev_id: String,
}

impl JobContext {
    pub fn new(job_id: impl Into<String>, dev_id: impl Into<String>) -> Self {
        Self { job_id: job_id.into(), dev_id: dev_id.into() }
    }

    /// Composite registry key: `job_id + "_" + dev_id`
    #[must_use]
    pub fn task_key(&self) -> String {
        format!("{}{TASK_KEY_SEPARATOR}{}", self.job_id, self.dev_id)
    }
}

// ============================================================================
// Collection Settings
// ============================================================================

/// Settings a device job is started with
///
/// Opaque to the job state machine; handed verbatim to the collection engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleConfig {
    pub job_id: String,
    pub dev_id: String,

    /// `"system-wide"` for sys-devices collection, `"app"` otherwise
    pub profiling_mode: String,

    /// AI core PMU events (hex strings such as `"0x49"`)
    pub ai_core_events: Vec<String>,
    /// `"task-based"` or `"sample-based"`
    pub ai_core_mode: String,
    pub ai_core_sampling_interval_ms: u32,

    pub aiv_events: Vec<String>,
    pub aiv_mode: String,

    pub ctrl_cpu_events: Vec<String>,
    pub ts_cpu_events: Vec<String>,
    pub llc_events: Vec<String>,
    pub ddr_events: Vec<String>,

    pub hccl_trace: bool,
    pub runtime_api_trace: bool,

    /// Interval of system samplers (cpu, memory, io) in milliseconds
    pub sys_sampling_interval_ms: u32,
}

/// Per-category PMU event lists for one replay
///
/// Field order follows the collection engine's `CollectStartReplay` contract.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayEvents {
    pub ctrl_cpu_events: Vec<String>,
    pub ts_cpu_events: Vec<String>,
    pub ai_core_events: Vec<String>,
    pub ai_core_cores: Vec<u32>,
    pub llc_events: Vec<String>,
    pub ddr_events: Vec<String>,
    pub aiv_events: Vec<String>,
    pub aiv_cores: Vec<u32>,
}

// ============================================================================
// Status
// ============================================================================

/// Outcome reported in a [`Message::Response`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    #[default]
    Success,
    Failed,
}

/// Outcome plus a human-readable reason
///
/// Filled in by every step of a device-side operation and finally turned into
/// a [`Message::Response`] for the host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusInfo {
    pub dev_id: String,
    pub status: Status,
    pub info: String,
}

impl StatusInfo {
    #[must_use]
    pub fn new(dev_id: impl Into<String>) -> Self {
        Self { dev_id: dev_id.into(), status: Status::Success, info: String::new() }
    }

    /// Mark the operation failed with `info` as the reason
    pub fn fail(&mut self, info: impl Into<String>) {
        self.status = Status::Failed;
        self.info = info.into();
    }

    /// Mark the operation succeeded and clear any earlier reason
    pub fn succeed(&mut self) {
        self.status = Status::Success;
        self.info.clear();
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }
}

// ============================================================================
// Messages
// ============================================================================

/// Every message a session can carry
///
/// The set is closed: the device dispatcher registers handlers per
/// [`MessageKind`] and drops anything it has no handler for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    /// Host → device: create and start a job
    JobStart { job_ctx: JobContext, sample_config: SampleConfig },

    /// Host → device: stop a job and drop it from the registry
    JobStop { job_ctx: JobContext },

    /// Host → device: arm a replay with new PMU event lists
    ReplayStart { job_ctx: JobContext, events: ReplayEvents },

    /// Host → device: disarm the running replay
    ReplayStop { job_ctx: JobContext },

    /// Device → host: outcome of the last control message
    Response { job_ctx: JobContext, status: StatusInfo },

    /// Device → host (data channel): one chunk of a collected data file
    Data { job_ctx: JobContext, file_name: String, payload: Vec<u8> },
}

/// Dispatch key of a [`Message`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    JobStart,
    JobStop,
    ReplayStart,
    ReplayStop,
    Response,
    Data,
}

impl Message {
    #[must_use]
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::JobStart { .. } => MessageKind::JobStart,
            Self::JobStop { .. } => MessageKind::JobStop,
            Self::ReplayStart { .. } => MessageKind::ReplayStart,
            Self::ReplayStop { .. } => MessageKind::ReplayStop,
            Self::Response { .. } => MessageKind::Response,
            Self::Data { .. } => MessageKind::Data,
        }
    }

    #[must_use]
    pub fn job_ctx(&self) -> &JobContext {
        match self {
            Self::JobStart { job_ctx, .. }
            | Self::JobStop { job_ctx }
            | Self::ReplayStart { job_ctx, .. }
            | Self::ReplayStop { job_ctx }
            | Self::Response { job_ctx, .. }
            | Self::Data { job_ctx, .. } => job_ctx,
        }
    }

    /// Build the response for a finished control operation
    #[must_use]
    pub fn response(job_ctx: JobContext, status: StatusInfo) -> Self {
        Self::Response { job_ctx, status }
    }
}

// ============================================================================
// Session Handshake
// ============================================================================

/// Role of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    /// Carries control messages (JobStart/JobStop/Replay*) and responses
    Control,
    /// Carries collected data from device to host
    Data,
}

/// First packet of every session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    pub channel: ChannelKind,
    pub job_id: String,
    /// Collection mode the host runs in (`"system"`, `"app"`, ...)
    pub mode: String,
    pub dev_id: i32,
}
