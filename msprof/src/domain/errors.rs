//! Structured error types for msprof
//!
//! Using thiserror for automatic Display implementation and error chaining.

use super::types::{DeviceIndex, HostId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Session closed")]
    Closed,

    #[error("Packet of {0} bytes exceeds the frame limit")]
    FrameTooLarge(usize),

    #[error("Failed to encode message: {0}")]
    Encode(String),

    #[error("Failed to decode message: {0}")]
    Decode(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Collection engine unavailable: {0}")]
    Unavailable(String),

    #[error("Collection engine failed on {dev}: {reason}")]
    Failed { dev: DeviceIndex, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum JobError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Job {0} is already running")]
    AlreadyRunning(String),

    #[error("Job {0} is not running")]
    NotRunning(String),

    #[error("Invalid event config: {0}")]
    InvalidEvent(String),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Registry not initialized")]
    NotInitialized,

    #[error("Job {0} already exists")]
    Duplicate(String),

    #[error("No device index mapped for {0}")]
    UnknownDevice(HostId),

    #[error("No receiver for job {job_id} on device {dev}")]
    NoReceiver { job_id: String, dev: i32 },

    #[error("Malformed handshake: {0}")]
    Handshake(String),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Error, Debug)]
pub enum ModeError {
    #[error("No running mode selected: one of --application, --sys-devices, --host-sys, --parse, --query, --export is required")]
    NoModeSelected,

    #[error("Argument {arg} is not allowed in {mode} mode")]
    ForbiddenParam { mode: &'static str, arg: &'static str },

    #[error("Argument {arg} is required in {mode} mode")]
    MissingParam { mode: &'static str, arg: &'static str },

    #[error("Invalid value for {arg}: {reason}")]
    InvalidValue { arg: &'static str, reason: String },

    #[error("A task process is already running ({0})")]
    TaskBusy(super::types::Pid),

    #[error("Profiling was cancelled")]
    Cancelled,

    #[error("Analysis environment not ready: {0}")]
    AnalysisUnavailable(String),

    #[error("Task {name} failed: {reason}")]
    TaskFailed { name: String, reason: String },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
