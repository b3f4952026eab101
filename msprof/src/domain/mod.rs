//! Domain model for msprof
//!
//! Core domain types and errors shared by the device agent and the host CLI:
//! - Newtype ids so a host device id is never passed where a device index is expected
//! - One error enum per layer (job, registry, transport, engine, mode)

pub mod errors;
pub mod types;

pub use types::{DeviceIndex, HostId, Pid};

pub use errors::{EngineError, JobError, ModeError, RegistryError, TransportError};
