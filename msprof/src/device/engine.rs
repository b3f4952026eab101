//! Collection engine seam
//!
//! The engine programs the hardware counters and captures data. The job state
//! machine only drives it through [`CollectEngine`]; a fresh engine is built by
//! an [`EngineFactory`] for every job start and dropped on stop or reset.

use msprof_common::{ReplayEvents, SampleConfig, StatusInfo};

use crate::domain::{DeviceIndex, EngineError, HostId, RegistryError};

/// Hardware collection engine for one device job
pub trait CollectEngine: Send {
    /// Bind the engine to a device
    ///
    /// # Errors
    /// Returns an error if the device cannot be opened
    fn init(&mut self, dev: DeviceIndex) -> Result<(), EngineError>;

    /// Record the device id the host uses, for file naming on the host side
    fn set_dev_id_on_host(&mut self, host_id: HostId);

    /// Start collection with the job's sample config
    ///
    /// # Errors
    /// Returns an error and fills `status` if collection cannot start
    fn collect_start(
        &mut self,
        config: &SampleConfig,
        status: &mut StatusInfo,
    ) -> Result<(), EngineError>;

    /// Stop collection; `force` skips draining when the peer is gone
    ///
    /// # Errors
    /// Returns an error and fills `status` if collection does not stop cleanly
    fn collect_stop(&mut self, status: &mut StatusInfo, force: bool) -> Result<(), EngineError>;

    /// Arm a replay with new PMU event lists
    ///
    /// # Errors
    /// Returns an error and fills `status` if the events cannot be programmed
    fn collect_start_replay(
        &mut self,
        events: &ReplayEvents,
        status: &mut StatusInfo,
    ) -> Result<(), EngineError>;

    /// Disarm the running replay
    ///
    /// # Errors
    /// Returns an error and fills `status` if the replay cannot be stopped
    fn collect_stop_replay(&mut self, status: &mut StatusInfo) -> Result<(), EngineError>;
}

/// Builds one engine per job start
pub trait EngineFactory: Send + Sync {
    /// # Errors
    /// Returns an error if no engine can be constructed
    fn create(&self) -> Result<Box<dyn CollectEngine>, EngineError>;
}

/// Resolves the host's device id to the local device index
pub trait DeviceIdMapper: Send + Sync {
    /// # Errors
    /// Returns an error if `host_id` does not map to a local device
    fn device_index(&self, host_id: HostId) -> Result<DeviceIndex, RegistryError>;
}

/// Host id and device index are the same number (single-host deployments)
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityMapper;

impl DeviceIdMapper for IdentityMapper {
    fn device_index(&self, host_id: HostId) -> Result<DeviceIndex, RegistryError> {
        if host_id.0 < 0 {
            return Err(RegistryError::UnknownDevice(host_id));
        }
        Ok(DeviceIndex(host_id.0))
    }
}
