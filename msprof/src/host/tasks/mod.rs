//! Collection tasks run by the system mode
//!
//! A [`ProfTask`] collects one stream of data for one job directory. The
//! mode starts them all, waits for the sampling period, then stops them.

pub mod device_task;
pub mod host_sampler;

pub use device_task::{DeviceRpcTask, SessionConnector, TcpConnector};
pub use host_sampler::{HostSampleKind, HostSamplerTask};

use crate::domain::ModeError;

pub trait ProfTask: Send {
    fn name(&self) -> &str;

    /// # Errors
    /// Returns an error if the task cannot begin collecting
    fn start(&mut self) -> Result<(), ModeError>;

    /// Stop collecting and flush everything to disk; safe to call twice
    ///
    /// # Errors
    /// Returns an error if collected data could not be completed
    fn stop(&mut self) -> Result<(), ModeError>;
}
