//! Host-side profiling control
//!
//! - `manager`: selects the running mode for an invocation
//! - `running_mode` / `modes`: parameter contracts and task sequences
//! - `tasks`: host sampling and device collection tasks
//! - `process`, `analysis`, `record`: child processes, the analysis tool and
//!   the output record
//! - `params`, `metrics`: profiling parameters and event resolution

pub mod analysis;
pub mod cancel;
pub mod manager;
pub mod metrics;
pub mod modes;
pub mod params;
pub mod process;
pub mod record;
pub mod running_mode;
pub mod tasks;

pub use cancel::CancelToken;
pub use manager::MsprofManager;
pub use params::{ArgKind, ProfileParams};
pub use running_mode::RunningMode;
