//! Domain types providing compile-time safety and self-documentation
//!
//! A device has two numbers: the id the host uses for it and the index the
//! device-side driver uses. Mixing them up silently profiles the wrong chip,
//! so each gets its own type.

use std::fmt;

/// Device id as seen by the host (`--sys-devices=0,1` values)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostId(pub i32);

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "host-dev:{}", self.0)
    }
}

/// Device index used by the device-side driver and collection engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceIndex(pub i32);

impl DeviceIndex {
    /// Sentinel for "no device bound yet"
    pub const INVALID: DeviceIndex = DeviceIndex(-1);

    pub fn is_valid(self) -> bool {
        self.0 >= 0
    }
}

impl fmt::Display for DeviceIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dev:{}", self.0)
    }
}

/// OS process id of a spawned child
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pid(pub u32);

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PID:{}", self.0)
    }
}
