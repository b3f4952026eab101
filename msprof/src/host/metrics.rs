//! AI core metric tables and LLC event adaptation
//!
//! Users name a metric group (`--aic-metrics=PipeUtilization`) or list raw PMU
//! events (`--aic-metrics=0x8,0x9`). Both resolve to the event list the device
//! engine programs. LLC profiling modes depend on the chip platform.

use msprof_common::MAX_AI_CORE_EVENTS;

use super::params::Platform;
use crate::domain::ModeError;

/// Named AI core metric groups and their PMU events
const AI_CORE_METRICS: &[(&str, &[&str])] = &[
    ("ArithmeticUtilization", &["0x49", "0x4a", "0x9", "0xa", "0xb", "0xc", "0xd", "0x54"]),
    ("PipeUtilization", &["0x8", "0xa", "0x9", "0xb", "0xc", "0xd", "0x54", "0x55"]),
    ("Memory", &["0x15", "0x16", "0x31", "0x32", "0xf", "0x10", "0x12", "0x13"]),
    ("MemoryL0", &["0x1b", "0x1c", "0x21", "0x22", "0x27", "0x28", "0x29", "0x2a"]),
    ("MemoryUB", &["0x10", "0x13", "0x37", "0x38", "0x3d", "0x3e", "0x43", "0x44"]),
    ("ResourceConflictRatio", &["0x64", "0x65", "0x66"]),
];

/// Resolve a metric group name or a custom `0x..` list to PMU events
///
/// # Errors
/// Returns `InvalidValue` for unknown names, malformed events, or more events
/// than the hardware has counters
pub fn resolve_ai_core_metrics(arg: &'static str, metrics: &str) -> Result<Vec<String>, ModeError> {
    let metrics = metrics.trim();
    if let Some((_, events)) = AI_CORE_METRICS.iter().find(|(name, _)| *name == metrics) {
        return Ok(events.iter().map(|e| (*e).to_string()).collect());
    }
    if !metrics.starts_with("0x") {
        let known: Vec<&str> = AI_CORE_METRICS.iter().map(|(name, _)| *name).collect();
        return Err(ModeError::InvalidValue {
            arg,
            reason: format!("unknown metrics {metrics:?}, expected one of {}", known.join(", ")),
        });
    }

    let events: Vec<String> = metrics.split(',').map(|e| e.trim().to_lowercase()).collect();
    if let Some(bad) = events.iter().find(|e| !is_hex_event(e)) {
        return Err(ModeError::InvalidValue { arg, reason: format!("malformed event {bad:?}") });
    }
    if events.len() > MAX_AI_CORE_EVENTS {
        return Err(ModeError::InvalidValue {
            arg,
            reason: format!("{} events exceed the limit of {MAX_AI_CORE_EVENTS}", events.len()),
        });
    }
    Ok(events)
}

fn is_hex_event(event: &str) -> bool {
    event
        .strip_prefix("0x")
        .is_some_and(|digits| !digits.is_empty() && u32::from_str_radix(digits, 16).is_ok())
}

/// LLC events for a profiling mode on `platform`
///
/// Mini chips expose read/write counters, cloud chips capacity/bandwidth.
///
/// # Errors
/// Returns `InvalidValue` if the mode is not supported on the platform
pub fn adapt_llc_events(platform: Platform, mode: &str) -> Result<Vec<String>, ModeError> {
    let events: &[&str] = match (platform, mode.trim()) {
        (Platform::Mini, "read") => &["read_allocate", "read_noallocate", "read_hit"],
        (Platform::Mini, "write") => &["write_allocate", "write_noallocate", "write_hit"],
        (Platform::Cloud, "capacity") => &["hisi_l3c0_1/dsid0/", "hisi_l3c0_1/dsid1/", "hisi_l3c0_1/dsid2/"],
        (Platform::Cloud, "bandwidth") => &["hisi_l3c0_1/read_hit/", "hisi_l3c0_1/write_hit/"],
        (platform, other) => {
            let supported = match platform {
                Platform::Mini => "read, write",
                Platform::Cloud => "capacity, bandwidth",
            };
            return Err(ModeError::InvalidValue {
                arg: "--llc-profiling",
                reason: format!("{other:?} is not supported on {platform:?}, use one of {supported}"),
            });
        }
    };
    Ok(events.iter().map(|e| (*e).to_string()).collect())
}
