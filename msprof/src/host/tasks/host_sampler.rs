//! Host system sampler
//!
//! Snapshots `/proc` files at a fixed interval and appends each snapshot,
//! prefixed by a timestamp line, to `<job>/host/data/<kind>.data`.

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use log::{debug, info, warn};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::ProfTask;
use crate::domain::ModeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostSampleKind {
    Cpu,
    Mem,
    Disk,
    Network,
}

impl HostSampleKind {
    /// Sampled when `--host-sys` is not given
    pub const DEFAULT: &'static [HostSampleKind] = &[HostSampleKind::Cpu, HostSampleKind::Mem];

    /// Parse a `--host-sys` list such as `cpu,mem`
    ///
    /// # Errors
    /// Returns `InvalidValue` for unknown types
    pub fn parse_list(list: &str) -> Result<Vec<Self>, ModeError> {
        let mut kinds = Vec::new();
        for item in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let kind = match item {
                "cpu" => Self::Cpu,
                "mem" => Self::Mem,
                "disk" => Self::Disk,
                "network" => Self::Network,
                other => {
                    return Err(ModeError::InvalidValue {
                        arg: "--host-sys",
                        reason: format!("unknown type {other:?}, expected cpu, mem, disk or network"),
                    })
                }
            };
            if !kinds.contains(&kind) {
                kinds.push(kind);
            }
        }
        Ok(kinds)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Mem => "mem",
            Self::Disk => "disk",
            Self::Network => "network",
        }
    }

    fn source(self) -> &'static str {
        match self {
            Self::Cpu => "/proc/stat",
            Self::Mem => "/proc/meminfo",
            Self::Disk => "/proc/diskstats",
            Self::Network => "/proc/net/dev",
        }
    }

    /// Lines of the source worth keeping
    fn filter(self, content: &str) -> String {
        match self {
            Self::Cpu => content.lines().filter(|l| l.starts_with("cpu")).collect::<Vec<_>>().join("\n"),
            _ => content.trim_end().to_string(),
        }
    }
}

struct Sink {
    kind: HostSampleKind,
    writer: BufWriter<File>,
}

pub struct HostSamplerTask {
    name: String,
    data_dir: PathBuf,
    kinds: Vec<HostSampleKind>,
    interval: Duration,
    stop_tx: Option<Sender<()>>,
    worker: Option<JoinHandle<u64>>,
}

impl HostSamplerTask {
    #[must_use]
    pub fn new(job_dir: &Path, kinds: Vec<HostSampleKind>, interval_ms: u32) -> Self {
        Self {
            name: format!("host sampler ({})", job_dir.display()),
            data_dir: job_dir.join("host").join("data"),
            kinds,
            interval: Duration::from_millis(u64::from(interval_ms.max(1))),
            stop_tx: None,
            worker: None,
        }
    }

    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

fn now_ms() -> u128 {
    SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |d| d.as_millis())
}

fn sample_once(sinks: &mut [Sink]) {
    let ts = now_ms();
    for sink in sinks.iter_mut() {
        let content = match fs::read_to_string(sink.kind.source()) {
            Ok(content) => content,
            Err(e) => {
                debug!("Cannot read {}: {e}", sink.kind.source());
                continue;
            }
        };
        let body = sink.kind.filter(&content);
        if let Err(e) = writeln!(sink.writer, "time {ts}\n{body}") {
            warn!("Failed to write {} sample: {e}", sink.kind.as_str());
        }
    }
}

impl ProfTask for HostSamplerTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self) -> Result<(), ModeError> {
        if self.worker.is_some() {
            return Ok(());
        }
        fs::create_dir_all(&self.data_dir)?;
        let mut sinks = Vec::with_capacity(self.kinds.len());
        for kind in &self.kinds {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.data_dir.join(format!("{}.data", kind.as_str())))?;
            sinks.push(Sink { kind: *kind, writer: BufWriter::new(file) });
        }

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let interval = self.interval;
        let worker = thread::Builder::new().name("msprof-host-sampler".to_string()).spawn(move || {
            let mut samples = 0u64;
            loop {
                sample_once(&mut sinks);
                samples += 1;
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            for sink in &mut sinks {
                let _ = sink.writer.flush();
            }
            samples
        })?;

        self.stop_tx = Some(stop_tx);
        self.worker = Some(worker);
        info!("Host sampling into {}", self.data_dir.display());
        Ok(())
    }

    fn stop(&mut self) -> Result<(), ModeError> {
        drop(self.stop_tx.take());
        if let Some(worker) = self.worker.take() {
            let samples = worker.join().map_err(|_| ModeError::TaskFailed {
                name: self.name.clone(),
                reason: "sampler thread panicked".to_string(),
            })?;
            info!("Host sampler took {samples} samples");
        }
        Ok(())
    }
}

impl Drop for HostSamplerTask {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
