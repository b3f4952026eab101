//! Simulated collection engine
//!
//! Stands in for the hardware engine on hosts without an NPU driver. It keeps
//! a journal of what it was asked to collect and ships it to the host through
//! the job's uploader, so the whole control and data path can be exercised
//! end to end.

use log::{info, warn};
use msprof_common::{JobContext, ReplayEvents, SampleConfig, StatusInfo};
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use super::engine::{CollectEngine, EngineFactory};
use super::uploader::UploaderRegistry;
use crate::domain::{DeviceIndex, EngineError, HostId};

#[derive(Serialize)]
struct Journal<'a> {
    dev: i32,
    host_id: i32,
    started_at_ms: u128,
    stopped_at_ms: u128,
    forced: bool,
    config: Option<&'a SampleConfig>,
    replays: &'a [ReplayEvents],
}

pub struct SimulatedEngine {
    uploaders: Arc<UploaderRegistry>,
    local_dir: Option<PathBuf>,
    dev: DeviceIndex,
    host_id: HostId,
    config: Option<SampleConfig>,
    replays: Vec<ReplayEvents>,
    replay_armed: bool,
    started_at_ms: u128,
}

fn now_ms() -> u128 {
    SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |d| d.as_millis())
}

impl SimulatedEngine {
    fn job_ctx(&self) -> Option<JobContext> {
        self.config.as_ref().map(|c| JobContext::new(c.job_id.clone(), c.dev_id.clone()))
    }

    /// Send `data` to the host and keep a local copy if configured
    fn emit(&self, file_name: &str, data: &[u8]) -> Result<(), EngineError> {
        let Some(job_ctx) = self.job_ctx() else {
            return Ok(());
        };
        if let Some(dir) = &self.local_dir {
            let dir = dir.join(&job_ctx.job_id).join(format!("device_{}", self.dev.0));
            fs::create_dir_all(&dir)?;
            fs::write(dir.join(file_name), data)?;
        }
        match self.uploaders.get(&job_ctx.task_key()) {
            Some(uploader) => uploader.upload(file_name, data).map_err(|e| EngineError::Failed {
                dev: self.dev,
                reason: e.to_string(),
            }),
            None => {
                warn!("No data session for job {}, {file_name} not sent to the host", job_ctx.task_key());
                Ok(())
            }
        }
    }
}

impl CollectEngine for SimulatedEngine {
    fn init(&mut self, dev: DeviceIndex) -> Result<(), EngineError> {
        if !dev.is_valid() {
            return Err(EngineError::Unavailable(format!("no such device {dev}")));
        }
        self.dev = dev;
        Ok(())
    }

    fn set_dev_id_on_host(&mut self, host_id: HostId) {
        self.host_id = host_id;
    }

    fn collect_start(
        &mut self,
        config: &SampleConfig,
        _status: &mut StatusInfo,
    ) -> Result<(), EngineError> {
        self.config = Some(config.clone());
        self.started_at_ms = now_ms();
        info!("Simulated collection started on {} for {}", self.dev, self.host_id);
        Ok(())
    }

    /// Everything is shipped at stop; the data session may attach after start
    fn collect_stop(&mut self, _status: &mut StatusInfo, force: bool) -> Result<(), EngineError> {
        if let Some(config) = &self.config {
            let sample = serde_json::to_vec_pretty(config)
                .map_err(|e| EngineError::Failed { dev: self.dev, reason: e.to_string() })?;
            self.emit("sample.json", &sample)?;
        }
        let journal = Journal {
            dev: self.dev.0,
            host_id: self.host_id.0,
            started_at_ms: self.started_at_ms,
            stopped_at_ms: now_ms(),
            forced: force,
            config: self.config.as_ref(),
            replays: &self.replays,
        };
        let data = serde_json::to_vec_pretty(&journal)
            .map_err(|e| EngineError::Failed { dev: self.dev, reason: e.to_string() })?;
        self.emit("journal.json", &data)?;
        info!("Simulated collection stopped on {} (force={force})", self.dev);
        Ok(())
    }

    fn collect_start_replay(
        &mut self,
        events: &ReplayEvents,
        _status: &mut StatusInfo,
    ) -> Result<(), EngineError> {
        if self.replay_armed {
            return Err(EngineError::Failed { dev: self.dev, reason: "replay already armed".to_string() });
        }
        self.replays.push(events.clone());
        self.replay_armed = true;
        Ok(())
    }

    fn collect_stop_replay(&mut self, _status: &mut StatusInfo) -> Result<(), EngineError> {
        if !self.replay_armed {
            return Err(EngineError::Failed { dev: self.dev, reason: "no replay armed".to_string() });
        }
        self.replay_armed = false;
        Ok(())
    }
}

pub struct SimulatedEngineFactory {
    uploaders: Arc<UploaderRegistry>,
    local_dir: Option<PathBuf>,
}

impl SimulatedEngineFactory {
    #[must_use]
    pub fn new(uploaders: Arc<UploaderRegistry>, local_dir: Option<PathBuf>) -> Self {
        Self { uploaders, local_dir }
    }
}

impl EngineFactory for SimulatedEngineFactory {
    fn create(&self) -> Result<Box<dyn CollectEngine>, EngineError> {
        Ok(Box::new(SimulatedEngine {
            uploaders: Arc::clone(&self.uploaders),
            local_dir: self.local_dir.clone(),
            dev: DeviceIndex::INVALID,
            host_id: HostId(-1),
            config: None,
            replays: Vec::new(),
            replay_armed: false,
            started_at_ms: 0,
        }))
    }
}
