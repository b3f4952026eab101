//! Scripted collection engine for unit tests

use msprof_common::{ReplayEvents, SampleConfig, StatusInfo};
use std::sync::{Arc, Mutex};

use super::engine::{CollectEngine, EngineFactory};
use crate::domain::{DeviceIndex, EngineError, HostId};

/// Calls made on every engine built by one factory
#[derive(Clone, Default)]
pub struct EngineLog(Arc<Mutex<Vec<String>>>);

impl EngineLog {
    pub fn calls(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    fn push(&self, call: impl Into<String>) {
        self.0.lock().unwrap().push(call.into());
    }
}

#[derive(Clone, Default)]
pub struct MockFactory {
    pub fail_create: bool,
    pub fail_init: bool,
    pub fail_start: bool,
    pub fail_stop: bool,
    pub fail_stop_replay: bool,
    pub log: EngineLog,
}

impl MockFactory {
    pub fn with_log(log: EngineLog) -> Self {
        Self { log, ..Self::default() }
    }
}

impl EngineFactory for MockFactory {
    fn create(&self) -> Result<Box<dyn CollectEngine>, EngineError> {
        if self.fail_create {
            return Err(EngineError::Unavailable("mock".to_string()));
        }
        Ok(Box::new(MockEngine { script: self.clone(), dev: DeviceIndex::INVALID }))
    }
}

struct MockEngine {
    script: MockFactory,
    dev: DeviceIndex,
}

impl MockEngine {
    fn outcome(&self, fail: bool, what: &str) -> Result<(), EngineError> {
        if fail {
            Err(EngineError::Failed { dev: self.dev, reason: format!("{what} scripted to fail") })
        } else {
            Ok(())
        }
    }
}

impl CollectEngine for MockEngine {
    fn init(&mut self, dev: DeviceIndex) -> Result<(), EngineError> {
        self.dev = dev;
        self.script.log.push(format!("init({dev})"));
        self.outcome(self.script.fail_init, "init")
    }

    fn set_dev_id_on_host(&mut self, _host_id: HostId) {}

    fn collect_start(
        &mut self,
        _config: &SampleConfig,
        _status: &mut StatusInfo,
    ) -> Result<(), EngineError> {
        self.script.log.push("start");
        self.outcome(self.script.fail_start, "start")
    }

    fn collect_stop(&mut self, _status: &mut StatusInfo, force: bool) -> Result<(), EngineError> {
        self.script.log.push(format!("stop(force={force})"));
        self.outcome(self.script.fail_stop, "stop")
    }

    fn collect_start_replay(
        &mut self,
        _events: &ReplayEvents,
        _status: &mut StatusInfo,
    ) -> Result<(), EngineError> {
        self.script.log.push("start_replay");
        Ok(())
    }

    fn collect_stop_replay(&mut self, _status: &mut StatusInfo) -> Result<(), EngineError> {
        self.script.log.push("stop_replay");
        self.outcome(self.script.fail_stop_replay, "stop_replay")
    }
}
