//! # Device Job State Machine
//!
//! One [`ProfJobHandler`] per device job. A job is either not started (no
//! engine) or started (engine live, accepting replays):
//!
//! ```text
//!            on_job_start                 on_job_end / on_connection_reset
//! NotStarted ─────────────▶ Started ─────────────────────────────────────▶ NotStarted
//!                           │    ▲
//!            on_replay_start│    │on_replay_end
//!                           ▼    │
//!                           Started (replay armed)
//! ```
//!
//! "Started" is represented by holding an engine, so a started job without an
//! engine (or the reverse) cannot be expressed. Every failed transition out of
//! `Started` tears the engine down instead of leaving a half-armed job.

use log::{info, warn};
use msprof_common::{
    ReplayEvents, SampleConfig, StatusInfo, MAX_AIV_CORES, MAX_AIV_EVENTS, MAX_AI_CORE_CORES,
    MAX_AI_CORE_EVENTS, MAX_CTRL_CPU_EVENTS, MAX_DDR_EVENTS, MAX_LLC_EVENTS, MAX_TS_CPU_EVENTS,
};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use super::engine::{CollectEngine, EngineFactory};
use crate::domain::{DeviceIndex, HostId, JobError};
use crate::transport::{SharedTransport, Transport};

struct JobState {
    inited: bool,
    dev: DeviceIndex,
    host_id: HostId,
    job_id: String,
    engine: Option<Box<dyn CollectEngine>>,
}

/// Per-job state machine owning the job's collection engine
pub struct ProfJobHandler {
    state: Mutex<JobState>,
    /// Owning session; apart from `state` so lookups never wait on an engine call
    binding: Mutex<Option<Weak<dyn Transport>>>,
    factory: Arc<dyn EngineFactory>,
}

impl std::fmt::Debug for ProfJobHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfJobHandler").finish_non_exhaustive()
    }
}

impl ProfJobHandler {
    #[must_use]
    pub fn new(factory: Arc<dyn EngineFactory>) -> Self {
        Self {
            state: Mutex::new(JobState {
                inited: false,
                dev: DeviceIndex::INVALID,
                host_id: HostId(-1),
                job_id: String::new(),
                engine: None,
            }),
            binding: Mutex::new(None),
            factory,
        }
    }

    fn lock(&self) -> MutexGuard<'_, JobState> {
        // A panic inside an engine call must not wedge the whole registry
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Bind the handler to a device, job key and owning session
    ///
    /// Calling it again re-targets the handler; identity fields are overwritten.
    ///
    /// # Errors
    /// Returns `InvalidArgument` if the session is already gone or the key is empty
    pub fn init(
        &self,
        dev: DeviceIndex,
        host_id: HostId,
        job_id: &str,
        transport: Weak<dyn Transport>,
    ) -> Result<(), JobError> {
        if transport.strong_count() == 0 {
            return Err(JobError::InvalidArgument("transport is closed".to_string()));
        }
        if job_id.is_empty() {
            return Err(JobError::InvalidArgument("empty job id".to_string()));
        }
        let mut state = self.lock();
        if state.inited {
            warn!("Job handler {} re-initialized as {job_id} on {dev}", state.job_id);
        }
        state.dev = dev;
        state.host_id = host_id;
        state.job_id = job_id.to_string();
        state.inited = true;
        drop(state);
        *self.binding.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(transport);
        Ok(())
    }

    /// Build a fresh engine, initialize it and start collection
    ///
    /// # Errors
    /// Fails if the handler is uninitialized, already started, or the engine
    /// cannot be built, initialized or started. The job stays not started.
    pub fn on_job_start(
        &self,
        config: &SampleConfig,
        status: &mut StatusInfo,
    ) -> Result<(), JobError> {
        let mut state = self.lock();
        if !state.inited {
            return Err(fail(status, JobError::InvalidArgument("job not initialized".to_string())));
        }
        if state.engine.is_some() {
            return Err(fail(status, JobError::AlreadyRunning(state.job_id.clone())));
        }

        let mut engine = self.factory.create().map_err(|e| fail(status, e.into()))?;
        engine.set_dev_id_on_host(state.host_id);
        engine.init(state.dev).map_err(|e| fail(status, e.into()))?;
        if let Err(e) = engine.collect_start(config, status) {
            // `engine` is dropped here; the job remains not started
            return Err(fail(status, e.into()));
        }

        state.engine = Some(engine);
        status.succeed();
        info!("Job {} started on {}", state.job_id, state.dev);
        Ok(())
    }

    /// Validate replay events and arm the replay
    ///
    /// # Errors
    /// Fails if the job is not started, an event list is out of bounds (first
    /// violation only) or the engine rejects the replay. Any failure while
    /// started resets the job.
    pub fn on_replay_start(
        &self,
        events: &ReplayEvents,
        status: &mut StatusInfo,
    ) -> Result<(), JobError> {
        let mut guard = self.lock();
        let state = &mut *guard;
        let Some(engine) = state.engine.as_mut() else {
            return Err(fail(status, JobError::NotRunning(state.job_id.clone())));
        };

        let result = match check_event_valid(events) {
            Ok(()) => engine.collect_start_replay(events, status).map_err(JobError::from),
            Err(reason) => Err(JobError::InvalidEvent(reason)),
        };
        if let Err(e) = result {
            warn!("Replay start failed for job {}: {e}", state.job_id);
            force_reset(state);
            return Err(fail(status, e));
        }
        status.succeed();
        Ok(())
    }

    /// Disarm the running replay
    ///
    /// # Errors
    /// Fails if the job is not started or the engine cannot stop the replay;
    /// the latter resets the job.
    pub fn on_replay_end(&self, status: &mut StatusInfo) -> Result<(), JobError> {
        let mut guard = self.lock();
        let state = &mut *guard;
        let Some(engine) = state.engine.as_mut() else {
            return Err(fail(status, JobError::NotRunning(state.job_id.clone())));
        };
        if let Err(e) = engine.collect_stop_replay(status) {
            warn!("Replay stop failed for job {}: {e}", state.job_id);
            force_reset(state);
            return Err(fail(status, e.into()));
        }
        status.succeed();
        Ok(())
    }

    /// Stop collection and release the engine
    ///
    /// The job always ends up not started; the result reports whether the
    /// engine stopped cleanly.
    ///
    /// # Errors
    /// Fails if the job is not started or the engine stop failed
    pub fn on_job_end(&self, status: &mut StatusInfo) -> Result<(), JobError> {
        let mut guard = self.lock();
        let state = &mut *guard;
        let Some(engine) = state.engine.as_mut() else {
            return Err(fail(status, JobError::NotRunning(state.job_id.clone())));
        };
        let result = engine.collect_stop(status, false);
        reset_task(state);
        match result {
            Ok(()) => {
                status.succeed();
                info!("Job {} stopped on {}", state.job_id, state.dev);
                Ok(())
            }
            Err(e) => Err(fail(status, e.into())),
        }
    }

    /// The owning session dropped: stop what is running and release the engine
    pub fn on_connection_reset(&self) {
        let mut state = self.lock();
        if state.engine.is_some() {
            info!("Connection lost, resetting job {}", state.job_id);
        }
        force_reset(&mut state);
    }

    #[must_use]
    pub fn dev_id(&self) -> DeviceIndex {
        self.lock().dev
    }

    #[must_use]
    pub fn job_id(&self) -> String {
        self.lock().job_id.clone()
    }

    /// The owning session, if it is still alive
    #[must_use]
    pub fn transport(&self) -> Option<SharedTransport> {
        self.binding
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .as_ref()
            .and_then(Weak::upgrade)
    }

    /// Whether this job belongs to `transport`
    #[must_use]
    pub fn is_bound_to(&self, transport: &SharedTransport) -> bool {
        self.transport().is_some_and(|own| Arc::ptr_eq(&own, transport))
    }

    #[must_use]
    pub fn is_started(&self) -> bool {
        self.lock().engine.is_some()
    }
}

fn fail(status: &mut StatusInfo, err: JobError) -> JobError {
    status.fail(err.to_string());
    err
}

fn reset_task(state: &mut JobState) {
    state.engine = None;
}

/// Best-effort stop before dropping the engine
fn force_reset(state: &mut JobState) {
    if let Some(engine) = state.engine.as_mut() {
        let mut status = StatusInfo::new(state.host_id.0.to_string());
        if let Err(e) = engine.collect_stop(&mut status, true) {
            warn!("Forced stop of job {} failed: {e}", state.job_id);
        }
    }
    reset_task(state);
}

/// Bounds-check every event list of a replay, reporting the first violation
///
/// # Errors
/// Returns the reason for the first list that exceeds its limit
pub fn check_event_valid(events: &ReplayEvents) -> Result<(), String> {
    let checks: [(&str, usize, usize); 8] = [
        ("ctrl cpu events", events.ctrl_cpu_events.len(), MAX_CTRL_CPU_EVENTS),
        ("ts cpu events", events.ts_cpu_events.len(), MAX_TS_CPU_EVENTS),
        ("ai core events", events.ai_core_events.len(), MAX_AI_CORE_EVENTS),
        ("ai core cores", events.ai_core_cores.len(), MAX_AI_CORE_CORES),
        ("llc events", events.llc_events.len(), MAX_LLC_EVENTS),
        ("ddr events", events.ddr_events.len(), MAX_DDR_EVENTS),
        ("aiv events", events.aiv_events.len(), MAX_AIV_EVENTS),
        ("aiv cores", events.aiv_cores.len(), MAX_AIV_CORES),
    ];
    for (name, len, max) in checks {
        if len > max {
            return Err(format!("{name} size {len} exceeds limit {max}"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::test_support::{EngineLog, MockFactory};
    use crate::transport::ChannelTransport;
    use msprof_common::Status;

    fn handler(factory: MockFactory) -> (ProfJobHandler, SharedTransport) {
        let transport: SharedTransport = Arc::new(ChannelTransport::pair().0);
        let handler = ProfJobHandler::new(Arc::new(factory));
        handler.init(DeviceIndex(0), HostId(0), "abc_0", Arc::downgrade(&transport)).unwrap();
        (handler, transport)
    }

    #[test]
    fn test_init_rejects_dead_transport() {
        let handler = ProfJobHandler::new(Arc::new(MockFactory::default()));
        let transport: SharedTransport = Arc::new(ChannelTransport::pair().0);
        let weak = Arc::downgrade(&transport);
        drop(transport);
        let err = handler.init(DeviceIndex(0), HostId(0), "abc_0", weak).unwrap_err();
        assert!(matches!(err, JobError::InvalidArgument(_)));
    }

    #[test]
    fn test_start_then_end_round_trip() {
        let (handler, _transport) = handler(MockFactory::default());
        let dev_before = handler.dev_id();
        let mut status = StatusInfo::new("0");

        handler.on_job_start(&SampleConfig::default(), &mut status).unwrap();
        assert!(handler.is_started());
        handler.on_job_end(&mut status).unwrap();
        assert!(!handler.is_started());
        assert_eq!(handler.dev_id(), dev_before);

        let err = handler.on_job_end(&mut status).unwrap_err();
        assert!(matches!(err, JobError::NotRunning(_)));
        assert_eq!(status.status, Status::Failed);
    }

    #[test]
    fn test_double_start_reports_already_running() {
        let (handler, _transport) = handler(MockFactory::default());
        let mut status = StatusInfo::new("0");
        handler.on_job_start(&SampleConfig::default(), &mut status).unwrap();
        let err = handler.on_job_start(&SampleConfig::default(), &mut status).unwrap_err();
        assert!(matches!(err, JobError::AlreadyRunning(_)));
        assert!(status.info.contains("already running"));
        assert!(handler.is_started());
    }

    #[test]
    fn test_engine_init_failure_leaves_job_stopped() {
        let factory = MockFactory { fail_init: true, ..MockFactory::default() };
        let (handler, _transport) = handler(factory);
        let mut status = StatusInfo::new("0");
        assert!(handler.on_job_start(&SampleConfig::default(), &mut status).is_err());
        assert!(!handler.is_started());
        assert_eq!(status.status, Status::Failed);
    }

    #[test]
    fn test_collect_start_failure_leaves_job_stopped() {
        let factory = MockFactory { fail_start: true, ..MockFactory::default() };
        let (handler, _transport) = handler(factory);
        let mut status = StatusInfo::new("0");
        assert!(handler.on_job_start(&SampleConfig::default(), &mut status).is_err());
        assert!(!handler.is_started());
    }

    #[test]
    fn test_replay_before_start_fails() {
        let (handler, _transport) = handler(MockFactory::default());
        let mut status = StatusInfo::new("0");
        let err = handler.on_replay_start(&ReplayEvents::default(), &mut status).unwrap_err();
        assert!(matches!(err, JobError::NotRunning(_)));
    }

    #[test]
    fn test_invalid_replay_resets_job() {
        let log = EngineLog::default();
        let (handler, _transport) = handler(MockFactory::with_log(log.clone()));
        let mut status = StatusInfo::new("0");
        handler.on_job_start(&SampleConfig::default(), &mut status).unwrap();

        let events = ReplayEvents {
            ai_core_events: (0..9).map(|i| format!("0x{i:x}")).collect(),
            llc_events: (0..20).map(|i| format!("0x{i:x}")).collect(),
            ..ReplayEvents::default()
        };
        let err = handler.on_replay_start(&events, &mut status).unwrap_err();
        assert!(matches!(err, JobError::InvalidEvent(_)));
        // First violation only
        assert!(status.info.contains("ai core events"));
        assert!(!status.info.contains("llc"));
        assert!(!handler.is_started());
        assert!(log.calls().contains(&"stop(force=true)".to_string()));
        assert!(!log.calls().contains(&"start_replay".to_string()));
    }

    #[test]
    fn test_replay_round_trip_keeps_job_started() {
        let log = EngineLog::default();
        let (handler, _transport) = handler(MockFactory::with_log(log.clone()));
        let mut status = StatusInfo::new("0");
        handler.on_job_start(&SampleConfig::default(), &mut status).unwrap();
        let events = ReplayEvents {
            ai_core_events: vec!["0x8".to_string(), "0x9".to_string()],
            ai_core_cores: vec![0, 1],
            ..ReplayEvents::default()
        };
        handler.on_replay_start(&events, &mut status).unwrap();
        handler.on_replay_end(&mut status).unwrap();
        assert!(handler.is_started());
        assert_eq!(log.calls(), vec!["init(dev:0)", "start", "start_replay", "stop_replay"]);
    }

    #[test]
    fn test_failed_replay_stop_resets_job() {
        let factory = MockFactory { fail_stop_replay: true, ..MockFactory::default() };
        let (handler, _transport) = handler(factory);
        let mut status = StatusInfo::new("0");
        handler.on_job_start(&SampleConfig::default(), &mut status).unwrap();
        assert!(handler.on_replay_end(&mut status).is_err());
        assert!(!handler.is_started());
    }

    #[test]
    fn test_job_end_reports_stop_failure_but_resets() {
        let factory = MockFactory { fail_stop: true, ..MockFactory::default() };
        let (handler, _transport) = handler(factory);
        let mut status = StatusInfo::new("0");
        handler.on_job_start(&SampleConfig::default(), &mut status).unwrap();
        assert!(handler.on_job_end(&mut status).is_err());
        assert!(!handler.is_started());
    }

    #[test]
    fn test_connection_reset_forces_stop() {
        let log = EngineLog::default();
        let (handler, _transport) = handler(MockFactory::with_log(log.clone()));
        let mut status = StatusInfo::new("0");
        handler.on_job_start(&SampleConfig::default(), &mut status).unwrap();
        handler.on_connection_reset();
        assert!(!handler.is_started());
        assert_eq!(log.calls().last().map(String::as_str), Some("stop(force=true)"));
        // Reset of a stopped job is a no-op
        handler.on_connection_reset();
    }

    #[test]
    fn test_transport_accessor_is_weak() {
        let (handler, transport) = handler(MockFactory::default());
        assert!(handler.is_bound_to(&transport));
        assert!(handler.transport().is_some());
        drop(transport);
        assert!(handler.transport().is_none());
    }

    #[test]
    fn test_check_event_valid_limits() {
        assert!(check_event_valid(&ReplayEvents::default()).is_ok());
        let events = ReplayEvents {
            aiv_cores: (0..65).collect(),
            ..ReplayEvents::default()
        };
        let err = check_event_valid(&events).unwrap_err();
        assert!(err.starts_with("aiv cores size 65"));
    }
}
