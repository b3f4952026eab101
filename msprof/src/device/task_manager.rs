//! # Device Job Registry
//!
//! Maps composite job keys (`"<job_id>_<dev_id>"`) to their
//! [`ProfJobHandler`]. Shared by every receive thread, so every operation
//! takes the single map mutex. Jobs are unregistered under the lock and reset
//! after it is released: stopping an engine can block on a slow data session
//! and must not stall the other receivers.

use log::{info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::engine::{DeviceIdMapper, EngineFactory};
use super::job_handler::ProfJobHandler;
use crate::domain::{HostId, RegistryError};
use crate::transport::SharedTransport;

struct Registry {
    inited: bool,
    jobs: HashMap<String, Arc<ProfJobHandler>>,
}

/// Process-wide registry of device jobs
pub struct TaskManager {
    registry: Mutex<Registry>,
    factory: Arc<dyn EngineFactory>,
    mapper: Arc<dyn DeviceIdMapper>,
}

impl TaskManager {
    #[must_use]
    pub fn new(factory: Arc<dyn EngineFactory>, mapper: Arc<dyn DeviceIdMapper>) -> Self {
        Self {
            registry: Mutex::new(Registry { inited: false, jobs: HashMap::new() }),
            factory,
            mapper,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn init(&self) {
        let mut registry = self.lock();
        if !registry.inited {
            registry.inited = true;
            info!("Task manager initialized");
        }
    }

    /// Reset every job and refuse further work
    pub fn uninit(&self) {
        let drained = {
            let mut registry = self.lock();
            if !registry.inited {
                return;
            }
            registry.inited = false;
            drain_jobs(&mut registry, |_| true)
        };
        reset_jobs(drained);
        info!("Task manager uninitialized");
    }

    /// Register a new job for `job_id`
    ///
    /// An existing entry is never replaced: a second create for the same key
    /// fails and leaves the first job untouched.
    ///
    /// # Errors
    /// Fails if the registry is not initialized, the key already exists, the
    /// host id has no device, or the handler rejects its identity.
    pub fn create_task(
        &self,
        host_id: HostId,
        job_id: &str,
        transport: &SharedTransport,
    ) -> Result<Arc<ProfJobHandler>, RegistryError> {
        let mut registry = self.lock();
        if !registry.inited {
            return Err(RegistryError::NotInitialized);
        }
        if registry.jobs.contains_key(job_id) {
            warn!("Job {job_id} already exists, ignoring duplicate start");
            return Err(RegistryError::Duplicate(job_id.to_string()));
        }

        let dev = self.mapper.device_index(host_id)?;
        let handler = Arc::new(ProfJobHandler::new(Arc::clone(&self.factory)));
        handler.init(dev, host_id, job_id, Arc::downgrade(transport))?;
        registry.jobs.insert(job_id.to_string(), Arc::clone(&handler));
        info!("Created job {job_id} for {host_id} on {dev}");
        Ok(handler)
    }

    #[must_use]
    pub fn get_task(&self, job_id: &str) -> Option<Arc<ProfJobHandler>> {
        let registry = self.lock();
        if !registry.inited {
            return None;
        }
        registry.jobs.get(job_id).cloned()
    }

    /// Remove a job; returns whether it was present
    pub fn delete_task(&self, job_id: &str) -> bool {
        let mut registry = self.lock();
        if !registry.inited {
            return false;
        }
        registry.jobs.remove(job_id).is_some()
    }

    /// Reset and drop every job bound to `transport` in one sweep
    ///
    /// Returns the number of jobs removed.
    pub fn connection_reset(&self, transport: &SharedTransport) -> usize {
        let lost = drain_jobs(&mut self.lock(), |job| job.is_bound_to(transport));
        let count = lost.len();
        for (job_id, _) in &lost {
            info!("Resetting job {job_id} after connection loss");
        }
        reset_jobs(lost);
        count
    }

    /// Reset and drop every job
    pub fn clear_tasks(&self) {
        let drained = drain_jobs(&mut self.lock(), |_| true);
        for (job_id, _) in &drained {
            info!("Clearing job {job_id}");
        }
        reset_jobs(drained);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().jobs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Unregister the jobs matching `pred`; the caller resets them unlocked
fn drain_jobs(
    registry: &mut Registry,
    pred: impl Fn(&ProfJobHandler) -> bool,
) -> Vec<(String, Arc<ProfJobHandler>)> {
    let keys: Vec<String> =
        registry.jobs.iter().filter(|(_, job)| pred(job)).map(|(key, _)| key.clone()).collect();
    keys.into_iter()
        .filter_map(|key| registry.jobs.remove(&key).map(|job| (key, job)))
        .collect()
}

fn reset_jobs(jobs: Vec<(String, Arc<ProfJobHandler>)>) {
    for (_, job) in jobs {
        job.on_connection_reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::engine::IdentityMapper;
    use crate::device::test_support::{EngineLog, MockFactory};
    use crate::domain::DeviceIndex;
    use crate::device::engine::CollectEngine;
    use crate::domain::EngineError;
    use crate::transport::ChannelTransport;
    use crossbeam_channel::{unbounded, Receiver, Sender};
    use msprof_common::{ReplayEvents, SampleConfig, StatusInfo};
    use std::thread;
    use std::time::Duration;

    fn manager(factory: MockFactory) -> TaskManager {
        let manager = TaskManager::new(Arc::new(factory), Arc::new(IdentityMapper));
        manager.init();
        manager
    }

    fn transport() -> SharedTransport {
        Arc::new(ChannelTransport::pair().0)
    }

    #[test]
    fn test_create_requires_init() {
        let manager = TaskManager::new(Arc::new(MockFactory::default()), Arc::new(IdentityMapper));
        let err = manager.create_task(HostId(0), "abc_0", &transport()).unwrap_err();
        assert!(matches!(err, RegistryError::NotInitialized));
        assert!(manager.get_task("abc_0").is_none());
        assert!(!manager.delete_task("abc_0"));
    }

    #[test]
    fn test_at_most_one_job_per_key() {
        let manager = manager(MockFactory::default());
        let first_transport = transport();
        let first = manager.create_task(HostId(0), "abc_0", &first_transport).unwrap();

        for host in 1..4 {
            let err = manager.create_task(HostId(host), "abc_0", &transport()).unwrap_err();
            assert!(matches!(err, RegistryError::Duplicate(_)));
        }

        let current = manager.get_task("abc_0").unwrap();
        assert!(Arc::ptr_eq(&first, &current));
        assert_eq!(current.dev_id(), DeviceIndex(0));
        assert!(current.is_bound_to(&first_transport));
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_unknown_device_is_not_inserted() {
        let manager = manager(MockFactory::default());
        assert!(manager.create_task(HostId(-1), "abc_-1", &transport()).is_err());
        assert!(manager.is_empty());
    }

    #[test]
    fn test_delete_then_recreate() {
        let manager = manager(MockFactory::default());
        let t = transport();
        manager.create_task(HostId(0), "abc_0", &t).unwrap();
        assert!(manager.delete_task("abc_0"));
        assert!(!manager.delete_task("abc_0"));
        assert!(manager.create_task(HostId(0), "abc_0", &t).is_ok());
    }

    #[test]
    fn test_connection_reset_sweeps_only_matching_jobs() {
        let log = EngineLog::default();
        let manager = manager(MockFactory::with_log(log.clone()));
        let dropped = transport();
        let alive = transport();

        let job = manager.create_task(HostId(0), "abc_0", &dropped).unwrap();
        job.on_job_start(&SampleConfig::default(), &mut StatusInfo::new("0")).unwrap();
        manager.create_task(HostId(1), "abc_1", &dropped).unwrap();
        manager.create_task(HostId(2), "abc_2", &alive).unwrap();

        assert_eq!(manager.connection_reset(&dropped), 2);
        assert!(manager.get_task("abc_0").is_none());
        assert!(manager.get_task("abc_1").is_none());
        assert!(manager.get_task("abc_2").is_some());
        assert!(!job.is_started());
        assert!(log.calls().contains(&"stop(force=true)".to_string()));

        // Second reset with nothing new registered is a no-op
        assert_eq!(manager.connection_reset(&dropped), 0);
        assert_eq!(manager.len(), 1);
    }

    /// Engine whose stop parks until the test releases it
    struct GatedFactory {
        stopping: Sender<()>,
        release: Receiver<()>,
    }

    struct GatedEngine {
        stopping: Sender<()>,
        release: Receiver<()>,
    }

    impl EngineFactory for GatedFactory {
        fn create(&self) -> Result<Box<dyn CollectEngine>, EngineError> {
            Ok(Box::new(GatedEngine { stopping: self.stopping.clone(), release: self.release.clone() }))
        }
    }

    impl CollectEngine for GatedEngine {
        fn init(&mut self, _dev: DeviceIndex) -> Result<(), EngineError> {
            Ok(())
        }

        fn set_dev_id_on_host(&mut self, _host_id: HostId) {}

        fn collect_start(&mut self, _: &SampleConfig, _: &mut StatusInfo) -> Result<(), EngineError> {
            Ok(())
        }

        fn collect_stop(&mut self, _: &mut StatusInfo, _force: bool) -> Result<(), EngineError> {
            let _ = self.stopping.send(());
            let _ = self.release.recv();
            Ok(())
        }

        fn collect_start_replay(&mut self, _: &ReplayEvents, _: &mut StatusInfo) -> Result<(), EngineError> {
            Ok(())
        }

        fn collect_stop_replay(&mut self, _: &mut StatusInfo) -> Result<(), EngineError> {
            Ok(())
        }
    }

    #[test]
    fn test_slow_reset_does_not_block_registry() {
        let (stopping_tx, stopping_rx) = unbounded();
        let (release_tx, release_rx) = unbounded();
        let factory = GatedFactory { stopping: stopping_tx, release: release_rx };
        let manager = Arc::new(TaskManager::new(Arc::new(factory), Arc::new(IdentityMapper)));
        manager.init();

        let dropped = transport();
        let job = manager.create_task(HostId(0), "abc_0", &dropped).unwrap();
        job.on_job_start(&SampleConfig::default(), &mut StatusInfo::new("0")).unwrap();

        let resetting = {
            let manager = Arc::clone(&manager);
            let dropped = Arc::clone(&dropped);
            thread::spawn(move || manager.connection_reset(&dropped))
        };
        stopping_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        // The engine is parked in stop; the registry must still answer
        let (done_tx, done_rx) = unbounded();
        let other = Arc::clone(&manager);
        thread::spawn(move || {
            let created = other.create_task(HostId(1), "abc_1", &transport()).is_ok();
            let _ = done_tx.send((created, other.get_task("abc_0").is_none()));
        });
        let answered = done_rx.recv_timeout(Duration::from_secs(5));

        release_tx.send(()).unwrap();
        assert_eq!(resetting.join().unwrap(), 1);
        assert_eq!(answered.unwrap(), (true, true));
    }

    #[test]
    fn test_uninit_resets_every_job() {
        let manager = manager(MockFactory::default());
        let t = transport();
        let job = manager.create_task(HostId(0), "abc_0", &t).unwrap();
        job.on_job_start(&SampleConfig::default(), &mut StatusInfo::new("0")).unwrap();

        manager.uninit();
        assert!(!job.is_started());
        assert!(manager.is_empty());
        assert!(manager.get_task("abc_0").is_none());
    }
}
