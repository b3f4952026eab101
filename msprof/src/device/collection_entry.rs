//! # Session Ingress
//!
//! Every session the device accepts starts with a [`Handshake`] packet.
//! [`CollectionEntry::handle`] reads it and routes the session:
//!
//! - **Control**: bind a [`Receiver`] to the session and start its thread
//! - **Data**: attach an [`Uploader`] for a job whose control session is live
//!
//! Three registries live here, each behind its own mutex and never held
//! together: receivers by `(job_id, dev)`, the `(dev, mode) → job_id`
//! relation, and the uploaders. None of them is held while calling into the
//! [`TaskManager`].

use log::{info, warn};
use msprof_common::{ChannelKind, Handshake, JobContext, Message, StatusInfo};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use super::receiver::Receiver;
use super::task_manager::TaskManager;
use super::uploader::{Uploader, UploaderRegistry};
use crate::domain::RegistryError;
use crate::transport::{send_message, SharedTransport};

/// Teardown hook invoked when a job's control session ends
pub trait CollectionFinisher: Send + Sync {
    fn finish_collection(&self, dev_id: i32, job_id: &str);
}

type ReceiverKey = (String, i32);
type RelationKey = (i32, String);

pub struct CollectionEntry {
    task_manager: Arc<TaskManager>,
    uploaders: Arc<UploaderRegistry>,
    receivers: Mutex<HashMap<ReceiverKey, Arc<Receiver>>>,
    relations: Mutex<HashMap<RelationKey, String>>,
    weak_self: Weak<CollectionEntry>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl CollectionEntry {
    #[must_use]
    pub fn new(task_manager: Arc<TaskManager>, uploaders: Arc<UploaderRegistry>) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            task_manager,
            uploaders,
            receivers: Mutex::new(HashMap::new()),
            relations: Mutex::new(HashMap::new()),
            weak_self: weak_self.clone(),
        })
    }

    /// Route a freshly accepted session by its raw handshake packet
    ///
    /// # Errors
    /// Fails if the handshake does not parse, or as [`Self::handle_handshake`].
    /// The caller owns closing `transport` on failure.
    pub fn handle(
        &self,
        transport: SharedTransport,
        raw_request: &[u8],
        dev_index: i32,
    ) -> Result<(), RegistryError> {
        let handshake: Handshake = serde_json::from_slice(raw_request)
            .map_err(|e| RegistryError::Handshake(e.to_string()))?;
        self.handle_handshake(transport, &handshake, dev_index)
    }

    /// Route a session whose handshake was already decoded
    ///
    /// A data session is answered with a [`Message::Response`] before any data
    /// flows on it, so the host knows its uploader is in place.
    ///
    /// # Errors
    /// Fails if a control session for the job is already live, or a data
    /// session has no control session to attach to. The caller owns closing
    /// `transport` on failure.
    pub fn handle_handshake(
        &self,
        transport: SharedTransport,
        handshake: &Handshake,
        dev_index: i32,
    ) -> Result<(), RegistryError> {
        match handshake.channel {
            ChannelKind::Control => self.handle_control(transport, handshake, dev_index),
            ChannelKind::Data => self.handle_data(transport, handshake, dev_index),
        }
    }

    /// Job id of a handshake: explicit, or the one already assigned to its mode
    fn resolve_job_id(&self, handshake: &Handshake, dev_index: i32) -> Result<String, RegistryError> {
        if !handshake.job_id.is_empty() {
            return Ok(handshake.job_id.clone());
        }
        self.get_mode_job_id_relation(dev_index, &handshake.mode).ok_or_else(|| {
            RegistryError::Handshake(format!(
                "no job id and no job assigned to mode {:?} on device {dev_index}",
                handshake.mode
            ))
        })
    }

    fn handle_control(
        &self,
        transport: SharedTransport,
        handshake: &Handshake,
        dev_index: i32,
    ) -> Result<(), RegistryError> {
        let job_id = self.resolve_job_id(handshake, dev_index)?;

        if let Some(existing) = self.get_receiver(&job_id, dev_index) {
            if !existing.is_quit() {
                return Err(RegistryError::Handshake(format!(
                    "control session for job {job_id} on device {dev_index} already open"
                )));
            }
            self.delete_receiver(&job_id, dev_index);
        }

        self.add_mode_job_id_relation(dev_index, &handshake.mode, &job_id);

        let finisher: Weak<dyn CollectionFinisher> = self.weak_self.clone();
        let mut receiver = Receiver::new(transport, Arc::clone(&self.task_manager), &job_id)
            .with_finisher(finisher);
        receiver.init(dev_index);
        let receiver = Arc::new(receiver);

        // Registered before its thread runs so an early disconnect finds it
        self.add_receiver(&job_id, dev_index, Arc::clone(&receiver));
        if let Err(e) = receiver.start() {
            self.delete_receiver(&job_id, dev_index);
            return Err(RegistryError::Transport(e.into()));
        }
        info!("Control session for job {job_id} on device {dev_index} ({}) accepted", handshake.mode);
        Ok(())
    }

    fn handle_data(
        &self,
        transport: SharedTransport,
        handshake: &Handshake,
        dev_index: i32,
    ) -> Result<(), RegistryError> {
        let job_id = self.resolve_job_id(handshake, dev_index)?;
        let job_ctx = JobContext::new(job_id.clone(), dev_index.to_string());
        if !self.has_live_receiver(&job_id, dev_index) {
            let err = RegistryError::NoReceiver { job_id, dev: dev_index };
            let mut status = StatusInfo::new(job_ctx.dev_id.clone());
            status.fail(err.to_string());
            let _ = send_message(transport.as_ref(), &Message::response(job_ctx, status));
            return Err(err);
        }

        // Acknowledged before the uploader exists so the response is the first packet
        let ack = Message::response(job_ctx.clone(), StatusInfo::new(job_ctx.dev_id.clone()));
        send_message(transport.as_ref(), &ack)?;
        let uploader = Uploader::start(job_ctx.clone(), transport)
            .map_err(|e| RegistryError::Transport(e.into()))?;
        self.uploaders.add(uploader);

        // The control session may have finished between the check and the add
        if !self.has_live_receiver(&job_id, dev_index) {
            self.uploaders.remove(&job_ctx.task_key());
            return Err(RegistryError::NoReceiver { job_id, dev: dev_index });
        }
        info!("Data session for job {job_id} on device {dev_index} attached");
        Ok(())
    }

    fn has_live_receiver(&self, job_id: &str, dev_index: i32) -> bool {
        self.get_receiver(job_id, dev_index).is_some_and(|receiver| !receiver.is_quit())
    }

    pub fn add_receiver(&self, job_id: &str, dev_index: i32, receiver: Arc<Receiver>) {
        lock(&self.receivers).insert((job_id.to_string(), dev_index), receiver);
    }

    #[must_use]
    pub fn get_receiver(&self, job_id: &str, dev_index: i32) -> Option<Arc<Receiver>> {
        lock(&self.receivers).get(&(job_id.to_string(), dev_index)).cloned()
    }

    /// Unregister and shut down a receiver; returns whether it existed
    pub fn delete_receiver(&self, job_id: &str, dev_index: i32) -> bool {
        let removed = lock(&self.receivers).remove(&(job_id.to_string(), dev_index));
        match removed {
            Some(receiver) => {
                receiver.uinit();
                true
            }
            None => false,
        }
    }

    pub fn add_mode_job_id_relation(&self, dev_index: i32, mode: &str, job_id: &str) {
        lock(&self.relations).insert((dev_index, mode.to_string()), job_id.to_string());
    }

    #[must_use]
    pub fn get_mode_job_id_relation(&self, dev_index: i32, mode: &str) -> Option<String> {
        lock(&self.relations).get(&(dev_index, mode.to_string())).cloned()
    }

    pub fn delete_mode_job_id_relation(&self, dev_index: i32, mode: &str) -> bool {
        lock(&self.relations).remove(&(dev_index, mode.to_string())).is_some()
    }

    /// Shut down every session
    pub fn uninit(&self) {
        let receivers: Vec<Arc<Receiver>> = lock(&self.receivers).drain().map(|(_, r)| r).collect();
        for receiver in receivers {
            receiver.uinit();
        }
        lock(&self.relations).clear();
        self.uploaders.clear();
    }

    #[must_use]
    pub fn receiver_count(&self) -> usize {
        lock(&self.receivers).len()
    }
}

impl CollectionFinisher for CollectionEntry {
    /// Tear down the control session, mode relation and uploader of a job
    fn finish_collection(&self, dev_id: i32, job_id: &str) {
        if !self.delete_receiver(job_id, dev_id) {
            warn!("No receiver for job {job_id} on device {dev_id} at finish");
        }
        lock(&self.relations).retain(|(dev, _), related| !(*dev == dev_id && related == job_id));
        self.uploaders.remove(&JobContext::new(job_id, dev_id.to_string()).task_key());
        info!("Collection of job {job_id} on device {dev_id} finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::engine::IdentityMapper;
    use crate::device::test_support::MockFactory;
    use crate::transport::{recv_message, send_message, ChannelTransport, Transport};
    use msprof_common::{Message, SampleConfig};
    use std::thread;
    use std::time::{Duration, Instant};

    fn entry() -> (Arc<CollectionEntry>, Arc<TaskManager>, Arc<UploaderRegistry>) {
        let task_manager =
            Arc::new(TaskManager::new(Arc::new(MockFactory::default()), Arc::new(IdentityMapper)));
        task_manager.init();
        let uploaders = Arc::new(UploaderRegistry::new());
        (CollectionEntry::new(Arc::clone(&task_manager), Arc::clone(&uploaders)), task_manager, uploaders)
    }

    fn handshake(channel: ChannelKind, job_id: &str) -> Vec<u8> {
        serde_json::to_vec(&Handshake {
            channel,
            job_id: job_id.to_string(),
            mode: "system".to_string(),
            dev_id: 0,
        })
        .unwrap()
    }

    fn wait_until(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn test_malformed_handshake_has_no_side_effects() {
        let (entry, _, _) = entry();
        let (_host, device) = ChannelTransport::pair();
        let err = entry.handle(Arc::new(device), b"{nope", 0).unwrap_err();
        assert!(matches!(err, RegistryError::Handshake(_)));
        assert_eq!(entry.receiver_count(), 0);
    }

    #[test]
    fn test_data_session_requires_control_session() {
        let (entry, _, uploaders) = entry();
        let (_host, device) = ChannelTransport::pair();
        let err = entry.handle(Arc::new(device), &handshake(ChannelKind::Data, "abc"), 0).unwrap_err();
        assert!(matches!(err, RegistryError::NoReceiver { .. }));
        assert!(uploaders.get("abc_0").is_none());
    }

    #[test]
    fn test_control_then_data_then_finish() {
        let (entry, _, uploaders) = entry();
        let (_ctrl_host, ctrl_dev) = ChannelTransport::pair();
        let (data_host, data_dev) = ChannelTransport::pair();

        entry.handle(Arc::new(ctrl_dev), &handshake(ChannelKind::Control, "abc"), 0).unwrap();
        assert!(entry.get_receiver("abc", 0).is_some());
        assert_eq!(entry.get_mode_job_id_relation(0, "system").as_deref(), Some("abc"));

        // A data session may omit the job id once the mode has one
        entry.handle(Arc::new(data_dev), &handshake(ChannelKind::Data, ""), 0).unwrap();
        assert!(uploaders.get("abc_0").is_some());
        match recv_message(&data_host).unwrap() {
            Message::Response { job_ctx, status } => {
                assert_eq!(job_ctx.job_id, "abc");
                assert!(status.is_success());
            }
            other => panic!("unexpected message {other:?}"),
        }

        entry.finish_collection(0, "abc");
        assert!(entry.get_receiver("abc", 0).is_none());
        assert!(entry.get_mode_job_id_relation(0, "system").is_none());
        assert!(uploaders.get("abc_0").is_none());
    }

    #[test]
    fn test_rejected_data_session_is_told_why() {
        let (entry, _, _) = entry();
        let (data_host, data_dev) = ChannelTransport::pair();
        assert!(entry.handle(Arc::new(data_dev), &handshake(ChannelKind::Data, "abc"), 0).is_err());
        match recv_message(&data_host).unwrap() {
            Message::Response { status, .. } => assert!(status.info.contains("No receiver")),
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn test_empty_job_id_without_mode_relation_is_rejected() {
        let (entry, _, uploaders) = entry();
        for channel in [ChannelKind::Control, ChannelKind::Data] {
            let (_host, device) = ChannelTransport::pair();
            let err = entry.handle(Arc::new(device), &handshake(channel, ""), 0).unwrap_err();
            assert!(matches!(err, RegistryError::Handshake(_)));
        }
        assert_eq!(entry.receiver_count(), 0);
        assert!(entry.get_mode_job_id_relation(0, "system").is_none());
        assert!(uploaders.get("_0").is_none());

        // A relation on another device does not help
        let (_h, d) = ChannelTransport::pair();
        entry.handle(Arc::new(d), &handshake(ChannelKind::Control, "abc"), 1).unwrap();
        let (_h, d) = ChannelTransport::pair();
        assert!(entry.handle(Arc::new(d), &handshake(ChannelKind::Data, ""), 0).is_err());
        assert!(uploaders.get("abc_0").is_none());
        entry.uninit();
    }

    #[test]
    fn test_data_session_for_finished_control_is_not_kept() {
        let (entry, _, uploaders) = entry();
        let (_ctrl_host, ctrl_dev) = ChannelTransport::pair();
        entry.handle(Arc::new(ctrl_dev), &handshake(ChannelKind::Control, "abc"), 0).unwrap();

        // Session winding down: still registered but already quit
        entry.get_receiver("abc", 0).unwrap().uinit();
        let (data_host, data_dev) = ChannelTransport::pair();
        let err = entry.handle(Arc::new(data_dev), &handshake(ChannelKind::Data, "abc"), 0).unwrap_err();
        assert!(matches!(err, RegistryError::NoReceiver { .. }));
        assert!(uploaders.get("abc_0").is_none());
        assert!(matches!(recv_message(&data_host).unwrap(), Message::Response { .. }));
        entry.uninit();
    }

    #[test]
    fn test_second_live_control_session_is_rejected() {
        let (entry, _, _) = entry();
        let (_h1, d1) = ChannelTransport::pair();
        let (_h2, d2) = ChannelTransport::pair();
        entry.handle(Arc::new(d1), &handshake(ChannelKind::Control, "abc"), 0).unwrap();
        assert!(entry.handle(Arc::new(d2), &handshake(ChannelKind::Control, "abc"), 0).is_err());
        assert_eq!(entry.receiver_count(), 1);
        entry.uninit();
        assert_eq!(entry.receiver_count(), 0);
    }

    #[test]
    fn test_host_disconnect_finishes_collection() {
        let (entry, task_manager, _) = entry();
        let (host, device) = ChannelTransport::pair();
        entry.handle(Arc::new(device), &handshake(ChannelKind::Control, "abc"), 0).unwrap();

        let start = Message::JobStart {
            job_ctx: JobContext::new("abc", "0"),
            sample_config: SampleConfig::default(),
        };
        send_message(&host, &start).unwrap();
        assert!(matches!(recv_message(&host).unwrap(), Message::Response { .. }));

        host.close_session();
        wait_until(|| entry.get_receiver("abc", 0).is_none());
        assert!(task_manager.get_task("abc_0").is_none());
        assert!(entry.get_mode_job_id_relation(0, "system").is_none());
    }
}
