//! Job lifecycle message handlers
//!
//! One handler per control message kind. Each looks the job up by its
//! composite key, drives the job state machine, and answers with a
//! [`Message::Response`] on the job's session.
//!
//! Stop and replay messages for a job the registry does not know are dropped
//! without a response; the host treats the missing answer as "nothing to do".

use log::{error, warn};
use msprof_common::{JobContext, Message, MessageKind, StatusInfo};
use std::sync::Arc;

use super::dispatcher::{MessageHandler, MsgDispatcher};
use super::job_handler::ProfJobHandler;
use super::task_manager::TaskManager;
use crate::domain::HostId;
use crate::transport::{send_message, SharedTransport};

/// State shared by the handlers of one receiver
#[derive(Clone)]
pub struct HandlerContext {
    pub task_manager: Arc<TaskManager>,
    pub transport: SharedTransport,
}

impl HandlerContext {
    /// Look up the job for `job_ctx`, or `None` when it is not registered
    fn job_by_key(&self, job_ctx: &JobContext) -> Option<Arc<ProfJobHandler>> {
        let key = job_ctx.task_key();
        let job = self.task_manager.get_task(&key);
        if job.is_none() {
            warn!("Job {key} not found, dropping message");
        }
        job
    }

    fn respond(&self, transport: Option<SharedTransport>, job_ctx: &JobContext, status: StatusInfo) {
        let Some(transport) = transport else {
            warn!("Session of job {} is gone, response dropped", job_ctx.task_key());
            return;
        };
        let response = Message::response(job_ctx.clone(), status);
        if let Err(e) = send_message(transport.as_ref(), &response) {
            error!("Failed to send response for job {}: {e}", job_ctx.task_key());
        }
    }
}

/// Register the four job lifecycle handlers on `dispatcher`
pub fn register_job_handlers(dispatcher: &mut MsgDispatcher, ctx: &HandlerContext) {
    dispatcher.register_message_handler(MessageKind::JobStart, Box::new(JobStartHandler(ctx.clone())));
    dispatcher.register_message_handler(MessageKind::JobStop, Box::new(JobStopHandler(ctx.clone())));
    dispatcher
        .register_message_handler(MessageKind::ReplayStart, Box::new(ReplayStartHandler(ctx.clone())));
    dispatcher
        .register_message_handler(MessageKind::ReplayStop, Box::new(ReplayStopHandler(ctx.clone())));
}

pub struct JobStartHandler(HandlerContext);

impl MessageHandler for JobStartHandler {
    fn handle(&self, message: &Message) {
        let Message::JobStart { job_ctx, sample_config } = message else {
            return;
        };
        let ctx = &self.0;
        let key = job_ctx.task_key();
        let mut status = StatusInfo::new(job_ctx.dev_id.clone());

        match job_ctx.dev_id.parse::<i32>() {
            Ok(host_id) => match ctx.task_manager.create_task(HostId(host_id), &key, &ctx.transport) {
                Ok(job) => {
                    if job.on_job_start(sample_config, &mut status).is_err() {
                        // Let the host retry the same key
                        ctx.task_manager.delete_task(&key);
                    }
                }
                Err(e) => status.fail(e.to_string()),
            },
            Err(_) => status.fail(format!("invalid device id {:?}", job_ctx.dev_id)),
        }
        ctx.respond(Some(Arc::clone(&ctx.transport)), job_ctx, status);
    }
}

pub struct JobStopHandler(HandlerContext);

impl MessageHandler for JobStopHandler {
    fn handle(&self, message: &Message) {
        let Message::JobStop { job_ctx } = message else {
            return;
        };
        let ctx = &self.0;
        let Some(job) = ctx.job_by_key(job_ctx) else {
            return;
        };
        let mut status = StatusInfo::new(job_ctx.dev_id.clone());
        if let Err(e) = job.on_job_end(&mut status) {
            warn!("Job {} did not stop cleanly: {e}", job_ctx.task_key());
        }
        ctx.task_manager.delete_task(&job_ctx.task_key());
        ctx.respond(job.transport(), job_ctx, status);
    }
}

pub struct ReplayStartHandler(HandlerContext);

impl MessageHandler for ReplayStartHandler {
    fn handle(&self, message: &Message) {
        let Message::ReplayStart { job_ctx, events } = message else {
            return;
        };
        let ctx = &self.0;
        let Some(job) = ctx.job_by_key(job_ctx) else {
            return;
        };
        let mut status = StatusInfo::new(job_ctx.dev_id.clone());
        if let Err(e) = job.on_replay_start(events, &mut status) {
            warn!("Replay start for job {} failed: {e}", job_ctx.task_key());
        }
        ctx.respond(job.transport(), job_ctx, status);
    }
}

pub struct ReplayStopHandler(HandlerContext);

impl MessageHandler for ReplayStopHandler {
    fn handle(&self, message: &Message) {
        let Message::ReplayStop { job_ctx } = message else {
            return;
        };
        let ctx = &self.0;
        let Some(job) = ctx.job_by_key(job_ctx) else {
            return;
        };
        let mut status = StatusInfo::new(job_ctx.dev_id.clone());
        if let Err(e) = job.on_replay_end(&mut status) {
            warn!("Replay stop for job {} failed: {e}", job_ctx.task_key());
        }
        ctx.respond(job.transport(), job_ctx, status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::engine::IdentityMapper;
    use crate::device::test_support::MockFactory;
    use crate::transport::{recv_message, ChannelTransport, Transport};
    use msprof_common::{ReplayEvents, SampleConfig, Status};

    fn setup(factory: MockFactory) -> (MsgDispatcher, Arc<TaskManager>, ChannelTransport) {
        let (host, device) = ChannelTransport::pair();
        let task_manager = Arc::new(TaskManager::new(Arc::new(factory), Arc::new(IdentityMapper)));
        task_manager.init();
        let ctx = HandlerContext { task_manager: Arc::clone(&task_manager), transport: Arc::new(device) };
        let mut dispatcher = MsgDispatcher::new();
        register_job_handlers(&mut dispatcher, &ctx);
        (dispatcher, task_manager, host)
    }

    fn start(job_id: &str, dev_id: &str) -> Message {
        Message::JobStart { job_ctx: JobContext::new(job_id, dev_id), sample_config: SampleConfig::default() }
    }

    fn response_status(host: &ChannelTransport) -> StatusInfo {
        match recv_message(host).unwrap() {
            Message::Response { status, .. } => status,
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn test_start_and_stop_answer_with_success() {
        let (dispatcher, task_manager, host) = setup(MockFactory::default());
        dispatcher.on_new_message(Some(&start("abc", "0")));
        assert_eq!(response_status(&host).status, Status::Success);
        assert!(task_manager.get_task("abc_0").unwrap().is_started());

        let stop = Message::JobStop { job_ctx: JobContext::new("abc", "0") };
        dispatcher.on_new_message(Some(&stop));
        assert_eq!(response_status(&host).status, Status::Success);
        assert!(task_manager.get_task("abc_0").is_none());
    }

    #[test]
    fn test_duplicate_start_is_rejected() {
        let (dispatcher, _task_manager, host) = setup(MockFactory::default());
        dispatcher.on_new_message(Some(&start("abc", "0")));
        response_status(&host);
        dispatcher.on_new_message(Some(&start("abc", "0")));
        let status = response_status(&host);
        assert_eq!(status.status, Status::Failed);
        assert!(status.info.contains("already exists"));
    }

    #[test]
    fn test_failed_start_unregisters_job() {
        let factory = MockFactory { fail_start: true, ..MockFactory::default() };
        let (dispatcher, task_manager, host) = setup(factory);
        dispatcher.on_new_message(Some(&start("abc", "0")));
        assert_eq!(response_status(&host).status, Status::Failed);
        assert!(task_manager.is_empty());
    }

    #[test]
    fn test_bad_device_id_fails() {
        let (dispatcher, task_manager, host) = setup(MockFactory::default());
        dispatcher.on_new_message(Some(&start("abc", "x")));
        assert!(response_status(&host).info.contains("invalid device id"));
        assert!(task_manager.is_empty());
    }

    #[test]
    fn test_replay_for_unknown_job_sends_nothing() {
        let (dispatcher, _task_manager, host) = setup(MockFactory::default());
        let replay = Message::ReplayStart {
            job_ctx: JobContext::new("ghost", "0"),
            events: ReplayEvents::default(),
        };
        dispatcher.on_new_message(Some(&replay));
        dispatcher.on_new_message(Some(&Message::ReplayStop { job_ctx: JobContext::new("ghost", "0") }));

        // The next thing the host sees is the answer to a later start
        dispatcher.on_new_message(Some(&start("abc", "0")));
        match recv_message(&host).unwrap() {
            Message::Response { job_ctx, .. } => assert_eq!(job_ctx.job_id, "abc"),
            other => panic!("unexpected message {other:?}"),
        }
        host.close_session();
    }

    #[test]
    fn test_replay_round_trip() {
        let (dispatcher, _task_manager, host) = setup(MockFactory::default());
        dispatcher.on_new_message(Some(&start("abc", "0")));
        response_status(&host);

        let job_ctx = JobContext::new("abc", "0");
        dispatcher.on_new_message(Some(&Message::ReplayStart {
            job_ctx: job_ctx.clone(),
            events: ReplayEvents { ai_core_events: vec!["0x8".to_string()], ..ReplayEvents::default() },
        }));
        assert!(response_status(&host).is_success());
        dispatcher.on_new_message(Some(&Message::ReplayStop { job_ctx }));
        assert!(response_status(&host).is_success());
    }
}
