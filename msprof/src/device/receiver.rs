//! # Control Session Receiver
//!
//! One [`Receiver`] per accepted control session. It owns the session and a
//! [`MsgDispatcher`] wired to the job lifecycle handlers, and runs a blocking
//! receive loop on its own thread:
//!
//! ```text
//! recv_packet ──▶ decode ──▶ dispatcher ──▶ handler ──▶ TaskManager / job
//!      │
//!      └─ closed or broken ──▶ TaskManager::connection_reset ──▶ stop
//! ```
//!
//! Messages on one session are handled strictly in arrival order on the
//! receive thread itself. A broken session is final for its receiver; there
//! is no reconnect.

use log::{debug, info, warn};
use msprof_common::Message;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle};

use super::collection_entry::CollectionFinisher;
use super::dispatcher::MsgDispatcher;
use super::handlers::{register_job_handlers, HandlerContext};
use super::task_manager::TaskManager;
use crate::domain::TransportError;
use crate::transport::{decode_message, send_message, SharedTransport};

const INVALID_DEV_ID: i32 = -1;

pub struct Receiver {
    transport: SharedTransport,
    task_manager: Arc<TaskManager>,
    dispatcher: Option<MsgDispatcher>,
    job_id: String,
    dev_id: AtomicI32,
    inited: AtomicBool,
    quit: AtomicBool,
    thread: Mutex<Option<JoinHandle<()>>>,
    finisher: Option<Weak<dyn CollectionFinisher>>,
}

impl Receiver {
    #[must_use]
    pub fn new(transport: SharedTransport, task_manager: Arc<TaskManager>, job_id: &str) -> Self {
        Self {
            transport,
            task_manager,
            dispatcher: None,
            job_id: job_id.to_string(),
            dev_id: AtomicI32::new(INVALID_DEV_ID),
            inited: AtomicBool::new(false),
            quit: AtomicBool::new(false),
            thread: Mutex::new(None),
            finisher: None,
        }
    }

    /// Notify `finisher` when the session drops
    #[must_use]
    pub fn with_finisher(mut self, finisher: Weak<dyn CollectionFinisher>) -> Self {
        self.finisher = Some(finisher);
        self
    }

    /// Build the dispatcher and bind the receiver to `dev_id`
    pub fn init(&mut self, dev_id: i32) {
        let ctx = HandlerContext {
            task_manager: Arc::clone(&self.task_manager),
            transport: Arc::clone(&self.transport),
        };
        let mut dispatcher = MsgDispatcher::new();
        register_job_handlers(&mut dispatcher, &ctx);
        self.dispatcher = Some(dispatcher);
        self.dev_id.store(dev_id, Ordering::SeqCst);
        self.inited.store(true, Ordering::SeqCst);
    }

    /// Spawn the receive thread
    ///
    /// # Errors
    /// Returns an error if the thread cannot be spawned
    pub fn start(self: &Arc<Self>) -> std::io::Result<()> {
        let receiver = Arc::clone(self);
        let handle = thread::Builder::new()
            .name(format!("msprof-recv-{}", self.dev_id()))
            .spawn(move || receiver.run())?;
        if let Ok(mut thread) = self.thread.lock() {
            *thread = Some(handle);
        }
        Ok(())
    }

    /// Receive loop; returns when the session breaks or a stop was requested
    pub fn run(&self) {
        let Some(dispatcher) = self.dispatcher.as_ref() else {
            warn!("Receiver for job {} started before init", self.job_id);
            return;
        };
        info!("Receiver for job {} on device {} running", self.job_id, self.dev_id());

        while !self.is_quit() {
            match self.transport.recv_packet() {
                Ok(Some(payload)) => {
                    let message = decode_message(&payload)
                        .map_err(|e| debug!("Dropping undecodable packet: {e}"))
                        .ok();
                    dispatcher.on_new_message(message.as_ref());
                }
                Ok(None) | Err(_) => {
                    let requested = self.is_quit();
                    if !requested {
                        info!("Session of job {} on device {} lost", self.job_id, self.dev_id());
                    }
                    let reset = self.task_manager.connection_reset(&self.transport);
                    if reset > 0 {
                        info!("Reset {reset} job(s) bound to the lost session");
                    }
                    self.quit.store(true, Ordering::SeqCst);
                    if !requested {
                        self.notify_finished();
                    }
                    break;
                }
            }
        }
        debug!("Receiver for job {} exited", self.job_id);
    }

    fn notify_finished(&self) {
        if let Some(finisher) = self.finisher.as_ref().and_then(Weak::upgrade) {
            finisher.finish_collection(self.dev_id(), &self.job_id);
        }
    }

    /// Close the session and stop the receive thread
    pub fn uinit(&self) {
        self.quit.store(true, Ordering::SeqCst);
        self.transport.close_session();
        let handle = self.thread.lock().ok().and_then(|mut thread| thread.take());
        if let Some(handle) = handle {
            // The receive thread may tear itself down; it cannot join itself
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
        self.dev_id.store(INVALID_DEV_ID, Ordering::SeqCst);
        self.inited.store(false, Ordering::SeqCst);
    }

    /// Encode and send `message` on this session
    ///
    /// # Errors
    /// Returns the transport's error
    pub fn send_message(&self, message: &Message) -> Result<usize, TransportError> {
        send_message(self.transport.as_ref(), message)
    }

    #[must_use]
    pub fn is_quit(&self) -> bool {
        self.quit.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_inited(&self) -> bool {
        self.inited.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn dev_id(&self) -> i32 {
        self.dev_id.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    #[must_use]
    pub fn transport(&self) -> &SharedTransport {
        &self.transport
    }
}
