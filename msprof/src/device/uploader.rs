//! Data channel uploader
//!
//! Collected data leaves the device through the job's data session. Producers
//! (the collection engine) enqueue file chunks; one worker thread per session
//! turns them into [`Message::Data`] packets in order. The queue is bounded, so
//! a slow host applies back-pressure to the producer instead of growing memory.

use crossbeam_channel::{bounded, Sender};
use log::{debug, error, info, warn};
use msprof_common::{JobContext, Message};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crate::domain::TransportError;
use crate::transport::{send_message, SharedTransport};

/// Chunks queued before `upload` blocks
const UPLOAD_QUEUE_DEPTH: usize = 256;

/// Largest payload of a single data packet
pub const MAX_CHUNK_LEN: usize = 1024 * 1024;

struct Chunk {
    file_name: String,
    payload: Vec<u8>,
}

pub struct Uploader {
    job_ctx: JobContext,
    transport: SharedTransport,
    tx: Mutex<Option<Sender<Chunk>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Uploader {
    /// Attach an uploader to a data session and start its worker
    ///
    /// # Errors
    /// Returns an error if the worker thread cannot be spawned
    pub fn start(job_ctx: JobContext, transport: SharedTransport) -> std::io::Result<Arc<Self>> {
        let (tx, rx) = bounded::<Chunk>(UPLOAD_QUEUE_DEPTH);
        let worker_transport = Arc::clone(&transport);
        let worker_ctx = job_ctx.clone();
        let handle = thread::Builder::new()
            .name(format!("msprof-upload-{}", job_ctx.dev_id))
            .spawn(move || {
                for chunk in rx {
                    let message = Message::Data {
                        job_ctx: worker_ctx.clone(),
                        file_name: chunk.file_name,
                        payload: chunk.payload,
                    };
                    if let Err(e) = send_message(worker_transport.as_ref(), &message) {
                        error!("Data session of job {} broke: {e}", worker_ctx.task_key());
                        break;
                    }
                }
                debug!("Uploader for job {} drained", worker_ctx.task_key());
            })?;

        info!("Uploader attached for job {}", job_ctx.task_key());
        Ok(Arc::new(Self {
            job_ctx,
            transport,
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(handle)),
        }))
    }

    /// Queue `data` for upload as (part of) `file_name`
    ///
    /// Large buffers are split into chunks of at most [`MAX_CHUNK_LEN`] bytes;
    /// the host appends chunks of the same file in arrival order.
    ///
    /// # Errors
    /// Returns `Closed` once the uploader was stopped or its session broke
    pub fn upload(&self, file_name: &str, data: &[u8]) -> Result<(), TransportError> {
        let guard = self.tx.lock().map_err(|_| TransportError::Closed)?;
        let tx = guard.as_ref().ok_or(TransportError::Closed)?;
        for part in data.chunks(MAX_CHUNK_LEN) {
            let chunk = Chunk { file_name: file_name.to_string(), payload: part.to_vec() };
            tx.send(chunk).map_err(|_| TransportError::Closed)?;
        }
        Ok(())
    }

    /// Drain the queue, close the data session and join the worker
    pub fn stop(&self) {
        if let Ok(mut tx) = self.tx.lock() {
            tx.take();
        }
        let handle = self.worker.lock().ok().and_then(|mut worker| worker.take());
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("Uploader worker of job {} panicked", self.job_ctx.task_key());
            }
        }
        self.transport.close_session();
    }

    #[must_use]
    pub fn job_ctx(&self) -> &JobContext {
        &self.job_ctx
    }
}

/// Uploaders of all jobs, keyed by task key (`"<job_id>_<dev_id>"`)
#[derive(Default)]
pub struct UploaderRegistry {
    uploaders: Mutex<HashMap<String, Arc<Uploader>>>,
}

impl UploaderRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `uploader`; a previous uploader for the same job is stopped
    pub fn add(&self, uploader: Arc<Uploader>) {
        let key = uploader.job_ctx().task_key();
        let previous = self
            .uploaders
            .lock()
            .ok()
            .and_then(|mut uploaders| uploaders.insert(key, uploader));
        if let Some(previous) = previous {
            previous.stop();
        }
    }

    #[must_use]
    pub fn get(&self, task_key: &str) -> Option<Arc<Uploader>> {
        self.uploaders.lock().ok().and_then(|uploaders| uploaders.get(task_key).cloned())
    }

    /// Remove and stop the uploader of `task_key`
    pub fn remove(&self, task_key: &str) -> bool {
        let removed = self.uploaders.lock().ok().and_then(|mut uploaders| uploaders.remove(task_key));
        match removed {
            Some(uploader) => {
                uploader.stop();
                true
            }
            None => false,
        }
    }

    /// Stop every uploader
    pub fn clear(&self) {
        let drained: Vec<Arc<Uploader>> = self
            .uploaders
            .lock()
            .map(|mut uploaders| uploaders.drain().map(|(_, u)| u).collect())
            .unwrap_or_default();
        for uploader in drained {
            uploader.stop();
        }
    }
}
