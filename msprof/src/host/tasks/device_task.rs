//! Device collection over the agent's sessions
//!
//! Start opens a control session, registers the job with `JobStart`, then
//! attaches a data session whose packets a collector thread writes to
//! `<job>/device_<id>/data/`. Stop sends `JobStop`, closes the control
//! session (which makes the agent flush and close the data session) and
//! waits for the collector to drain.

use log::{debug, info, warn};
use msprof_common::{ChannelKind, Handshake, JobContext, Message, SampleConfig};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::ProfTask;
use crate::domain::{ModeError, TransportError};
use crate::transport::{recv_message, send_message, SharedTransport, TcpTransport, Transport};

/// Session mode announced in the handshake
const SESSION_MODE: &str = "system";

/// Opens a session to the device agent
pub trait SessionConnector: Send + Sync {
    /// # Errors
    /// Returns an error if the agent is unreachable
    fn connect(&self) -> Result<SharedTransport, TransportError>;
}

/// Connects to the agent over TCP
pub struct TcpConnector(pub String);

impl SessionConnector for TcpConnector {
    fn connect(&self) -> Result<SharedTransport, TransportError> {
        Ok(Arc::new(TcpTransport::connect(self.0.as_str())?))
    }
}

pub struct DeviceRpcTask {
    name: String,
    connector: Arc<dyn SessionConnector>,
    job_ctx: JobContext,
    config: SampleConfig,
    data_dir: PathBuf,
    control: Option<SharedTransport>,
    collector: Option<JoinHandle<Result<usize, ModeError>>>,
}

impl DeviceRpcTask {
    #[must_use]
    pub fn new(
        connector: Arc<dyn SessionConnector>,
        job_ctx: JobContext,
        config: SampleConfig,
        job_dir: &Path,
    ) -> Self {
        let data_dir = job_dir.join(format!("device_{}", job_ctx.dev_id)).join("data");
        Self {
            name: format!("device job {}", job_ctx.task_key()),
            connector,
            job_ctx,
            config,
            data_dir,
            control: None,
            collector: None,
        }
    }

    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn handshake(&self, channel: ChannelKind) -> Result<Vec<u8>, ModeError> {
        let dev_id = self.job_ctx.dev_id.parse::<i32>().map_err(|_| ModeError::InvalidValue {
            arg: "--sys-devices",
            reason: format!("invalid device id {:?}", self.job_ctx.dev_id),
        })?;
        let handshake = Handshake {
            channel,
            job_id: self.job_ctx.job_id.clone(),
            mode: SESSION_MODE.to_string(),
            dev_id,
        };
        Ok(serde_json::to_vec(&handshake)?)
    }

    fn failed(&self, reason: impl Into<String>) -> ModeError {
        ModeError::TaskFailed { name: self.name.clone(), reason: reason.into() }
    }

    /// Send `request` and wait for its response
    fn request(&self, control: &dyn Transport, request: &Message) -> Result<(), ModeError> {
        send_message(control, request)?;
        self.await_response(control)
    }

    fn await_response(&self, session: &dyn Transport) -> Result<(), ModeError> {
        match recv_message(session)? {
            Message::Response { status, .. } if status.is_success() => Ok(()),
            Message::Response { status, .. } => Err(self.failed(status.info)),
            other => Err(self.failed(format!("unexpected {:?} instead of a response", other.kind()))),
        }
    }

    fn start_collector(&mut self) -> Result<(), ModeError> {
        let data = self.connector.connect()?;
        data.send_buffer(&self.handshake(ChannelKind::Data)?)?;
        // The agent confirms the uploader is attached before any JobStop can race it
        if let Err(e) = self.await_response(data.as_ref()) {
            data.close_session();
            return Err(e);
        }
        fs::create_dir_all(&self.data_dir)?;
        let data_dir = self.data_dir.clone();
        let handle = thread::Builder::new()
            .name(format!("msprof-collect-{}", self.job_ctx.dev_id))
            .spawn(move || collect(data.as_ref(), &data_dir))?;
        self.collector = Some(handle);
        Ok(())
    }
}

/// Write every data packet of the session to `data_dir` until it closes
fn collect(data: &dyn Transport, data_dir: &Path) -> Result<usize, ModeError> {
    let mut files: HashMap<String, File> = HashMap::new();
    let mut bytes = 0;
    loop {
        let message = match recv_message(data) {
            Ok(message) => message,
            Err(TransportError::Closed) => break,
            Err(TransportError::Decode(e)) => {
                debug!("Dropping undecodable data packet: {e}");
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        let Message::Data { file_name, payload, .. } = message else {
            continue;
        };
        // Only the final component; never write outside the data directory
        let Some(name) = Path::new(&file_name).file_name().map(|n| n.to_string_lossy().into_owned())
        else {
            warn!("Ignoring data for invalid file name {file_name:?}");
            continue;
        };
        let file = match files.entry(name) {
            std::collections::hash_map::Entry::Occupied(entry) => entry.into_mut(),
            std::collections::hash_map::Entry::Vacant(entry) => {
                let file = File::create(data_dir.join(entry.key()))?;
                entry.insert(file)
            }
        };
        file.write_all(&payload)?;
        bytes += payload.len();
    }
    data.close_session();
    Ok(bytes)
}

impl ProfTask for DeviceRpcTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self) -> Result<(), ModeError> {
        if self.control.is_some() {
            return Ok(());
        }
        let control = self.connector.connect()?;
        control.send_buffer(&self.handshake(ChannelKind::Control)?)?;
        let start = Message::JobStart { job_ctx: self.job_ctx.clone(), sample_config: self.config.clone() };
        if let Err(e) = self.request(control.as_ref(), &start) {
            control.close_session();
            return Err(e);
        }
        self.control = Some(Arc::clone(&control));

        if let Err(e) = self.start_collector() {
            warn!("No data session for {}: {e}", self.name);
            let _ = self.stop();
            return Err(e);
        }
        info!("Device collection started for job {}", self.job_ctx.task_key());
        Ok(())
    }

    fn stop(&mut self) -> Result<(), ModeError> {
        let Some(control) = self.control.take() else {
            return Ok(());
        };
        let stop = Message::JobStop { job_ctx: self.job_ctx.clone() };
        let stopped = self.request(control.as_ref(), &stop);
        control.close_session();

        if let Some(collector) = self.collector.take() {
            let bytes = collector.join().map_err(|_| self.failed("collector thread panicked"))??;
            info!("Collected {bytes} bytes from device {} into {}", self.job_ctx.dev_id, self.data_dir.display());
        }
        stopped
    }
}
