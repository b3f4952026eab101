//! Child process handling
//!
//! A spawned task is polled with `try_wait` instead of a blocking `wait` so
//! the waiting thread notices cancellation within one poll interval.

#![allow(unsafe_code)] // kill() requires unsafe

use log::{debug, info, warn};
use std::process::{Child, Command, ExitStatus};
use std::thread;
use std::time::{Duration, Instant};

use super::cancel::CancelToken;
use crate::domain::{ModeError, Pid};

/// Poll interval of [`TaskProcess::wait`]
pub const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Grace period between SIGINT and SIGKILL
const INTERRUPT_GRACE: Duration = Duration::from_secs(2);

pub struct TaskProcess {
    name: String,
    child: Child,
}

impl TaskProcess {
    /// Spawn `command` as the task `name`
    ///
    /// # Errors
    /// Returns an error if the process cannot be spawned
    pub fn spawn(name: &str, command: &mut Command) -> Result<Self, ModeError> {
        let child = command.spawn().map_err(|e| ModeError::TaskFailed {
            name: name.to_string(),
            reason: format!("failed to spawn: {e}"),
        })?;
        info!("Started {name} ({})", Pid(child.id()));
        Ok(Self { name: name.to_string(), child })
    }

    #[must_use]
    pub fn pid(&self) -> Pid {
        Pid(self.child.id())
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait for the process to exit, interrupting it if `cancel` fires
    ///
    /// # Errors
    /// Returns `Cancelled` if the wait was cancelled, or an I/O error
    pub fn wait(&mut self, cancel: &CancelToken) -> Result<ExitStatus, ModeError> {
        loop {
            if let Some(status) = self.child.try_wait()? {
                debug!("{} ({}) exited with {status}", self.name, self.pid());
                return Ok(status);
            }
            if cancel.is_cancelled() {
                self.interrupt();
                return Err(ModeError::Cancelled);
            }
            thread::sleep(WAIT_POLL_INTERVAL);
        }
    }

    /// SIGINT the process, then kill it if it is still alive after a grace period
    pub fn interrupt(&mut self) {
        if matches!(self.child.try_wait(), Ok(Some(_))) {
            return;
        }
        let Ok(raw_pid) = libc::pid_t::try_from(self.child.id()) else {
            warn!("{} has an out of range pid, killing", self.name);
            self.kill();
            return;
        };
        // SAFETY: kill() only sends a signal to the child we spawned
        if unsafe { libc::kill(raw_pid, libc::SIGINT) } != 0 {
            debug!("SIGINT to {} failed: {}", self.pid(), std::io::Error::last_os_error());
        }
        let deadline = Instant::now() + INTERRUPT_GRACE;
        while Instant::now() < deadline {
            if matches!(self.child.try_wait(), Ok(Some(_))) {
                return;
            }
            thread::sleep(WAIT_POLL_INTERVAL);
        }
        self.kill();
    }

    fn kill(&mut self) {
        if let Err(e) = self.child.kill() {
            debug!("Kill of {} failed: {e}", self.pid());
        }
        let _ = self.child.wait();
        warn!("{} ({}) killed", self.name, self.pid());
    }
}

/// Split an application command line on whitespace into program and args
#[must_use]
pub fn split_command_line(command_line: &str) -> Option<(String, Vec<String>)> {
    let mut parts = command_line.split_whitespace().map(str::to_string);
    let program = parts.next()?;
    Some((program, parts.collect()))
}
