//! In-process transport built on crossbeam channels
//!
//! Used to wire a host-side task to an in-process device agent and by the
//! test suite. Closing either end breaks both directions.

use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender};
use std::sync::Mutex;

use super::Transport;
use crate::domain::TransportError;

pub struct ChannelTransport {
    tx: Mutex<Option<Sender<Vec<u8>>>>,
    rx: Receiver<Vec<u8>>,
    /// Dropped on close so a blocked `recv_packet` wakes up
    close_tx: Mutex<Option<Sender<()>>>,
    close_rx: Receiver<()>,
}

impl ChannelTransport {
    /// Create two connected ends
    #[must_use]
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = unbounded();
        let (b_tx, b_rx) = unbounded();
        (Self::new(a_tx, b_rx), Self::new(b_tx, a_rx))
    }

    fn new(tx: Sender<Vec<u8>>, rx: Receiver<Vec<u8>>) -> Self {
        let (close_tx, close_rx) = bounded(0);
        Self {
            tx: Mutex::new(Some(tx)),
            rx,
            close_tx: Mutex::new(Some(close_tx)),
            close_rx,
        }
    }

    fn is_closed(&self) -> bool {
        self.close_tx.lock().map_or(true, |guard| guard.is_none())
    }
}

impl Transport for ChannelTransport {
    fn send_buffer(&self, data: &[u8]) -> Result<usize, TransportError> {
        let guard = self.tx.lock().map_err(|_| TransportError::Closed)?;
        let tx = guard.as_ref().ok_or(TransportError::Closed)?;
        tx.send(data.to_vec()).map_err(|_| TransportError::Closed)?;
        Ok(data.len())
    }

    fn recv_packet(&self) -> Result<Option<Vec<u8>>, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        select! {
            recv(self.rx) -> packet => Ok(packet.ok()),
            recv(self.close_rx) -> _ => Err(TransportError::Closed),
        }
    }

    fn close_session(&self) {
        if let Ok(mut tx) = self.tx.lock() {
            tx.take();
        }
        if let Ok(mut close_tx) = self.close_tx.lock() {
            close_tx.take();
        }
    }
}
