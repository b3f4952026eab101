//! Length-prefixed packets over TCP
//!
//! Frame: 4-byte big-endian payload length followed by the payload.

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::Mutex;

use super::{Transport, MAX_PACKET_LEN};
use crate::domain::TransportError;

pub struct TcpTransport {
    reader: Mutex<TcpStream>,
    writer: Mutex<TcpStream>,
    peer: String,
}

impl TcpTransport {
    /// Wrap an accepted or connected stream
    ///
    /// # Errors
    /// Returns an error if the stream cannot be cloned for the read half
    pub fn new(stream: TcpStream) -> Result<Self, TransportError> {
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr().map_or_else(|_| "unknown".to_string(), |a| a.to_string());
        let reader = stream.try_clone()?;
        Ok(Self { reader: Mutex::new(reader), writer: Mutex::new(stream), peer })
    }

    /// Connect to a device agent
    ///
    /// # Errors
    /// Returns an error if the connection cannot be established
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self, TransportError> {
        Self::new(TcpStream::connect(addr)?)
    }

    #[must_use]
    pub fn peer(&self) -> &str {
        &self.peer
    }
}

impl Transport for TcpTransport {
    fn send_buffer(&self, data: &[u8]) -> Result<usize, TransportError> {
        if data.len() > MAX_PACKET_LEN {
            return Err(TransportError::FrameTooLarge(data.len()));
        }
        #[allow(clippy::cast_possible_truncation)]
        let len = (data.len() as u32).to_be_bytes();
        let mut stream = self.writer.lock().map_err(|_| TransportError::Closed)?;
        stream.write_all(&len)?;
        stream.write_all(data)?;
        stream.flush()?;
        Ok(data.len())
    }

    fn recv_packet(&self) -> Result<Option<Vec<u8>>, TransportError> {
        let mut stream = self.reader.lock().map_err(|_| TransportError::Closed)?;
        let mut len = [0u8; 4];
        match stream.read_exact(&mut len) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let len = u32::from_be_bytes(len) as usize;
        if len > MAX_PACKET_LEN {
            return Err(TransportError::FrameTooLarge(len));
        }
        let mut payload = vec![0u8; len];
        stream.read_exact(&mut payload)?;
        Ok(Some(payload))
    }

    fn close_session(&self) {
        if let Ok(stream) = self.writer.lock() {
            // NotConnected after the peer already went away is fine
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}
