//! # Session Transport
//!
//! The ordered, reliable byte channel between host and device. Everything
//! above this module speaks [`Message`]s; everything below is framing.
//!
//! - [`Transport`] - Packet send/receive/close contract
//! - [`tcp::TcpTransport`] - Length-prefixed packets over TCP
//! - [`channel::ChannelTransport`] - In-process pair (crossbeam channels)
//! - [`encode_message`] / [`decode_message`] - JSON codec for [`Message`]

pub mod channel;
pub mod tcp;

use msprof_common::Message;
use std::sync::Arc;

use crate::domain::TransportError;

pub use channel::ChannelTransport;
pub use tcp::TcpTransport;

/// Largest packet accepted by either end
pub const MAX_PACKET_LEN: usize = 64 * 1024 * 1024;

/// One host↔device session
///
/// Implementations must allow `send_buffer` and `close_session` to be called
/// from any thread while another thread is blocked in `recv_packet`.
pub trait Transport: Send + Sync {
    /// Write one packet; returns the number of payload bytes sent
    ///
    /// # Errors
    /// Returns an error if the session is closed or the write fails
    fn send_buffer(&self, data: &[u8]) -> Result<usize, TransportError>;

    /// Block until the next packet arrives
    ///
    /// `Ok(None)` means the peer closed the session cleanly.
    ///
    /// # Errors
    /// Returns an error if the session broke or was closed locally
    fn recv_packet(&self) -> Result<Option<Vec<u8>>, TransportError>;

    /// Close the session; safe to call more than once
    fn close_session(&self);
}

/// Shared handle to a session
pub type SharedTransport = Arc<dyn Transport>;

/// Encode a message for the wire
///
/// # Errors
/// Returns an error if serialization fails
pub fn encode_message(message: &Message) -> Result<Vec<u8>, TransportError> {
    serde_json::to_vec(message).map_err(|e| TransportError::Encode(e.to_string()))
}

/// Decode a message received from the wire
///
/// # Errors
/// Returns an error if the payload is not a known message
pub fn decode_message(payload: &[u8]) -> Result<Message, TransportError> {
    serde_json::from_slice(payload).map_err(|e| TransportError::Decode(e.to_string()))
}

/// Encode and send one message
///
/// # Errors
/// Returns an error if encoding or sending fails
pub fn send_message(transport: &dyn Transport, message: &Message) -> Result<usize, TransportError> {
    let bytes = encode_message(message)?;
    transport.send_buffer(&bytes)
}

/// Block for the next message, failing on close or undecodable payloads
///
/// # Errors
/// Returns an error if the session closed or the payload does not decode
pub fn recv_message(transport: &dyn Transport) -> Result<Message, TransportError> {
    match transport.recv_packet()? {
        Some(payload) => decode_message(&payload),
        None => Err(TransportError::Closed),
    }
}
