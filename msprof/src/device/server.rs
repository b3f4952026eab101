//! TCP session acceptor of the device agent
//!
//! Every accepted connection gets its own short-lived thread that reads the
//! handshake under [`HANDSHAKE_TIMEOUT`] and hands the session to the
//! [`CollectionEntry`](super::CollectionEntry). A client that connects and
//! stays silent only ties up its own thread.

use log::{debug, info, warn};
use msprof_common::Handshake;
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use super::context::DeviceContext;
use crate::domain::{RegistryError, TransportError};
use crate::transport::{SharedTransport, TcpTransport, Transport};

/// Longest wait for the first packet of a new session
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Read the handshake of a new session and route it
///
/// # Errors
/// Fails if the handshake does not arrive in time or does not parse, names a
/// device this agent does not serve, or is refused by the collection entry.
/// The session is closed on failure.
pub fn accept_session(ctx: &DeviceContext, stream: TcpStream, devices: u32) -> Result<(), RegistryError> {
    stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT)).map_err(TransportError::from)?;
    let timeout_handle = stream.try_clone().map_err(TransportError::from)?;
    let transport: SharedTransport = Arc::new(TcpTransport::new(stream)?);

    let result = read_handshake(transport.as_ref()).and_then(|handshake| {
        let in_range = u32::try_from(handshake.dev_id).is_ok_and(|dev| dev < devices);
        if !in_range {
            return Err(RegistryError::Handshake(format!(
                "device {} is not served by this agent",
                handshake.dev_id
            )));
        }
        // Sessions block on reads for their whole life once routed
        timeout_handle.set_read_timeout(None).map_err(TransportError::from)?;
        ctx.collection_entry.handle_handshake(Arc::clone(&transport), &handshake, handshake.dev_id)
    });
    if result.is_err() {
        transport.close_session();
    }
    result
}

fn read_handshake(transport: &dyn Transport) -> Result<Handshake, RegistryError> {
    let raw = transport
        .recv_packet()?
        .ok_or_else(|| RegistryError::Handshake("session closed before its handshake".to_string()))?;
    serde_json::from_slice(&raw).map_err(|e| RegistryError::Handshake(e.to_string()))
}

/// Accept sessions on `listener` until it fails for good
pub fn serve(ctx: &Arc<DeviceContext>, listener: &TcpListener, devices: u32) {
    for stream in listener.incoming() {
        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Accept failed: {e}");
                continue;
            }
        };
        let peer = stream.peer_addr().map_or_else(|_| "unknown".to_string(), |a| a.to_string());
        debug!("Session from {peer}");
        let session_ctx = Arc::clone(ctx);
        let spawned = thread::Builder::new().name("msprofd-session".to_string()).spawn(move || {
            if let Err(e) = accept_session(&session_ctx, stream, devices) {
                warn!("Rejected session from {peer}: {e}");
            }
        });
        if let Err(e) = spawned {
            warn!("Cannot start a session thread: {e}");
        }
    }
    info!("Accept loop stopped");
}
