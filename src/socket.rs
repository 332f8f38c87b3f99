//! UDP-backed `FrameSink` and the shared `Host` used by both binaries (§6, §9.4).

use std::net::{SocketAddr, UdpSocket};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};

use log::{info, warn};

use crate::connection::{DisconnectReason, FrameSink, Host};
use crate::error::Result;

/// Sends every frame to one fixed peer over a shared UDP socket.
pub struct UdpFrameSink {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
}

impl UdpFrameSink {
    pub fn new(socket: Arc<UdpSocket>, peer: SocketAddr) -> Self {
        UdpFrameSink { socket, peer }
    }
}

impl FrameSink for UdpFrameSink {
    fn send(&self, bytes: &[u8]) -> Result<()> {
        self.socket.send_to(bytes, self.peer)?;
        Ok(())
    }
}

/// Writes received L3 packets to the TUN device and reports teardown back to
/// the owning thread so it can drop its side of the connection table.
///
/// The sender is wrapped in a `Mutex` solely because `mpsc::Sender` is `Send`
/// but not `Sync`, and a `Host` is accessed through a shared `&Connection`
/// from several threads at once.
pub struct TunHost<W> {
    tun_writer: Arc<Mutex<W>>,
    peer: SocketAddr,
    disconnects: Mutex<Sender<SocketAddr>>,
}

impl<W> TunHost<W> {
    pub fn new(tun_writer: Arc<Mutex<W>>, peer: SocketAddr, disconnects: Sender<SocketAddr>) -> Self {
        TunHost {
            tun_writer,
            peer,
            disconnects: Mutex::new(disconnects),
        }
    }
}

impl<W> Host for TunHost<W>
where
    W: std::io::Write + Send,
{
    fn on_receive(&self, payload: &[u8]) {
        let mut w = self.tun_writer.lock().unwrap();
        if let Err(e) = w.write_all(payload) {
            warn!("{}: failed writing decapsulated packet to tun: {e}", self.peer);
        }
    }

    fn on_disconnect(&self, reason: DisconnectReason) {
        info!("{}: disconnected ({reason:?})", self.peer);
        let _ = self.disconnects.lock().unwrap().send(self.peer);
    }
}
