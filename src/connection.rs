//! The SWTP engine: connection lifecycle, sliding-window send/receive,
//! acknowledgement bookkeeping, retransmission and keep-alive (§4, §5).

use std::fmt::Debug;
use std::sync::{Condvar, Mutex};
use std::time::Instant;

use log::{debug, info, trace, warn};

use crate::config::Config;
use crate::error::{Result, SwtpError};
use crate::frame::{self, ControlKind, Header, MAX_PAYLOAD_SIZE};
use crate::llp;
use crate::seq;
use crate::window::SendWindow;

/// Whoever calls `Connection::new` as the handshake initiator sends a SABM
/// immediately; the responder waits passively for one (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Handshaking,
    Connected,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    PeerDisc,
    Timeout,
}

/// The host capability a connection is constructed with: where received
/// payloads and teardown notifications go. Invoked outside the connection's
/// lock (§9 design notes — "Callback dispatch via interface abstraction").
pub trait Host: Send + Sync {
    fn on_receive(&self, payload: &[u8]);
    fn on_disconnect(&self, reason: DisconnectReason);
}

/// Where fully-serialized frames are handed off to. Implemented by the
/// UDP-backed sink in `socket.rs` for real use, and by channel-backed mocks
/// in tests.
pub trait FrameSink: Send + Sync {
    fn send(&self, bytes: &[u8]) -> Result<()>;
}

struct Inner {
    state: State,
    role: Role,
    local_capacity: u16,
    send_window: Option<SendWindow>,
    expected_receive_seq: u16,
    last_received_time: Instant,
    tests_sent: u32,
    peer_busy: bool,
}

/// A single SWTP connection. `A` is the (opaque to the engine) peer address
/// type; the engine never inspects it, only stores it for diagnostics.
pub struct Connection<A, H, S> {
    peer: A,
    host: H,
    sink: S,
    local_capacity: u16,
    config: Config,
    inner: Mutex<Inner>,
    window_not_full: Condvar,
}

impl<A, H, S> Connection<A, H, S>
where
    A: Debug + Clone,
    H: Host,
    S: FrameSink,
{
    /// Construct a connection and, if acting as the initiator, immediately
    /// transmit the opening SABM (§4.6). Corresponds to `Init` + the
    /// initiator's half of the SABM exchange in spec terms.
    pub fn new(peer: A, sink: S, host: H, config: Config, role: Role) -> Result<Self> {
        let local_capacity = config.receive_window_size;
        let conn = Connection {
            peer,
            host,
            sink,
            local_capacity,
            config,
            inner: Mutex::new(Inner {
                state: State::Handshaking,
                role,
                local_capacity,
                send_window: None,
                expected_receive_seq: 0,
                last_received_time: Instant::now(),
                tests_sent: 0,
                peer_busy: false,
            }),
            window_not_full: Condvar::new(),
        };
        if role == Role::Initiator {
            info!("{:?}: initiating handshake with capacity {}", conn.peer, local_capacity);
            let bytes = Header::Sabm { capacity: local_capacity }.encode();
            conn.sink.send(&bytes)?;
        }
        Ok(conn)
    }

    pub fn peer(&self) -> &A {
        &self.peer
    }

    pub fn state(&self) -> State {
        self.inner.lock().unwrap().state
    }

    pub fn local_capacity(&self) -> u16 {
        self.local_capacity
    }

    /// `SendPayload`: hand a raw L3 packet (already SWTLLP-tagged) to the
    /// engine. Blocks the caller while the send window is saturated instead
    /// of silently dropping the payload (this crate's resolution of OQ-1).
    pub fn send_payload(&self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > MAX_PAYLOAD_SIZE {
            return Err(SwtpError::PayloadTooLarge {
                size: bytes.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let mut inner = self.inner.lock().unwrap();
        if inner.state != State::Connected {
            return Err(SwtpError::NotConnected);
        }

        loop {
            let window = inner.send_window.as_ref().expect("connected implies sized window");
            if !window.is_full() && !inner.peer_busy {
                break;
            }
            trace!(
                "{:?}: blocked on send (window full: {}, peer busy: {})",
                self.peer,
                window.is_full(),
                inner.peer_busy
            );
            inner = self.window_not_full.wait(inner).unwrap();
            if inner.state != State::Connected {
                return Err(SwtpError::NotConnected);
            }
        }

        let expected = inner.expected_receive_seq;
        let window = inner.send_window.as_mut().unwrap();
        let next_seq = window.next_seq();
        let header = Header::Data {
            send_seq: next_seq,
            recv_seq: expected,
        };
        let frame = frame::encode_frame(header, bytes)?;
        self.sink.send(&frame)?;
        window.push(frame, Instant::now());
        Ok(())
    }

    /// `SendPayload` for an application packet that still needs the SWTLLP
    /// tag prepended; convenience wrapper over `send_payload`.
    pub fn send_llp_payload(&self, tun_frame: &[u8]) -> Result<()> {
        let tagged = llp::encapsulate(tun_frame)?;
        self.send_payload(&tagged)
    }

    /// `OnFrameReceived`.
    pub fn on_frame_received(&self, bytes: &[u8]) -> Result<()> {
        let (header, payload) = match frame::decode_frame(bytes) {
            Ok(v) => v,
            Err(e) => {
                warn!("{:?}: dropping malformed frame: {e}", self.peer);
                return Ok(());
            }
        };

        let mut inner = self.inner.lock().unwrap();
        if inner.state == State::Closed {
            return Ok(());
        }
        inner.last_received_time = Instant::now();
        inner.tests_sent = 0;

        match header {
            Header::Sabm { capacity: peer_capacity } => {
                self.handle_sabm(&mut inner, peer_capacity)?;
            }
            Header::Disc => {
                self.handle_disc(inner);
            }
            Header::Control { kind: ControlKind::Test, recv_seq } => {
                self.retire_through(&mut inner, recv_seq);
                self.send_rr(&inner)?;
            }
            Header::Control { kind: ControlKind::Srej, recv_seq } => {
                self.handle_srej(&mut inner, recv_seq)?;
            }
            Header::Control { kind: ControlKind::Rej, recv_seq } => {
                self.handle_rej(&mut inner, recv_seq)?;
            }
            Header::Control { kind: ControlKind::Rr, recv_seq } => {
                self.retire_through(&mut inner, recv_seq);
                if inner.peer_busy {
                    inner.peer_busy = false;
                    self.window_not_full.notify_all();
                }
            }
            Header::Control { kind: ControlKind::Rnr, recv_seq } => {
                self.retire_through(&mut inner, recv_seq);
                inner.peer_busy = true;
            }
            Header::Data { send_seq, recv_seq } => {
                self.handle_data(inner, send_seq, recv_seq, payload)?;
                return Ok(());
            }
        }

        Ok(())
    }

    fn handle_sabm(&self, inner: &mut Inner, peer_capacity: u16) -> Result<()> {
        match inner.state {
            State::Connected => {
                debug!("{:?}: ignoring SABM received while already connected", self.peer);
            }
            State::Closed => {}
            State::Handshaking => {
                let capacity = self.config.send_window_capacity(peer_capacity);
                inner.send_window = Some(SendWindow::new(capacity));
                inner.state = State::Connected;
                info!(
                    "{:?}: connected, send window capacity {} (peer advertised {})",
                    self.peer, capacity, peer_capacity
                );
                if inner.role == Role::Responder {
                    let bytes = Header::Sabm {
                        capacity: inner.local_capacity,
                    }
                    .encode();
                    self.sink.send(&bytes)?;
                }
            }
        }
        Ok(())
    }

    fn handle_disc(&self, mut inner: std::sync::MutexGuard<Inner>) {
        inner.state = State::Closed;
        self.window_not_full.notify_all();
        drop(inner);
        self.host.on_disconnect(DisconnectReason::PeerDisc);
    }

    fn handle_srej(&self, inner: &mut Inner, n: u16) -> Result<()> {
        let expected = inner.expected_receive_seq;
        let Some(window) = inner.send_window.as_mut() else {
            return Ok(());
        };
        if !window.contains(n) {
            return Ok(());
        }
        let bytes = {
            let slot = window.slot_mut(n).expect("contains() checked above");
            rewrite_recv_seq(&mut slot.frame, expected);
            slot.last_send_attempt = Instant::now();
            slot.frame.clone()
        };
        self.sink.send(&bytes)
    }

    fn handle_rej(&self, inner: &mut Inner, n: u16) -> Result<()> {
        let expected = inner.expected_receive_seq;
        let Some(window) = inner.send_window.as_mut() else {
            return Ok(());
        };
        let mut s = n;
        while window.contains(s) {
            let bytes = {
                let slot = window.slot_mut(s).expect("contains() checked above");
                rewrite_recv_seq(&mut slot.frame, expected);
                slot.last_send_attempt = Instant::now();
                slot.frame.clone()
            };
            self.sink.send(&bytes)?;
            s = seq::next(s);
        }
        Ok(())
    }

    fn handle_data(
        &self,
        mut inner: std::sync::MutexGuard<Inner>,
        send_seq: u16,
        recv_seq: u16,
        payload: &[u8],
    ) -> Result<()> {
        self.retire_through(&mut inner, recv_seq);
        if inner.peer_busy {
            inner.peer_busy = false;
            self.window_not_full.notify_all();
        }

        if inner.state != State::Connected {
            return Ok(());
        }

        if send_seq == inner.expected_receive_seq {
            inner.expected_receive_seq = seq::next(inner.expected_receive_seq);
            self.send_rr(&inner)?;

            let owned = payload.to_vec();
            drop(inner);
            if let Some(tun_frame) = llp::decapsulate(&owned)? {
                self.host.on_receive(&tun_frame);
            }
            return Ok(());
        }

        // How far ahead the peer could legitimately have sent is bounded by
        // *our* advertised receive capacity (the peer sizes its outbound
        // send window to that value at handshake time, §4.6), not by our
        // own outbound send window's capacity.
        let distance = seq::distance(send_seq, inner.expected_receive_seq);
        if distance <= inner.local_capacity {
            let expected = inner.expected_receive_seq;
            self.send_reject(&inner, expected)?;
        } else {
            trace!(
                "{:?}: discarding stale retransmission (seq {send_seq}, expected {})",
                self.peer, inner.expected_receive_seq
            );
        }
        Ok(())
    }

    fn send_rr(&self, inner: &Inner) -> Result<()> {
        let bytes = Header::Control {
            kind: ControlKind::Rr,
            recv_seq: inner.expected_receive_seq,
        }
        .encode();
        self.sink.send(&bytes)
    }

    fn send_reject(&self, inner: &Inner, expected: u16) -> Result<()> {
        let bytes = Header::Control {
            kind: ControlKind::Rej,
            recv_seq: expected,
        }
        .encode();
        self.sink.send(&bytes)
    }

    fn retire_through(&self, inner: &mut Inner, ack_seq: u16) {
        let Some(window) = inner.send_window.as_mut() else {
            return;
        };
        match window.retire_through(ack_seq) {
            Ok(0) => {}
            Ok(n) => {
                trace!("{:?}: retired {n} frame(s) through {ack_seq}", self.peer);
                self.window_not_full.notify_all();
            }
            Err(()) => {
                warn!("{:?}: stale/garbled acknowledgement for {ack_seq}, ignoring", self.peer);
            }
        }
    }

    /// `OnTimerTick`, invoked at roughly 1 Hz (§4.5). No-op unless Connected.
    pub fn on_timer_tick(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != State::Connected {
            return Ok(());
        }

        let now = Instant::now();
        let idle = now.duration_since(inner.last_received_time);

        if idle >= self.config.ping_timeout {
            if idle.saturating_sub(self.config.ping_timeout)
                >= self.config.timeout * self.config.max_retry
            {
                inner.state = State::Closed;
                let window = inner.send_window.take();
                drop(window);
                self.window_not_full.notify_all();
                drop(inner);
                warn!("{:?}: idle timeout exceeded, disconnecting", self.peer);
                self.host.on_disconnect(DisconnectReason::Timeout);
                return Ok(());
            }

            let past_ping = idle - self.config.ping_timeout;
            let expected_tests =
                (past_ping.as_millis() / self.config.timeout.as_millis().max(1)) as u32 + 1;
            while inner.tests_sent < expected_tests {
                let bytes = Header::Control {
                    kind: ControlKind::Test,
                    recv_seq: inner.expected_receive_seq,
                }
                .encode();
                self.sink.send(&bytes)?;
                inner.tests_sent += 1;
            }
        }

        let timeout = self.config.timeout;
        let expected = inner.expected_receive_seq;
        if let Some(window) = inner.send_window.as_mut() {
            // Can't stop at the first fresh slot: SREJ/REJ handling refreshes
            // a single slot's `last_send_attempt` out of FIFO order, so
            // later slots may still be stale even once an earlier one isn't.
            let stale: Vec<u16> = window
                .iter()
                .filter(|(_, slot)| now.duration_since(slot.last_send_attempt) >= timeout)
                .map(|(s, _)| s)
                .collect();
            for s in stale {
                let bytes = {
                    let slot = window.slot_mut(s).expect("sequence came from this window");
                    rewrite_recv_seq(&mut slot.frame, expected);
                    slot.last_send_attempt = now;
                    slot.frame.clone()
                };
                self.sink.send(&bytes)?;
            }
        }

        Ok(())
    }

    /// Send-side explicit teardown.
    pub fn disconnect(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.state == State::Closed {
            return Ok(());
        }
        self.sink.send(&Header::Disc.encode())?;
        inner.state = State::Closed;
        inner.send_window = None;
        self.window_not_full.notify_all();
        Ok(())
    }
}

fn rewrite_recv_seq(frame: &mut [u8], recv_seq: u16) {
    let send_seq = match Header::decode(frame) {
        Ok(Header::Data { send_seq, .. }) => send_seq,
        _ => return,
    };
    frame[0..frame::HEADER_SIZE].copy_from_slice(
        &Header::Data { send_seq, recv_seq }.encode(),
    );
}
