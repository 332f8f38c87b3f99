//! Server binary: accepts SWTP connections from many clients over a single
//! UDP socket and bridges them all through one TUN device (§9.4), mirroring
//! the original server's client-list design with a `HashMap` keyed on the
//! peer's socket address instead of a fixed-size array.

use std::collections::HashMap;
use std::io::Read;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use clap::Parser;
use log::{error, info, warn};

use swtp::config::Config;
use swtp::connection::Connection;
use swtp::frame::{self, Header};
use swtp::socket::{TunHost, UdpFrameSink};
use swtp::tun;
use swtp::Role;

#[derive(Parser, Debug)]
#[command(name = "swtp-server", about = "Terminate SWTP connections onto a TUN device")]
struct Args {
    /// UDP port to listen on.
    #[arg(long, default_value_t = 5228)]
    port: u16,

    /// Name of the TUN device to create.
    #[arg(long, default_value = "swtp0")]
    tun_name: String,

    /// IPv4 address assigned to the TUN device.
    #[arg(long, default_value = "10.10.10.1")]
    tun_addr: Ipv4Addr,

    /// IPv4 netmask assigned to the TUN device.
    #[arg(long, default_value = "255.255.255.0")]
    tun_netmask: Ipv4Addr,

    /// Advertised receive-window capacity offered to each client.
    #[arg(long, default_value_t = 16)]
    receive_window_size: u16,

    /// Upper bound on the send window regardless of what a client offers.
    #[arg(long)]
    max_send_window_size: Option<u16>,
}

type SharedConnection = Arc<Connection<SocketAddr, TunHost<std::fs::File>, UdpFrameSink>>;

fn main() {
    env_logger::init();
    if let Err(e) = run(Args::parse()) {
        error!("fatal: {e}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> swtp::Result<()> {
    let tun_reader = tun::open(&args.tun_name, args.tun_addr, args.tun_netmask)?;
    let tun_writer = Arc::new(Mutex::new(tun::duplicate_writer(&tun_reader)?));

    let socket = Arc::new(UdpSocket::bind(("0.0.0.0", args.port))?);
    info!("listening on 0.0.0.0:{}", args.port);

    let config = Config::new(
        args.receive_window_size,
        args.max_send_window_size,
        Duration::from_secs(1),
        Duration::from_secs(5),
        3,
    )?;

    let clients: Arc<Mutex<HashMap<SocketAddr, SharedConnection>>> =
        Arc::new(Mutex::new(HashMap::new()));
    let (disconnect_tx, disconnect_rx) = mpsc::channel::<SocketAddr>();

    // Reaps disconnected clients from the table as the connections announce
    // their own teardown; keeps the map from growing without bound.
    {
        let clients = clients.clone();
        thread::spawn(move || {
            while let Ok(peer) = disconnect_rx.recv() {
                clients.lock().unwrap().remove(&peer);
            }
        });
    }

    let _uplink = {
        let clients = clients.clone();
        let mut tun_reader = tun_reader;
        thread::spawn(move || loop {
            let mut buf = [0u8; 1500];
            match tun_reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    // Without routing information this server fans an uplink
                    // packet out to every connected client; a real deployment
                    // would consult the destination address against each
                    // client's assigned tunnel subnet.
                    let conns: Vec<_> = clients.lock().unwrap().values().cloned().collect();
                    for conn in conns {
                        if let Err(e) = conn.send_llp_payload(&buf[..n]) {
                            warn!("{:?}: dropping downlink packet: {e}", conn.peer());
                        }
                    }
                }
                Err(e) => {
                    error!("tun read error: {e}");
                    break;
                }
            }
        })
    };

    let _ticker = {
        let clients = clients.clone();
        thread::spawn(move || loop {
            thread::sleep(Duration::from_millis(500));
            let conns: Vec<_> = clients.lock().unwrap().values().cloned().collect();
            for conn in conns {
                if let Err(e) = conn.on_timer_tick() {
                    warn!("{:?}: timer tick error: {e}", conn.peer());
                }
            }
        })
    };

    loop {
        let mut buf = [0u8; 1500];
        let (n, peer) = socket.recv_from(&mut buf)?;

        let existing = clients.lock().unwrap().get(&peer).cloned();
        if let Some(conn) = existing {
            if let Err(e) = conn.on_frame_received(&buf[..n]) {
                warn!("{peer}: error handling inbound frame: {e}");
            }
            continue;
        }

        // Unknown peer: only a SABM may open a new connection.
        match frame::decode_frame(&buf[..n]) {
            Ok((Header::Sabm { .. }, _)) => {
                let sink = UdpFrameSink::new(socket.clone(), peer);
                let host = TunHost::new(tun_writer.clone(), peer, disconnect_tx.clone());
                match Connection::new(peer, sink, host, config.clone(), Role::Responder) {
                    Ok(conn) => {
                        let conn = Arc::new(conn);
                        if let Err(e) = conn.on_frame_received(&buf[..n]) {
                            warn!("{peer}: error handling opening SABM: {e}");
                        }
                        clients.lock().unwrap().insert(peer, conn);
                        info!("{peer}: new connection accepted");
                    }
                    Err(e) => warn!("{peer}: failed to accept connection: {e}"),
                }
            }
            _ => {
                warn!("{}", swtp::SwtpError::UnknownPeer(peer));
            }
        }
    }
}
