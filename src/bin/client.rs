//! Client binary: dials a SWTP server and bridges a local TUN device through
//! it (§9.4), using the three-thread model the original client used
//! (uplink reader, socket reader, ticker).

use std::io::Read;
use std::net::{Ipv4Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use clap::Parser;
use log::{error, info, warn};

use swtp::config::Config;
use swtp::connection::{Connection, Role};
use swtp::socket::{TunHost, UdpFrameSink};
use swtp::tun;

#[derive(Parser, Debug)]
#[command(name = "swtp-client", about = "Connect a TUN device to a SWTP server")]
struct Args {
    /// Hostname or IP address of the server.
    #[arg(long)]
    hostname: String,

    /// Server UDP port.
    #[arg(long, default_value_t = 5228)]
    port: u16,

    /// Name of the TUN device to create.
    #[arg(long, default_value = "swtp0")]
    tun_name: String,

    /// IPv4 address assigned to the TUN device.
    #[arg(long, default_value = "10.10.10.2")]
    tun_addr: Ipv4Addr,

    /// IPv4 netmask assigned to the TUN device.
    #[arg(long, default_value = "255.255.255.0")]
    tun_netmask: Ipv4Addr,

    /// Advertised receive-window capacity.
    #[arg(long, default_value_t = 16)]
    receive_window_size: u16,

    /// Upper bound on the send window regardless of what the peer offers.
    #[arg(long)]
    max_send_window_size: Option<u16>,
}

fn main() {
    env_logger::init();
    if let Err(e) = run(Args::parse()) {
        error!("fatal: {e}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> swtp::Result<()> {
    let peer: SocketAddr = (args.hostname.as_str(), args.port)
        .to_socket_addrs()
        .map_err(swtp::SwtpError::Socket)?
        .next()
        .ok_or_else(|| swtp::SwtpError::MalformedFrame("could not resolve server hostname"))?;

    let mut tun_reader = tun::open(&args.tun_name, args.tun_addr, args.tun_netmask)?;
    let tun_writer = Arc::new(Mutex::new(tun::duplicate_writer(&tun_reader)?));

    let socket = Arc::new(UdpSocket::bind(("0.0.0.0", 0))?);
    socket.connect(peer)?;

    let config = Config::new(
        args.receive_window_size,
        args.max_send_window_size,
        Duration::from_secs(1),
        Duration::from_secs(5),
        3,
    )?;

    let (disconnect_tx, disconnect_rx) = mpsc::channel();
    let sink = UdpFrameSink::new(socket.clone(), peer);
    let host = TunHost::new(tun_writer.clone(), peer, disconnect_tx);
    let conn = Arc::new(Connection::new(peer, sink, host, config, Role::Initiator)?);
    info!("connecting to {peer}...");

    let _uplink = {
        let conn = conn.clone();
        thread::spawn(move || loop {
            let mut buf = [0u8; 1500];
            match tun_reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if let Err(e) = conn.send_llp_payload(&buf[..n]) {
                        warn!("dropping uplink packet: {e}");
                    }
                }
                Err(e) => {
                    error!("tun read error: {e}");
                    break;
                }
            }
        })
    };

    let _socket_reader = {
        let conn = conn.clone();
        let socket = socket.clone();
        thread::spawn(move || loop {
            let mut buf = [0u8; 1500];
            match socket.recv(&mut buf) {
                Ok(n) => {
                    if let Err(e) = conn.on_frame_received(&buf[..n]) {
                        warn!("error handling inbound frame: {e}");
                    }
                }
                Err(e) => {
                    error!("socket read error: {e}");
                    break;
                }
            }
        })
    };

    let _ticker = {
        let conn = conn.clone();
        thread::spawn(move || loop {
            thread::sleep(Duration::from_millis(500));
            if let Err(e) = conn.on_timer_tick() {
                warn!("timer tick error: {e}");
            }
        })
    };

    disconnect_rx.recv().ok();
    info!("connection to {peer} closed");
    Ok(())
}
