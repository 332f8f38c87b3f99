//! Thin wrapper around the host TUN device (§6 external interfaces).

use std::fs::File;
use std::net::Ipv4Addr;
use std::os::fd::{AsRawFd, FromRawFd};

use nix::unistd::dup;
use tidy_tuntap::Tun;

use crate::error::Result;

/// Open `name`, assign it `addr`/`netmask`, and bring the interface up.
/// Mirrors the sequence an original C client performs against `/dev/net/tun`.
pub fn open(name: &str, addr: Ipv4Addr, netmask: Ipv4Addr) -> Result<Tun> {
    let tun = Tun::new(name, false)?;
    tun.set_addr(addr)?;
    tun.set_netmask(netmask)?;
    tun.bring_up()?;
    Ok(tun)
}

/// Duplicate the device's file descriptor so a second thread can hold its own
/// independently-owned handle for writing while the original keeps reading.
/// A tun character device supports concurrent read/write from separate file
/// descriptors without any additional locking.
pub fn duplicate_writer(tun: &Tun) -> Result<File> {
    let raw = dup(tun.as_raw_fd()).map_err(|e| std::io::Error::from_raw_os_error(e as i32))?;
    Ok(unsafe { File::from_raw_fd(raw) })
}
