use std::net::SocketAddr;

#[derive(Debug, thiserror::Error)]
pub enum SwtpError {
    #[error("payload of {size} bytes exceeds the maximum of {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("connection is not in the Connected state")]
    NotConnected,

    #[error("unrecognized SWTLLP EtherType {0:#06x}")]
    UnknownProtocol(u16),

    #[error("malformed frame: {0}")]
    MalformedFrame(&'static str),

    #[error("socket I/O error: {0}")]
    Socket(#[from] std::io::Error),

    #[error("tun device error: {0}")]
    Tun(#[from] tidy_tuntap::error::Error),

    #[error("{field} must be in [{min}, {max}], got {value}")]
    InvalidConfig {
        field: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },

    #[error("no established connection for peer {0}")]
    UnknownPeer(SocketAddr),
}

pub type Result<T> = std::result::Result<T, SwtpError>;
